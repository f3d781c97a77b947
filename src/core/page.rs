//! Page, section and asset model.
//!
//! The incremental engine treats page bodies as opaque strings; everything
//! it needs for dependency tracking lives in explicit fields here rather
//! than in the metadata map. Virtual pages (no on-disk markdown source)
//! carry a [`VirtualSource`] describing what actually produced them.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde_json::Value;

use crate::core::keys::CacheKey;

/// Underlying source of a page that has no markdown file of its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VirtualSource {
    /// Extracted API documentation; `source_file` is the code file it was
    /// generated from, relative to the site root or absolute.
    Autodoc { source_file: PathBuf },
    /// Generated taxonomy term page (tag page, tag index).
    Taxonomy { term: String },
    /// Generated CLI reference page.
    Cli { source_file: PathBuf },
    /// Anything else synthesized at build time.
    Fallback { template: String, title: String },
}

/// A single page as the build engine sees it.
#[derive(Debug, Clone)]
pub struct Page {
    /// Source file path. For virtual pages this is a synthetic path under
    /// `_generated/` that never exists on disk.
    pub source_path: PathBuf,
    /// Canonical cache key, derived from `source_path`.
    pub key: CacheKey,
    /// Output path, assigned by the renderer just before rendering.
    pub output_path: Option<PathBuf>,
    pub title: String,
    /// Raw body. Opaque to the engine.
    pub content: String,
    /// Frontmatter metadata. Plugin-provided fields only; engine-relevant
    /// values are promoted to explicit fields.
    pub metadata: BTreeMap<String, Value>,
    pub tags: Vec<String>,
    /// Key of the owning section's directory, if any.
    pub section: Option<CacheKey>,
    /// Adjacent pages in section order.
    pub prev: Option<CacheKey>,
    pub next: Option<CacheKey>,
    /// True for pages synthesized by the build (tag pages, archives).
    pub generated: bool,
    pub virtual_source: Option<VirtualSource>,
    /// Template name, e.g. `page.html`.
    pub template: String,
    /// Version this page belongs to, for versioned sites.
    pub version: Option<String>,
}

impl Page {
    pub fn new(source_path: PathBuf, key: CacheKey) -> Self {
        Page {
            source_path,
            key,
            output_path: None,
            title: String::new(),
            content: String::new(),
            metadata: BTreeMap::new(),
            tags: Vec::new(),
            section: None,
            prev: None,
            next: None,
            generated: false,
            virtual_source: None,
            template: "page.html".to_string(),
            version: None,
        }
    }

    pub fn is_virtual(&self) -> bool {
        self.virtual_source.is_some()
    }

    /// True for `_index.md` / `index.md` files, the only pages that can
    /// carry a cascade.
    pub fn is_section_index(&self) -> bool {
        matches!(
            self.source_path.file_stem().and_then(|s| s.to_str()),
            Some("_index") | Some("index")
        )
    }

    /// Cascade table from frontmatter, if any.
    pub fn cascade(&self) -> Option<&Value> {
        self.metadata.get("cascade")
    }

    /// Extractor-provided hash of the documented API surface, for autodoc
    /// pages.
    pub fn doc_content_hash(&self) -> Option<&str> {
        self.metadata.get("doc_content_hash").and_then(Value::as_str)
    }

    /// The page's URL route, e.g. `/docs/guide/`.
    pub fn route(&self) -> String {
        let raw = self.key.as_str();
        let trimmed = raw
            .strip_prefix("content/")
            .or_else(|| raw.strip_prefix("_generated/"))
            .unwrap_or(raw)
            .trim_end_matches(".md");
        let trimmed = trimmed
            .strip_suffix("/_index")
            .or_else(|| trimmed.strip_suffix("/index"))
            .unwrap_or(trimmed);
        if trimmed.is_empty() || trimmed == "_index" || trimmed == "index" {
            "/".to_string()
        } else {
            format!("/{}/", trimmed)
        }
    }
}

/// A directory of pages under `content/`.
#[derive(Debug, Clone)]
pub struct Section {
    /// Key of the section directory, e.g. `content/docs`.
    pub path: CacheKey,
    /// Key of the section's `_index.md`/`index.md`, if present.
    pub index_page: Option<CacheKey>,
    /// Direct (non-recursive) member pages.
    pub pages: Vec<CacheKey>,
}

/// A static asset copied (and fingerprinted elsewhere) into the output tree.
#[derive(Debug, Clone)]
pub struct Asset {
    pub source_path: PathBuf,
    pub key: CacheKey,
    pub output_path: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    fn page_for(key: &str) -> Page {
        Page::new(PathBuf::from(key), CacheKey::new(key))
    }

    #[test]
    fn test_section_index_detection() {
        assert!(page_for("content/docs/_index.md").is_section_index());
        assert!(page_for("content/docs/index.md").is_section_index());
        assert!(!page_for("content/docs/guide.md").is_section_index());
    }

    #[test]
    fn test_cascade_lookup() {
        let mut page = page_for("content/docs/_index.md");
        assert!(page.cascade().is_none());
        page.metadata
            .insert("cascade".to_string(), json!({"draft": false}));
        assert_eq!(page.cascade(), Some(&json!({"draft": false})));
    }

    #[test]
    fn test_route_for_regular_page() {
        assert_eq!(page_for("content/docs/guide.md").route(), "/docs/guide/");
    }

    #[test]
    fn test_route_for_section_index() {
        assert_eq!(page_for("content/docs/_index.md").route(), "/docs/");
        assert_eq!(page_for("content/_index.md").route(), "/");
    }

    #[test]
    fn test_route_for_generated_page() {
        assert_eq!(page_for("_generated/tags/python.md").route(), "/tags/python/");
        assert_eq!(page_for("_generated/tags/_index.md").route(), "/tags/");
    }

    #[test]
    fn test_virtual_page() {
        let mut page = page_for("_generated/tags/python.md");
        assert!(!page.is_virtual());
        page.virtual_source = Some(VirtualSource::Taxonomy {
            term: "python".to_string(),
        });
        assert!(page.is_virtual());
    }
}
