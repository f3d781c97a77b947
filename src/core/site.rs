//! In-memory site view consumed by the build engine.
//!
//! A `Site` is produced once per build by discovery and is read-only during
//! change detection; only the render orchestrator mutates it (to assign
//! output paths) and only between detection phases.

use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;

use crate::config::{EffectiveConfig, SiteConfig};
use crate::core::hashing::ContentHash;
use crate::core::keys::CacheKey;
use crate::core::page::{Asset, Page, Section};

/// Name of the state directory under the site root.
pub const STATE_DIR_NAME: &str = ".bengal";

#[derive(Debug)]
pub struct Site {
    pub root_path: PathBuf,
    pub output_dir: PathBuf,
    pub effective: EffectiveConfig,
    pub pages: Vec<Page>,
    pub assets: Vec<Asset>,
    pub sections: Vec<Section>,
    pub tracker: DependencyTracker,
    page_index: HashMap<CacheKey, usize>,
}

impl Site {
    pub fn new(root_path: PathBuf, effective: EffectiveConfig) -> Self {
        let output_dir = root_path.join(&effective.config.output_dir);
        Site {
            root_path,
            output_dir,
            effective,
            pages: Vec::new(),
            assets: Vec::new(),
            sections: Vec::new(),
            tracker: DependencyTracker::default(),
            page_index: HashMap::new(),
        }
    }

    pub fn config(&self) -> &SiteConfig {
        &self.effective.config
    }

    pub fn config_hash(&self) -> ContentHash {
        self.effective.config_hash()
    }

    pub fn state_dir(&self) -> PathBuf {
        self.root_path.join(STATE_DIR_NAME)
    }

    pub fn content_dir(&self) -> PathBuf {
        self.root_path.join("content")
    }

    pub fn data_dir(&self) -> PathBuf {
        self.root_path.join("data")
    }

    pub fn assets_dir(&self) -> PathBuf {
        self.root_path.join("assets")
    }

    pub fn site_templates_dir(&self) -> PathBuf {
        self.root_path.join("templates")
    }

    pub fn theme_templates_dir(&self) -> PathBuf {
        self.root_path
            .join("themes")
            .join(&self.effective.config.theme)
            .join("templates")
    }

    pub fn add_page(&mut self, page: Page) {
        self.page_index.insert(page.key.clone(), self.pages.len());
        self.pages.push(page);
    }

    pub fn page(&self, key: &CacheKey) -> Option<&Page> {
        self.page_index.get(key).map(|&i| &self.pages[i])
    }

    pub fn page_mut(&mut self, key: &CacheKey) -> Option<&mut Page> {
        let index = *self.page_index.get(key)?;
        self.pages.get_mut(index)
    }

    /// Non-generated pages (real content on disk or virtual sources).
    pub fn regular_pages(&self) -> impl Iterator<Item = &Page> {
        self.pages.iter().filter(|p| !p.generated)
    }

    /// Build-synthesized pages (tag pages, archives).
    pub fn generated_pages(&self) -> impl Iterator<Item = &Page> {
        self.pages.iter().filter(|p| p.generated)
    }

    /// Non-generated pages whose source lives under a section directory,
    /// recursively.
    pub fn pages_under(&self, section: &CacheKey) -> Vec<&Page> {
        let prefix = format!("{}/", section.as_str());
        self.regular_pages()
            .filter(|p| p.key.as_str().starts_with(&prefix))
            .collect()
    }

    pub fn section(&self, path: &CacheKey) -> Option<&Section> {
        self.sections.iter().find(|s| &s.path == path)
    }

    /// Keys of every current page, for cache garbage collection.
    pub fn live_page_keys(&self) -> BTreeSet<CacheKey> {
        self.pages.iter().map(|p| p.key.clone()).collect()
    }

    pub fn versioning_enabled(&self) -> bool {
        self.effective.config.versioning.enabled
    }
}

/// Cross-cutting dependency registry built during discovery.
///
/// Holds the relations that are not derivable from a single page: which
/// pages mirror each other across site versions, and which generated term
/// pages list a given member page.
#[derive(Debug, Default, Clone)]
pub struct DependencyTracker {
    /// Normalized path → version → page keys at that path.
    cross_version: HashMap<String, HashMap<String, BTreeSet<CacheKey>>>,
    /// Member page → generated term pages that list it.
    term_pages: HashMap<CacheKey, BTreeSet<CacheKey>>,
}

/// Pseudo-version used for `_shared/` content, which belongs to every
/// version of a versioned section.
pub const SHARED_VERSION: &str = "_shared";

impl DependencyTracker {
    pub fn register_versioned_page(&mut self, normalized: &str, version: &str, key: CacheKey) {
        self.cross_version
            .entry(normalized.to_string())
            .or_default()
            .entry(version.to_string())
            .or_default()
            .insert(key);
    }

    /// Pages in *other* versions that mirror the changed page's normalized
    /// path. `_shared` edits return every versioned mirror.
    pub fn get_cross_version_dependents(
        &self,
        changed_version: &str,
        normalized: &str,
    ) -> BTreeSet<CacheKey> {
        let Some(by_version) = self.cross_version.get(normalized) else {
            return BTreeSet::new();
        };
        by_version
            .iter()
            .filter(|(version, _)| version.as_str() != changed_version)
            .flat_map(|(_, keys)| keys.iter().cloned())
            .collect()
    }

    pub fn register_term_page(&mut self, member: CacheKey, term_page: CacheKey) {
        self.term_pages.entry(member).or_default().insert(term_page);
    }

    /// Generated term pages whose listings include this member page.
    pub fn get_term_pages_for_member(&self, member: &CacheKey) -> BTreeSet<CacheKey> {
        self.term_pages.get(member).cloned().unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.cross_version.is_empty() && self.term_pages.is_empty()
    }
}

/// Split a versioned page key into `(section, version, normalized path)`.
///
/// `content/docs/v2/guide.md` → `("docs", "v2", "docs/guide")`, and
/// `content/docs/_shared/glossary.md` → `("docs", "_shared",
/// "docs/glossary")`. Returns `None` for keys outside versioned sections.
pub fn split_versioned_key(
    key: &CacheKey,
    versioning: &crate::config::VersioningConfig,
) -> Option<(String, String, String)> {
    let rest = key.as_str().strip_prefix("content/")?;
    let (section, remainder) = rest.split_once('/')?;
    if !versioning.sections.iter().any(|s| s == section) {
        return None;
    }
    let (version, page_path) = remainder.split_once('/')?;
    let known = version == SHARED_VERSION || versioning.versions.iter().any(|v| v == version);
    if !known {
        return None;
    }

    let mut normalized = page_path.trim_end_matches(".md").to_string();
    for suffix in ["/_index", "/index"] {
        if let Some(stripped) = normalized.strip_suffix(suffix) {
            normalized = stripped.to_string();
            break;
        }
    }
    Some((
        section.to_string(),
        version.to_string(),
        format!("{}/{}", section, normalized),
    ))
}
