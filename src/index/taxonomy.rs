//! Persistent tag-to-pages index for incremental taxonomy updates.
//!
//! Tracks which pages carry which tags so a rebuild can touch only the
//! affected tag pages instead of regenerating the whole taxonomy. Slugs are
//! the canonical tag identity; the original-case name is kept per slug for
//! display. The on-disk file is invariant-checked on load and any
//! forward/reverse mismatch clears the index.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::{LazyLock, Mutex};

use anyhow::Result;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::cache::persist;
use crate::core::keys::CacheKey;
use crate::index::bidirectional::BidirectionalIndex;

const TAXONOMY_VERSION: u32 = 2;

static SLUG_SEPARATORS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^a-z0-9]+").unwrap());

/// Normalize a tag name to its slug: lowercase, non-alphanumeric runs
/// collapsed to `-`, no leading/trailing dashes.
pub fn slugify(name: &str) -> String {
    let lower = name.to_lowercase();
    SLUG_SEPARATORS
        .replace_all(&lower, "-")
        .trim_matches('-')
        .to_string()
}

#[derive(Debug, Serialize, Deserialize)]
struct TaxonomyFile {
    version: u32,
    /// slug → display name
    tag_names: BTreeMap<String, String>,
    /// slug → pages
    tags: BTreeMap<String, BTreeSet<CacheKey>>,
    /// page → slugs
    page_to_tags: BTreeMap<CacheKey, BTreeSet<String>>,
}

#[derive(Debug, Default)]
struct TaxonomyState {
    index: BidirectionalIndex<String, CacheKey>,
    tag_names: BTreeMap<String, String>,
}

/// Bidirectional tag index with per-slug display metadata.
///
/// All operations lock internally, so a shared reference can be used from
/// the render pool.
#[derive(Debug, Default)]
pub struct TaxonomyIndex {
    inner: Mutex<TaxonomyState>,
}

impl TaxonomyIndex {
    pub fn new() -> Self {
        TaxonomyIndex::default()
    }

    /// Replace a page's tags. Returns the affected slugs: added, removed,
    /// and retained (a retained tag's listing order may still change).
    pub fn update_page_tags(&self, page: &CacheKey, tags: &[String]) -> BTreeSet<String> {
        let mut state = self.lock();
        let mut slugs = BTreeSet::new();
        for tag in tags {
            let slug = slugify(tag);
            if slug.is_empty() {
                continue;
            }
            state
                .tag_names
                .entry(slug.clone())
                .or_insert_with(|| tag.clone());
            slugs.insert(slug);
        }
        let affected = state.index.update_page_keys(page.clone(), slugs);
        for slug in &affected {
            if !state.index.contains_key(slug) {
                state.tag_names.remove(slug);
            }
        }
        affected
    }

    /// Slugs recorded for a page by the previous build.
    pub fn previous_tags(&self, page: &CacheKey) -> BTreeSet<String> {
        self.lock().index.keys_for_page(page)
    }

    pub fn pages_for_tag(&self, slug: &str) -> BTreeSet<CacheKey> {
        self.lock().index.pages_for_key(&slug.to_string())
    }

    pub fn tag_name(&self, slug: &str) -> Option<String> {
        self.lock().tag_names.get(slug).cloned()
    }

    /// `(slug, display name, page count)` for every tag, sorted by slug.
    pub fn all_tags(&self) -> Vec<(String, String, usize)> {
        let state = self.lock();
        state
            .tag_names
            .iter()
            .map(|(slug, name)| {
                let count = state.index.pages_for_key(slug).len();
                (slug.clone(), name.clone(), count)
            })
            .collect()
    }

    pub fn remove_page(&self, page: &CacheKey) -> BTreeSet<String> {
        let mut state = self.lock();
        let removed = state.index.remove_all_for_page(page);
        for slug in &removed {
            if !state.index.contains_key(slug) {
                state.tag_names.remove(slug);
            }
        }
        removed
    }

    /// Drop entries for pages no longer in the site.
    pub fn gc(&self, live_pages: &BTreeSet<CacheKey>) -> usize {
        let stale: Vec<CacheKey> = {
            let state = self.lock();
            state
                .index
                .pages()
                .filter(|page| !live_pages.contains(*page))
                .cloned()
                .collect()
        };
        for page in &stale {
            self.remove_page(page);
        }
        stale.len()
    }

    pub fn check_invariants(&self) -> Vec<String> {
        self.lock().index.check_invariants()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().index.is_empty()
    }

    pub fn save_to_disk(&self, path: &Path) -> Result<()> {
        let state = self.lock();
        let violations = state.index.check_invariants();
        if !violations.is_empty() {
            warn!(
                violations = violations.len(),
                first = %violations[0],
                "taxonomy index invariant violation; clearing instead of saving"
            );
            drop(state);
            self.clear();
            return Ok(());
        }

        let mut tags = BTreeMap::new();
        for slug in state.tag_names.keys() {
            tags.insert(slug.clone(), state.index.pages_for_key(slug));
        }
        let mut page_to_tags = BTreeMap::new();
        for page in state.index.pages() {
            page_to_tags.insert(page.clone(), state.index.keys_for_page(page));
        }
        let file = TaxonomyFile {
            version: TAXONOMY_VERSION,
            tag_names: state.tag_names.clone(),
            tags,
            page_to_tags,
        };
        persist::save_json(path, &file, true)
    }

    /// Load from disk. Version mismatches, unreadable files and invariant
    /// violations all produce an empty index.
    pub fn load_from_disk(path: &Path) -> Self {
        let Some(file) = persist::load_versioned_json::<TaxonomyFile>(path, TAXONOMY_VERSION)
        else {
            return TaxonomyIndex::new();
        };

        let mut index = BidirectionalIndex::new();
        for (slug, pages) in &file.tags {
            for page in pages {
                index.add(slug.clone(), page.clone());
            }
        }
        // The reverse map is rederived from forward above; compare against
        // the stored reverse to detect corruption.
        let mut stored_pairs: BTreeSet<(CacheKey, String)> = BTreeSet::new();
        for (page, slugs) in &file.page_to_tags {
            for slug in slugs {
                stored_pairs.insert((page.clone(), slug.clone()));
            }
        }
        let mut derived_pairs: BTreeSet<(CacheKey, String)> = BTreeSet::new();
        for (slug, pages) in &file.tags {
            for page in pages {
                derived_pairs.insert((page.clone(), slug.clone()));
            }
        }
        if stored_pairs != derived_pairs {
            warn!(
                path = %path.display(),
                "taxonomy index forward/reverse mismatch on load; starting cold"
            );
            return TaxonomyIndex::new();
        }

        TaxonomyIndex {
            inner: Mutex::new(TaxonomyState {
                index,
                tag_names: file.tag_names,
            }),
        }
    }

    pub fn clear(&self) {
        let mut state = self.lock();
        state.index.clear();
        state.tag_names.clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TaxonomyState> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    use super::*;

    fn key(raw: &str) -> CacheKey {
        CacheKey::new(raw)
    }

    fn tags(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Python"), "python");
        assert_eq!(slugify("Machine Learning"), "machine-learning");
        assert_eq!(slugify("C++ / Rust"), "c-rust");
        assert_eq!(slugify("  spaced  "), "spaced");
        assert_eq!(slugify("!!!"), "");
    }

    #[test]
    fn test_update_page_tags_records_both_directions() {
        let index = TaxonomyIndex::new();
        let affected = index.update_page_tags(&key("content/post.md"), &tags(&["Python", "Async"]));

        assert_eq!(affected.len(), 2);
        assert!(index.pages_for_tag("python").contains("content/post.md"));
        assert_eq!(
            index.previous_tags(&key("content/post.md")),
            BTreeSet::from(["python".to_string(), "async".to_string()])
        );
    }

    #[test]
    fn test_display_name_preserved() {
        let index = TaxonomyIndex::new();
        index.update_page_tags(&key("content/post.md"), &tags(&["Machine Learning"]));
        assert_eq!(
            index.tag_name("machine-learning"),
            Some("Machine Learning".to_string())
        );
    }

    #[test]
    fn test_tag_transition_reports_union() {
        let index = TaxonomyIndex::new();
        index.update_page_tags(&key("content/post.md"), &tags(&["python"]));
        let affected = index.update_page_tags(&key("content/post.md"), &tags(&["python", "async"]));

        // python is retained but still affected (listing order can change).
        assert_eq!(
            affected,
            BTreeSet::from(["python".to_string(), "async".to_string()])
        );
    }

    #[test]
    fn test_orphaned_tag_name_dropped() {
        let index = TaxonomyIndex::new();
        index.update_page_tags(&key("content/post.md"), &tags(&["python"]));
        index.update_page_tags(&key("content/post.md"), &tags(&["rust"]));

        assert_eq!(index.tag_name("python"), None);
        assert!(index.pages_for_tag("python").is_empty());
    }

    #[test]
    fn test_remove_page() {
        let index = TaxonomyIndex::new();
        index.update_page_tags(&key("content/a.md"), &tags(&["python"]));
        index.update_page_tags(&key("content/b.md"), &tags(&["python"]));

        let removed = index.remove_page(&key("content/a.md"));
        assert_eq!(removed, BTreeSet::from(["python".to_string()]));
        assert_eq!(index.pages_for_tag("python").len(), 1);
        assert!(index.tag_name("python").is_some());
    }

    #[test]
    fn test_invariants_after_updates() {
        let index = TaxonomyIndex::new();
        for i in 0..30 {
            index.update_page_tags(
                &key(&format!("content/post-{}.md", i)),
                &tags(&[&format!("tag-{}", i % 4), "common"]),
            );
        }
        index.remove_page(&key("content/post-3.md"));
        assert!(index.check_invariants().is_empty());
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("taxonomy_index.json.zst");

        let index = TaxonomyIndex::new();
        index.update_page_tags(&key("content/a.md"), &tags(&["Python", "Tutorial"]));
        index.update_page_tags(&key("content/b.md"), &tags(&["Python"]));
        index.save_to_disk(&path).unwrap();

        let loaded = TaxonomyIndex::load_from_disk(&path);
        assert_eq!(loaded.pages_for_tag("python").len(), 2);
        assert_eq!(loaded.tag_name("tutorial"), Some("Tutorial".to_string()));
        assert_eq!(
            loaded.previous_tags(&key("content/a.md")),
            BTreeSet::from(["python".to_string(), "tutorial".to_string()])
        );
        assert!(loaded.check_invariants().is_empty());
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let dir = tempdir().unwrap();
        let loaded = TaxonomyIndex::load_from_disk(&dir.path().join("nope.json"));
        assert!(loaded.is_empty());
    }

    #[test]
    fn test_load_clears_on_corruption() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("taxonomy_index.json");
        // Forward claims a page the reverse side does not know about.
        let corrupt = serde_json::json!({
            "version": TAXONOMY_VERSION,
            "tag_names": {"python": "Python"},
            "tags": {"python": ["content/a.md"]},
            "page_to_tags": {}
        });
        std::fs::write(&path, corrupt.to_string()).unwrap();

        let loaded = TaxonomyIndex::load_from_disk(&path);
        assert!(loaded.is_empty());
    }

    #[test]
    fn test_gc_drops_dead_pages() {
        let index = TaxonomyIndex::new();
        index.update_page_tags(&key("content/keep.md"), &tags(&["python"]));
        index.update_page_tags(&key("content/gone.md"), &tags(&["python", "old"]));

        let live = BTreeSet::from([key("content/keep.md")]);
        let removed = index.gc(&live);
        assert_eq!(removed, 1);
        assert_eq!(index.pages_for_tag("python").len(), 1);
        assert!(index.tag_name("old").is_none());
    }
}
