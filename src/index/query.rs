//! Generalized query indexes.
//!
//! Same bidirectional machinery as the taxonomy index, but keyed by any page
//! attribute. An index is a base structure plus a [`KeyExtractor`] that
//! pulls `(key, metadata)` pairs out of a page; the base handles diffing,
//! persistence and invariant checks. Built-ins cover sections, authors and
//! series.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Mutex;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::cache::persist;
use crate::core::keys::CacheKey;
use crate::core::page::Page;
use crate::index::bidirectional::BidirectionalIndex;

const QUERY_INDEX_VERSION: u32 = 1;

/// Per-key display metadata, e.g. an author's email or a section title.
pub type KeyMetadata = BTreeMap<String, Value>;

/// Hook that pulls index keys out of a page. Implementations must be pure:
/// the same page always yields the same keys.
pub trait KeyExtractor: Send + Sync {
    fn name(&self) -> &str;

    /// Extract `(key, metadata)` pairs. Multi-valued attributes (several
    /// authors) return several pairs; an empty vec skips the page.
    fn extract_keys(&self, page: &Page) -> Vec<(String, KeyMetadata)>;
}

#[derive(Debug, Serialize, Deserialize)]
struct QueryIndexFile {
    version: u32,
    name: String,
    entries: BTreeMap<String, BTreeSet<CacheKey>>,
    metadata: BTreeMap<String, KeyMetadata>,
}

#[derive(Debug, Default)]
struct QueryState {
    index: BidirectionalIndex<String, CacheKey>,
    metadata: BTreeMap<String, KeyMetadata>,
}

/// A persistent, invariant-checked index over one page attribute.
pub struct QueryIndex {
    extractor: Box<dyn KeyExtractor>,
    inner: Mutex<QueryState>,
}

impl QueryIndex {
    pub fn new(extractor: Box<dyn KeyExtractor>) -> Self {
        QueryIndex {
            extractor,
            inner: Mutex::new(QueryState::default()),
        }
    }

    pub fn name(&self) -> &str {
        self.extractor.name()
    }

    /// Re-extract a page's keys and diff them into the index. Returns every
    /// affected key.
    pub fn update_page(&self, page: &Page) -> BTreeSet<String> {
        let extracted = self.extractor.extract_keys(page);
        let mut state = self.lock();
        let mut keys = BTreeSet::new();
        for (key, metadata) in extracted {
            if !metadata.is_empty() || !state.metadata.contains_key(&key) {
                state.metadata.insert(key.clone(), metadata);
            }
            keys.insert(key);
        }
        let affected = state.index.update_page_keys(page.key.clone(), keys);
        for key in &affected {
            if !state.index.contains_key(key) {
                state.metadata.remove(key);
            }
        }
        affected
    }

    pub fn remove_page(&self, page: &CacheKey) -> BTreeSet<String> {
        let mut state = self.lock();
        let removed = state.index.remove_all_for_page(page);
        for key in &removed {
            if !state.index.contains_key(key) {
                state.metadata.remove(key);
            }
        }
        removed
    }

    pub fn pages_for_key(&self, key: &str) -> BTreeSet<CacheKey> {
        self.lock().index.pages_for_key(&key.to_string())
    }

    pub fn keys_for_page(&self, page: &CacheKey) -> BTreeSet<String> {
        self.lock().index.keys_for_page(page)
    }

    pub fn metadata_for_key(&self, key: &str) -> Option<KeyMetadata> {
        self.lock().metadata.get(key).cloned()
    }

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
        let mut entries = BTreeMap::new();
        for key in state.index.keys() {
            entries.insert(key.clone(), state.index.pages_for_key(key));
        }
        let file = QueryIndexFile {
            version: QUERY_INDEX_VERSION,
            name: self.extractor.name().to_string(),
            entries,
            metadata: state.metadata.clone(),
        };
        persist::save_json(path, &file, false)
    }

    /// Load previous state for this extractor's index; any corruption leaves
    /// the index empty.
    pub fn load_from_disk(extractor: Box<dyn KeyExtractor>, path: &Path) -> Self {
        let index = QueryIndex::new(extractor);
        let Some(file) = persist::load_versioned_json::<QueryIndexFile>(path, QUERY_INDEX_VERSION)
        else {
            return index;
        };
        if file.name != index.name() {
            warn!(
                path = %path.display(),
                expected = index.name(),
                found = %file.name,
                "query index name mismatch; starting cold"
            );
            return index;
        }
        {
            let mut state = index.lock();
            for (key, pages) in &file.entries {
                for page in pages {
                    state.index.add(key.clone(), page.clone());
                }
            }
            state.metadata = file.metadata;
            let violations = state.index.check_invariants();
            if !violations.is_empty() {
                warn!(
                    path = %path.display(),
                    violations = violations.len(),
                    "query index corrupt on load; starting cold"
                );
                state.index.clear();
                state.metadata.clear();
            }
        }
        index
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, QueryState> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Index pages by their owning section's directory name.
pub struct SectionExtractor;

impl KeyExtractor for SectionExtractor {
    fn name(&self) -> &str {
        "section"
    }

    fn extract_keys(&self, page: &Page) -> Vec<(String, KeyMetadata)> {
        let Some(section) = &page.section else {
            return Vec::new();
        };
        let name = section
            .as_str()
            .rsplit('/')
            .next()
            .unwrap_or(section.as_str());
        vec![(name.to_string(), KeyMetadata::new())]
    }
}

/// Index pages by `author` / `authors` frontmatter.
pub struct AuthorExtractor;

impl KeyExtractor for AuthorExtractor {
    fn name(&self) -> &str {
        "author"
    }

    fn extract_keys(&self, page: &Page) -> Vec<(String, KeyMetadata)> {
        let mut keys = Vec::new();
        if let Some(author) = page.metadata.get("author").and_then(Value::as_str) {
            keys.push((author.to_string(), KeyMetadata::new()));
        }
        if let Some(authors) = page.metadata.get("authors").and_then(Value::as_array) {
            for author in authors.iter().filter_map(Value::as_str) {
                keys.push((author.to_string(), KeyMetadata::new()));
            }
        }
        keys
    }
}

/// Index pages by `series` frontmatter, carrying the series position.
pub struct SeriesExtractor;

impl KeyExtractor for SeriesExtractor {
    fn name(&self) -> &str {
        "series"
    }

    fn extract_keys(&self, page: &Page) -> Vec<(String, KeyMetadata)> {
        let Some(series) = page.metadata.get("series").and_then(Value::as_str) else {
            return Vec::new();
        };
        let mut metadata = KeyMetadata::new();
        if let Some(part) = page.metadata.get("series_part") {
            metadata.insert("part".to_string(), part.clone());
        }
        vec![(series.to_string(), metadata)]
    }
}
