//! Content-addressed provenance store.
//!
//! On-disk layout under the state directory:
//!
//! ```text
//! provenance/
//!   index.json        page_key → combined_hash
//!   records/
//!     <combined_hash>.json
//!   subvenance.json   input_hash → [page_keys]
//! ```
//!
//! The subvenance index is the reverse of provenance: given an input hash,
//! which pages depend on it. It makes "what is affected by X?" an O(1)
//! lookup instead of a scan over every record.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::PathBuf;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::cache::persist;
use crate::core::hashing::ContentHash;
use crate::core::keys::CacheKey;
use crate::provenance::types::{Provenance, ProvenanceRecord};

const INDEX_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct IndexFile {
    version: u32,
    pages: BTreeMap<CacheKey, ContentHash>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SubvenanceFile {
    version: u32,
    inputs: BTreeMap<ContentHash, BTreeSet<CacheKey>>,
}

/// Persistent store of provenance records, indexed both ways.
#[derive(Debug)]
pub struct ProvenanceStore {
    cache_dir: PathBuf,
    index: BTreeMap<CacheKey, ContentHash>,
    subvenance: BTreeMap<ContentHash, BTreeSet<CacheKey>>,
    /// Record files loaded on demand, cached for the process lifetime.
    records: HashMap<ContentHash, ProvenanceRecord>,
    loaded: bool,
    dirty: bool,
}

impl ProvenanceStore {
    pub fn new(cache_dir: PathBuf) -> Self {
        ProvenanceStore {
            cache_dir,
            index: BTreeMap::new(),
            subvenance: BTreeMap::new(),
            records: HashMap::new(),
            loaded: false,
            dirty: false,
        }
    }

    fn records_dir(&self) -> PathBuf {
        self.cache_dir.join("records")
    }

    fn index_path(&self) -> PathBuf {
        self.cache_dir.join("index.json")
    }

    fn subvenance_path(&self) -> PathBuf {
        self.cache_dir.join("subvenance.json")
    }

    /// Load indexes from disk on first query. Unreadable or mismatched files
    /// leave the store empty; the next build writes fresh state.
    fn ensure_loaded(&mut self) {
        if self.loaded {
            return;
        }
        if let Some(file) =
            persist::load_versioned_json::<IndexFile>(&self.index_path(), INDEX_VERSION)
        {
            self.index = file.pages;
        }
        if let Some(file) =
            persist::load_versioned_json::<SubvenanceFile>(&self.subvenance_path(), INDEX_VERSION)
        {
            self.subvenance = file.inputs;
        }
        self.loaded = true;
    }

    fn load_record(&mut self, combined_hash: &ContentHash) -> Option<ProvenanceRecord> {
        if let Some(record) = self.records.get(combined_hash) {
            return Some(record.clone());
        }
        let path = self.records_dir().join(format!("{}.json", combined_hash));
        let record: ProvenanceRecord = persist::load_json(&path)?;
        self.records.insert(combined_hash.clone(), record.clone());
        Some(record)
    }

    /// Stored combined hash for a page, if any.
    pub fn stored_hash(&mut self, page_key: &CacheKey) -> Option<ContentHash> {
        self.ensure_loaded();
        self.index.get(page_key).cloned()
    }

    /// Full provenance record for a page: O(1) index lookup plus one record
    /// read.
    pub fn get(&mut self, page_key: &CacheKey) -> Option<ProvenanceRecord> {
        self.ensure_loaded();
        let combined_hash = self.index.get(page_key)?.clone();
        self.load_record(&combined_hash)
    }

    /// True iff the stored combined hash equals the current provenance's.
    pub fn is_fresh(&mut self, page_key: &CacheKey, current: &Provenance) -> bool {
        self.ensure_loaded();
        match self.index.get(page_key) {
            Some(stored) => *stored == current.combined_hash,
            None => false,
        }
    }

    /// Store a record: updates the page index, writes the record file
    /// atomically, and extends the subvenance reverse index.
    pub fn store(&mut self, record: ProvenanceRecord) -> Result<()> {
        self.ensure_loaded();

        let combined_hash = record.provenance.combined_hash.clone();
        self.index
            .insert(record.page_key.clone(), combined_hash.clone());
        for input in &record.provenance.inputs {
            self.subvenance
                .entry(input.hash.clone())
                .or_default()
                .insert(record.page_key.clone());
        }

        let path = self.records_dir().join(format!("{}.json", combined_hash));
        persist::save_json(&path, &record, false)?;
        self.records.insert(combined_hash, record);
        self.dirty = true;
        Ok(())
    }

    /// Subvenance query: which pages depend on this input hash?
    pub fn get_affected_by(&mut self, input_hash: &ContentHash) -> BTreeSet<CacheKey> {
        self.ensure_loaded();
        self.subvenance.get(input_hash).cloned().unwrap_or_default()
    }

    /// Persist both indexes, only if something changed.
    pub fn save(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }
        persist::save_json(
            &self.index_path(),
            &IndexFile {
                version: INDEX_VERSION,
                pages: self.index.clone(),
            },
            false,
        )?;
        persist::save_json(
            &self.subvenance_path(),
            &SubvenanceFile {
                version: INDEX_VERSION,
                inputs: self.subvenance.clone(),
            },
            false,
        )?;
        self.dirty = false;
        Ok(())
    }

    /// Remove index entries, record files and subvenance entries for pages
    /// no longer in the site. Returns the number of pages collected.
    pub fn gc(&mut self, live_keys: &BTreeSet<CacheKey>) -> usize {
        self.ensure_loaded();

        let stale: Vec<CacheKey> = self
            .index
            .keys()
            .filter(|key| !live_keys.contains(*key))
            .cloned()
            .collect();

        for page_key in &stale {
            if let Some(combined_hash) = self.index.remove(page_key) {
                let path = self.records_dir().join(format!("{}.json", combined_hash));
                let _ = fs::remove_file(path);
                self.records.remove(&combined_hash);
            }
        }

        self.subvenance.retain(|_, pages| {
            pages.retain(|page| live_keys.contains(page));
            !pages.is_empty()
        });

        if !stale.is_empty() {
            self.dirty = true;
        }
        stale.len()
    }

    /// Counts for diagnostics.
    pub fn stats(&mut self) -> ProvenanceStoreStats {
        self.ensure_loaded();
        ProvenanceStoreStats {
            pages_tracked: self.index.len(),
            records_cached: self.records.len(),
            subvenance_entries: self.subvenance.len(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProvenanceStoreStats {
    pub pages_tracked: usize,
    pub records_cached: usize,
    pub subvenance_entries: usize,
}
