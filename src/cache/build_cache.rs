//! Build cache: fingerprints, dependencies and claims from the last build.
//!
//! This is the single JSON document behind `.bengal/build-cache.json.zst`.
//! It is read-only during change detection; only the cache manager writes to
//! it, between builds.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cache::persist;
use crate::core::hashing::{ContentHash, hash_file};
use crate::core::keys::{CacheKey, content_key};

pub const BUILD_CACHE_VERSION: u32 = 3;

/// Fingerprint of one tracked file: content hash plus the cheap mtime/size
/// pre-check values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileFingerprint {
    pub hash: ContentHash,
    pub mtime: u64,
    pub size: u64,
}

impl FileFingerprint {
    /// Fingerprint a file on disk. `None` if it cannot be stat'ed.
    pub fn of(path: &Path) -> Option<FileFingerprint> {
        let meta = fs::metadata(path).ok()?;
        let mtime = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Some(FileFingerprint {
            hash: hash_file(path),
            mtime,
            size: meta.len(),
        })
    }
}

/// A claimed output route, for detecting two pages writing one URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlClaim {
    pub page: CacheKey,
    #[serde(default)]
    pub version: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BuildCache {
    pub version: u32,
    /// Canonical key → fingerprint for every tracked source, template, data
    /// and asset file.
    #[serde(default)]
    pub file_fingerprints: BTreeMap<CacheKey, FileFingerprint>,
    /// Dependency key (template key, data key) → pages that used it in the
    /// last build. Rebuilt from the effect tracer at save time.
    #[serde(default)]
    pub page_dependencies: BTreeMap<CacheKey, BTreeSet<CacheKey>>,
    /// Page → tag set at last build, for taxonomy diffing.
    #[serde(default)]
    pub previous_tags: BTreeMap<CacheKey, BTreeSet<String>>,
    /// Autodoc source file key → generated pages depending on it.
    #[serde(default)]
    pub autodoc_dependencies: BTreeMap<CacheKey, BTreeSet<CacheKey>>,
    /// `(source, page)` → doc-content hash at last build. Lets cosmetic
    /// source edits skip rebuilds of unchanged API pages.
    #[serde(default)]
    pub doc_content_hashes: BTreeMap<String, String>,
    /// Section-index page → hash of its cascade frontmatter at last build.
    #[serde(default)]
    pub cascade_hashes: BTreeMap<CacheKey, ContentHash>,
    /// Page → (prev, next) at last build, for detecting structural
    /// navigation changes after a page is added or removed.
    #[serde(default)]
    pub nav_neighbors: BTreeMap<CacheKey, (Option<CacheKey>, Option<CacheKey>)>,
    /// Output route → claiming page.
    #[serde(default)]
    pub url_claims: BTreeMap<String, UrlClaim>,
    #[serde(default)]
    pub config_hash: String,
    /// Site root, attached after load. Never serialized.
    #[serde(skip)]
    root_path: PathBuf,
}

impl BuildCache {
    pub fn new(root_path: PathBuf) -> Self {
        BuildCache {
            version: BUILD_CACHE_VERSION,
            file_fingerprints: BTreeMap::new(),
            page_dependencies: BTreeMap::new(),
            previous_tags: BTreeMap::new(),
            autodoc_dependencies: BTreeMap::new(),
            doc_content_hashes: BTreeMap::new(),
            cascade_hashes: BTreeMap::new(),
            nav_neighbors: BTreeMap::new(),
            url_claims: BTreeMap::new(),
            config_hash: String::new(),
            root_path,
        }
    }

    /// Load from disk, or start cold when the file is missing, unreadable
    /// or version-mismatched.
    pub fn load(path: &Path, root_path: PathBuf) -> Self {
        match persist::load_versioned_json::<BuildCache>(path, BUILD_CACHE_VERSION) {
            Some(mut cache) => {
                cache.root_path = root_path;
                cache
            }
            None => BuildCache::new(root_path),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        persist::save_json(path, self, true)
    }

    pub fn root_path(&self) -> &Path {
        &self.root_path
    }

    fn key_for(&self, path: &Path) -> CacheKey {
        content_key(path, &self.root_path)
    }

    /// Has the file changed since its recorded fingerprint?
    ///
    /// Matching mtime and size short-circuit as unchanged; otherwise the
    /// content hash decides. Untracked and unreadable files read as changed.
    pub fn is_changed(&self, path: &Path) -> bool {
        let key = self.key_for(path);
        let Some(fingerprint) = self.file_fingerprints.get(&key) else {
            return true;
        };
        let Ok(meta) = fs::metadata(path) else {
            return true;
        };
        let mtime = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs())
            .unwrap_or(0);
        if mtime == fingerprint.mtime && meta.len() == fingerprint.size {
            return false;
        }
        hash_file(path) != fingerprint.hash
    }

    /// Record the current fingerprint of a file.
    pub fn update_file(&mut self, path: &Path) {
        let key = self.key_for(path);
        match FileFingerprint::of(path) {
            Some(fingerprint) => {
                self.file_fingerprints.insert(key, fingerprint);
            }
            None => {
                debug!(path = %path.display(), "dropping fingerprint for unreadable file");
                self.file_fingerprints.remove(&key);
            }
        }
    }

    pub fn remove_file(&mut self, path: &Path) {
        let key = self.key_for(path);
        self.file_fingerprints.remove(&key);
    }

    /// Pages that recorded a dependency on this key in the last build.
    pub fn get_affected_pages(&self, dep_key: &CacheKey) -> BTreeSet<CacheKey> {
        self.page_dependencies.get(dep_key).cloned().unwrap_or_default()
    }

    pub fn set_page_dependencies(
        &mut self,
        dependencies: BTreeMap<CacheKey, BTreeSet<CacheKey>>,
    ) {
        self.page_dependencies = dependencies;
    }

    pub fn get_previous_tags(&self, page: &CacheKey) -> BTreeSet<String> {
        self.previous_tags.get(page).cloned().unwrap_or_default()
    }

    pub fn set_previous_tags(&mut self, page: CacheKey, tags: BTreeSet<String>) {
        if tags.is_empty() {
            self.previous_tags.remove(&page);
        } else {
            self.previous_tags.insert(page, tags);
        }
    }

    // Autodoc source registry.

    pub fn autodoc_source_files(&self) -> Vec<CacheKey> {
        self.autodoc_dependencies.keys().cloned().collect()
    }

    pub fn get_affected_autodoc_pages(&self, source: &CacheKey) -> BTreeSet<CacheKey> {
        self.autodoc_dependencies.get(source).cloned().unwrap_or_default()
    }

    pub fn record_autodoc_dependency(&mut self, source: CacheKey, page: CacheKey) {
        self.autodoc_dependencies.entry(source).or_default().insert(page);
    }

    fn doc_hash_key(source: &CacheKey, page: &CacheKey) -> String {
        format!("{}|{}", source, page)
    }

    /// Has the documented API surface for `(source, page)` changed?
    /// A missing hash on either side means "changed"; the filter is only
    /// ever an optimization.
    pub fn is_doc_content_changed(
        &self,
        source: &CacheKey,
        page: &CacheKey,
        current_hash: &str,
    ) -> bool {
        match self.doc_content_hashes.get(&Self::doc_hash_key(source, page)) {
            Some(stored) => stored != current_hash,
            None => true,
        }
    }

    pub fn set_doc_content_hash(&mut self, source: &CacheKey, page: &CacheKey, hash: String) {
        self.doc_content_hashes
            .insert(Self::doc_hash_key(source, page), hash);
    }

    // Cascade tracking.

    pub fn cascade_hash(&self, page: &CacheKey) -> Option<&ContentHash> {
        self.cascade_hashes.get(page)
    }

    pub fn set_cascade_hash(&mut self, page: CacheKey, hash: ContentHash) {
        self.cascade_hashes.insert(page, hash);
    }

    // Navigation neighbors.

    pub fn set_nav_neighbors(
        &mut self,
        page: CacheKey,
        prev: Option<CacheKey>,
        next: Option<CacheKey>,
    ) {
        self.nav_neighbors.insert(page, (prev, next));
    }

    /// Pages whose prev/next differ from the recorded neighbors. Pages
    /// never recorded are not reported; first builds rebuild everything
    /// anyway.
    pub fn nav_changed_pages<'a>(
        &self,
        current: impl Iterator<Item = (&'a CacheKey, Option<&'a CacheKey>, Option<&'a CacheKey>)>,
    ) -> BTreeSet<CacheKey> {
        let mut changed = BTreeSet::new();
        for (page, prev, next) in current {
            if let Some((stored_prev, stored_next)) = self.nav_neighbors.get(page) {
                if stored_prev.as_ref() != prev || stored_next.as_ref() != next {
                    changed.insert(page.clone());
                }
            }
        }
        changed
    }

    // URL claims.

    /// Claim a route for a page. Returns the previous claimant when another
    /// page already holds the route.
    pub fn claim_url(&mut self, route: String, claim: UrlClaim) -> Option<UrlClaim> {
        match self.url_claims.get(&route) {
            Some(existing) if existing.page != claim.page => {
                let conflict = existing.clone();
                self.url_claims.insert(route, claim);
                Some(conflict)
            }
            _ => {
                self.url_claims.insert(route, claim);
                None
            }
        }
    }

    /// Validate the stored config hash against the current one, storing the
    /// new value. Returns `false` when the effective config changed.
    pub fn validate_config(&mut self, current: &ContentHash) -> bool {
        if self.config_hash.is_empty() {
            self.config_hash = current.as_str().to_string();
            return true;
        }
        if self.config_hash == current.as_str() {
            return true;
        }
        self.config_hash = current.as_str().to_string();
        false
    }

    /// Drop fingerprints, tags, claims and dependencies for pages that no
    /// longer exist.
    pub fn gc(&mut self, live_keys: &BTreeSet<CacheKey>) {
        self.previous_tags.retain(|page, _| live_keys.contains(page));
        self.cascade_hashes.retain(|page, _| live_keys.contains(page));
        self.nav_neighbors.retain(|page, _| live_keys.contains(page));
        self.url_claims
            .retain(|_, claim| live_keys.contains(&claim.page));
        for pages in self.autodoc_dependencies.values_mut() {
            pages.retain(|page| live_keys.contains(page));
        }
        self.autodoc_dependencies.retain(|_, pages| !pages.is_empty());
        for pages in self.page_dependencies.values_mut() {
            pages.retain(|page| live_keys.contains(page));
        }
        self.page_dependencies.retain(|_, pages| !pages.is_empty());
    }
}
