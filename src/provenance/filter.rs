//! Provenance-based incremental filter: the fast path of the build.
//!
//! For each page the filter decides skip-or-rebuild by comparing a freshly
//! computed provenance hash against the stored one. Ordinary content pages
//! take a fast path that hashes only `{content, config}`; virtual pages and
//! fast-path misses fall through to the full input reconstruction.
//!
//! The fast path reports an explicit outcome instead of falling back on
//! arbitrary errors: only "not applicable" reaches the slow path, programmer
//! errors propagate.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::cache::persist;
use crate::core::hashing::{ContentHash, hash_content, hash_file};
use crate::core::keys::CacheKey;
use crate::core::page::{Asset, Page, VirtualSource};
use crate::core::site::Site;
use crate::index::taxonomy::slugify;
use crate::provenance::store::ProvenanceStore;
use crate::provenance::types::{InputKind, Provenance, ProvenanceRecord};

const ASSET_HASHES_VERSION: u32 = 1;

/// Key under which the effective configuration enters every provenance.
pub const CONFIG_INPUT_KEY: &str = "site_config";

#[derive(Debug, Serialize, Deserialize)]
struct AssetHashFile {
    version: u32,
    hashes: BTreeMap<CacheKey, ContentHash>,
}

/// Outcome of the fast-path provenance check.
enum FastPath {
    /// Combined hash matched the stored value; the page can be skipped.
    Hit,
    /// Hash computed but did not match; the full path decides.
    Miss,
    /// Fast path does not apply (virtual page, missing source).
    NotApplicable,
}

/// What the filter decided for a build.
#[derive(Debug, Default)]
pub struct ProvenanceFilterResult {
    pub pages_to_build: Vec<CacheKey>,
    pub pages_skipped: Vec<CacheKey>,
    pub total_pages: usize,
    pub cache_hits: usize,
    pub cache_misses: usize,
    pub affected_tags: BTreeSet<String>,
    pub affected_sections: BTreeSet<CacheKey>,
    pub changed_page_paths: BTreeSet<PathBuf>,
}

impl ProvenanceFilterResult {
    pub fn hit_rate(&self) -> f64 {
        if self.total_pages == 0 {
            0.0
        } else {
            (self.cache_hits as f64 / self.total_pages as f64) * 100.0
        }
    }

    pub fn is_skip(&self) -> bool {
        self.pages_to_build.is_empty()
    }
}

/// Session-scoped filter over one build. Holds caches of file hashes and
/// computed provenances so repeated lookups within a build stay cheap.
pub struct ProvenanceFilter<'a> {
    site: &'a Site,
    config_hash: ContentHash,
    asset_hashes_path: PathBuf,
    asset_hashes: BTreeMap<CacheKey, ContentHash>,
    asset_hashes_dirty: bool,
    file_hashes: HashMap<PathBuf, ContentHash>,
    computed: HashMap<CacheKey, Provenance>,
}

impl<'a> ProvenanceFilter<'a> {
    pub fn new(site: &'a Site) -> Self {
        let asset_hashes_path = site.state_dir().join("asset_hashes.json");
        let asset_hashes = persist::load_versioned_json::<AssetHashFile>(
            &asset_hashes_path,
            ASSET_HASHES_VERSION,
        )
        .map(|file| file.hashes)
        .unwrap_or_default();

        ProvenanceFilter {
            site,
            config_hash: site.config_hash(),
            asset_hashes_path,
            asset_hashes,
            asset_hashes_dirty: false,
            file_hashes: HashMap::new(),
            computed: HashMap::new(),
        }
    }

    /// Decide skip-or-rebuild for each page.
    pub fn filter_pages(
        &mut self,
        store: &mut ProvenanceStore,
        pages: &[&Page],
        forced: &BTreeSet<CacheKey>,
    ) -> Result<ProvenanceFilterResult> {
        let mut result = ProvenanceFilterResult {
            total_pages: pages.len(),
            ..Default::default()
        };

        for page in pages {
            if forced.contains(&page.key) {
                self.mark_build(&mut result, page);
                continue;
            }

            let Some(stored) = store.stored_hash(&page.key) else {
                self.mark_build(&mut result, page);
                continue;
            };

            match self.fast_path(page, &stored) {
                FastPath::Hit => {
                    result.cache_hits += 1;
                    result.pages_skipped.push(page.key.clone());
                    continue;
                }
                FastPath::Miss | FastPath::NotApplicable => {}
            }

            let provenance = self.compute_provenance(page)?;
            if provenance.combined_hash == stored {
                result.cache_hits += 1;
                result.pages_skipped.push(page.key.clone());
            } else {
                self.mark_build(&mut result, page);
            }
        }

        Ok(result)
    }

    fn mark_build(&self, result: &mut ProvenanceFilterResult, page: &Page) {
        result.cache_misses += 1;
        result.pages_to_build.push(page.key.clone());
        result.changed_page_paths.insert(page.source_path.clone());
        for tag in &page.tags {
            let slug = slugify(tag);
            if !slug.is_empty() {
                result.affected_tags.insert(slug);
            }
        }
        if let Some(section) = &page.section {
            result.affected_sections.insert(section.clone());
        }
    }

    /// Content + config only, for real pages whose source exists. This is
    /// the common case and avoids reconstructing virtual inputs.
    fn fast_path(&mut self, page: &Page, stored: &ContentHash) -> FastPath {
        if page.is_virtual() || !page.source_path.exists() {
            return FastPath::NotApplicable;
        }
        let provenance = self.content_config_provenance(page);
        let hit = provenance.combined_hash == *stored;
        self.computed.insert(page.key.clone(), provenance);
        if hit { FastPath::Hit } else { FastPath::Miss }
    }

    fn content_config_provenance(&mut self, page: &Page) -> Provenance {
        if let Some(cached) = self.computed.get(&page.key) {
            return cached.clone();
        }
        let content_hash = self.file_hash(&page.source_path);
        Provenance::new()
            .with_input(InputKind::Content, page.key.clone(), content_hash)
            .with_input(
                InputKind::Config,
                CacheKey::new(CONFIG_INPUT_KEY),
                self.config_hash.clone(),
            )
    }

    /// Full input reconstruction: real source, or the virtual-page rules
    /// (autodoc source, taxonomy term, CLI source, template+title fallback),
    /// plus the config.
    pub fn compute_provenance(&mut self, page: &Page) -> Result<Provenance> {
        if let Some(cached) = self.computed.get(&page.key) {
            return Ok(cached.clone());
        }

        let mut provenance = Provenance::new();

        match &page.virtual_source {
            None => {
                if page.source_path.exists() {
                    let hash = self.file_hash(&page.source_path);
                    provenance = provenance.with_input(InputKind::Content, page.key.clone(), hash);
                }
            }
            Some(VirtualSource::Autodoc { source_file }) => {
                if let Some((key, hash)) = self.resolve_source(source_file) {
                    provenance = provenance.with_input(InputKind::AutodocSource, key, hash);
                }
            }
            Some(VirtualSource::Taxonomy { term }) => {
                provenance = provenance.with_input(
                    InputKind::Taxonomy,
                    CacheKey::new(format!("tag:{}", term)),
                    hash_content(term.as_bytes()),
                );
            }
            Some(VirtualSource::Cli { source_file }) => {
                if let Some((key, hash)) = self.resolve_source(source_file) {
                    provenance = provenance.with_input(InputKind::Virtual, key, hash);
                }
            }
            Some(VirtualSource::Fallback { template, title }) => {
                provenance = provenance.with_input(
                    InputKind::Virtual,
                    page.key.clone(),
                    hash_content(format!("{}:{}", template, title)),
                );
            }
        }

        // A virtual page whose source could not be resolved still gets a
        // deterministic input, so it is rebuilt rather than skipped forever.
        if provenance.input_count() == 0 {
            provenance = provenance.with_input(
                InputKind::Virtual,
                page.key.clone(),
                hash_content(format!("{}:{}", page.template, page.title)),
            );
        }

        provenance = provenance.with_input(
            InputKind::Config,
            CacheKey::new(CONFIG_INPUT_KEY),
            self.config_hash.clone(),
        );

        self.computed.insert(page.key.clone(), provenance.clone());
        Ok(provenance)
    }

    /// Resolve a virtual page's underlying source file to a stable key and
    /// its current hash. Relative paths are tried against the site root and
    /// its parent (repository root).
    fn resolve_source(&mut self, source_file: &Path) -> Option<(CacheKey, ContentHash)> {
        let mut candidates = Vec::new();
        if source_file.is_absolute() {
            candidates.push(source_file.to_path_buf());
        } else {
            candidates.push(self.site.root_path.join(source_file));
            if let Some(parent) = self.site.root_path.parent() {
                candidates.push(parent.join(source_file));
            }
        }
        for candidate in candidates {
            if candidate.exists() {
                let hash = self.file_hash(&candidate);
                let key = crate::core::keys::content_key(&candidate, &self.site.root_path);
                return Some((key, hash));
            }
        }
        None
    }

    /// Record a page's provenance after a successful render.
    pub fn record_build(
        &mut self,
        store: &mut ProvenanceStore,
        page: &Page,
        output_hash: ContentHash,
    ) -> Result<()> {
        let provenance = self.compute_provenance(page)?;
        // A provenance with only the config input carries no page identity;
        // storing it would make unrelated pages look interchangeable.
        if provenance.input_count() <= 1 {
            return Ok(());
        }
        store.store(ProvenanceRecord::new(
            page.key.clone(),
            provenance,
            output_hash,
        ))
    }

    /// Decide which assets need processing, by content hash. An mtime check
    /// could pre-filter here, but the hash comparison is what is correct.
    pub fn filter_assets(
        &mut self,
        assets: &[Asset],
        forced: &BTreeSet<CacheKey>,
    ) -> Vec<CacheKey> {
        let mut to_process = Vec::new();
        for asset in assets {
            if forced.contains(&asset.key) || self.is_asset_changed(asset) {
                to_process.push(asset.key.clone());
            }
        }
        to_process
    }

    fn is_asset_changed(&mut self, asset: &Asset) -> bool {
        if !asset.source_path.exists() {
            return true;
        }
        let current = self.file_hash(&asset.source_path);
        match self.asset_hashes.get(&asset.key) {
            Some(stored) if *stored == current => false,
            _ => {
                self.asset_hashes.insert(asset.key.clone(), current);
                self.asset_hashes_dirty = true;
                true
            }
        }
    }

    /// Persist the asset hash map, if it changed.
    pub fn save(&mut self) -> Result<()> {
        if !self.asset_hashes_dirty {
            return Ok(());
        }
        persist::save_json(
            &self.asset_hashes_path,
            &AssetHashFile {
                version: ASSET_HASHES_VERSION,
                hashes: self.asset_hashes.clone(),
            },
            false,
        )?;
        self.asset_hashes_dirty = false;
        Ok(())
    }

    fn file_hash(&mut self, path: &Path) -> ContentHash {
        if let Some(hash) = self.file_hashes.get(path) {
            return hash.clone();
        }
        let hash = hash_file(path);
        self.file_hashes.insert(path.to_path_buf(), hash.clone());
        hash
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    use super::*;
    use crate::config::EffectiveConfig;
    use crate::core::keys::content_key;

    fn site_with_pages(root: &Path, pages: &[&str]) -> Site {
        let effective =
            EffectiveConfig::from_parts(Default::default(), Default::default(), false).unwrap();
        let mut site = Site::new(root.to_path_buf(), effective);
        for rel in pages {
            let path = root.join(rel);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, format!("body of {}", rel)).unwrap();
            let key = content_key(&path, root);
            site.add_page(Page::new(path, key));
        }
        site
    }

    fn store_for(root: &Path) -> ProvenanceStore {
        ProvenanceStore::new(root.join(".bengal/provenance"))
    }

    #[test]
    fn test_never_built_page_is_a_miss() {
        let dir = tempdir().unwrap();
        let site = site_with_pages(dir.path(), &["content/a.md"]);
        let mut store = store_for(dir.path());
        let mut filter = ProvenanceFilter::new(&site);

        let pages: Vec<&Page> = site.pages.iter().collect();
        let result = filter
            .filter_pages(&mut store, &pages, &BTreeSet::new())
            .unwrap();
        assert_eq!(result.cache_misses, 1);
        assert!(result.pages_to_build.contains(&CacheKey::new("content/a.md")));
    }

    #[test]
    fn test_recorded_page_is_skipped() {
        let dir = tempdir().unwrap();
        let site = site_with_pages(dir.path(), &["content/a.md"]);
        let mut store = store_for(dir.path());

        {
            let mut filter = ProvenanceFilter::new(&site);
            filter
                .record_build(&mut store, &site.pages[0], ContentHash::new("out"))
                .unwrap();
        }

        let mut filter = ProvenanceFilter::new(&site);
        let pages: Vec<&Page> = site.pages.iter().collect();
        let result = filter
            .filter_pages(&mut store, &pages, &BTreeSet::new())
            .unwrap();
        assert_eq!(result.cache_hits, 1);
        assert!(result.is_skip());
    }

    #[test]
    fn test_edited_page_is_a_miss() {
        let dir = tempdir().unwrap();
        let site = site_with_pages(dir.path(), &["content/a.md"]);
        let mut store = store_for(dir.path());
        {
            let mut filter = ProvenanceFilter::new(&site);
            filter
                .record_build(&mut store, &site.pages[0], ContentHash::new("out"))
                .unwrap();
        }

        fs::write(dir.path().join("content/a.md"), "edited body").unwrap();
        let mut filter = ProvenanceFilter::new(&site);
        let pages: Vec<&Page> = site.pages.iter().collect();
        let result = filter
            .filter_pages(&mut store, &pages, &BTreeSet::new())
            .unwrap();
        assert_eq!(result.cache_misses, 1);
    }

    #[test]
    fn test_forced_page_short_circuits() {
        let dir = tempdir().unwrap();
        let site = site_with_pages(dir.path(), &["content/a.md"]);
        let mut store = store_for(dir.path());
        {
            let mut filter = ProvenanceFilter::new(&site);
            filter
                .record_build(&mut store, &site.pages[0], ContentHash::new("out"))
                .unwrap();
        }

        let mut filter = ProvenanceFilter::new(&site);
        let pages: Vec<&Page> = site.pages.iter().collect();
        let forced = BTreeSet::from([CacheKey::new("content/a.md")]);
        let result = filter.filter_pages(&mut store, &pages, &forced).unwrap();
        assert_eq!(result.cache_misses, 1);
    }

    #[test]
    fn test_config_change_invalidates_fast_path() {
        let dir = tempdir().unwrap();
        let site = site_with_pages(dir.path(), &["content/a.md"]);
        let mut store = store_for(dir.path());
        {
            let mut filter = ProvenanceFilter::new(&site);
            filter
                .record_build(&mut store, &site.pages[0], ContentHash::new("out"))
                .unwrap();
        }

        // Same files, different effective config.
        let mut env = std::collections::BTreeMap::new();
        env.insert("BENGAL_TITLE".to_string(), "Changed".to_string());
        let effective = EffectiveConfig::from_parts(Default::default(), env, false).unwrap();
        let mut changed_site = Site::new(dir.path().to_path_buf(), effective);
        for page in &site.pages {
            changed_site.add_page(page.clone());
        }

        let mut filter = ProvenanceFilter::new(&changed_site);
        let pages: Vec<&Page> = changed_site.pages.iter().collect();
        let result = filter
            .filter_pages(&mut store, &pages, &BTreeSet::new())
            .unwrap();
        assert_eq!(result.cache_misses, 1);
    }

    #[test]
    fn test_taxonomy_virtual_page_freshness() {
        let dir = tempdir().unwrap();
        let site = site_with_pages(dir.path(), &[]);
        let mut store = store_for(dir.path());

        let key = CacheKey::new("_generated/tags/python.md");
        let mut page = Page::new(PathBuf::from(key.as_str()), key.clone());
        page.generated = true;
        page.virtual_source = Some(VirtualSource::Taxonomy {
            term: "python".to_string(),
        });

        let mut filter = ProvenanceFilter::new(&site);
        filter
            .record_build(&mut store, &page, ContentHash::new("out"))
            .unwrap();

        let mut filter = ProvenanceFilter::new(&site);
        let provenance = filter.compute_provenance(&page).unwrap();
        assert!(store.is_fresh(&key, &provenance));
        assert_eq!(provenance.inputs_by_kind(InputKind::Taxonomy).len(), 1);
    }

    #[test]
    fn test_autodoc_virtual_page_tracks_source() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("src/api.py");
        fs::create_dir_all(source.parent().unwrap()).unwrap();
        fs::write(&source, "def hello(): pass").unwrap();
        let site = site_with_pages(dir.path(), &[]);
        let mut store = store_for(dir.path());

        let key = CacheKey::new("content/api/hello.md");
        let mut page = Page::new(PathBuf::from(key.as_str()), key.clone());
        page.virtual_source = Some(VirtualSource::Autodoc {
            source_file: source.clone(),
        });

        {
            let mut filter = ProvenanceFilter::new(&site);
            filter
                .record_build(&mut store, &page, ContentHash::new("out"))
                .unwrap();
        }

        // Source edit changes the combined hash.
        fs::write(&source, "def hello(): return 1").unwrap();
        let mut filter = ProvenanceFilter::new(&site);
        let provenance = filter.compute_provenance(&page).unwrap();
        assert!(!store.is_fresh(&key, &provenance));
    }

    #[test]
    fn test_asset_hash_comparison() {
        let dir = tempdir().unwrap();
        let site = site_with_pages(dir.path(), &[]);
        let asset_path = dir.path().join("assets/style.css");
        fs::create_dir_all(asset_path.parent().unwrap()).unwrap();
        fs::write(&asset_path, "body {}").unwrap();
        let asset = Asset {
            key: content_key(&asset_path, dir.path()),
            source_path: asset_path.clone(),
            output_path: None,
        };

        let mut filter = ProvenanceFilter::new(&site);
        // First sighting processes and records.
        assert_eq!(filter.filter_assets(&[asset.clone()], &BTreeSet::new()).len(), 1);
        filter.save().unwrap();

        // A fresh session with the same bytes skips it.
        let mut filter = ProvenanceFilter::new(&site);
        assert!(filter.filter_assets(&[asset.clone()], &BTreeSet::new()).is_empty());

        // mtime-only touch (same bytes) still skips: the hash decides.
        fs::write(&asset_path, "body {}").unwrap();
        let mut filter = ProvenanceFilter::new(&site);
        assert!(filter.filter_assets(&[asset], &BTreeSet::new()).is_empty());
    }

    #[test]
    fn test_session_file_hash_cache() {
        let dir = tempdir().unwrap();
        let site = site_with_pages(dir.path(), &["content/a.md"]);
        let mut filter = ProvenanceFilter::new(&site);

        let path = dir.path().join("content/a.md");
        let first = filter.file_hash(&path);
        // Edits within a session are deliberately invisible: the session
        // cache pins each file's hash for build consistency.
        fs::write(&path, "mutated mid-build").unwrap();
        let second = filter.file_hash(&path);
        assert_eq!(first, second);
    }
}
