//! Cache lifecycle management.
//!
//! One owner for every piece of persisted state under `.bengal/`: the build
//! cache, the effect tracer, the provenance store, the taxonomy index and
//! the query indexes. Detectors and filters read this state; only the
//! manager writes it, between builds.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::cache::build_cache::BuildCache;
use crate::cache::persist;
use crate::core::hashing::hash_json;
use crate::core::keys::{CacheKey, content_key, data_key};
use crate::core::page::VirtualSource;
use crate::core::site::Site;
use crate::detect::data::DATA_FILE_EXTENSIONS;
use crate::effects::effect::Dependency;
use crate::effects::tracer::{EffectTracer, set_active_tracer};
use crate::index::query::{AuthorExtractor, QueryIndex, SectionExtractor, SeriesExtractor};
use crate::index::taxonomy::{TaxonomyIndex, slugify};
use crate::provenance::store::ProvenanceStore;

const BUILD_CACHE_FILE: &str = "build-cache.json.zst";
const EFFECTS_FILE: &str = "effects.json";
const LEGACY_CACHE_FILE: &str = ".bengal-cache.json";

pub struct CacheManager {
    state_dir: PathBuf,
    enabled: bool,
    pub cache: BuildCache,
    pub store: ProvenanceStore,
    pub tracer: Arc<EffectTracer>,
    pub taxonomy: TaxonomyIndex,
    pub query_indexes: Vec<QueryIndex>,
}

impl CacheManager {
    /// Set up all cache state for a build.
    ///
    /// When enabled, existing state is loaded (migrating the legacy cache
    /// location once if needed); when disabled, everything starts empty and
    /// the build runs full. Either way the effect tracer is installed as the
    /// process-wide recording target so render-time effects flow into this
    /// instance.
    pub fn initialize(site: &Site, enabled: bool) -> Result<Self> {
        let state_dir = site.state_dir();
        let cache_path = state_dir.join(BUILD_CACHE_FILE);

        let (cache, tracer, taxonomy, query_indexes) = if enabled {
            fs::create_dir_all(&state_dir)?;
            migrate_legacy_cache(&site.output_dir, &cache_path);

            let cache = BuildCache::load(&cache_path, site.root_path.clone());
            let tracer = EffectTracer::load(&state_dir.join(EFFECTS_FILE));
            let taxonomy = TaxonomyIndex::load_from_disk(&state_dir.join("taxonomy_index.json.zst"));
            let query_indexes = load_query_indexes(&state_dir);
            info!(
                cached_files = cache.file_fingerprints.len(),
                effects = tracer.len(),
                "cache initialized"
            );
            (cache, tracer, taxonomy, query_indexes)
        } else {
            debug!("cache initialized cold (incremental disabled)");
            (
                BuildCache::new(site.root_path.clone()),
                EffectTracer::new(),
                TaxonomyIndex::new(),
                new_query_indexes(),
            )
        };

        let tracer = Arc::new(tracer);
        set_active_tracer(Arc::clone(&tracer));

        Ok(CacheManager {
            store: ProvenanceStore::new(state_dir.join("provenance")),
            state_dir,
            enabled,
            cache,
            tracer,
            taxonomy,
            query_indexes,
        })
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    /// Compare the effective config hash to the stored one. A change forces
    /// a full rebuild this round.
    pub fn check_config_changed(&mut self, site: &Site) -> bool {
        let current = site.config_hash();
        let valid = self.cache.validate_config(&current);
        if !valid {
            info!(new_hash = %current, "effective configuration changed");
        }
        !valid
    }

    /// Update all persisted state after a build and write it out.
    pub fn save(
        &mut self,
        site: &Site,
        pages_built: &[CacheKey],
        assets_processed: &[CacheKey],
    ) -> Result<()> {
        let mut autodoc_sources_updated: BTreeSet<PathBuf> = BTreeSet::new();

        for key in pages_built {
            let Some(page) = site.page(key) else {
                continue;
            };

            // Autodoc pages fingerprint their underlying source file, not
            // the synthetic page path.
            if let Some(VirtualSource::Autodoc { source_file }) = &page.virtual_source {
                let source_path = if source_file.is_absolute() {
                    source_file.clone()
                } else {
                    site.root_path.join(source_file)
                };
                let source_key = content_key(&source_path, &site.root_path);
                self.cache
                    .record_autodoc_dependency(source_key.clone(), key.clone());
                if let Some(doc_hash) = page.doc_content_hash() {
                    self.cache
                        .set_doc_content_hash(&source_key, key, doc_hash.to_string());
                }
                if autodoc_sources_updated.insert(source_path.clone()) {
                    self.cache.update_file(&source_path);
                }
                continue;
            }

            if page.is_virtual() || page.generated {
                continue;
            }

            self.cache.update_file(&page.source_path);

            let slugs: BTreeSet<String> = page
                .tags
                .iter()
                .map(|tag| slugify(tag))
                .filter(|slug| !slug.is_empty())
                .collect();
            self.cache.set_previous_tags(key.clone(), slugs);
            self.taxonomy.update_page_tags(key, &page.tags);
            for index in &self.query_indexes {
                index.update_page(page);
            }

            if let Some(cascade) = page.cascade() {
                self.cache.set_cascade_hash(key.clone(), hash_json(cascade));
            }
        }

        for key in assets_processed {
            if let Some(asset) = site.assets.iter().find(|a| &a.key == key) {
                self.cache.update_file(&asset.source_path);
            }
        }

        // Track templates even when unchanged, so the next build has a
        // fingerprint to compare against.
        for dir in [site.theme_templates_dir(), site.site_templates_dir()] {
            if !dir.exists() {
                continue;
            }
            for entry in walkdir::WalkDir::new(&dir).into_iter().filter_map(|e| e.ok()) {
                let path = entry.path();
                if path.is_file() && path.extension().and_then(|e| e.to_str()) == Some("html") {
                    self.cache.update_file(path);
                }
            }
        }

        // Data files get the same treatment. Skipping this makes every data
        // file look changed on the next incremental build.
        self.update_data_file_fingerprints(site);

        // Record every page's neighbors so the next build can detect
        // structural navigation changes (a page added or removed).
        for page in site.regular_pages() {
            self.cache
                .set_nav_neighbors(page.key.clone(), page.prev.clone(), page.next.clone());
        }

        self.rebuild_page_dependencies(site);

        self.tracer.save(&self.state_dir.join(EFFECTS_FILE))?;
        if let Err(err) = self
            .taxonomy
            .save_to_disk(&self.state_dir.join("taxonomy_index.json.zst"))
        {
            persist::report_save_failure(&self.state_dir.join("taxonomy_index.json.zst"), &err);
        }
        for index in &self.query_indexes {
            let path = self
                .state_dir
                .join("indexes")
                .join(format!("{}_index.json", index.name()));
            if let Err(err) = index.save_to_disk(&path) {
                persist::report_save_failure(&path, &err);
            }
        }
        self.store.save()?;
        self.cache.save(&self.state_dir.join(BUILD_CACHE_FILE))?;
        Ok(())
    }

    /// Drop state for pages that no longer exist.
    pub fn gc(&mut self, site: &Site) {
        let live = site.live_page_keys();
        let removed_records = self.store.gc(&live);
        let removed_tags = self.taxonomy.gc(&live);
        for index in &self.query_indexes {
            index.gc(&live);
        }
        self.cache.gc(&live);
        if removed_records > 0 || removed_tags > 0 {
            debug!(
                provenance = removed_records,
                taxonomy = removed_tags,
                "garbage collected stale cache entries"
            );
        }
    }

    fn update_data_file_fingerprints(&mut self, site: &Site) {
        let data_dir = site.data_dir();
        if !data_dir.exists() {
            return;
        }
        for entry in walkdir::WalkDir::new(&data_dir).into_iter().filter_map(|e| e.ok()) {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let is_data = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|ext| DATA_FILE_EXTENSIONS.contains(&ext));
            if is_data {
                self.cache.update_file(path);
            }
        }
    }

    /// Rebuild the dependency-key → pages reverse map from the tracer's
    /// recorded render effects. This is what the data and template
    /// detectors query on the next build.
    fn rebuild_page_dependencies(&mut self, site: &Site) {
        let mut dependencies: BTreeMap<CacheKey, BTreeSet<CacheKey>> = BTreeMap::new();
        let content_dir = site.content_dir();

        for effect in self.tracer.effects() {
            if effect.operation != "render_page" {
                continue;
            }
            // The page itself is the markdown dependency under content/.
            let page_key = effect.depends_on.iter().find_map(|dep| match dep {
                Dependency::File(path)
                    if path.starts_with(&content_dir)
                        && path.extension().and_then(|e| e.to_str()) == Some("md") =>
                {
                    Some(content_key(path, &site.root_path))
                }
                _ => None,
            });
            let Some(page_key) = page_key else {
                continue;
            };

            for dep in &effect.depends_on {
                match dep {
                    Dependency::File(path) => {
                        let is_data = path
                            .extension()
                            .and_then(|e| e.to_str())
                            .is_some_and(|ext| DATA_FILE_EXTENSIONS.contains(&ext));
                        if is_data {
                            dependencies
                                .entry(data_key(path, &site.root_path))
                                .or_default()
                                .insert(page_key.clone());
                        }
                    }
                    Dependency::Name(name) => {
                        for dir in [site.theme_templates_dir(), site.site_templates_dir()] {
                            let candidate = dir.join(name);
                            if candidate.exists() {
                                dependencies
                                    .entry(content_key(&candidate, &site.root_path))
                                    .or_default()
                                    .insert(page_key.clone());
                            }
                        }
                    }
                }
            }
        }

        if !dependencies.is_empty() {
            self.cache.set_page_dependencies(dependencies);
        }
    }
}

/// Copy the pre-0.3 cache from the output directory into the state
/// directory, once.
fn migrate_legacy_cache(output_dir: &Path, cache_path: &Path) {
    let legacy = output_dir.join(LEGACY_CACHE_FILE);
    if !legacy.exists() || cache_path.exists() {
        return;
    }
    match fs::copy(&legacy, cache_path) {
        Ok(_) => info!(
            from = %legacy.display(),
            to = %cache_path.display(),
            "migrated legacy cache"
        ),
        Err(err) => warn!(error = %err, "legacy cache migration failed; starting fresh"),
    }
}

fn new_query_indexes() -> Vec<QueryIndex> {
    vec![
        QueryIndex::new(Box::new(SectionExtractor)),
        QueryIndex::new(Box::new(AuthorExtractor)),
        QueryIndex::new(Box::new(SeriesExtractor)),
    ]
}

fn load_query_indexes(state_dir: &Path) -> Vec<QueryIndex> {
    let indexes_dir = state_dir.join("indexes");
    vec![
        QueryIndex::load_from_disk(
            Box::new(SectionExtractor),
            &indexes_dir.join("section_index.json"),
        ),
        QueryIndex::load_from_disk(
            Box::new(AuthorExtractor),
            &indexes_dir.join("author_index.json"),
        ),
        QueryIndex::load_from_disk(
            Box::new(SeriesExtractor),
            &indexes_dir.join("series_index.json"),
        ),
    ]
}
