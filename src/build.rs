//! The full build flow: discover, plan, render, persist.
//!
//! This is the library entry point the CLI drives. It wires discovery, the
//! cache manager, the incremental orchestrator and the render orchestrator
//! together and returns a summary for reporting.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tracing::info;

use crate::cache::build_cache::UrlClaim;
use crate::cache::manager::CacheManager;
use crate::config::load_config;
use crate::core::keys::{CacheKey, content_key};
use crate::detect::results::RebuildReason;
use crate::discovery::discover;
use crate::orchestration::incremental::IncrementalOrchestrator;
use crate::orchestration::render::{RenderMode, RenderOrchestrator};
use crate::provenance::filter::ProvenanceFilter;
use crate::report::SessionErrors;

#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// Use the incremental engine. `false` renders everything.
    pub incremental: bool,
    /// Force a full rebuild even when incremental state is valid.
    pub force: bool,
    /// Paths to treat as changed regardless of fingerprints.
    pub touch: Vec<PathBuf>,
    pub mode: RenderMode,
    /// Worker count; 0 = auto.
    pub workers: usize,
    /// Override the config's strict setting.
    pub strict: Option<bool>,
    pub verbose: bool,
}

impl Default for BuildOptions {
    fn default() -> Self {
        BuildOptions {
            incremental: true,
            force: false,
            touch: Vec::new(),
            mode: RenderMode::Parallel,
            workers: 0,
            strict: None,
            verbose: false,
        }
    }
}

/// What a build did, for reporting and exit-code decisions.
#[derive(Debug)]
pub struct BuildSummary {
    pub pages_built: usize,
    pub pages_skipped: usize,
    pub assets_processed: usize,
    pub full_rebuild: bool,
    pub cache_hits: usize,
    pub reasons: BTreeMap<CacheKey, RebuildReason>,
    /// Deduplicated recoverable errors: `(category, count, first detail)`.
    pub errors: Vec<(String, usize, String)>,
    pub duration: Duration,
    pub strict: bool,
}

impl BuildSummary {
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// Run one build over the site at `root`.
pub fn build(root: &Path, options: &BuildOptions) -> Result<BuildSummary> {
    let started = Instant::now();

    let mut effective = load_config(root).context("failed to load site configuration")?;
    if let Some(strict) = options.strict {
        effective.config.strict = strict;
    }
    let strict = effective.config.strict;
    let incremental_enabled = options.incremental && effective.config.incremental;

    let errors = SessionErrors::new();
    let mut site = discover(root, effective, &errors).context("site discovery failed")?;

    let mut manager = CacheManager::initialize(&site, incremental_enabled)
        .context("cache initialization failed")?;

    let forced: BTreeSet<CacheKey> = options
        .touch
        .iter()
        .map(|path| content_key(path, &site.root_path))
        .collect();

    let incremental = incremental_enabled && !options.force;
    let plan = IncrementalOrchestrator::plan(
        &mut manager,
        &site,
        &forced,
        incremental,
        options.verbose,
    )?;

    let work: Vec<CacheKey> = plan.pages.iter().cloned().collect();
    let assets: Vec<CacheKey> = plan.assets.iter().cloned().collect();

    let renderer = RenderOrchestrator::new(options.mode, options.workers);
    let outcome = renderer.process(&mut site, &work)?;
    let assets_processed = renderer.process_assets(&site, &assets)?;

    // Claim output routes; a second page claiming the same route is a
    // recoverable conflict surfaced in the summary.
    for rendered in &outcome.rendered {
        if let Some(page) = site.page(&rendered.key) {
            let conflict = manager.cache.claim_url(
                page.route(),
                UrlClaim {
                    page: rendered.key.clone(),
                    version: page.version.clone(),
                },
            );
            if let Some(previous) = conflict {
                errors.record(
                    "url_conflict",
                    &format!(
                        "{}: route {} previously claimed by {}",
                        rendered.key,
                        page.route(),
                        previous.page
                    ),
                );
            }
        }
    }

    // Record provenance for everything that rendered. Order-independent:
    // the combined hashes make the final state identical however the pool
    // finished.
    let mut filter = ProvenanceFilter::new(&site);
    for rendered in &outcome.rendered {
        if let Some(page) = site.page(&rendered.key) {
            filter.record_build(&mut manager.store, page, rendered.output_hash.clone())?;
        }
    }
    filter.save()?;

    let built_keys: Vec<CacheKey> = outcome.rendered.iter().map(|p| p.key.clone()).collect();
    manager.save(&site, &built_keys, &assets)?;
    manager.gc(&site);

    let summary = BuildSummary {
        pages_built: outcome.rendered.len(),
        pages_skipped: plan.pages_skipped,
        assets_processed,
        full_rebuild: plan.full_rebuild,
        cache_hits: plan.cache_hits,
        reasons: plan.reasons,
        errors: errors.entries(),
        duration: started.elapsed(),
        strict,
    };
    info!(
        pages_built = summary.pages_built,
        pages_skipped = summary.pages_skipped,
        assets = summary.assets_processed,
        "build complete"
    );
    Ok(summary)
}
