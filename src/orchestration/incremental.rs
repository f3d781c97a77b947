//! Incremental build orchestration: the public "what needs rebuilding?"
//! operation.
//!
//! Composes the detector pipelines, the provenance filter and the cache
//! manager into a single plan. This is the only component allowed to mutate
//! the cache and the effect tracer; detectors and filters read only.

use std::collections::{BTreeMap, BTreeSet};

use anyhow::Result;
use tracing::{debug, info};

use crate::cache::manager::CacheManager;
use crate::core::keys::{CacheKey, content_key};
use crate::core::page::Page;
use crate::core::site::Site;
use crate::detect::pipeline::{early_pipeline, full_pipeline};
use crate::detect::results::{RebuildReason, RebuildReasonCode};
use crate::detect::DetectionContext;
use crate::provenance::filter::ProvenanceFilter;

/// The work list for one build round.
#[derive(Debug, Default)]
pub struct ChangePlan {
    pub pages: BTreeSet<CacheKey>,
    pub assets: BTreeSet<CacheKey>,
    /// Why each page rebuilds. Empty on a full rebuild: the short-circuit
    /// skips reason assignment entirely.
    pub reasons: BTreeMap<CacheKey, RebuildReason>,
    pub full_rebuild: bool,
    pub pages_skipped: usize,
    pub cache_hits: usize,
}

impl ChangePlan {
    fn full(site: &Site) -> ChangePlan {
        ChangePlan {
            pages: site.pages.iter().map(|p| p.key.clone()).collect(),
            assets: site.assets.iter().map(|a| a.key.clone()).collect(),
            reasons: BTreeMap::new(),
            full_rebuild: true,
            pages_skipped: 0,
            cache_hits: 0,
        }
    }

    pub fn is_noop(&self) -> bool {
        self.pages.is_empty() && self.assets.is_empty()
    }
}

pub struct IncrementalOrchestrator;

impl IncrementalOrchestrator {
    /// Produce the work list for this round.
    ///
    /// 1. A changed effective config forces a full rebuild.
    /// 2. The early pipeline (content/data/template + cascades) runs over
    ///    fingerprints.
    /// 3. The provenance filter fast-paths everything the pipeline could
    ///    not rule out statically.
    /// 4. The full pipeline (taxonomy/autodoc/version) runs over the
    ///    accumulated result.
    pub fn plan(
        manager: &mut CacheManager,
        site: &Site,
        forced_changed: &BTreeSet<CacheKey>,
        incremental: bool,
        verbose: bool,
    ) -> Result<ChangePlan> {
        if !incremental || !manager.enabled() {
            return Ok(ChangePlan::full(site));
        }

        if manager.check_config_changed(site) {
            info!("configuration changed; planning full rebuild");
            return Ok(ChangePlan::full(site));
        }

        // Dependencies the persisted tracer found resized on load count as
        // changed even before any fingerprint check.
        let mut forced = forced_changed.clone();
        for stale in manager.tracer.stale_dependencies() {
            forced.insert(content_key(&stale, &site.root_path));
        }

        let nav_changed = manager.cache.nav_changed_pages(
            site.regular_pages()
                .map(|p| (&p.key, p.prev.as_ref(), p.next.as_ref())),
        );
        if !nav_changed.is_empty() {
            debug!(pages = nav_changed.len(), "navigation structure changed");
        }

        let ctx = DetectionContext::new(&manager.cache, site)
            .with_forced(forced.clone())
            .with_nav_changed(nav_changed)
            .with_verbose(verbose);

        let early = early_pipeline().run(&ctx)?;
        if early.force_full_rebuild {
            return Ok(ChangePlan::full(site));
        }

        // Provenance fast path over everything the pipeline did not already
        // mark.
        let unmarked: Vec<&Page> = site
            .pages
            .iter()
            .filter(|p| !early.pages_to_rebuild.contains(&p.key))
            .collect();
        let mut filter = ProvenanceFilter::new(site);
        let filtered = filter.filter_pages(&mut manager.store, &unmarked, &forced)?;

        let mut accumulated = early.clone();
        for page_key in &filtered.pages_to_build {
            let code = if manager.store.stored_hash(page_key).is_none() {
                RebuildReasonCode::OutputMissing
            } else {
                RebuildReasonCode::ContentChanged
            };
            accumulated
                .rebuild_reasons
                .entry(page_key.clone())
                .or_insert_with(|| RebuildReason::new(code, page_key.as_str()));
            accumulated.pages_to_rebuild.insert(page_key.clone());
            accumulated.content_files_changed.insert(page_key.clone());
        }
        accumulated.affected_tags.extend(filtered.affected_tags.iter().cloned());
        accumulated
            .affected_sections
            .extend(filtered.affected_sections.iter().cloned());

        let assets_from_filter = filter.filter_assets(&site.assets, &forced);
        filter.save()?;

        let full_ctx = ctx.with_previous(&accumulated);
        let final_result = full_pipeline().run(&full_ctx)?;

        let mut plan = ChangePlan {
            pages: final_result.pages_to_rebuild.clone(),
            assets: final_result.assets_to_process.clone(),
            reasons: final_result.rebuild_reasons.clone(),
            full_rebuild: final_result.force_full_rebuild,
            pages_skipped: 0,
            cache_hits: filtered.cache_hits,
        };
        plan.assets.extend(assets_from_filter);
        plan.pages_skipped = site.pages.len().saturating_sub(plan.pages.len());

        debug!(
            pages = plan.pages.len(),
            assets = plan.assets.len(),
            skipped = plan.pages_skipped,
            "incremental plan ready"
        );
        Ok(plan)
    }
}
