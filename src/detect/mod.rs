//! Change detection: the detector contract and its pipeline.
//!
//! A detector is any value implementing [`ChangeDetector`]: it reads an
//! immutable [`DetectionContext`] and returns a
//! [`results::ChangeDetectionResult`]. Detectors never mutate the cache or
//! the site; the pipeline threads accumulated results through each context.
//!
//! ## Module Structure
//!
//! - `results`: immutable result types and rebuild reasons
//! - `pipeline`: ordered detector execution with short-circuit
//! - `content`: content and asset fingerprint changes
//! - `data`: data file changes and their dependent pages
//! - `template`: template changes and their dependent pages
//! - `cascade`: frontmatter cascades and prev/next navigation
//! - `taxonomy`: tag/section cascades onto generated pages
//! - `autodoc`: extracted-documentation source changes
//! - `version`: cross-version dependency cascades

pub mod autodoc;
pub mod cascade;
pub mod content;
pub mod data;
pub mod pipeline;
pub mod results;
pub mod taxonomy;
pub mod template;
pub mod version;

use std::collections::BTreeSet;

use anyhow::Result;

use crate::cache::build_cache::BuildCache;
use crate::core::keys::CacheKey;
use crate::core::site::Site;
use crate::detect::results::ChangeDetectionResult;

/// Immutable context passed to every detector.
///
/// Accumulated results from previous detectors are available in `previous`
/// for cascade detection (template changes affect pages, rebuilt pages
/// affect their neighbors).
#[derive(Clone)]
pub struct DetectionContext<'a> {
    pub cache: &'a BuildCache,
    pub site: &'a Site,
    /// Accumulated results from previous detectors.
    pub previous: ChangeDetectionResult,
    pub verbose: bool,
    /// Paths the external watcher asserts as changed regardless of
    /// fingerprints.
    pub forced_changed: BTreeSet<CacheKey>,
    /// Pages whose navigation context changed structurally (a neighbor was
    /// added or removed).
    pub nav_changed: BTreeSet<CacheKey>,
}

impl<'a> DetectionContext<'a> {
    pub fn new(cache: &'a BuildCache, site: &'a Site) -> Self {
        DetectionContext {
            cache,
            site,
            previous: ChangeDetectionResult::empty(),
            verbose: false,
            forced_changed: BTreeSet::new(),
            nav_changed: BTreeSet::new(),
        }
    }

    pub fn with_forced(mut self, forced_changed: BTreeSet<CacheKey>) -> Self {
        self.forced_changed = forced_changed;
        self
    }

    pub fn with_nav_changed(mut self, nav_changed: BTreeSet<CacheKey>) -> Self {
        self.nav_changed = nav_changed;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// New context with `result` merged into the accumulated results.
    /// Contexts are never mutated in place.
    pub fn with_previous(&self, result: &ChangeDetectionResult) -> Self {
        DetectionContext {
            cache: self.cache,
            site: self.site,
            previous: self.previous.merge(result),
            verbose: self.verbose,
            forced_changed: self.forced_changed.clone(),
            nav_changed: self.nav_changed.clone(),
        }
    }
}

/// Contract for change detection components.
///
/// Detectors are pure with respect to the context: same context, same
/// result, no mutation of shared state.
pub trait ChangeDetector {
    fn name(&self) -> &str;

    fn detect(&self, ctx: &DetectionContext) -> Result<ChangeDetectionResult>;
}
