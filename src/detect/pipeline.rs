//! Composable change detection pipeline.
//!
//! Detectors run in explicit order, each receiving the accumulated results
//! of the ones before it through the context. A detector that signals
//! `force_full_rebuild` short-circuits the rest.

use anyhow::Result;
use tracing::{debug, info};

use crate::detect::autodoc::AutodocChangeDetector;
use crate::detect::cascade::{NavigationDependencyDetector, SectionCascadeDetector};
use crate::detect::content::ContentChangeDetector;
use crate::detect::data::DataChangeDetector;
use crate::detect::results::ChangeDetectionResult;
use crate::detect::taxonomy::TaxonomyCascadeDetector;
use crate::detect::template::TemplateChangeDetector;
use crate::detect::version::VersionChangeDetector;
use crate::detect::{ChangeDetector, DetectionContext};

pub struct DetectionPipeline {
    detectors: Vec<Box<dyn ChangeDetector>>,
}

impl DetectionPipeline {
    pub fn new(detectors: Vec<Box<dyn ChangeDetector>>) -> Self {
        DetectionPipeline { detectors }
    }

    /// Run every detector in order, threading accumulated results through
    /// the context. Returns the final accumulated result.
    pub fn run(&self, ctx: &DetectionContext) -> Result<ChangeDetectionResult> {
        let mut current = ctx.clone();

        for detector in &self.detectors {
            debug!(
                detector = detector.name(),
                previous_pages = current.previous.pages_to_rebuild.len(),
                "detector start"
            );

            let result = detector.detect(&current)?;

            debug!(
                detector = detector.name(),
                pages_found = result.pages_to_rebuild.len(),
                data_files = result.data_files_changed.len(),
                templates = result.templates_changed.len(),
                "detector complete"
            );

            let full_rebuild = result.force_full_rebuild;
            current = current.with_previous(&result);

            if full_rebuild {
                info!(detector = detector.name(), "full rebuild triggered");
                break;
            }
        }

        Ok(current.previous)
    }
}

/// Pipeline for early (pre-taxonomy) detection: fingerprint-driven changes
/// plus the cascades that feed on them.
pub fn early_pipeline() -> DetectionPipeline {
    DetectionPipeline::new(vec![
        Box::new(ContentChangeDetector),
        Box::new(DataChangeDetector),
        Box::new(TemplateChangeDetector),
        Box::new(SectionCascadeDetector),
        Box::new(NavigationDependencyDetector),
    ])
}

/// Pipeline for full (post-taxonomy) detection, run once generated pages
/// exist.
pub fn full_pipeline() -> DetectionPipeline {
    DetectionPipeline::new(vec![
        Box::new(TaxonomyCascadeDetector),
        Box::new(AutodocChangeDetector),
        Box::new(VersionChangeDetector),
    ])
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    use super::*;
    use crate::cache::build_cache::BuildCache;
    use crate::config::EffectiveConfig;
    use crate::core::keys::CacheKey;
    use crate::core::site::Site;
    use crate::detect::results::{RebuildReason, RebuildReasonCode};

    struct StaticDetector {
        name: &'static str,
        result: ChangeDetectionResult,
    }

    impl ChangeDetector for StaticDetector {
        fn name(&self) -> &str {
            self.name
        }

        fn detect(&self, _ctx: &DetectionContext) -> anyhow::Result<ChangeDetectionResult> {
            Ok(self.result.clone())
        }
    }

    /// Records how many pages the pipeline had accumulated when it ran.
    struct ReportingDetector(std::sync::Arc<std::sync::Mutex<usize>>);

    impl ChangeDetector for ReportingDetector {
        fn name(&self) -> &str {
            "reporting"
        }

        fn detect(&self, ctx: &DetectionContext) -> anyhow::Result<ChangeDetectionResult> {
            *self.0.lock().unwrap() = ctx.previous.pages_to_rebuild.len();
            Ok(ChangeDetectionResult::empty())
        }
    }

    fn fixture(root: &std::path::Path) -> (Site, BuildCache) {
        let effective =
            EffectiveConfig::from_parts(Default::default(), Default::default(), false).unwrap();
        (
            Site::new(root.to_path_buf(), effective),
            BuildCache::new(root.to_path_buf()),
        )
    }

    fn pages_result(keys: &[&str]) -> ChangeDetectionResult {
        ChangeDetectionResult::empty().with_pages(
            keys.iter().map(|k| CacheKey::new(*k)).collect(),
            RebuildReason::bare(RebuildReasonCode::ContentChanged),
        )
    }

    #[test]
    fn test_results_accumulate_across_detectors() {
        let dir = tempdir().unwrap();
        let (site, cache) = fixture(dir.path());

        let pipeline = DetectionPipeline::new(vec![
            Box::new(StaticDetector {
                name: "first",
                result: pages_result(&["content/a.md"]),
            }),
            Box::new(StaticDetector {
                name: "second",
                result: pages_result(&["content/b.md"]),
            }),
        ]);

        let ctx = DetectionContext::new(&cache, &site);
        let result = pipeline.run(&ctx).unwrap();
        assert_eq!(result.pages_to_rebuild.len(), 2);
    }

    #[test]
    fn test_later_detector_sees_earlier_results() {
        let dir = tempdir().unwrap();
        let (site, cache) = fixture(dir.path());
        let seen = std::sync::Arc::new(std::sync::Mutex::new(0usize));

        let pipeline = DetectionPipeline::new(vec![
            Box::new(StaticDetector {
                name: "first",
                result: pages_result(&["content/a.md", "content/b.md"]),
            }),
            Box::new(ReportingDetector(std::sync::Arc::clone(&seen))),
        ]);

        let ctx = DetectionContext::new(&cache, &site);
        pipeline.run(&ctx).unwrap();
        assert_eq!(*seen.lock().unwrap(), 2);
    }

    #[test]
    fn test_full_rebuild_short_circuits() {
        let dir = tempdir().unwrap();
        let (site, cache) = fixture(dir.path());

        let pipeline = DetectionPipeline::new(vec![
            Box::new(StaticDetector {
                name: "config",
                result: ChangeDetectionResult::full_rebuild(),
            }),
            Box::new(StaticDetector {
                name: "never_runs",
                result: pages_result(&["content/never.md"]),
            }),
        ]);

        let ctx = DetectionContext::new(&cache, &site);
        let result = pipeline.run(&ctx).unwrap();
        assert!(result.force_full_rebuild);
        assert!(!result.pages_to_rebuild.contains("content/never.md"));
    }

    #[test]
    fn test_empty_pipeline_on_empty_site() {
        let dir = tempdir().unwrap();
        let (site, cache) = fixture(dir.path());
        let ctx = DetectionContext::new(&cache, &site);

        let result = early_pipeline().run(&ctx).unwrap();
        assert!(!result.needs_rebuild());

        let result = full_pipeline().run(&ctx).unwrap();
        assert!(!result.needs_rebuild());
    }

    #[test]
    fn test_forced_changes_flow_through_early_pipeline() {
        let dir = tempdir().unwrap();
        let (mut site, cache) = fixture(dir.path());
        let path = dir.path().join("content/a.md");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "hello").unwrap();
        let key = crate::core::keys::content_key(&path, dir.path());
        site.add_page(crate::core::page::Page::new(path, key.clone()));

        let ctx = DetectionContext::new(&cache, &site).with_forced(BTreeSet::from([key.clone()]));
        let result = early_pipeline().run(&ctx).unwrap();
        assert!(result.pages_to_rebuild.contains(&key));
        assert_eq!(
            result.rebuild_reasons.get(&key).unwrap().code,
            RebuildReasonCode::Forced
        );
    }
}
