//! Cross-version dependency detection.

use anyhow::Result;

use crate::core::site::split_versioned_key;
use crate::detect::results::{ChangeDetectionResult, RebuildReason, RebuildReasonCode};
use crate::detect::{ChangeDetector, DetectionContext};

/// For versioned sites, cascades a changed page to its mirrors in other
/// versions. `_shared/` content belongs to every version, so a shared edit
/// reaches every versioned mirror of the same path.
pub struct VersionChangeDetector;

impl ChangeDetector for VersionChangeDetector {
    fn name(&self) -> &str {
        "version"
    }

    fn detect(&self, ctx: &DetectionContext) -> Result<ChangeDetectionResult> {
        if !ctx.site.versioning_enabled() {
            return Ok(ChangeDetectionResult::empty());
        }

        let versioning = &ctx.site.config().versioning;
        let mut result = ChangeDetectionResult::empty();

        for changed_key in &ctx.previous.pages_to_rebuild {
            let Some((_, version, normalized)) = split_versioned_key(changed_key, versioning)
            else {
                continue;
            };

            let dependents = ctx
                .site
                .tracker
                .get_cross_version_dependents(&version, &normalized);
            for dependent in dependents {
                if ctx.previous.pages_to_rebuild.contains(&dependent) {
                    continue;
                }
                result
                    .rebuild_reasons
                    .entry(dependent.clone())
                    .or_insert_with(|| {
                        RebuildReason::new(
                            RebuildReasonCode::CrossVersionDependency,
                            normalized.clone(),
                        )
                    });
                result.pages_to_rebuild.insert(dependent);
            }
        }

        Ok(result)
    }
}
