//! Content and asset change detection.

use anyhow::Result;

use crate::detect::results::{ChangeDetectionResult, RebuildReason, RebuildReasonCode};
use crate::detect::{ChangeDetector, DetectionContext};
use crate::index::taxonomy::slugify;

/// Detects changed content pages and assets via fingerprints, honoring the
/// watcher's forced and nav-changed sets.
pub struct ContentChangeDetector;

impl ChangeDetector for ContentChangeDetector {
    fn name(&self) -> &str {
        "content"
    }

    fn detect(&self, ctx: &DetectionContext) -> Result<ChangeDetectionResult> {
        let mut result = ChangeDetectionResult::empty();

        for page in ctx.site.regular_pages() {
            if page.is_virtual() {
                continue;
            }

            let reason = if ctx.forced_changed.contains(&page.key) {
                Some(RebuildReason::new(
                    RebuildReasonCode::Forced,
                    page.key.as_str(),
                ))
            } else if ctx.nav_changed.contains(&page.key) {
                Some(RebuildReason::new(
                    RebuildReasonCode::AdjacentNavChanged,
                    page.key.as_str(),
                ))
            } else if ctx.cache.is_changed(&page.source_path) {
                Some(RebuildReason::new(
                    RebuildReasonCode::ContentChanged,
                    page.key.as_str(),
                ))
            } else {
                None
            };

            let Some(reason) = reason else {
                continue;
            };

            result.pages_to_rebuild.insert(page.key.clone());
            result.content_files_changed.insert(page.key.clone());
            result.rebuild_reasons.entry(page.key.clone()).or_insert(reason);

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

        for asset in &ctx.site.assets {
            let forced = ctx.forced_changed.contains(&asset.key)
                || ctx.nav_changed.contains(&asset.key);
            if forced || ctx.cache.is_changed(&asset.source_path) {
                result.assets_to_process.insert(asset.key.clone());
            }
        }

        Ok(result)
    }
}
