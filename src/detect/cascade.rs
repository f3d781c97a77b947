//! Frontmatter cascade and navigation dependency detection.

use anyhow::Result;

use crate::core::hashing::hash_json;
use crate::core::keys::CacheKey;
use crate::core::page::Page;
use crate::detect::results::{ChangeDetectionResult, RebuildReason, RebuildReasonCode};
use crate::detect::{ChangeDetector, DetectionContext};

/// Detects pages affected by cascade changes in section index files.
///
/// Only section indices (`_index.md` / `index.md`) can carry a cascade, and
/// only ones already marked for rebuild can have changed, so everything else
/// is filtered before any hashing happens.
pub struct SectionCascadeDetector;

impl ChangeDetector for SectionCascadeDetector {
    fn name(&self) -> &str {
        "section_cascade"
    }

    fn detect(&self, ctx: &DetectionContext) -> Result<ChangeDetectionResult> {
        let mut result = ChangeDetectionResult::empty();

        for page_key in &ctx.previous.pages_to_rebuild {
            let Some(page) = ctx.site.page(page_key) else {
                continue;
            };
            if !page.is_section_index() {
                continue;
            }
            let Some(cascade) = page.cascade() else {
                continue;
            };

            let current_hash = hash_json(cascade);
            if ctx.cache.cascade_hash(page_key) == Some(&current_hash) {
                continue;
            }

            for affected in cascade_affected_pages(ctx, page) {
                if affected == *page_key || ctx.previous.pages_to_rebuild.contains(&affected) {
                    continue;
                }
                result.rebuild_reasons.entry(affected.clone()).or_insert_with(|| {
                    RebuildReason::new(RebuildReasonCode::Cascade, page_key.as_str())
                });
                result.pages_to_rebuild.insert(affected);
            }
        }

        Ok(result)
    }
}

/// Descendants governed by an index page's cascade: the whole site for a
/// root-level index, the section subtree otherwise.
fn cascade_affected_pages(ctx: &DetectionContext, index_page: &Page) -> Vec<CacheKey> {
    let parent = index_page
        .source_path
        .parent()
        .map(|p| crate::core::keys::content_key(p, &ctx.site.root_path));

    match parent {
        Some(section) if section.as_str() != "content" => ctx
            .site
            .pages_under(&section)
            .into_iter()
            .map(|p| p.key.clone())
            .collect(),
        _ => ctx.site.regular_pages().map(|p| p.key.clone()).collect(),
    }
}

/// Adds the prev/next neighbors of structurally changed pages, so adjacent
/// navigation links never go stale after a page is added or removed.
///
/// Only structural changes expand: a page in the watcher's `nav_changed`
/// set, or one the neighbor cache has never seen (a new page). A plain
/// content edit leaves its neighbors' navigation untouched and must not
/// rebuild them.
pub struct NavigationDependencyDetector;

impl ChangeDetector for NavigationDependencyDetector {
    fn name(&self) -> &str {
        "navigation"
    }

    fn detect(&self, ctx: &DetectionContext) -> Result<ChangeDetectionResult> {
        let mut result = ChangeDetectionResult::empty();

        for page_key in &ctx.previous.pages_to_rebuild {
            let Some(page) = ctx.site.page(page_key) else {
                continue;
            };
            if page.generated {
                continue;
            }
            let structural = ctx.nav_changed.contains(page_key)
                || !ctx.cache.nav_neighbors.contains_key(page_key);
            if !structural {
                continue;
            }

            for neighbor_key in [&page.prev, &page.next].into_iter().flatten() {
                let Some(neighbor) = ctx.site.page(neighbor_key) else {
                    continue;
                };
                if neighbor.generated || ctx.previous.pages_to_rebuild.contains(neighbor_key) {
                    continue;
                }
                result
                    .rebuild_reasons
                    .entry(neighbor_key.clone())
                    .or_insert_with(|| {
                        RebuildReason::new(
                            RebuildReasonCode::AdjacentNavChanged,
                            page_key.as_str(),
                        )
                    });
                result.pages_to_rebuild.insert(neighbor_key.clone());
            }
        }

        Ok(result)
    }
}
