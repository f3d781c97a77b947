//! Taxonomy cascade detection.

use std::collections::BTreeSet;

use anyhow::Result;
use serde_json::Value;

use crate::core::keys::CacheKey;
use crate::detect::results::{ChangeDetectionResult, RebuildReason, RebuildReasonCode};
use crate::detect::{ChangeDetector, DetectionContext};
use crate::index::taxonomy::slugify;

/// Detects generated tag and archive pages invalidated by tag or section
/// membership changes on content pages.
pub struct TaxonomyCascadeDetector;

impl ChangeDetector for TaxonomyCascadeDetector {
    fn name(&self) -> &str {
        "taxonomy_cascade"
    }

    fn detect(&self, ctx: &DetectionContext) -> Result<ChangeDetectionResult> {
        let mut result = ChangeDetectionResult::empty();

        // Diff current tags against the previous build's for every changed
        // content page. Both directions of the diff matter: a dropped tag's
        // page must relist, and an added tag's page must be (re)created.
        for page_key in &ctx.previous.content_files_changed {
            let Some(page) = ctx.site.page(page_key) else {
                continue;
            };
            let old_tags = ctx.cache.get_previous_tags(page_key);
            let new_tags: BTreeSet<String> = page
                .tags
                .iter()
                .map(|tag| slugify(tag))
                .filter(|slug| !slug.is_empty())
                .collect();

            for slug in old_tags.symmetric_difference(&new_tags) {
                result.affected_tags.insert(slug.clone());
            }
            if let Some(section) = &page.section {
                result.affected_sections.insert(section.clone());
            }
        }

        let affected_tags: BTreeSet<String> = ctx
            .previous
            .affected_tags
            .union(&result.affected_tags)
            .cloned()
            .collect();
        let affected_sections: BTreeSet<CacheKey> = ctx
            .previous
            .affected_sections
            .union(&result.affected_sections)
            .cloned()
            .collect();

        if !affected_tags.is_empty() {
            for page in ctx.site.generated_pages() {
                let page_type = page.metadata.get("type").and_then(Value::as_str);
                let tag_slug = page.metadata.get("_tag_slug").and_then(Value::as_str);
                let hit = match page_type {
                    Some("tag") => tag_slug.is_some_and(|slug| affected_tags.contains(slug)),
                    Some("tag-index") => true,
                    _ => false,
                };
                if hit {
                    result
                        .rebuild_reasons
                        .entry(page.key.clone())
                        .or_insert_with(|| {
                            RebuildReason::new(
                                RebuildReasonCode::TaxonomyCascade,
                                format!("tag:{}", tag_slug.unwrap_or("index")),
                            )
                        });
                    result.pages_to_rebuild.insert(page.key.clone());
                }
            }
        }

        if !affected_sections.is_empty() {
            for page in ctx.site.generated_pages() {
                if page.metadata.get("type").and_then(Value::as_str) != Some("archive") {
                    continue;
                }
                let section = page
                    .metadata
                    .get("_section")
                    .and_then(Value::as_str)
                    .map(CacheKey::new);
                if section.is_some_and(|s| affected_sections.contains(&s)) {
                    result
                        .rebuild_reasons
                        .entry(page.key.clone())
                        .or_insert_with(|| {
                            RebuildReason::new(
                                RebuildReasonCode::TaxonomyCascade,
                                page.key.as_str(),
                            )
                        });
                    result.pages_to_rebuild.insert(page.key.clone());
                }
            }
        }

        // Metadata cascades: a term page lists member metadata (title,
        // date), so it updates when a member rebuilds even with unchanged
        // tag membership.
        for page_key in &ctx.previous.pages_to_rebuild {
            let Some(page) = ctx.site.page(page_key) else {
                continue;
            };
            if page.tags.is_empty() {
                continue;
            }
            for term_key in ctx.site.tracker.get_term_pages_for_member(page_key) {
                if ctx.previous.pages_to_rebuild.contains(&term_key) {
                    continue;
                }
                result
                    .rebuild_reasons
                    .entry(term_key.clone())
                    .or_insert_with(|| {
                        RebuildReason::new(RebuildReasonCode::TaxonomyCascade, page_key.as_str())
                    });
                result.pages_to_rebuild.insert(term_key);
            }
        }

        Ok(result)
    }
}
