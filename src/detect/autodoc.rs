//! Autodoc source change detection.

use std::path::Path;

use anyhow::Result;
use tracing::debug;

use crate::core::keys::key_to_path;
use crate::detect::results::{ChangeDetectionResult, RebuildReason, RebuildReasonCode};
use crate::detect::{ChangeDetector, DetectionContext};

/// Detects changed autodoc source files and the generated pages that depend
/// on them.
///
/// Only sources under the project are considered; files inside installed
/// package trees change on dependency upgrades, not on user edits, and are
/// covered by the config/version hash instead.
pub struct AutodocChangeDetector;

impl ChangeDetector for AutodocChangeDetector {
    fn name(&self) -> &str {
        "autodoc"
    }

    fn detect(&self, ctx: &DetectionContext) -> Result<ChangeDetectionResult> {
        let source_files = ctx.cache.autodoc_source_files();
        if source_files.is_empty() {
            return Ok(ChangeDetectionResult::empty());
        }

        let mut result = ChangeDetectionResult::empty();
        let mut skipped = 0usize;

        for source_key in source_files {
            let source_path = key_to_path(&ctx.site.root_path, &source_key);
            if is_external_source(&source_path) {
                continue;
            }
            if !ctx.cache.is_changed(&source_path) {
                continue;
            }

            for page_key in ctx.cache.get_affected_autodoc_pages(&source_key) {
                // Cosmetic source edits keep the extracted surface hash
                // stable; those pages are filtered out here.
                let doc_hash = ctx
                    .site
                    .page(&page_key)
                    .and_then(|page| page.doc_content_hash().map(|h| h.to_string()));
                if let Some(hash) = &doc_hash {
                    if !ctx.cache.is_doc_content_changed(&source_key, &page_key, hash) {
                        skipped += 1;
                        continue;
                    }
                }

                result
                    .rebuild_reasons
                    .entry(page_key.clone())
                    .or_insert_with(|| {
                        RebuildReason::new(
                            RebuildReasonCode::ContentChanged,
                            "autodoc_source_changed",
                        )
                    });
                result.pages_to_rebuild.insert(page_key);
            }
        }

        if skipped > 0 {
            debug!(
                skipped,
                remaining = result.pages_to_rebuild.len(),
                "autodoc pages skipped with unchanged doc content"
            );
        }

        Ok(result)
    }
}

fn is_external_source(path: &Path) -> bool {
    path.components().any(|part| {
        matches!(
            part.as_os_str().to_str(),
            Some("site-packages") | Some("dist-packages") | Some(".venv") | Some(".tox")
        )
    })
}
