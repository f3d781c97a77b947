//! Data file change detection.

use std::path::PathBuf;

use anyhow::Result;
use walkdir::WalkDir;

use crate::core::keys::data_key;
use crate::detect::results::{ChangeDetectionResult, RebuildReason, RebuildReasonCode};
use crate::detect::{ChangeDetector, DetectionContext};

pub const DATA_FILE_EXTENSIONS: &[&str] = &["yaml", "yml", "json", "toml"];

/// Detects changed files under `data/` and maps them to dependent pages.
///
/// On the first build no page has recorded data dependencies yet, so a
/// changed data file conservatively rebuilds every non-generated page.
pub struct DataChangeDetector;

impl ChangeDetector for DataChangeDetector {
    fn name(&self) -> &str {
        "data"
    }

    fn detect(&self, ctx: &DetectionContext) -> Result<ChangeDetectionResult> {
        let data_dir = ctx.site.data_dir();
        if !data_dir.exists() {
            return Ok(ChangeDetectionResult::empty());
        }

        let mut changed_files: Vec<PathBuf> = Vec::new();
        for entry in WalkDir::new(&data_dir).into_iter().filter_map(|e| e.ok()) {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let is_data = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|ext| DATA_FILE_EXTENSIONS.contains(&ext));
            if !is_data {
                continue;
            }
            let key = data_key(path, &ctx.site.root_path);
            if ctx.forced_changed.contains(&key) || ctx.cache.is_changed(path) {
                changed_files.push(path.to_path_buf());
            }
        }

        if changed_files.is_empty() {
            return Ok(ChangeDetectionResult::empty());
        }
        changed_files.sort();

        let mut result = ChangeDetectionResult::empty();
        for file in &changed_files {
            result
                .data_files_changed
                .insert(data_key(file, &ctx.site.root_path));
        }

        for file in &changed_files {
            let key = data_key(file, &ctx.site.root_path);
            for page_key in ctx.cache.get_affected_pages(&key) {
                result.pages_to_rebuild.insert(page_key);
            }
        }

        // No tracked dependents means this is the first build with data
        // files: rebuild everything rather than miss a consumer.
        if result.pages_to_rebuild.is_empty() {
            for page in ctx.site.regular_pages() {
                result.pages_to_rebuild.insert(page.key.clone());
            }
        }

        let trigger = changed_files[0]
            .strip_prefix(&ctx.site.root_path)
            .map(|rel| rel.to_string_lossy().replace('\\', "/"))
            .unwrap_or_else(|_| changed_files[0].display().to_string());
        for page_key in result.pages_to_rebuild.clone() {
            result
                .rebuild_reasons
                .entry(page_key)
                .or_insert_with(|| {
                    RebuildReason::new(RebuildReasonCode::DataFileChanged, trigger.clone())
                });
        }

        Ok(result)
    }
}
