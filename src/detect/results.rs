//! Immutable result types for change detection.
//!
//! Every detector returns a `ChangeDetectionResult`; the pipeline merges
//! them as it goes. Merging is a set union; the first detector to give a
//! page a reason wins, so earlier (more specific) detectors take precedence
//! in diagnostics.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::keys::CacheKey;

/// Why a page needs rebuilding. Surfaced verbatim in `--verbose` output, so
/// adding a code is a breaking log-format change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RebuildReasonCode {
    ContentChanged,
    DataFileChanged,
    TemplateChanged,
    TaxonomyCascade,
    Cascade,
    AdjacentNavChanged,
    CrossVersionDependency,
    AssetFingerprintChanged,
    ConfigChanged,
    OutputMissing,
    Forced,
    FullRebuild,
}

impl fmt::Display for RebuildReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RebuildReasonCode::ContentChanged => "CONTENT_CHANGED",
            RebuildReasonCode::DataFileChanged => "DATA_FILE_CHANGED",
            RebuildReasonCode::TemplateChanged => "TEMPLATE_CHANGED",
            RebuildReasonCode::TaxonomyCascade => "TAXONOMY_CASCADE",
            RebuildReasonCode::Cascade => "CASCADE",
            RebuildReasonCode::AdjacentNavChanged => "ADJACENT_NAV_CHANGED",
            RebuildReasonCode::CrossVersionDependency => "CROSS_VERSION_DEPENDENCY",
            RebuildReasonCode::AssetFingerprintChanged => "ASSET_FINGERPRINT_CHANGED",
            RebuildReasonCode::ConfigChanged => "CONFIG_CHANGED",
            RebuildReasonCode::OutputMissing => "OUTPUT_MISSING",
            RebuildReasonCode::Forced => "FORCED",
            RebuildReasonCode::FullRebuild => "FULL_REBUILD",
        };
        f.write_str(name)
    }
}

/// Reason code plus the trigger that caused it (a path, template, or term).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebuildReason {
    pub code: RebuildReasonCode,
    pub trigger: String,
}

impl RebuildReason {
    pub fn new(code: RebuildReasonCode, trigger: impl Into<String>) -> Self {
        RebuildReason {
            code,
            trigger: trigger.into(),
        }
    }

    pub fn bare(code: RebuildReasonCode) -> Self {
        RebuildReason {
            code,
            trigger: String::new(),
        }
    }
}

impl fmt::Display for RebuildReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.trigger.is_empty() {
            write!(f, "{}", self.code)
        } else {
            write!(f, "{}: {}", self.code, self.trigger)
        }
    }
}

/// Immutable accumulated output of change detection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeDetectionResult {
    pub pages_to_rebuild: BTreeSet<CacheKey>,
    pub rebuild_reasons: BTreeMap<CacheKey, RebuildReason>,
    pub assets_to_process: BTreeSet<CacheKey>,
    /// What changed, for downstream detectors.
    pub content_files_changed: BTreeSet<CacheKey>,
    pub data_files_changed: BTreeSet<CacheKey>,
    pub templates_changed: BTreeSet<CacheKey>,
    /// Affected taxonomy state, for the taxonomy detector.
    pub affected_tags: BTreeSet<String>,
    pub affected_sections: BTreeSet<CacheKey>,
    pub config_changed: bool,
    pub force_full_rebuild: bool,
}

impl ChangeDetectionResult {
    pub fn empty() -> Self {
        ChangeDetectionResult::default()
    }

    pub fn full_rebuild() -> Self {
        ChangeDetectionResult {
            force_full_rebuild: true,
            ..Default::default()
        }
    }

    /// Merge two results. Sets union; reasons are first-writer-wins, so an
    /// existing reason is never overwritten.
    pub fn merge(&self, other: &ChangeDetectionResult) -> ChangeDetectionResult {
        let mut rebuild_reasons = self.rebuild_reasons.clone();
        for (key, reason) in &other.rebuild_reasons {
            rebuild_reasons
                .entry(key.clone())
                .or_insert_with(|| reason.clone());
        }
        ChangeDetectionResult {
            pages_to_rebuild: self
                .pages_to_rebuild
                .union(&other.pages_to_rebuild)
                .cloned()
                .collect(),
            rebuild_reasons,
            assets_to_process: self
                .assets_to_process
                .union(&other.assets_to_process)
                .cloned()
                .collect(),
            content_files_changed: self
                .content_files_changed
                .union(&other.content_files_changed)
                .cloned()
                .collect(),
            data_files_changed: self
                .data_files_changed
                .union(&other.data_files_changed)
                .cloned()
                .collect(),
            templates_changed: self
                .templates_changed
                .union(&other.templates_changed)
                .cloned()
                .collect(),
            affected_tags: self.affected_tags.union(&other.affected_tags).cloned().collect(),
            affected_sections: self
                .affected_sections
                .union(&other.affected_sections)
                .cloned()
                .collect(),
            config_changed: self.config_changed || other.config_changed,
            force_full_rebuild: self.force_full_rebuild || other.force_full_rebuild,
        }
    }

    /// Add pages with a shared reason, keeping existing reasons.
    pub fn with_pages(
        &self,
        pages: BTreeSet<CacheKey>,
        reason: RebuildReason,
    ) -> ChangeDetectionResult {
        let mut result = self.clone();
        for page in pages {
            result
                .rebuild_reasons
                .entry(page.clone())
                .or_insert_with(|| reason.clone());
            result.pages_to_rebuild.insert(page);
        }
        result
    }

    pub fn needs_rebuild(&self) -> bool {
        !self.pages_to_rebuild.is_empty() || self.force_full_rebuild
    }

    /// Human-readable one-liner for logs.
    pub fn summary(&self) -> String {
        let mut parts: Vec<String> = Vec::new();
        if self.force_full_rebuild {
            parts.push("FULL REBUILD".to_string());
        }
        if !self.pages_to_rebuild.is_empty() {
            parts.push(format!("{} pages", self.pages_to_rebuild.len()));
        }
        if !self.assets_to_process.is_empty() {
            parts.push(format!("{} assets", self.assets_to_process.len()));
        }
        if !self.data_files_changed.is_empty() {
            parts.push(format!("{} data files", self.data_files_changed.len()));
        }
        if !self.templates_changed.is_empty() {
            parts.push(format!("{} templates", self.templates_changed.len()));
        }
        if parts.is_empty() {
            "no changes".to_string()
        } else {
            parts.join(", ")
        }
    }
}
