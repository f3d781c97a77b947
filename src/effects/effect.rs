//! Declarative effect of a build operation.
//!
//! An `Effect` records what one build operation produced, what it read, and
//! which cache keys become stale when those inputs change. Detectors query
//! the recorded effects instead of each keeping private dependency state.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// A dependency is either a concrete file or a bare name (templates are
/// often referenced by name only).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dependency {
    File(PathBuf),
    Name(String),
}

impl Dependency {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Dependency::File(path.into())
    }

    pub fn name(name: impl Into<String>) -> Self {
        Dependency::Name(name.into())
    }

    pub fn as_file(&self) -> Option<&Path> {
        match self {
            Dependency::File(path) => Some(path),
            Dependency::Name(_) => None,
        }
    }
}

/// Immutable record of one build operation's inputs and outputs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Effect {
    /// Files this operation produces.
    #[serde(default)]
    pub outputs: BTreeSet<PathBuf>,
    /// Files and names this operation reads.
    #[serde(default)]
    pub depends_on: BTreeSet<Dependency>,
    /// Cache keys to clear if inputs change, e.g. `page:/docs/guide/` or
    /// `taxonomy:tags:python`.
    #[serde(default)]
    pub invalidates: BTreeSet<String>,
    /// Operation label for diagnostics (`render_page`, `copy_asset`, …).
    #[serde(default)]
    pub operation: String,
    /// Additional context; never consulted for invalidation.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl Effect {
    /// Merge two effects into one, combining dependencies and invalidations.
    pub fn merge_with(&self, other: &Effect) -> Effect {
        let operation = if other.operation.is_empty() {
            self.operation.clone()
        } else if self.operation.is_empty() {
            other.operation.clone()
        } else {
            format!("{}+{}", self.operation, other.operation)
        };
        let mut metadata = self.metadata.clone();
        metadata.extend(other.metadata.clone());
        Effect {
            outputs: self.outputs.union(&other.outputs).cloned().collect(),
            depends_on: self.depends_on.union(&other.depends_on).cloned().collect(),
            invalidates: self.invalidates.union(&other.invalidates).cloned().collect(),
            operation,
            metadata,
        }
    }

    /// Effect for rendering one page.
    #[allow(clippy::too_many_arguments)]
    pub fn for_page_render(
        source_path: &Path,
        output_path: &Path,
        template_name: &str,
        template_includes: &BTreeSet<String>,
        page_route: &str,
        cascade_sources: &BTreeSet<PathBuf>,
        data_files: &BTreeSet<PathBuf>,
    ) -> Effect {
        let mut depends_on = BTreeSet::new();
        depends_on.insert(Dependency::file(source_path));
        depends_on.insert(Dependency::name(template_name));
        for include in template_includes {
            depends_on.insert(Dependency::name(include));
        }
        for cascade in cascade_sources {
            depends_on.insert(Dependency::file(cascade));
        }
        for data_file in data_files {
            depends_on.insert(Dependency::file(data_file));
        }

        let mut metadata = BTreeMap::new();
        metadata.insert("route".to_string(), page_route.to_string());
        metadata.insert("template".to_string(), template_name.to_string());

        Effect {
            outputs: BTreeSet::from([output_path.to_path_buf()]),
            depends_on,
            invalidates: BTreeSet::from([format!("page:{}", page_route)]),
            operation: "render_page".to_string(),
            metadata,
        }
    }

    /// Effect for copying (or fingerprinting) one asset.
    pub fn for_asset_copy(source_path: &Path, output_path: &Path, fingerprinted: bool) -> Effect {
        let operation = if fingerprinted {
            "fingerprint_asset"
        } else {
            "copy_asset"
        };
        Effect {
            outputs: BTreeSet::from([output_path.to_path_buf()]),
            depends_on: BTreeSet::from([Dependency::file(source_path)]),
            invalidates: BTreeSet::from([format!("asset:{}", source_path.display())]),
            operation: operation.to_string(),
            metadata: BTreeMap::from([(
                "fingerprinted".to_string(),
                fingerprinted.to_string(),
            )]),
        }
    }

    /// Effect for generating an index file (sitemap, RSS, search index).
    pub fn for_index_generation(
        output_path: &Path,
        source_pages: &BTreeSet<PathBuf>,
        index_type: &str,
    ) -> Effect {
        Effect {
            outputs: BTreeSet::from([output_path.to_path_buf()]),
            depends_on: source_pages.iter().map(Dependency::file).collect(),
            invalidates: BTreeSet::from([format!("index:{}", index_type)]),
            operation: format!("generate_{}", index_type),
            metadata: BTreeMap::from([
                ("index_type".to_string(), index_type.to_string()),
                ("page_count".to_string(), source_pages.len().to_string()),
            ]),
        }
    }

    /// Effect for generating a taxonomy term page.
    pub fn for_taxonomy_page(
        output_path: &Path,
        taxonomy_name: &str,
        term: &str,
        member_pages: &BTreeSet<PathBuf>,
    ) -> Effect {
        Effect {
            outputs: BTreeSet::from([output_path.to_path_buf()]),
            depends_on: member_pages.iter().map(Dependency::file).collect(),
            invalidates: BTreeSet::from([format!("taxonomy:{}:{}", taxonomy_name, term)]),
            operation: "generate_taxonomy_page".to_string(),
            metadata: BTreeMap::from([
                ("taxonomy".to_string(), taxonomy_name.to_string()),
                ("term".to_string(), term.to_string()),
            ]),
        }
    }
}
