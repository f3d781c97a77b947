//! Provenance types for content-addressed incremental builds.
//!
//! A `Provenance` is the set of inputs that produced an output. Two
//! provenances with equal combined hashes are equivalent for cache
//! validation; the combined hash is derived from the sorted string forms of
//! the inputs, so it is order-independent and stable across runs.

use std::collections::BTreeSet;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::core::hashing::{ContentHash, hash_content};
use crate::core::keys::CacheKey;

/// What kind of input contributed to an output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputKind {
    Content,
    Template,
    Data,
    Config,
    Partial,
    AutodocSource,
    Taxonomy,
    Virtual,
}

impl fmt::Display for InputKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InputKind::Content => "content",
            InputKind::Template => "template",
            InputKind::Data => "data",
            InputKind::Config => "config",
            InputKind::Partial => "partial",
            InputKind::AutodocSource => "autodoc_source",
            InputKind::Taxonomy => "taxonomy",
            InputKind::Virtual => "virtual",
        };
        f.write_str(name)
    }
}

/// Single input that contributed to an output.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InputRecord {
    pub kind: InputKind,
    pub key: CacheKey,
    pub hash: ContentHash,
}

impl fmt::Display for InputRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}={}", self.kind, self.key, self.hash)
    }
}

/// Complete provenance for a rendered page: every input that influenced the
/// output, plus the combined hash used for cache lookups.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    pub inputs: BTreeSet<InputRecord>,
    pub combined_hash: ContentHash,
}

impl Provenance {
    pub fn new() -> Self {
        Provenance {
            inputs: BTreeSet::new(),
            combined_hash: ContentHash::new(""),
        }
    }

    fn from_inputs(inputs: BTreeSet<InputRecord>) -> Self {
        let combined_hash = combined_hash_of(&inputs);
        Provenance {
            inputs,
            combined_hash,
        }
    }

    /// Add an input, returning a new provenance. Immutable by design so a
    /// provenance can be shared between the filter and the store.
    pub fn with_input(&self, kind: InputKind, key: CacheKey, hash: ContentHash) -> Provenance {
        let mut inputs = self.inputs.clone();
        inputs.insert(InputRecord { kind, key, hash });
        Provenance::from_inputs(inputs)
    }

    pub fn merge(&self, other: &Provenance) -> Provenance {
        let inputs: BTreeSet<InputRecord> =
            self.inputs.union(&other.inputs).cloned().collect();
        Provenance::from_inputs(inputs)
    }

    pub fn input_count(&self) -> usize {
        self.inputs.len()
    }

    pub fn inputs_by_kind(&self, kind: InputKind) -> Vec<&InputRecord> {
        self.inputs.iter().filter(|i| i.kind == kind).collect()
    }

    /// Human-readable summary, e.g. `Provenance(1 config, 1 content) → ab12…`.
    pub fn summary(&self) -> String {
        let mut by_kind: Vec<(InputKind, usize)> = Vec::new();
        for input in &self.inputs {
            match by_kind.iter_mut().find(|(kind, _)| *kind == input.kind) {
                Some((_, count)) => *count += 1,
                None => by_kind.push((input.kind, 1)),
            }
        }
        by_kind.sort_by_key(|(kind, _)| *kind);
        let parts: Vec<String> = by_kind
            .iter()
            .map(|(kind, count)| format!("{} {}", count, kind))
            .collect();
        format!("Provenance({}) → {}", parts.join(", "), self.combined_hash)
    }
}

fn combined_hash_of(inputs: &BTreeSet<InputRecord>) -> ContentHash {
    if inputs.is_empty() {
        return ContentHash::new("");
    }
    // BTreeSet iteration order is the sort order of the records themselves,
    // but the hash is defined over the sorted *string* forms.
    let mut parts: Vec<String> = inputs.iter().map(|i| i.to_string()).collect();
    parts.sort();
    hash_content(parts.join("\n"))
}

/// Stored provenance record with metadata. This is the unit persisted to
/// disk by the provenance store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvenanceRecord {
    pub page_key: CacheKey,
    pub provenance: Provenance,
    /// Hash of the rendered output, for integrity checks.
    pub output_hash: ContentHash,
    /// Unix seconds at record time. Metadata only, never hashed.
    #[serde(default)]
    pub created_at: u64,
    #[serde(default)]
    pub build_id: String,
}

impl ProvenanceRecord {
    pub fn new(page_key: CacheKey, provenance: Provenance, output_hash: ContentHash) -> Self {
        let created_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        ProvenanceRecord {
            page_key,
            provenance,
            output_hash,
            created_at,
            build_id: String::new(),
        }
    }
}
