//! Stable content hashing for cache validation.
//!
//! All hashes are SHA-256 truncated to 16 hex characters. The short form
//! keeps logs readable; collisions are negligible at site scale. Nothing
//! time- or process-dependent ever enters a hash, so values are stable
//! across runs and platforms.

use std::borrow::Borrow;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Default truncation length for hashes.
pub const HASH_LENGTH: usize = 16;

/// Sentinel hash for files that cannot be read.
pub const MISSING_HASH: &str = "_missing_";

/// Truncated SHA-256 content hash.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(String);

impl ContentHash {
    pub fn new(raw: impl Into<String>) -> Self {
        ContentHash(raw.into())
    }

    /// The `_missing_` sentinel, used when a file cannot be read.
    pub fn missing() -> Self {
        ContentHash(MISSING_HASH.to_string())
    }

    pub fn is_missing(&self) -> bool {
        self.0 == MISSING_HASH
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for ContentHash {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Hash raw bytes (or a UTF-8 string via `as_bytes`).
pub fn hash_content(content: impl AsRef<[u8]>) -> ContentHash {
    hash_content_truncated(content, HASH_LENGTH)
}

pub fn hash_content_truncated(content: impl AsRef<[u8]>, truncate: usize) -> ContentHash {
    let digest = Sha256::digest(content.as_ref());
    let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
    ContentHash(hex[..truncate.min(hex.len())].to_string())
}

/// Hash a file's bytes. Unreadable files get the `_missing_` sentinel so a
/// deleted input reads as a change rather than an error.
pub fn hash_file(path: &Path) -> ContentHash {
    match std::fs::read(path) {
        Ok(bytes) => hash_content(bytes),
        Err(_) => ContentHash::missing(),
    }
}

/// Hash a JSON value with object keys sorted, so logically equal maps hash
/// identically regardless of insertion order.
pub fn hash_json(value: &Value) -> ContentHash {
    hash_content(canonical_json(value))
}

/// Serialize a JSON value deterministically: object keys sorted at every
/// level, no insignificant whitespace.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(key).unwrap_or_default());
                out.push(':');
                write_canonical(&map[*key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&serde_json::to_string(scalar).unwrap_or_default()),
    }
}
