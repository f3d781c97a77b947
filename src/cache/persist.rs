//! Atomic, versioned JSON persistence for on-disk caches.
//!
//! Every cache file is UTF-8 JSON with an integer `version` field. Files are
//! written to a temporary file in the target directory and renamed into
//! place, so a crashed build never leaves a half-written cache. Larger
//! indexes are zstd-compressed; uncompressed legacy files are read
//! transparently and rewritten compressed on the next save.
//!
//! Failures are reported with stable error codes so users can grep logs:
//! - `A002`: schema version mismatch (file discarded, rebuilt cold)
//! - `A003`: read/parse failure (file discarded, rebuilt cold)
//! - `A004`: write failure (state kept in memory, next save retries)

use std::fs;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tempfile::NamedTempFile;
use tracing::warn;

/// zstd frame magic number, used to detect compressed cache files.
const ZSTD_MAGIC: [u8; 4] = [0x28, 0xb5, 0x2f, 0xfd];

const ZSTD_LEVEL: i32 = 3;

/// Write bytes atomically: temp file in the same directory, then rename.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("cache path has no parent directory: {:?}", path))?;
    fs::create_dir_all(parent)
        .with_context(|| format!("failed to create cache directory: {:?}", parent))?;

    let mut tmp = NamedTempFile::new_in(parent)
        .with_context(|| format!("failed to create temp file in {:?}", parent))?;
    tmp.write_all(bytes)
        .with_context(|| format!("failed to write cache data for {:?}", path))?;
    tmp.persist(path)
        .with_context(|| format!("failed to replace cache file {:?}", path))?;
    Ok(())
}

/// Serialize and atomically write a cache value, optionally zstd-compressed.
///
/// Callers that can continue without persistence should log `A004` and carry
/// on; this function only reports the failure.
pub fn save_json<T: Serialize>(path: &Path, value: &T, compress: bool) -> Result<()> {
    let json = serde_json::to_vec(value)
        .with_context(|| format!("failed to serialize cache for {:?}", path))?;
    let bytes = if compress {
        zstd::encode_all(json.as_slice(), ZSTD_LEVEL)
            .with_context(|| format!("failed to compress cache for {:?}", path))?
    } else {
        json
    };
    write_atomic(path, &bytes)
}

/// Load a cache file, decompressing transparently. Returns `None` (with a
/// logged warning) on any read or parse failure; a cold cache is always a
/// valid fallback.
pub fn load_json<T: DeserializeOwned>(path: &Path) -> Option<T> {
    if !path.exists() {
        return None;
    }
    let raw = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!(
                code = "A003",
                path = %path.display(),
                error = %err,
                "cache file unreadable; rebuilding from scratch"
            );
            return None;
        }
    };
    let json = if raw.starts_with(&ZSTD_MAGIC) {
        match zstd::decode_all(raw.as_slice()) {
            Ok(decoded) => decoded,
            Err(err) => {
                warn!(
                    code = "A003",
                    path = %path.display(),
                    error = %err,
                    "cache file failed to decompress; rebuilding from scratch"
                );
                return None;
            }
        }
    } else {
        raw
    };
    match serde_json::from_slice(&json) {
        Ok(value) => Some(value),
        Err(err) => {
            warn!(
                code = "A003",
                path = %path.display(),
                error = %err,
                "cache file failed to parse; rebuilding from scratch"
            );
            None
        }
    }
}

/// Load a cache file and enforce its schema version. A mismatch discards the
/// file (`A002`); no migration is attempted across versions.
pub fn load_versioned_json<T: DeserializeOwned>(path: &Path, expected_version: u32) -> Option<T> {
    let value: serde_json::Value = load_json(path)?;
    let found = value.get("version").and_then(serde_json::Value::as_u64);
    if found != Some(expected_version as u64) {
        warn!(
            code = "A002",
            path = %path.display(),
            expected = expected_version,
            found = ?found,
            "cache schema version mismatch; discarding file"
        );
        return None;
    }
    match serde_json::from_value(value) {
        Ok(parsed) => Some(parsed),
        Err(err) => {
            warn!(
                code = "A003",
                path = %path.display(),
                error = %err,
                "cache file failed to deserialize; rebuilding from scratch"
            );
            None
        }
    }
}

/// Log a failed save with its stable error code. The build keeps going; the
/// in-memory state is still valid and the next save retries.
pub fn report_save_failure(path: &Path, err: &anyhow::Error) {
    warn!(
        code = "A004",
        path = %path.display(),
        error = %err,
        "cache save failed; continuing with in-memory state"
    );
}
