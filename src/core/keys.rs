//! Canonical cache key generation.
//!
//! All cache operations use these functions for path keys, so lookups are
//! consistent regardless of how a path arrives (absolute, relative, symlink,
//! Windows-style separators).
//!
//! Three key forms exist:
//! - plain relative path: `content/about.md`
//! - type-prefixed: `data:data/team.yaml`
//! - absolute POSIX path, for files outside the site root

use std::borrow::Borrow;
use std::fmt;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Opaque cache key. Construct via [`content_key`], [`data_key`] or
/// [`template_key`] so every key is canonical.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(raw: impl Into<String>) -> Self {
        CacheKey(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for CacheKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Canonical key for content files (pages, sections, assets).
///
/// Always relative to the site root, forward slashes, no leading `./`.
/// Paths that escape the root use their absolute POSIX form.
pub fn content_key(path: &Path, site_root: &Path) -> CacheKey {
    let resolved = canonicalize_lenient(path, site_root);
    let root = canonicalize_lenient(site_root, site_root);
    match resolved.strip_prefix(&root) {
        Ok(rel) => CacheKey(to_posix(rel)),
        Err(_) => CacheKey(to_posix(&resolved)),
    }
}

/// Canonical key for data files, prefixed with `data:` to distinguish them
/// from content.
pub fn data_key(path: &Path, site_root: &Path) -> CacheKey {
    let rel = content_key(path, site_root);
    CacheKey(format!("data:{}", rel))
}

/// Canonical key for template files, relative to the templates directory.
pub fn template_key(path: &Path, templates_dir: &Path) -> CacheKey {
    content_key(path, templates_dir)
}

/// Split a key into `(prefix, path)`.
///
/// Keys starting with `/` are absolute paths and never carry a prefix, so a
/// colon inside them is left alone.
pub fn parse_key(key: &CacheKey) -> (&str, &str) {
    let raw = key.as_str();
    if !raw.starts_with('/') {
        if let Some((prefix, path)) = raw.split_once(':') {
            return (prefix, path);
        }
    }
    ("", raw)
}

/// Convert a cache key back to a source path under the site root.
pub fn key_to_path(site_root: &Path, key: &CacheKey) -> PathBuf {
    let (_, path) = parse_key(key);
    if path.starts_with('/') {
        PathBuf::from(path)
    } else {
        site_root.join(path)
    }
}

/// Resolve a path to an absolute, symlink-free form where possible.
///
/// `fs::canonicalize` fails for paths that do not exist (deleted pages must
/// keep stable keys), so missing paths fall back to lexical normalization of
/// the absolute form. Relative inputs are anchored at the site root.
fn canonicalize_lenient(path: &Path, site_root: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        site_root.join(path)
    };
    match absolute.canonicalize() {
        Ok(resolved) => resolved,
        Err(_) => normalize_lexically(&absolute),
    }
}

/// Remove `.` and `..` components without touching the filesystem.
fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Render a path with forward slashes, no leading `./`, no duplicate slashes.
fn to_posix(path: &Path) -> String {
    let raw = path.to_string_lossy().replace('\\', "/");
    let absolute = raw.starts_with('/');
    let parts: Vec<&str> = raw
        .split('/')
        .filter(|part| !part.is_empty() && *part != ".")
        .collect();
    if absolute {
        format!("/{}", parts.join("/"))
    } else {
        parts.join("/")
    }
}
