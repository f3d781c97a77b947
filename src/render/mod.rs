//! Rendering boundary.
//!
//! The build engine treats rendering as an external collaborator; what lives
//! here is the smallest real implementation that the render orchestrator can
//! schedule: a [`RenderPipeline`] holding a loaded template environment,
//! rendering pages by placeholder substitution. It is deliberately not a
//! template language.
//!
//! Pipelines are expensive to construct (they read every template file), so
//! workers reuse them across pages and rebuild them only when the build
//! generation moves on. Template sources are additionally cached
//! process-wide; the template detector drops changed entries from that cache
//! so new pipelines reread them.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{LazyLock, Mutex};

use anyhow::{Context, Result};
use walkdir::WalkDir;

use crate::core::page::Page;
use crate::core::site::Site;

/// Used when a page names a template that does not exist.
const FALLBACK_TEMPLATE: &str =
    "<!DOCTYPE html>\n<html>\n<head><title>{{ title }} - {{ site_title }}</title></head>\n<body>\n<main>{{ content }}</main>\n</body>\n</html>\n";

/// Cached template source plus the mtime/size stamp it was read at.
struct CachedTemplate {
    mtime: u64,
    size: u64,
    source: String,
}

static TEMPLATE_SOURCES: LazyLock<Mutex<HashMap<PathBuf, CachedTemplate>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

/// Drop changed templates from the process-wide source cache, by template
/// name (`page.html`, `partials/nav.html`). Best-effort: unknown names are
/// ignored. The stamp check in [`template_source`] catches edits this never
/// hears about; this just avoids the stat on known-changed entries.
pub fn clear_template_cache(names: &[String]) {
    let Ok(mut sources) = TEMPLATE_SOURCES.lock() else {
        return;
    };
    sources.retain(|path, _| {
        let posix = path.to_string_lossy().replace('\\', "/");
        !names.iter().any(|name| posix.ends_with(name.as_str()))
    });
}

fn file_stamp(path: &Path) -> (u64, u64) {
    let Ok(meta) = std::fs::metadata(path) else {
        return (0, 0);
    };
    let mtime = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
        .unwrap_or(0);
    (mtime, meta.len())
}

fn template_source(path: &Path) -> Result<String> {
    let (mtime, size) = file_stamp(path);
    if let Ok(sources) = TEMPLATE_SOURCES.lock() {
        if let Some(cached) = sources.get(path) {
            if cached.mtime == mtime && cached.size == size {
                return Ok(cached.source.clone());
            }
        }
    }
    let source = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read template {:?}", path))?;
    if let Ok(mut sources) = TEMPLATE_SOURCES.lock() {
        sources.insert(
            path.to_path_buf(),
            CachedTemplate {
                mtime,
                size,
                source: source.clone(),
            },
        );
    }
    Ok(source)
}

/// A loaded template environment plus the build generation it was built in.
#[derive(Debug)]
pub struct RenderPipeline {
    templates: HashMap<String, String>,
    generation: u64,
}

impl RenderPipeline {
    /// Load every template visible to the site. Site templates shadow theme
    /// templates of the same name.
    pub fn new(site: &Site, generation: u64) -> Result<Self> {
        let mut templates = HashMap::new();
        for dir in [site.theme_templates_dir(), site.site_templates_dir()] {
            if !dir.exists() {
                continue;
            }
            for entry in WalkDir::new(&dir).into_iter().filter_map(|e| e.ok()) {
                let path = entry.path();
                if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some("html") {
                    continue;
                }
                let name = path
                    .strip_prefix(&dir)
                    .unwrap_or(path)
                    .to_string_lossy()
                    .replace('\\', "/");
                templates.insert(name, template_source(path)?);
            }
        }
        Ok(RenderPipeline {
            templates,
            generation,
        })
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn template_count(&self) -> usize {
        self.templates.len()
    }

    pub fn has_template(&self, name: &str) -> bool {
        self.templates.contains_key(name)
    }

    /// Render a page to HTML by substituting the well-known placeholders.
    pub fn render_page(&self, site: &Site, page: &Page) -> String {
        let template = self
            .templates
            .get(&page.template)
            .map(String::as_str)
            .unwrap_or(FALLBACK_TEMPLATE);
        template
            .replace("{{ title }}", &page.title)
            .replace("{{ content }}", &page.content)
            .replace("{{ site_title }}", &site.config().title)
            .replace("{{ route }}", &page.route())
    }
}

/// Output path for a page under the output directory: pretty URLs, one
/// `index.html` per route.
pub fn output_path_for(site: &Site, page: &Page) -> PathBuf {
    let route = page.route();
    let trimmed = route.trim_matches('/');
    if trimmed.is_empty() {
        site.output_dir.join("index.html")
    } else {
        site.output_dir.join(trimmed).join("index.html")
    }
}
