//! Template change detection.

use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing::debug;
use walkdir::WalkDir;

use crate::core::keys::{CacheKey, content_key, template_key};
use crate::detect::results::{ChangeDetectionResult, RebuildReason, RebuildReasonCode};
use crate::detect::{ChangeDetector, DetectionContext};
use crate::render;

/// Detects changed templates under the theme and site template directories
/// and maps them to dependent pages.
pub struct TemplateChangeDetector;

impl ChangeDetector for TemplateChangeDetector {
    fn name(&self) -> &str {
        "template"
    }

    fn detect(&self, ctx: &DetectionContext) -> Result<ChangeDetectionResult> {
        let template_files = collect_template_files(ctx);
        if template_files.is_empty() {
            return Ok(ChangeDetectionResult::empty());
        }

        let mut result = ChangeDetectionResult::empty();
        let mut changed_names: Vec<String> = Vec::new();

        for template_file in &template_files {
            let key = content_key(template_file, &ctx.site.root_path);
            if !ctx.forced_changed.contains(&key) && !ctx.cache.is_changed(template_file) {
                continue;
            }
            result.templates_changed.insert(key.clone());

            if let Some(name) = template_name(ctx, template_file) {
                changed_names.push(name);
            }

            let affected = affected_pages(ctx, template_file, &key);
            for page_key in affected {
                result
                    .rebuild_reasons
                    .entry(page_key.clone())
                    .or_insert_with(|| {
                        RebuildReason::new(
                            RebuildReasonCode::TemplateChanged,
                            key.as_str(),
                        )
                    });
                result.pages_to_rebuild.insert(page_key);
            }
        }

        if !changed_names.is_empty() {
            // Best-effort: drop the changed templates from the process-wide
            // source cache so freshly built pipelines reread them.
            render::clear_template_cache(&changed_names);
            debug!(templates = changed_names.len(), "template source cache invalidated");
        }

        Ok(result)
    }
}

fn collect_template_files(ctx: &DetectionContext) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for dir in [ctx.site.theme_templates_dir(), ctx.site.site_templates_dir()] {
        if !dir.exists() {
            continue;
        }
        for entry in WalkDir::new(&dir).into_iter().filter_map(|e| e.ok()) {
            let path = entry.path();
            if path.is_file() && path.extension().and_then(|e| e.to_str()) == Some("html") {
                files.push(path.to_path_buf());
            }
        }
    }
    files.sort();
    files
}

/// Template name relative to its templates directory, e.g. `page.html` or
/// `partials/nav.html`.
fn template_name(ctx: &DetectionContext, path: &Path) -> Option<String> {
    for dir in [ctx.site.site_templates_dir(), ctx.site.theme_templates_dir()] {
        if dir.exists() {
            if let Ok(rel) = path.strip_prefix(&dir) {
                return Some(rel.to_string_lossy().replace('\\', "/"));
            }
        }
    }
    None
}

/// Pages depending on a changed template: recorded dependencies first, with
/// a template-name scan as fallback for builds without dependency state.
fn affected_pages(
    ctx: &DetectionContext,
    template_file: &Path,
    root_key: &CacheKey,
) -> Vec<CacheKey> {
    let mut pages: Vec<CacheKey> = ctx
        .cache
        .get_affected_pages(root_key)
        .into_iter()
        .collect();

    // Dependencies may also be recorded under the template-dir-relative key.
    for dir in [ctx.site.theme_templates_dir(), ctx.site.site_templates_dir()] {
        if dir.exists() {
            let rel_key = template_key(template_file, &dir);
            pages.extend(ctx.cache.get_affected_pages(&rel_key));
        }
    }

    if pages.is_empty() {
        if let Some(name) = template_name(ctx, template_file) {
            for page in ctx.site.regular_pages() {
                if page.template == name {
                    pages.push(page.key.clone());
                }
            }
        }
    }
    pages
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, BTreeSet};
    use std::fs;

    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    use super::*;
    use crate::cache::build_cache::BuildCache;
    use crate::config::EffectiveConfig;
    use crate::core::page::Page;
    use crate::core::site::Site;

    fn fixture(root: &std::path::Path) -> (Site, BuildCache) {
        let templates = root.join("themes/default/templates");
        fs::create_dir_all(&templates).unwrap();
        fs::write(templates.join("page.html"), "<html>{{ content }}</html>").unwrap();
        fs::write(templates.join("doc.html"), "<html>doc</html>").unwrap();

        for rel in ["content/a.md", "content/b.md"] {
            let path = root.join(rel);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, rel).unwrap();
        }

        let effective =
            EffectiveConfig::from_parts(Default::default(), Default::default(), false).unwrap();
        let mut site = Site::new(root.to_path_buf(), effective);
        for rel in ["content/a.md", "content/b.md"] {
            let path = root.join(rel);
            let key = content_key(&path, root);
            site.add_page(Page::new(path, key));
        }

        let mut cache = BuildCache::new(root.to_path_buf());
        cache.update_file(&templates.join("page.html"));
        cache.update_file(&templates.join("doc.html"));
        (site, cache)
    }

    #[test]
    fn test_unchanged_templates() {
        let dir = tempdir().unwrap();
        let (site, cache) = fixture(dir.path());
        let ctx = DetectionContext::new(&cache, &site);
        let result = TemplateChangeDetector.detect(&ctx).unwrap();
        assert!(result.templates_changed.is_empty());
        assert!(result.pages_to_rebuild.is_empty());
    }

    #[test]
    fn test_changed_template_rebuilds_tracked_pages() {
        let dir = tempdir().unwrap();
        let (site, mut cache) = fixture(dir.path());
        let template = dir.path().join("themes/default/templates/page.html");
        let key = content_key(&template, dir.path());
        cache.set_page_dependencies(BTreeMap::from([(
            key.clone(),
            BTreeSet::from([CacheKey::new("content/a.md")]),
        )]));
        fs::write(&template, "<html>edited {{ content }}</html>").unwrap();

        let ctx = DetectionContext::new(&cache, &site);
        let result = TemplateChangeDetector.detect(&ctx).unwrap();

        assert!(result.templates_changed.contains(&key));
        assert!(result.pages_to_rebuild.contains("content/a.md"));
        assert!(!result.pages_to_rebuild.contains("content/b.md"));
        assert_eq!(
            result.rebuild_reasons.get("content/a.md").unwrap().code,
            RebuildReasonCode::TemplateChanged
        );
    }

    #[test]
    fn test_fallback_matches_pages_by_template_name() {
        let dir = tempdir().unwrap();
        let (site, cache) = fixture(dir.path());
        // No recorded dependencies; both pages use page.html by default.
        fs::write(
            dir.path().join("themes/default/templates/page.html"),
            "<html>v2</html>",
        )
        .unwrap();

        let ctx = DetectionContext::new(&cache, &site);
        let result = TemplateChangeDetector.detect(&ctx).unwrap();
        assert_eq!(result.pages_to_rebuild.len(), 2);
    }

    #[test]
    fn test_unrelated_template_change_touches_no_pages() {
        let dir = tempdir().unwrap();
        let (site, cache) = fixture(dir.path());
        // doc.html changes; no page uses it and nothing depends on it.
        fs::write(
            dir.path().join("themes/default/templates/doc.html"),
            "<html>doc v2</html>",
        )
        .unwrap();

        let ctx = DetectionContext::new(&cache, &site);
        let result = TemplateChangeDetector.detect(&ctx).unwrap();
        assert_eq!(result.templates_changed.len(), 1);
        assert!(result.pages_to_rebuild.is_empty());
    }
}
