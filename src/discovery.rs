//! Content, asset and section discovery.
//!
//! Walks the site tree and produces the in-memory [`Site`] view: pages with
//! parsed TOML frontmatter, sections with index pages, prev/next neighbors
//! in section order, assets, and the generated taxonomy pages. Page bodies
//! stay opaque strings; no markdown is interpreted here.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use glob::Pattern;
use serde_json::{Value, json};
use tracing::warn;
use walkdir::WalkDir;

use crate::config::EffectiveConfig;
use crate::core::keys::{CacheKey, content_key};
use crate::core::page::{Asset, Page, Section, VirtualSource};
use crate::core::site::{Site, split_versioned_key};
use crate::index::taxonomy::slugify;
use crate::report::SessionErrors;

const FRONTMATTER_FENCE: &str = "+++";

/// Build the site view from disk.
///
/// Unparseable frontmatter skips the page and records the error; discovery
/// itself only fails on a missing site root.
pub fn discover(
    root: &Path,
    effective: EffectiveConfig,
    errors: &SessionErrors,
) -> Result<Site> {
    if !root.exists() {
        anyhow::bail!("site root does not exist: {:?}", root);
    }

    let mut site = Site::new(root.to_path_buf(), effective);
    let ignores = compile_ignores(&site);

    discover_pages(&mut site, &ignores, errors);
    discover_assets(&mut site, &ignores);
    build_sections(&mut site);
    assign_neighbors(&mut site);
    register_versions(&mut site);
    generate_taxonomy_pages(&mut site);

    Ok(site)
}

fn compile_ignores(site: &Site) -> Vec<Pattern> {
    site.config()
        .ignores
        .iter()
        .filter_map(|raw| match Pattern::new(raw) {
            Ok(pattern) => Some(pattern),
            Err(err) => {
                warn!(pattern = %raw, error = %err, "ignoring invalid ignore pattern");
                None
            }
        })
        .collect()
}

fn is_ignored(ignores: &[Pattern], rel: &str) -> bool {
    ignores.iter().any(|pattern| pattern.matches(rel))
}

fn discover_pages(site: &mut Site, ignores: &[Pattern], errors: &SessionErrors) {
    let content_dir = site.content_dir();
    if !content_dir.exists() {
        return;
    }

    let mut paths: Vec<PathBuf> = WalkDir::new(&content_dir)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            entry.path().is_file()
                && entry.path().extension().and_then(|e| e.to_str()) == Some("md")
        })
        .map(|entry| entry.path().to_path_buf())
        .collect();
    paths.sort();

    for path in paths {
        let key = content_key(&path, &site.root_path);
        if is_ignored(ignores, key.as_str()) {
            continue;
        }
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) => {
                errors.record(
                    "unreadable_page",
                    &format!("{}: {}", key, err),
                );
                continue;
            }
        };
        match parse_page(path, key.clone(), &raw) {
            Ok(page) => site.add_page(page),
            Err(err) => {
                errors.record("frontmatter_parse_error", &format!("{}: {}", key, err));
            }
        }
    }
}

/// Split a raw page into TOML frontmatter and body, and promote the
/// engine-relevant fields out of the metadata map.
fn parse_page(path: PathBuf, key: CacheKey, raw: &str) -> Result<Page> {
    let (metadata, body) = parse_frontmatter(raw)?;
    let mut page = Page::new(path, key);
    page.content = body.to_string();

    page.title = metadata
        .get("title")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| {
            page.source_path
                .file_stem()
                .map(|stem| stem.to_string_lossy().to_string())
                .unwrap_or_default()
        });
    page.tags = metadata
        .get("tags")
        .and_then(Value::as_array)
        .map(|tags| {
            tags.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    if let Some(template) = metadata.get("template").and_then(Value::as_str) {
        page.template = template.to_string();
    }
    page.metadata = metadata;
    Ok(page)
}

fn parse_frontmatter(raw: &str) -> Result<(BTreeMap<String, Value>, &str)> {
    let Some(rest) = raw.strip_prefix(FRONTMATTER_FENCE) else {
        return Ok((BTreeMap::new(), raw));
    };
    let rest = rest.strip_prefix('\n').unwrap_or(rest);

    // The closing fence is either the very next line (empty frontmatter) or
    // the first line starting with `+++` after the TOML block.
    let (frontmatter, after_fence) = if let Some(after) = rest.strip_prefix(FRONTMATTER_FENCE) {
        ("", after)
    } else if let Some(newline_at) = rest.find("\n+++") {
        (
            &rest[..newline_at],
            &rest[newline_at + 1 + FRONTMATTER_FENCE.len()..],
        )
    } else {
        anyhow::bail!("unterminated frontmatter fence");
    };
    let body = after_fence.strip_prefix('\n').unwrap_or(after_fence);

    let table: toml::Table = toml::from_str(frontmatter)?;
    let mut metadata = BTreeMap::new();
    for (name, value) in table {
        metadata.insert(name, serde_json::to_value(value)?);
    }
    Ok((metadata, body))
}

fn discover_assets(site: &mut Site, ignores: &[Pattern]) {
    let assets_dir = site.assets_dir();
    if !assets_dir.exists() {
        return;
    }
    let mut assets: Vec<Asset> = WalkDir::new(&assets_dir)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_file())
        .map(|entry| {
            let path = entry.path().to_path_buf();
            let key = content_key(&path, &site.root_path);
            Asset {
                source_path: path,
                key,
                output_path: None,
            }
        })
        .filter(|asset| !is_ignored(ignores, asset.key.as_str()))
        .collect();
    assets.sort_by(|a, b| a.key.cmp(&b.key));
    site.assets = assets;
}

fn build_sections(site: &mut Site) {
    let mut by_dir: BTreeMap<CacheKey, Section> = BTreeMap::new();

    let page_info: Vec<(CacheKey, Option<CacheKey>, bool)> = site
        .pages
        .iter()
        .map(|page| {
            let dir = page
                .source_path
                .parent()
                .map(|parent| content_key(parent, &site.root_path));
            (page.key.clone(), dir, page.is_section_index())
        })
        .collect();

    for (key, dir, is_index) in page_info {
        let Some(dir) = dir else {
            continue;
        };
        let section = by_dir.entry(dir.clone()).or_insert_with(|| Section {
            path: dir.clone(),
            index_page: None,
            pages: Vec::new(),
        });
        if is_index {
            section.index_page = Some(key.clone());
        } else {
            section.pages.push(key.clone());
        }
        if dir.as_str() != "content" {
            if let Some(page) = site.page_mut(&key) {
                page.section = Some(dir);
            }
        }
    }

    site.sections = by_dir.into_values().collect();
}

/// Link prev/next within each section, in key order.
fn assign_neighbors(site: &mut Site) {
    let orderings: Vec<Vec<CacheKey>> = site
        .sections
        .iter()
        .map(|section| section.pages.clone())
        .collect();

    for ordering in orderings {
        for (i, key) in ordering.iter().enumerate() {
            let prev = if i > 0 { Some(ordering[i - 1].clone()) } else { None };
            let next = ordering.get(i + 1).cloned();
            if let Some(page) = site.page_mut(key) {
                page.prev = prev;
                page.next = next;
            }
        }
    }
}

fn register_versions(site: &mut Site) {
    if !site.versioning_enabled() {
        return;
    }
    let versioning = site.config().versioning.clone();
    let registrations: Vec<(String, String, CacheKey)> = site
        .pages
        .iter()
        .filter_map(|page| {
            split_versioned_key(&page.key, &versioning)
                .map(|(_, version, normalized)| (normalized, version, page.key.clone()))
        })
        .collect();
    for (normalized, version, key) in registrations {
        if let Some(page) = site.page_mut(&key) {
            page.version = Some(version.clone());
        }
        site.tracker
            .register_versioned_page(&normalized, &version, key);
    }
}

/// Synthesize one page per tag plus the tag index, and register the term
/// pages against their members for metadata cascades.
fn generate_taxonomy_pages(site: &mut Site) {
    let mut members_by_slug: BTreeMap<String, (String, Vec<CacheKey>)> = BTreeMap::new();
    for page in site.regular_pages() {
        for tag in &page.tags {
            let slug = slugify(tag);
            if slug.is_empty() {
                continue;
            }
            let entry = members_by_slug
                .entry(slug)
                .or_insert_with(|| (tag.clone(), Vec::new()));
            entry.1.push(page.key.clone());
        }
    }
    if members_by_slug.is_empty() {
        return;
    }

    for (slug, (name, members)) in &members_by_slug {
        let key = CacheKey::new(format!("_generated/tags/{}.md", slug));
        let mut page = Page::new(PathBuf::from(key.as_str()), key.clone());
        page.title = name.clone();
        page.generated = true;
        page.template = "tag.html".to_string();
        page.virtual_source = Some(VirtualSource::Taxonomy { term: slug.clone() });
        page.metadata.insert("type".to_string(), json!("tag"));
        page.metadata.insert("_tag_slug".to_string(), json!(slug));
        site.add_page(page);

        for member in members {
            site.tracker.register_term_page(member.clone(), key.clone());
        }
    }

    let index_key = CacheKey::new("_generated/tags/_index.md");
    let mut index = Page::new(PathBuf::from(index_key.as_str()), index_key.clone());
    index.title = "Tags".to_string();
    index.generated = true;
    index.template = "tags.html".to_string();
    index.virtual_source = Some(VirtualSource::Fallback {
        template: "tags.html".to_string(),
        title: "Tags".to_string(),
    });
    index.metadata.insert("type".to_string(), json!("tag-index"));
    site.add_page(index);
}
