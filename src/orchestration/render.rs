//! Render orchestration: sequential, parallel and streaming modes.
//!
//! Parallel rendering reuses per-thread pipelines across pages within a
//! build, invalidated *between* builds by a process-wide build generation:
//! the counter is bumped at the start of every `process()` call, and a
//! worker whose pipeline carries an older generation rebuilds it on first
//! use. The generation counter is the only cross-thread mutable state here;
//! everything else is either thread-local or behind the effect tracer's and
//! the directory cache's own synchronization.

use std::cell::RefCell;
use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Result};
use dashmap::DashSet;
use rayon::prelude::*;
use tracing::debug;

use crate::core::hashing::{ContentHash, hash_content};
use crate::core::keys::CacheKey;
use crate::core::page::Page;
use crate::core::site::Site;
use crate::effects::effect::Effect;
use crate::effects::tracer::active_tracer;
use crate::render::{RenderPipeline, output_path_for};

/// Below this many pages the thread-pool startup cost exceeds any
/// parallelism gain.
const PARALLEL_THRESHOLD: usize = 5;

/// Leaf batch size in streaming mode.
const STREAMING_BATCH: usize = 64;

static BUILD_GENERATION: AtomicU64 = AtomicU64::new(0);

pub fn current_generation() -> u64 {
    BUILD_GENERATION.load(Ordering::SeqCst)
}

fn increment_build_generation() -> u64 {
    BUILD_GENERATION.fetch_add(1, Ordering::SeqCst) + 1
}

thread_local! {
    static WORKER_PIPELINE: RefCell<Option<RenderPipeline>> = const { RefCell::new(None) };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderMode {
    Sequential,
    Parallel,
    /// Hubs first, then tagged mid-tier pages, then untagged leaves in
    /// batches; per-batch buffers are released between batches so large
    /// sites don't hold every rendered page at once.
    Streaming,
}

/// One successfully rendered page.
#[derive(Debug, Clone)]
pub struct RenderedPage {
    pub key: CacheKey,
    pub output_path: PathBuf,
    pub output_hash: ContentHash,
}

#[derive(Debug, Default)]
pub struct RenderOutcome {
    pub rendered: Vec<RenderedPage>,
}

pub struct RenderOrchestrator {
    mode: RenderMode,
    workers: usize,
    created_dirs: DashSet<PathBuf>,
}

impl RenderOrchestrator {
    /// `workers == 0` means auto: `min(8, ceil(n / 4))`.
    pub fn new(mode: RenderMode, workers: usize) -> Self {
        RenderOrchestrator {
            mode,
            workers,
            created_dirs: DashSet::new(),
        }
    }

    /// Render the work list, returning output paths and hashes.
    ///
    /// Output paths are assigned only for the subset being rendered; pages
    /// that already carry one (set by an earlier pass) keep it.
    pub fn process(&self, site: &mut Site, work: &[CacheKey]) -> Result<RenderOutcome> {
        let generation = increment_build_generation();
        debug!(generation, pages = work.len(), "render pass starting");

        for key in work {
            if let Some(page) = site.page(key) {
                if page.output_path.is_some() {
                    continue;
                }
                let output = output_path_for(site, page);
                if let Some(page) = site.page_mut(key) {
                    page.output_path = Some(output);
                }
            }
        }

        let pages: Vec<Page> = work
            .iter()
            .filter_map(|key| site.page(key))
            .cloned()
            .collect();

        let rendered = match self.mode {
            RenderMode::Sequential => self.render_sequential(site, &pages, generation)?,
            RenderMode::Parallel => self.render_parallel(site, &pages, generation)?,
            RenderMode::Streaming => self.render_streaming(site, &pages, generation)?,
        };

        for page in &rendered {
            if let Some(site_page) = site.page_mut(&page.key) {
                site_page.output_path = Some(page.output_path.clone());
            }
        }

        Ok(RenderOutcome { rendered })
    }

    /// Copy changed assets into the output tree, recording copy effects.
    pub fn process_assets(&self, site: &Site, assets: &[CacheKey]) -> Result<usize> {
        let mut copied = 0;
        for key in assets {
            let Some(asset) = site.assets.iter().find(|a| &a.key == key) else {
                continue;
            };
            let output = site.output_dir.join(key.as_str());
            self.ensure_parent_dir(&output)?;
            fs::copy(&asset.source_path, &output).with_context(|| {
                format!("failed to copy asset {:?} to {:?}", asset.source_path, output)
            })?;
            if let Some(tracer) = active_tracer() {
                tracer.record(Effect::for_asset_copy(&asset.source_path, &output, false));
            }
            copied += 1;
        }
        Ok(copied)
    }

    fn render_sequential(
        &self,
        site: &Site,
        pages: &[Page],
        generation: u64,
    ) -> Result<Vec<RenderedPage>> {
        let pipeline = RenderPipeline::new(site, generation)?;
        pages
            .iter()
            .map(|page| self.render_one(site, page, &pipeline))
            .collect()
    }

    fn render_parallel(
        &self,
        site: &Site,
        pages: &[Page],
        generation: u64,
    ) -> Result<Vec<RenderedPage>> {
        if pages.len() < PARALLEL_THRESHOLD {
            return self.render_sequential(site, pages, generation);
        }

        let workers = if self.workers > 0 {
            self.workers
        } else {
            pages.len().div_ceil(4).min(8)
        };
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .build()
            .context("failed to build render thread pool")?;

        pool.install(|| {
            pages
                .par_iter()
                .map(|page| self.render_with_worker_pipeline(site, page, generation))
                .collect()
        })
    }

    fn render_streaming(
        &self,
        site: &Site,
        pages: &[Page],
        generation: u64,
    ) -> Result<Vec<RenderedPage>> {
        let mut hubs: Vec<Page> = Vec::new();
        let mut mid: Vec<Page> = Vec::new();
        let mut leaves: Vec<Page> = Vec::new();
        for page in pages {
            if page.is_section_index() {
                hubs.push(page.clone());
            } else if !page.tags.is_empty() {
                mid.push(page.clone());
            } else {
                leaves.push(page.clone());
            }
        }

        let mut rendered = Vec::with_capacity(pages.len());
        rendered.extend(self.render_parallel(site, &hubs, generation)?);
        rendered.extend(self.render_parallel(site, &mid, generation)?);
        for batch in leaves.chunks(STREAMING_BATCH) {
            let mut batch_rendered = self.render_parallel(site, batch, generation)?;
            rendered.append(&mut batch_rendered);
            // batch_rendered is dropped here; only the summary accumulates.
        }
        Ok(rendered)
    }

    /// Render through this worker's thread-local pipeline, rebuilding it
    /// when its generation is stale.
    fn render_with_worker_pipeline(
        &self,
        site: &Site,
        page: &Page,
        generation: u64,
    ) -> Result<RenderedPage> {
        WORKER_PIPELINE.with(|slot| {
            let mut slot = slot.borrow_mut();
            let needs_new = slot
                .as_ref()
                .is_none_or(|pipeline| pipeline.generation() != generation);
            if needs_new {
                *slot = Some(RenderPipeline::new(site, generation)?);
            }
            let pipeline = slot.as_ref().expect("pipeline just installed");
            self.render_one(site, page, pipeline)
        })
    }

    fn render_one(
        &self,
        site: &Site,
        page: &Page,
        pipeline: &RenderPipeline,
    ) -> Result<RenderedPage> {
        let output_path = page
            .output_path
            .clone()
            .unwrap_or_else(|| output_path_for(site, page));

        let html = pipeline.render_page(site, page);
        self.ensure_parent_dir(&output_path)?;
        fs::write(&output_path, &html)
            .with_context(|| format!("failed to write output {:?}", output_path))?;

        if let Some(tracer) = active_tracer() {
            tracer.record(page_effect(site, page, &output_path));
        }

        Ok(RenderedPage {
            key: page.key.clone(),
            output_path,
            output_hash: hash_content(html),
        })
    }

    /// Create an output directory once per build; sibling pages rendered
    /// concurrently otherwise hammer the filesystem with mkdir calls.
    fn ensure_parent_dir(&self, output_path: &std::path::Path) -> Result<()> {
        let Some(parent) = output_path.parent() else {
            return Ok(());
        };
        if self.created_dirs.contains(parent) {
            return Ok(());
        }
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create output directory {:?}", parent))?;
        self.created_dirs.insert(parent.to_path_buf());
        Ok(())
    }
}

/// The effect recorded for one page render: source, template, cascade
/// sources and declared data files in; the HTML file out.
fn page_effect(site: &Site, page: &Page, output_path: &std::path::Path) -> Effect {
    let cascade_sources: BTreeSet<PathBuf> = cascade_sources_for(site, page);
    let data_files: BTreeSet<PathBuf> = page
        .metadata
        .get("data_files")
        .and_then(serde_json::Value::as_array)
        .map(|files| {
            files
                .iter()
                .filter_map(serde_json::Value::as_str)
                .map(|rel| site.root_path.join(rel))
                .collect()
        })
        .unwrap_or_default();

    Effect::for_page_render(
        &page.source_path,
        output_path,
        &page.template,
        &BTreeSet::new(),
        &page.route(),
        &cascade_sources,
        &data_files,
    )
}

/// Ancestor `_index.md` files whose cascade governs this page.
fn cascade_sources_for(site: &Site, page: &Page) -> BTreeSet<PathBuf> {
    let mut sources = BTreeSet::new();
    let content_dir = site.content_dir();
    let mut dir = page.source_path.parent();
    while let Some(current) = dir {
        let index = current.join("_index.md");
        if index.exists() && index != page.source_path {
            sources.insert(index);
        }
        if current == content_dir {
            break;
        }
        dir = current.parent();
    }
    sources
}
