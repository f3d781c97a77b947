//! Bengal - a static site generator with a correct incremental build engine.
//!
//! Given a tree of content files, templates, data files and assets, bengal
//! produces a directory of rendered HTML; on subsequent runs it recomputes
//! the minimum output set consistent with the inputs.
//!
//! ## Module Structure
//!
//! - `cli`: command-line interface layer
//! - `config`: configuration loading and the effective config hash
//! - `core`: cache keys, hashing, the page/site model
//! - `discovery`: content and asset discovery
//! - `detect`: change detectors and the detection pipeline
//! - `effects`: the unified dependency model and effect tracer
//! - `provenance`: content-addressed provenance store and filter
//! - `index`: bidirectional taxonomy and query indexes
//! - `cache`: build cache, persistence and lifecycle management
//! - `orchestration`: incremental planning and render orchestration
//! - `render`: the rendering boundary
//! - `build`: the full build flow
//! - `report`: user-facing output

pub mod build;
pub mod cache;
pub mod cli;
pub mod config;
pub mod core;
pub mod detect;
pub mod discovery;
pub mod effects;
pub mod index;
pub mod orchestration;
pub mod provenance;
pub mod render;
pub mod report;
