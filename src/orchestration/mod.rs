//! Build orchestration.
//!
//! ## Module Structure
//!
//! - `incremental`: composes detection, filtering and caching into the
//!   public "what needs rebuilding?" operation
//! - `render`: sequential/parallel/streaming rendering with build-generation
//!   invalidation of per-thread state

pub mod incremental;
pub mod render;
