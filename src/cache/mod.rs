//! Persistent build state.
//!
//! ## Module Structure
//!
//! - `persist`: atomic versioned JSON files with zstd compression
//! - `build_cache`: fingerprints, dependencies and claims from last build
//! - `manager`: lifecycle owner for everything under `.bengal/`

pub mod build_cache;
pub mod manager;
pub mod persist;
