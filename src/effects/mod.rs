//! The unified dependency model.
//!
//! Build operations record [`effect::Effect`] values describing what they
//! produced, read and invalidated; the [`tracer::EffectTracer`] indexes them
//! and answers transitive invalidation queries.

pub mod effect;
pub mod tracer;

pub use effect::{Dependency, Effect};
pub use tracer::EffectTracer;
