//! Agent implementations for the Paperflow pipeline.
//!
//! - [`CloudAgent`]: sends the task to an external AI provider, gated by the
//!   provider's rate limiter and wrapped in the retry policy.
//! - [`LocalAgent`]: offline heuristics, used as the fallback for cloud
//!   agents and as the primary agent when running offline.

pub mod cloud;
pub mod local;
pub mod prompt;
pub mod wiring;

pub use cloud::CloudAgent;
pub use local::LocalAgent;
pub use wiring::{build_registry, local_fallbacks};
