//! Resilience statistics for Paperflow.
//!
//! Counts attempts, retries, circuit-breaker refusals and fallback outcomes
//! per agent type, so degraded-but-successful runs stay visible to
//! monitoring even though they look identical to users.

pub mod engine;
pub mod model;

pub use engine::RetryMetrics;
pub use model::{RetryStats, StatsSnapshot};
