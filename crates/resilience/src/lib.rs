//! Resilience layer for Paperflow agents.
//!
//! Every agent invocation goes through [`RetryPolicy::execute_with_retry`]:
//! the per-agent-type [`CircuitBreaker`] decides admission, transient
//! failures are retried with exponential backoff, and once the primary agent
//! gives up the [`FallbackRegistry`] may supply a local substitute.

pub mod circuit_breaker;
pub mod classify;
pub mod fallback;
pub mod retry;

pub use circuit_breaker::{BreakerPolicy, CircuitBreaker, CircuitSnapshot, CircuitState, CircuitStatus};
pub use classify::is_retryable;
pub use fallback::FallbackRegistry;
pub use retry::{RetryPolicy, exponential_delay, jittered_delay};
