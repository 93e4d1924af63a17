//! Outbound AI provider access for Paperflow.
//!
//! The [`RateLimiter`] guards every provider with a burst window and a
//! sustained window; the OpenAI-compatible client talks to the provider
//! itself; the router builds one client per configured provider.

pub mod openai_compat;
pub mod rate_limiter;
pub mod router;

pub use openai_compat::OpenAiCompatProvider;
pub use rate_limiter::{
    ProviderRateLimiter, RateLimitError, RateLimiter, RateLimiterSnapshot, ReleaseScheduler,
};
pub use router::{ProviderRouter, build_from_config, default_model};
