//! Error types for the Paperflow domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant; provider failures are
//! classified structurally at the call site so the retry layer can reason
//! about them without parsing strings.

use crate::agent::AgentType;
use crate::stage::StageType;
use thiserror::Error;

/// The top-level error type for all Paperflow operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Agent errors ---
    #[error("Agent error: {0}")]
    Agent(#[from] AgentError),

    // --- Paper store errors ---
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    // --- Pipeline errors ---
    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// A failure reported by an external AI provider.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    #[error("Provider overloaded: {0}")]
    Overloaded(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

/// A failure while running an agent for one pipeline stage.
#[derive(Debug, Clone, Error)]
pub enum AgentError {
    #[error("Circuit breaker is open for agent {agent_type}")]
    CircuitOpen { agent_type: AgentType },

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Agent {agent_type} rejected the task: {message}")]
    Rejected {
        agent_type: AgentType,
        message: String,
    },

    #[error("Invalid task: {0}")]
    InvalidTask(String),

    #[error("No agent registered for {0}")]
    NotRegistered(AgentType),

    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<AgentError>,
    },

    #[error("Operation cancelled")]
    Cancelled,
}

impl AgentError {
    /// Wrap this error with a human-readable context, keeping it as the source.
    pub fn context(self, context: impl Into<String>) -> Self {
        AgentError::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Whether this error (or any error it wraps) is a circuit-breaker refusal.
    pub fn is_circuit_open(&self) -> bool {
        match self {
            AgentError::CircuitOpen { .. } => true,
            AgentError::Context { source, .. } => source.is_circuit_open(),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("Paper not found: {0}")]
    NotFound(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

#[derive(Debug, Clone, Error)]
pub enum PipelineError {
    #[error("Stage {stage} failed: {message}")]
    StageFailed { stage: StageType, message: String },

    #[error("Stage {stage} is not part of the execution plan for run {run_id}")]
    StageNotInPlan { run_id: String, stage: StageType },

    #[error("Unknown pipeline run: {0}")]
    UnknownRun(String),

    #[error("Pipeline run {0} was cancelled")]
    Cancelled(String),

    #[error("Pipeline run {run_id} aborted: {message}")]
    Aborted { run_id: String, message: String },

    #[error("Paper store error: {0}")]
    Store(#[from] StoreError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn provider_error_displays_correctly() {
        let err = Error::Provider(ProviderError::ApiError {
            status_code: 503,
            message: "Service Unavailable".into(),
        });
        assert!(err.to_string().contains("503"));
        assert!(err.to_string().contains("Service Unavailable"));
    }

    #[test]
    fn agent_error_keeps_provider_as_source() {
        let err = AgentError::from(ProviderError::Network("connection reset".into()));
        let source = err.source().expect("provider error should be the source");
        assert!(source.to_string().contains("connection reset"));
    }

    #[test]
    fn context_wraps_and_detects_circuit_open() {
        let err = AgentError::CircuitOpen {
            agent_type: AgentType::ContentSummarizer,
        }
        .context("summarizing paper p-1");
        assert!(err.is_circuit_open());
        assert!(err.to_string().starts_with("summarizing paper p-1"));
        assert!(err.source().is_some());
    }

    #[test]
    fn stage_failure_mentions_stage_and_message() {
        let err = PipelineError::StageFailed {
            stage: StageType::ConceptExtraction,
            message: "model refused".into(),
        };
        let text = err.to_string();
        assert!(text.contains("concept-extraction"));
        assert!(text.contains("model refused"));
    }
}
