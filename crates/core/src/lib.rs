//! # Paperflow Core
//!
//! Domain types, traits, and error definitions for the Paperflow multi-agent
//! document pipeline. This crate has **no framework dependencies**; it
//! defines the domain model that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! Every collaborator is defined as a trait here (agents, AI providers,
//! progress sinks, paper stores). Implementations live in their respective
//! crates, which keeps the resilience layer and the orchestrator testable
//! with small mock implementations.

pub mod error;
pub mod agent;
pub mod provider;
pub mod stage;
pub mod event;
pub mod paper;

// Re-export key types at crate root for ergonomics
pub use error::{AgentError, Error, PipelineError, ProviderError, Result, StoreError};
pub use agent::{Agent, AgentLoad, AgentRegistry, AgentResult, AgentStatus, AgentTask, AgentType, TaskStatus};
pub use provider::{AiProvider, ChatMessage, CompletionRequest, CompletionResponse, Provider, Role, Usage};
pub use stage::StageType;
pub use event::{EventBus, NoopProgressSink, PipelineEvent, ProgressSink, ProgressUpdate};
pub use paper::{PaperRecord, PaperStatus, PaperStore};
