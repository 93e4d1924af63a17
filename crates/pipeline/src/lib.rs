//! Pipeline engine: execution plans, run state and the orchestrator.
//!
//! A run takes one paper through an ordered list of stages. Each stage is
//! handed to the agent registered for its [`AgentType`](paperflow_core::AgentType);
//! the first failure aborts the run. Run state is kept in memory and dropped
//! a fixed time after the run finishes.

pub mod orchestrator;
pub mod plan;
pub mod state;
pub mod store;
pub mod task;

pub use orchestrator::{PipelineOrchestrator, PipelineResult, RunHandle};
pub use plan::{ExecutionPlan, PipelineConfiguration, StageDefinition};
pub use state::{PipelineState, PipelineStatus, StageResult, StageStatus, StateManager};
pub use store::InMemoryPaperStore;
pub use task::TaskBuilder;
