//! Fallback registry: local stand-ins for cloud-backed agents.
//!
//! When an agent's cloud retries are exhausted (or the failure is not worth
//! retrying), the retry policy hands the original task to the fallback
//! registered here for the same agent type.

use paperflow_core::{Agent, AgentType};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Lookup from agent type to an optional local fallback agent.
#[derive(Default)]
pub struct FallbackRegistry {
    agents: HashMap<AgentType, Arc<dyn Agent>>,
}

impl FallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fallback under its own agent type.
    ///
    /// Agent types that depend on live external services cannot be
    /// substituted; registering one is refused and returns `false`.
    pub fn register(&mut self, agent: Arc<dyn Agent>) -> bool {
        let agent_type = agent.agent_type();
        if agent_type.requires_external_api() {
            warn!(
                agent_type = %agent_type,
                agent = agent.name(),
                "Refusing fallback for agent type that needs an external API"
            );
            return false;
        }
        debug!(agent_type = %agent_type, agent = agent.name(), "Fallback registered");
        self.agents.insert(agent_type, agent);
        true
    }

    /// Builder-style [`register`](Self::register).
    pub fn with(mut self, agent: Arc<dyn Agent>) -> Self {
        self.register(agent);
        self
    }

    pub fn has(&self, agent_type: AgentType) -> bool {
        self.agents.contains_key(&agent_type)
    }

    pub fn get(&self, agent_type: AgentType) -> Option<Arc<dyn Agent>> {
        self.agents.get(&agent_type).cloned()
    }

    /// Agent types with a fallback, in a stable order.
    pub fn agent_types(&self) -> Vec<AgentType> {
        let mut types: Vec<AgentType> = self.agents.keys().copied().collect();
        types.sort();
        types
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}
