//! Agent trait: the uniform contract every pipeline stage implements.
//!
//! An agent receives an [`AgentTask`] and produces an [`AgentResult`].
//! Cloud-backed agents and local fallback agents implement the same trait,
//! so the retry layer and the orchestrator never depend on agent internals.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::error::AgentError;

/// Identifies the kind of processing an agent performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AgentType {
    PaperProcessor,
    ContentSummarizer,
    ConceptExplainer,
    MetadataEnhancer,
    QualityChecker,
    CitationFormatter,
    PerplexityResearcher,
    RelatedPaperDiscovery,
}

impl AgentType {
    pub const ALL: [AgentType; 8] = [
        AgentType::PaperProcessor,
        AgentType::ContentSummarizer,
        AgentType::ConceptExplainer,
        AgentType::MetadataEnhancer,
        AgentType::QualityChecker,
        AgentType::CitationFormatter,
        AgentType::PerplexityResearcher,
        AgentType::RelatedPaperDiscovery,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AgentType::PaperProcessor => "paper-processor",
            AgentType::ContentSummarizer => "content-summarizer",
            AgentType::ConceptExplainer => "concept-explainer",
            AgentType::MetadataEnhancer => "metadata-enhancer",
            AgentType::QualityChecker => "quality-checker",
            AgentType::CitationFormatter => "citation-formatter",
            AgentType::PerplexityResearcher => "perplexity-researcher",
            AgentType::RelatedPaperDiscovery => "related-paper-discovery",
        }
    }

    /// Agent types whose work depends on live external services (web search,
    /// paper indexes). A local model cannot stand in for them.
    pub fn requires_external_api(self) -> bool {
        matches!(
            self,
            AgentType::RelatedPaperDiscovery | AgentType::PerplexityResearcher
        )
    }
}

impl fmt::Display for AgentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AgentType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown agent type: {s}"))
    }
}

/// Lifecycle of a task payload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
}

/// A unit of work handed to an agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentTask {
    /// Unique task ID
    pub id: String,

    /// Which agent type the task is built for
    pub agent_type: AgentType,

    /// The paper being processed, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paper_id: Option<String>,

    /// Owner of the work
    pub user_id: String,

    /// Always starts as `Pending`
    #[serde(default)]
    pub status: TaskStatus,

    /// Agent-specific input fields
    #[serde(default)]
    pub input: serde_json::Map<String, serde_json::Value>,

    pub created_at: DateTime<Utc>,
}

impl AgentTask {
    pub fn new(agent_type: AgentType, user_id: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            agent_type,
            paper_id: None,
            user_id: user_id.into(),
            status: TaskStatus::Pending,
            input: serde_json::Map::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_paper(mut self, paper_id: impl Into<String>) -> Self {
        self.paper_id = Some(paper_id.into());
        self
    }

    /// Set an input field.
    pub fn with_input(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.input.insert(key.into(), value.into());
        self
    }

    /// Read a string input field.
    pub fn input_str(&self, key: &str) -> Option<&str> {
        self.input.get(key).and_then(|v| v.as_str())
    }
}

/// What an agent hands back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResult {
    pub task_id: String,
    pub agent_type: AgentType,
    pub success: bool,

    #[serde(default)]
    pub result_data: serde_json::Value,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    /// Name of the agent implementation that produced the result
    pub produced_by: String,

    #[serde(default)]
    pub processing_time_ms: u64,
}

impl AgentResult {
    pub fn success(task: &AgentTask, produced_by: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            task_id: task.id.clone(),
            agent_type: task.agent_type,
            success: true,
            result_data: data,
            error_message: None,
            produced_by: produced_by.into(),
            processing_time_ms: 0,
        }
    }

    pub fn failure(task: &AgentTask, produced_by: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            task_id: task.id.clone(),
            agent_type: task.agent_type,
            success: false,
            result_data: serde_json::Value::Null,
            error_message: Some(message.into()),
            produced_by: produced_by.into(),
            processing_time_ms: 0,
        }
    }

    pub fn with_duration(mut self, elapsed: std::time::Duration) -> Self {
        self.processing_time_ms = elapsed.as_millis() as u64;
        self
    }
}

/// Self-reported load of an agent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentLoad {
    #[default]
    Idle,
    Active,
    Busy,
}

/// Monitoring snapshot exposed by every agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentStatus {
    pub agent_type: AgentType,
    pub name: String,
    pub load: AgentLoad,
    pub in_flight: usize,
    pub processed: u64,
    pub failed: u64,
}

/// The core Agent trait.
///
/// Every stage implementation (cloud-backed or local) implements this trait.
#[async_trait]
pub trait Agent: Send + Sync {
    /// The kind of work this agent performs.
    fn agent_type(&self) -> AgentType;

    /// Implementation name (e.g., "openai-summarizer", "local-summarizer").
    fn name(&self) -> &str;

    /// Process one task.
    async fn process(&self, task: AgentTask) -> std::result::Result<AgentResult, AgentError>;

    /// Current load. Default implementation reports an idle agent.
    fn status(&self) -> AgentStatus {
        AgentStatus {
            agent_type: self.agent_type(),
            name: self.name().to_string(),
            load: AgentLoad::Idle,
            in_flight: 0,
            processed: 0,
            failed: 0,
        }
    }
}

/// Registry of agents available to the pipeline, keyed by agent type.
///
/// Populated once at startup and then shared read-only.
pub struct AgentRegistry {
    agents: HashMap<AgentType, Arc<dyn Agent>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self {
            agents: HashMap::new(),
        }
    }

    /// Register an agent under its own agent type, replacing any previous one.
    pub fn register(&mut self, agent: Arc<dyn Agent>) {
        self.agents.insert(agent.agent_type(), agent);
    }

    pub fn get(&self, agent_type: AgentType) -> Option<Arc<dyn Agent>> {
        self.agents.get(&agent_type).cloned()
    }

    pub fn contains(&self, agent_type: AgentType) -> bool {
        self.agents.contains_key(&agent_type)
    }

    /// Dispatch a task to the agent registered for its type.
    pub async fn process(&self, task: AgentTask) -> std::result::Result<AgentResult, AgentError> {
        let agent = self
            .get(task.agent_type)
            .ok_or(AgentError::NotRegistered(task.agent_type))?;
        agent.process(task).await
    }

    /// Status of every registered agent, ordered by agent type.
    pub fn statuses(&self) -> Vec<AgentStatus> {
        let mut statuses: Vec<AgentStatus> = self.agents.values().map(|a| a.status()).collect();
        statuses.sort_by_key(|s| s.agent_type);
        statuses
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}
