//! Execution plans: which stages a run executes, in order.

use paperflow_config::PipelineConfig;
use paperflow_core::{AgentType, StageType};
use serde::{Deserialize, Serialize};

/// Per-run options that shape the execution plan and the task payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfiguration {
    pub include_metadata_enhancement: bool,
    pub include_citation_processing: bool,
    pub include_research_discovery: bool,
    pub include_perplexity_research: bool,

    /// Passed to the summarizer
    pub summary_style: String,

    /// Passed to related-paper discovery
    pub discovery_mode: String,
}

impl PipelineConfiguration {
    /// Only the stages every run executes.
    pub fn minimal() -> Self {
        Self {
            include_metadata_enhancement: false,
            include_citation_processing: false,
            include_research_discovery: false,
            include_perplexity_research: false,
            summary_style: "standard".into(),
            discovery_mode: "related".into(),
        }
    }
}

impl From<&PipelineConfig> for PipelineConfiguration {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            include_metadata_enhancement: config.include_metadata_enhancement,
            include_citation_processing: config.include_citation_processing,
            include_research_discovery: config.include_research_discovery,
            include_perplexity_research: config.include_perplexity_research,
            summary_style: config.summary_style.clone(),
            discovery_mode: config.discovery_mode.clone(),
        }
    }
}

impl Default for PipelineConfiguration {
    fn default() -> Self {
        Self::from(&PipelineConfig::default())
    }
}

/// One entry of an execution plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageDefinition {
    pub stage: StageType,
    pub agent_type: AgentType,
}

impl From<StageType> for StageDefinition {
    fn from(stage: StageType) -> Self {
        Self {
            stage,
            agent_type: stage.agent_type(),
        }
    }
}

/// The ordered stages of one run. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    stages: Vec<StageDefinition>,
}

impl ExecutionPlan {
    /// Text extraction first, then the optional enrichment stages, then
    /// summarization and concept extraction, with the quality check last.
    pub fn build(config: &PipelineConfiguration) -> Self {
        let optional = [
            (config.include_metadata_enhancement, StageType::MetadataEnhancement),
            (config.include_citation_processing, StageType::CitationProcessing),
            (config.include_research_discovery, StageType::ResearchDiscovery),
            (config.include_perplexity_research, StageType::PerplexityResearch),
        ];

        let stages = std::iter::once(StageType::TextExtraction)
            .chain(optional.into_iter().filter(|(on, _)| *on).map(|(_, stage)| stage))
            .chain([
                StageType::ContentSummarization,
                StageType::ConceptExtraction,
                StageType::QualityCheck,
            ])
            .map(StageDefinition::from)
            .collect();

        Self { stages }
    }

    pub fn stages(&self) -> &[StageDefinition] {
        &self.stages
    }

    pub fn stage_types(&self) -> impl Iterator<Item = StageType> + '_ {
        self.stages.iter().map(|d| d.stage)
    }

    pub fn contains(&self, stage: StageType) -> bool {
        self.stages.iter().any(|d| d.stage == stage)
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}
