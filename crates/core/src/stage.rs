//! Pipeline stages and their mapping onto agent types.

use crate::agent::AgentType;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One unit of work in an execution plan. Each stage maps to exactly one
/// [`AgentType`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StageType {
    TextExtraction,
    MetadataEnhancement,
    CitationProcessing,
    ResearchDiscovery,
    PerplexityResearch,
    ContentSummarization,
    ConceptExtraction,
    QualityCheck,
}

impl StageType {
    pub const ALL: [StageType; 8] = [
        StageType::TextExtraction,
        StageType::MetadataEnhancement,
        StageType::CitationProcessing,
        StageType::ResearchDiscovery,
        StageType::PerplexityResearch,
        StageType::ContentSummarization,
        StageType::ConceptExtraction,
        StageType::QualityCheck,
    ];

    /// The agent type that executes this stage.
    pub fn agent_type(self) -> AgentType {
        match self {
            StageType::TextExtraction => AgentType::PaperProcessor,
            StageType::MetadataEnhancement => AgentType::MetadataEnhancer,
            StageType::CitationProcessing => AgentType::CitationFormatter,
            StageType::ResearchDiscovery => AgentType::RelatedPaperDiscovery,
            StageType::PerplexityResearch => AgentType::PerplexityResearcher,
            StageType::ContentSummarization => AgentType::ContentSummarizer,
            StageType::ConceptExtraction => AgentType::ConceptExplainer,
            StageType::QualityCheck => AgentType::QualityChecker,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StageType::TextExtraction => "text-extraction",
            StageType::MetadataEnhancement => "metadata-enhancement",
            StageType::CitationProcessing => "citation-processing",
            StageType::ResearchDiscovery => "research-discovery",
            StageType::PerplexityResearch => "perplexity-research",
            StageType::ContentSummarization => "content-summarization",
            StageType::ConceptExtraction => "concept-extraction",
            StageType::QualityCheck => "quality-check",
        }
    }

    /// Short description used in progress messages.
    pub fn description(self) -> &'static str {
        match self {
            StageType::TextExtraction => "Extracting text",
            StageType::MetadataEnhancement => "Enhancing metadata",
            StageType::CitationProcessing => "Formatting citations",
            StageType::ResearchDiscovery => "Discovering related papers",
            StageType::PerplexityResearch => "Researching context",
            StageType::ContentSummarization => "Summarizing content",
            StageType::ConceptExtraction => "Explaining key concepts",
            StageType::QualityCheck => "Checking quality",
        }
    }
}

impl fmt::Display for StageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StageType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StageType::ALL
            .into_iter()
            .find(|stage| stage.as_str() == s)
            .ok_or_else(|| format!("unknown stage type: {s}"))
    }
}
