//! Builds the per-stage task payload handed to an agent.

use crate::plan::PipelineConfiguration;
use crate::state::StageResult;
use paperflow_core::{AgentTask, AgentType, PaperRecord, StageType};
use serde_json::Value;
use std::collections::BTreeMap;

/// Reads the paper and earlier stage results and builds the minimal input
/// each agent type needs.
pub struct TaskBuilder<'a> {
    paper: &'a PaperRecord,
    user_id: &'a str,
    config: &'a PipelineConfiguration,
}

impl<'a> TaskBuilder<'a> {
    pub fn new(paper: &'a PaperRecord, user_id: &'a str, config: &'a PipelineConfiguration) -> Self {
        Self {
            paper,
            user_id,
            config,
        }
    }

    /// Task for `stage`. Stages after text extraction work on the extracted
    /// text when the extraction produced one.
    pub fn build(&self, stage: StageType, previous: &BTreeMap<StageType, StageResult>) -> AgentTask {
        let agent_type = stage.agent_type();
        let content = match agent_type {
            AgentType::PaperProcessor => self.paper.content.clone(),
            _ => previous
                .get(&StageType::TextExtraction)
                .and_then(|r| text_field(&r.data))
                .unwrap_or_else(|| self.paper.content.clone()),
        };

        let mut task = AgentTask::new(agent_type, self.user_id)
            .with_paper(&self.paper.id)
            .with_input("title", self.paper.title.as_str())
            .with_input("content", content);

        match agent_type {
            AgentType::ContentSummarizer => {
                task = task.with_input("summary_style", self.config.summary_style.as_str());
            }
            AgentType::RelatedPaperDiscovery => {
                task = task.with_input("discovery_mode", self.config.discovery_mode.as_str());
            }
            AgentType::MetadataEnhancer if !self.paper.metadata.is_empty() => {
                task = task.with_input("metadata", Value::Object(self.paper.metadata.clone()));
            }
            AgentType::QualityChecker => {
                if let Some(summary) = previous.get(&StageType::ContentSummarization) {
                    task = task.with_input("summary", summary.data.clone());
                }
            }
            _ => {}
        }

        task
    }
}

/// Extracted text, from a local agent (`text`) or a cloud agent (`output.text`).
fn text_field(data: &Value) -> Option<String> {
    data.get("text")
        .or_else(|| data.get("output").and_then(|o| o.get("text")))
        .and_then(Value::as_str)
        .filter(|t| !t.trim().is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use paperflow_core::TaskStatus;

    fn paper() -> PaperRecord {
        PaperRecord::new("paper-1", "user-1", "On Testing", "Raw   content\n\nwith noise.")
    }

    fn extracted(data: Value) -> BTreeMap<StageType, StageResult> {
        let mut previous = BTreeMap::new();
        previous.insert(
            StageType::TextExtraction,
            StageResult {
                success: true,
                produced_by: "local-paper-processor".into(),
                data,
                error_message: None,
                duration_ms: 1,
            },
        );
        previous
    }

    #[test]
    fn every_task_starts_pending_with_user_and_paper() {
        let paper = paper();
        let config = PipelineConfiguration::default();
        let builder = TaskBuilder::new(&paper, "user-1", &config);
        for stage in StageType::ALL {
            let task = builder.build(stage, &BTreeMap::new());
            assert_eq!(task.agent_type, stage.agent_type());
            assert_eq!(task.user_id, "user-1");
            assert_eq!(task.paper_id.as_deref(), Some("paper-1"));
            assert_eq!(task.status, TaskStatus::Pending);
            assert_eq!(task.input_str("title"), Some("On Testing"));
        }
    }

    #[test]
    fn later_stages_use_extracted_text() {
        let paper = paper();
        let config = PipelineConfiguration::default();
        let builder = TaskBuilder::new(&paper, "user-1", &config);

        let local = extracted(serde_json::json!({ "text": "Clean text." }));
        let task = builder.build(StageType::ConceptExtraction, &local);
        assert_eq!(task.input_str("content"), Some("Clean text."));

        let cloud = extracted(serde_json::json!({ "output": { "text": "Cloud text." } }));
        let task = builder.build(StageType::ConceptExtraction, &cloud);
        assert_eq!(task.input_str("content"), Some("Cloud text."));

        let extraction = builder.build(StageType::TextExtraction, &local);
        assert_eq!(extraction.input_str("content"), Some(paper.content.as_str()));
    }

    #[test]
    fn stage_specific_fields() {
        let paper = paper();
        let config = PipelineConfiguration {
            summary_style: "brief".into(),
            discovery_mode: "citing".into(),
            ..PipelineConfiguration::minimal()
        };
        let builder = TaskBuilder::new(&paper, "user-1", &config);

        let summary = builder.build(StageType::ContentSummarization, &BTreeMap::new());
        assert_eq!(summary.input_str("summary_style"), Some("brief"));
        assert_eq!(summary.input_str("discovery_mode"), None);

        let discovery = builder.build(StageType::ResearchDiscovery, &BTreeMap::new());
        assert_eq!(discovery.input_str("discovery_mode"), Some("citing"));
    }
}
