//! Prompt construction and response decoding for cloud agents.

use paperflow_core::{AgentError, AgentTask, AgentType, ChatMessage};

/// Characters of paper text sent to a provider.
const MAX_CONTENT_CHARS: usize = 24_000;

/// System prompt for each agent type.
pub fn system_prompt(agent_type: AgentType) -> &'static str {
    match agent_type {
        AgentType::PaperProcessor => {
            "You clean up text extracted from academic papers. Remove page headers, \
             footers and hyphenation artifacts. Reply with JSON: \
             {\"text\": string, \"sections\": [string]}."
        }
        AgentType::ContentSummarizer => {
            "You summarize academic papers for researchers. Reply with JSON: \
             {\"summary\": string, \"key_findings\": [string]}."
        }
        AgentType::ConceptExplainer => {
            "You identify the key technical concepts in an academic paper and explain \
             each in one or two sentences. Reply with JSON: \
             {\"concepts\": [{\"term\": string, \"explanation\": string}]}."
        }
        AgentType::MetadataEnhancer => {
            "You extract bibliographic metadata from academic papers. Reply with JSON: \
             {\"title\": string, \"authors\": [string], \"year\": number|null, \
             \"doi\": string|null, \"keywords\": [string]}."
        }
        AgentType::QualityChecker => {
            "You review processed academic papers for completeness and consistency. \
             Reply with JSON: {\"score\": number, \"issues\": [string]}."
        }
        AgentType::CitationFormatter => {
            "You extract the reference list of an academic paper and format each entry \
             in APA style. Reply with JSON: {\"citations\": [string]}."
        }
        AgentType::PerplexityResearcher => {
            "You research the current state of the field around an academic paper using \
             live web sources. Reply with JSON: \
             {\"findings\": [string], \"sources\": [string]}."
        }
        AgentType::RelatedPaperDiscovery => {
            "You find published papers related to the given paper. Reply with JSON: \
             {\"papers\": [{\"title\": string, \"year\": number|null, \"reason\": string}]}."
        }
    }
}

/// Build the conversation for `task`.
pub fn messages_for(task: &AgentTask) -> Result<Vec<ChatMessage>, AgentError> {
    let content = task
        .input_str("content")
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| AgentError::InvalidTask(format!("task {} has no paper content", task.id)))?;

    let mut user = String::new();
    if let Some(title) = task.input_str("title") {
        user.push_str(&format!("Title: {title}\n"));
    }
    match task.agent_type {
        AgentType::ContentSummarizer => {
            let style = task.input_str("summary_style").unwrap_or("standard");
            user.push_str(&format!("Summary style: {style}\n"));
        }
        AgentType::RelatedPaperDiscovery => {
            let mode = task.input_str("discovery_mode").unwrap_or("related");
            user.push_str(&format!("Discovery mode: {mode}\n"));
        }
        _ => {}
    }
    user.push('\n');
    user.push_str(truncate(content, MAX_CONTENT_CHARS));

    Ok(vec![
        ChatMessage::system(system_prompt(task.agent_type)),
        ChatMessage::user(user),
    ])
}

/// Decode a completion: JSON when the model complied, raw text otherwise.
pub fn decode_response(content: &str) -> serde_json::Value {
    let trimmed = content
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();
    match serde_json::from_str::<serde_json::Value>(trimmed) {
        Ok(value @ serde_json::Value::Object(_)) => value,
        _ => serde_json::json!({ "text": content.trim() }),
    }
}

fn truncate(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summarizer_prompt_carries_style() {
        let task = AgentTask::new(AgentType::ContentSummarizer, "u1")
            .with_input("content", "Deep learning is useful.")
            .with_input("summary_style", "brief");
        let messages = messages_for(&task).unwrap();
        assert_eq!(messages.len(), 2);
        assert!(messages[1].content.contains("Summary style: brief"));
        assert!(messages[1].content.ends_with("Deep learning is useful."));
    }

    #[test]
    fn missing_content_is_invalid() {
        let task = AgentTask::new(AgentType::QualityChecker, "u1").with_input("content", "   ");
        assert!(matches!(messages_for(&task), Err(AgentError::InvalidTask(_))));
    }

    #[test]
    fn decodes_json_and_fenced_json() {
        let plain = decode_response(r#"{"summary": "ok"}"#);
        assert_eq!(plain["summary"], "ok");

        let fenced = decode_response("```json\n{\"score\": 0.8}\n```");
        assert_eq!(fenced["score"], 0.8);

        let text = decode_response("Just prose.");
        assert_eq!(text["text"], "Just prose.");
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("abc", 10), "abc");
    }
}
