//! Local fallback agents.
//!
//! Deterministic, offline heuristics standing in for cloud agents when a
//! provider is down or unconfigured. Output is coarser than a model's, but it
//! is derived from the task's real paper text.

use async_trait::async_trait;
use paperflow_core::{Agent, AgentError, AgentLoad, AgentResult, AgentStatus, AgentTask, AgentType};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::debug;

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "with", "that", "this", "from", "are", "was", "were", "which", "their",
    "have", "has", "been", "also", "into", "than", "these", "those", "such", "can", "our", "using",
    "used", "use", "its", "not", "but", "between", "both", "each", "more", "most", "other",
    "over", "under", "when", "where", "while", "there", "they", "them", "then", "will", "would",
    "could", "should", "may", "might", "about", "after", "before", "through", "within", "without",
    "all", "any", "one", "two", "three", "however", "thus", "therefore", "paper", "results",
    "show", "shows", "shown", "based", "approach", "method", "methods", "study", "we",
];

/// A local stand-in for one agent type.
pub struct LocalAgent {
    agent_type: AgentType,
    name: String,
    processed: AtomicU64,
}

impl LocalAgent {
    /// `None` for agent types that need live external services.
    pub fn new(agent_type: AgentType) -> Option<Self> {
        if agent_type.requires_external_api() {
            return None;
        }
        Some(Self {
            agent_type,
            name: format!("local-{agent_type}"),
            processed: AtomicU64::new(0),
        })
    }

    /// Every agent type that has a local implementation.
    pub fn supported() -> impl Iterator<Item = AgentType> {
        AgentType::ALL
            .into_iter()
            .filter(|t| !t.requires_external_api())
    }

    fn run(&self, task: &AgentTask, content: &str) -> Value {
        match self.agent_type {
            AgentType::PaperProcessor => extract_text(content),
            AgentType::ContentSummarizer => {
                summarize(content, task.input_str("summary_style").unwrap_or("standard"))
            }
            AgentType::ConceptExplainer => json!({ "concepts": key_terms(content, 8) }),
            AgentType::MetadataEnhancer => infer_metadata(content),
            AgentType::QualityChecker => check_quality(content),
            AgentType::CitationFormatter => format_citations(content),
            // Unreachable: `new` refuses these.
            AgentType::PerplexityResearcher | AgentType::RelatedPaperDiscovery => Value::Null,
        }
    }
}

#[async_trait]
impl Agent for LocalAgent {
    fn agent_type(&self) -> AgentType {
        self.agent_type
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn process(&self, task: AgentTask) -> Result<AgentResult, AgentError> {
        let started = Instant::now();
        let content = task
            .input_str("content")
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| AgentError::InvalidTask(format!("task {} has no paper content", task.id)))?;

        let data = self.run(&task, content);
        self.processed.fetch_add(1, Ordering::Relaxed);
        debug!(agent = %self.name, task_id = %task.id, "Local agent processed task");
        Ok(AgentResult::success(&task, &self.name, data).with_duration(started.elapsed()))
    }

    fn status(&self) -> AgentStatus {
        AgentStatus {
            agent_type: self.agent_type,
            name: self.name.clone(),
            load: AgentLoad::Idle,
            in_flight: 0,
            processed: self.processed.load(Ordering::Relaxed),
            failed: 0,
        }
    }
}

// ── Heuristics ──────────────────────────────────────────────────────────────

fn paragraphs(content: &str) -> Vec<String> {
    content
        .split("\n\n")
        .map(|p| {
            p.replace("-\n", "")
                .split_whitespace()
                .collect::<Vec<_>>()
                .join(" ")
        })
        .filter(|p| !p.is_empty())
        .collect()
}

fn sentences(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    for (idx, ch) in text.char_indices() {
        if matches!(ch, '.' | '!' | '?') {
            let end = idx + ch.len_utf8();
            let next_is_break = text[end..].chars().next().is_none_or(char::is_whitespace);
            if next_is_break {
                let sentence = text[start..end].trim();
                if sentence.split_whitespace().count() >= 3 {
                    out.push(sentence);
                }
                start = end;
            }
        }
    }
    let tail = text[start..].trim();
    if tail.split_whitespace().count() >= 3 {
        out.push(tail);
    }
    out
}

fn words(content: &str) -> impl Iterator<Item = String> + '_ {
    content
        .split(|c: char| !c.is_alphanumeric() && c != '-')
        .map(|w| w.trim_matches('-').to_lowercase())
        .filter(|w| w.len() > 3 && !w.chars().all(|c| c.is_numeric()))
}

fn extract_text(content: &str) -> Value {
    let paragraphs = paragraphs(content);
    let text = paragraphs.join("\n\n");
    json!({
        "text": text,
        "paragraphs": paragraphs.len(),
        "word_count": text.split_whitespace().count(),
    })
}

fn summarize(content: &str, style: &str) -> Value {
    let take = match style {
        "brief" => 2,
        "detailed" => 8,
        _ => 4,
    };
    let body = paragraphs(content).join(" ");
    let picked: Vec<&str> = sentences(&body).into_iter().take(take).collect();
    json!({
        "summary": picked.join(" "),
        "style": style,
        "sentence_count": picked.len(),
    })
}

fn key_terms(content: &str, limit: usize) -> Vec<Value> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for word in words(content) {
        if !STOPWORDS.contains(&word.as_str()) {
            *counts.entry(word).or_default() += 1;
        }
    }
    let mut ranked: Vec<(String, usize)> = counts.into_iter().filter(|(_, n)| *n >= 2).collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked
        .into_iter()
        .take(limit)
        .map(|(term, occurrences)| json!({ "term": term, "occurrences": occurrences }))
        .collect()
}

fn infer_metadata(content: &str) -> Value {
    let title = content
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or_default();

    let year = content
        .split(|c: char| !c.is_ascii_digit())
        .filter(|s| s.len() == 4)
        .filter_map(|s| s.parse::<u32>().ok())
        .find(|y| (1900..=2100).contains(y));

    let doi = content
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| matches!(c, ',' | ';' | '(' | ')' | '[' | ']')))
        .map(|w| w.trim_start_matches("https://doi.org/").trim_start_matches("doi:"))
        .find(|w| w.starts_with("10.") && w.contains('/'))
        .map(|w| w.trim_end_matches('.').to_string());

    let keywords: Vec<Value> = key_terms(content, 5)
        .into_iter()
        .filter_map(|t| t.get("term").cloned())
        .collect();

    json!({
        "title": title,
        "year": year,
        "doi": doi,
        "keywords": keywords,
    })
}

fn has_heading(content: &str, heading: &str) -> bool {
    content.lines().any(|l| {
        let l = l.trim().trim_start_matches(|c: char| c.is_ascii_digit() || c == '.').trim();
        l.eq_ignore_ascii_case(heading)
    })
}

fn check_quality(content: &str) -> Value {
    let word_count = content.split_whitespace().count();
    let mut issues = Vec::new();
    let mut score: f64 = 1.0;

    if word_count < 500 {
        issues.push(format!("document is short ({word_count} words)"));
        score -= 0.3;
    }
    if !has_heading(content, "abstract") {
        issues.push("no abstract section found".to_string());
        score -= 0.2;
    }
    if !has_heading(content, "references") && !has_heading(content, "bibliography") {
        issues.push("no references section found".to_string());
        score -= 0.2;
    }
    if content.contains('\u{FFFD}') {
        issues.push("text contains undecodable characters".to_string());
        score -= 0.1;
    }

    json!({
        "score": (score.max(0.0) * 100.0).round() / 100.0,
        "word_count": word_count,
        "issues": issues,
    })
}

fn format_citations(content: &str) -> Value {
    let mut in_references = false;
    let mut citations: Vec<String> = Vec::new();

    for line in content.lines().map(str::trim) {
        if has_heading(line, "references") || has_heading(line, "bibliography") {
            in_references = true;
            continue;
        }
        let numbered = line.starts_with('[')
            && line
                .find(']')
                .is_some_and(|end| line[1..end].chars().all(|c| c.is_ascii_digit()) && end > 1);
        if numbered {
            let entry = line.split_once(']').map(|(_, rest)| rest.trim()).unwrap_or(line);
            citations.push(entry.to_string());
        } else if in_references && !line.is_empty() {
            citations.push(line.to_string());
        }
    }

    json!({
        "citations": citations,
        "count": citations.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAPER: &str = "Attention Is All You Need\n\
        Vaswani et al., 2017\n\
        \n\
        Abstract\n\
        \n\
        The dominant sequence transduction models are based on recurrent networks. \
        We propose the Transformer, based solely on attention mechanisms. \
        Experiments on translation tasks show attention models to be superior. \
        The Transformer generalizes well to other tasks. \
        Attention layers replace recurrent layers entirely.\n\
        \n\
        References\n\
        [1] Bahdanau D. Neural machine translation. 2014.\n\
        [2] Hochreiter S. Long short-term memory. doi:10.1162/neco.1997.9.8.1735\n";

    fn task(agent_type: AgentType) -> AgentTask {
        AgentTask::new(agent_type, "user-1").with_input("content", PAPER)
    }

    async fn run(agent_type: AgentType) -> Value {
        let agent = LocalAgent::new(agent_type).unwrap();
        agent.process(task(agent_type)).await.unwrap().result_data
    }

    #[test]
    fn external_api_types_have_no_local_agent() {
        assert!(LocalAgent::new(AgentType::RelatedPaperDiscovery).is_none());
        assert!(LocalAgent::new(AgentType::PerplexityResearcher).is_none());
        assert_eq!(LocalAgent::supported().count(), 6);
    }

    #[tokio::test]
    async fn summary_respects_style() {
        let standard = run(AgentType::ContentSummarizer).await;
        assert_eq!(standard["style"], "standard");
        assert_eq!(standard["sentence_count"], 4);

        let agent = LocalAgent::new(AgentType::ContentSummarizer).unwrap();
        let result = agent
            .process(task(AgentType::ContentSummarizer).with_input("summary_style", "brief"))
            .await
            .unwrap();
        assert_eq!(result.result_data["sentence_count"], 2);
        assert_eq!(result.produced_by, "local-content-summarizer");
    }

    #[tokio::test]
    async fn concepts_rank_repeated_terms() {
        let data = run(AgentType::ConceptExplainer).await;
        let concepts = data["concepts"].as_array().unwrap();
        assert_eq!(concepts[0]["term"], "attention");
        assert!(concepts.iter().any(|c| c["term"] == "transformer"));
    }

    #[tokio::test]
    async fn metadata_finds_title_year_and_doi() {
        let data = run(AgentType::MetadataEnhancer).await;
        assert_eq!(data["title"], "Attention Is All You Need");
        assert_eq!(data["year"], 2017);
        assert_eq!(data["doi"], "10.1162/neco.1997.9.8.1735");
    }

    #[tokio::test]
    async fn citations_are_collected() {
        let data = run(AgentType::CitationFormatter).await;
        assert_eq!(data["count"], 2);
        assert!(data["citations"][0].as_str().unwrap().starts_with("Bahdanau"));
    }

    #[tokio::test]
    async fn quality_flags_short_documents() {
        let data = run(AgentType::QualityChecker).await;
        let issues = data["issues"].as_array().unwrap();
        assert_eq!(issues.len(), 1);
        assert!(issues[0].as_str().unwrap().contains("short"));
        assert_eq!(data["score"], 0.7);
    }

    #[tokio::test]
    async fn extraction_normalizes_whitespace() {
        let agent = LocalAgent::new(AgentType::PaperProcessor).unwrap();
        let t = AgentTask::new(AgentType::PaperProcessor, "u")
            .with_input("content", "Line   one of\ntext.\n\n\nSecond   para-\ngraph.");
        let data = agent.process(t).await.unwrap().result_data;
        assert_eq!(data["text"], "Line one of text.\n\nSecond paragraph.");
        assert_eq!(data["paragraphs"], 2);
    }

    #[tokio::test]
    async fn empty_content_is_rejected() {
        let agent = LocalAgent::new(AgentType::QualityChecker).unwrap();
        let t = AgentTask::new(AgentType::QualityChecker, "u");
        assert!(matches!(agent.process(t).await, Err(AgentError::InvalidTask(_))));
    }
}
