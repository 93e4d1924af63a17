//! Thread-safe retry metrics engine.

use crate::model::{RetryStats, StatsSnapshot};
use chrono::Utc;
use paperflow_core::AgentType;
use std::collections::HashMap;
use std::sync::RwLock;

/// Per-agent-type counters for the retry layer.
///
/// Thread-safe via `RwLock`; every update is a short critical section on a
/// single map entry, created lazily the first time an agent type reports.
#[derive(Default)]
pub struct RetryMetrics {
    stats: RwLock<HashMap<AgentType, RetryStats>>,
}

impl RetryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn update(&self, agent_type: AgentType, f: impl FnOnce(&mut RetryStats)) {
        let mut stats = self.stats.write().unwrap_or_else(|e| e.into_inner());
        let entry = stats.entry(agent_type).or_default();
        f(entry);
        entry.last_updated = Some(Utc::now());
    }

    // ── Recording ─────────────────────────────────────────────────────

    /// One invocation of the wrapped operation. `attempt` is zero-based.
    pub fn record_attempt(&self, agent_type: AgentType, attempt: u32) {
        self.update(agent_type, |s| {
            s.total_attempts += 1;
            if attempt > 0 {
                s.total_retries += 1;
            }
        });
    }

    /// The operation succeeded on zero-based attempt `attempt`.
    pub fn record_success(&self, agent_type: AgentType, attempt: u32) {
        self.update(agent_type, |s| {
            s.successful_operations += 1;
            if attempt > 0 {
                s.successful_retries += 1;
            }
        });
    }

    pub fn record_failure(&self, agent_type: AgentType) {
        self.update(agent_type, |s| s.failed_operations += 1);
    }

    pub fn record_circuit_trip(&self, agent_type: AgentType) {
        self.update(agent_type, |s| s.circuit_breaker_trips += 1);
    }

    pub fn record_fallback_attempt(&self, agent_type: AgentType) {
        self.update(agent_type, |s| s.fallback_attempts += 1);
    }

    pub fn record_fallback_success(&self, agent_type: AgentType) {
        self.update(agent_type, |s| s.fallback_successes += 1);
    }

    pub fn record_fallback_failure(&self, agent_type: AgentType) {
        self.update(agent_type, |s| s.fallback_failures += 1);
    }

    // ── Queries ───────────────────────────────────────────────────────

    /// Counters for one agent type (all zero if it never reported).
    pub fn stats_for(&self, agent_type: AgentType) -> RetryStats {
        let stats = self.stats.read().unwrap_or_else(|e| e.into_inner());
        stats.get(&agent_type).cloned().unwrap_or_default()
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let stats = self.stats.read().unwrap_or_else(|e| e.into_inner());
        StatsSnapshot::new(stats.iter().map(|(t, s)| (*t, s.clone())).collect())
    }

    // ── Administration ────────────────────────────────────────────────

    pub fn reset(&self, agent_type: AgentType) {
        let mut stats = self.stats.write().unwrap_or_else(|e| e.into_inner());
        stats.remove(&agent_type);
    }

    pub fn reset_all(&self) {
        self.stats.write().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn first_try_success_is_not_a_retry() {
        let metrics = RetryMetrics::new();
        metrics.record_attempt(AgentType::ContentSummarizer, 0);
        metrics.record_success(AgentType::ContentSummarizer, 0);

        let stats = metrics.stats_for(AgentType::ContentSummarizer);
        assert_eq!(stats.total_attempts, 1);
        assert_eq!(stats.total_retries, 0);
        assert_eq!(stats.successful_operations, 1);
        assert_eq!(stats.successful_retries, 0);
        assert!(stats.last_updated.is_some());
    }

    #[test]
    fn success_after_retries_counts_both() {
        let metrics = RetryMetrics::new();
        for attempt in 0..3 {
            metrics.record_attempt(AgentType::PaperProcessor, attempt);
        }
        metrics.record_success(AgentType::PaperProcessor, 2);

        let stats = metrics.stats_for(AgentType::PaperProcessor);
        assert_eq!(stats.total_attempts, 3);
        assert_eq!(stats.total_retries, 2);
        assert_eq!(stats.successful_retries, 1);
    }

    #[test]
    fn fallback_counters() {
        let metrics = RetryMetrics::new();
        metrics.record_fallback_attempt(AgentType::QualityChecker);
        metrics.record_fallback_failure(AgentType::QualityChecker);
        metrics.record_failure(AgentType::QualityChecker);

        let stats = metrics.stats_for(AgentType::QualityChecker);
        assert_eq!(stats.fallback_attempts, 1);
        assert_eq!(stats.fallback_failures, 1);
        assert_eq!(stats.failed_operations, 1);
    }

    #[test]
    fn reset_clears_only_one_agent() {
        let metrics = RetryMetrics::new();
        metrics.record_circuit_trip(AgentType::ConceptExplainer);
        metrics.record_circuit_trip(AgentType::MetadataEnhancer);

        metrics.reset(AgentType::ConceptExplainer);
        assert_eq!(metrics.stats_for(AgentType::ConceptExplainer), RetryStats::default());
        assert_eq!(metrics.stats_for(AgentType::MetadataEnhancer).circuit_breaker_trips, 1);

        metrics.reset_all();
        assert!(metrics.snapshot().per_agent.is_empty());
    }

    #[test]
    fn concurrent_updates_are_not_lost() {
        let metrics = Arc::new(RetryMetrics::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let m = metrics.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        m.record_attempt(AgentType::CitationFormatter, 0);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(metrics.stats_for(AgentType::CitationFormatter).total_attempts, 800);
    }
}
