//! Data model for retry, fallback, and circuit-breaker statistics.

use chrono::{DateTime, Utc};
use paperflow_core::AgentType;
use serde::{Deserialize, Serialize};

/// Monotonic counters for one agent type.
///
/// Counters only ever increase; they are reset by an explicit administrative
/// call on the metrics engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryStats {
    /// Every invocation of the wrapped operation, first tries included.
    pub total_attempts: u64,
    /// Invocations after the first one.
    pub total_retries: u64,
    /// Operations that eventually succeeded against the primary agent.
    pub successful_operations: u64,
    /// Operations that succeeded only after at least one retry.
    pub successful_retries: u64,
    /// Operations that failed after all recovery avenues.
    pub failed_operations: u64,
    /// Calls refused because the circuit was open.
    pub circuit_breaker_trips: u64,
    pub fallback_attempts: u64,
    pub fallback_successes: u64,
    pub fallback_failures: u64,
    /// When any counter last moved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
}

impl RetryStats {
    /// Share of attempts that were retries, as a percentage.
    pub fn retry_rate(&self) -> f64 {
        if self.total_attempts == 0 {
            return 0.0;
        }
        self.total_retries as f64 / self.total_attempts as f64 * 100.0
    }

    /// Share of fallback invocations that recovered the operation.
    pub fn fallback_success_rate(&self) -> f64 {
        if self.fallback_attempts == 0 {
            return 0.0;
        }
        self.fallback_successes as f64 / self.fallback_attempts as f64 * 100.0
    }

    fn absorb(&mut self, other: &RetryStats) {
        self.total_attempts += other.total_attempts;
        self.total_retries += other.total_retries;
        self.successful_operations += other.successful_operations;
        self.successful_retries += other.successful_retries;
        self.failed_operations += other.failed_operations;
        self.circuit_breaker_trips += other.circuit_breaker_trips;
        self.fallback_attempts += other.fallback_attempts;
        self.fallback_successes += other.fallback_successes;
        self.fallback_failures += other.fallback_failures;
        self.last_updated = self.last_updated.max(other.last_updated);
    }
}

/// Point-in-time view over every agent type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub per_agent: Vec<(AgentType, RetryStats)>,
    pub totals: RetryStats,
    pub taken_at: DateTime<Utc>,
}

impl StatsSnapshot {
    pub fn new(mut per_agent: Vec<(AgentType, RetryStats)>) -> Self {
        per_agent.sort_by_key(|(agent_type, _)| *agent_type);
        let mut totals = RetryStats::default();
        for (_, stats) in &per_agent {
            totals.absorb(stats);
        }
        Self {
            per_agent,
            totals,
            taken_at: Utc::now(),
        }
    }

    pub fn get(&self, agent_type: AgentType) -> Option<&RetryStats> {
        self.per_agent
            .iter()
            .find(|(t, _)| *t == agent_type)
            .map(|(_, stats)| stats)
    }
}
