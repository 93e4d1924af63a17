//! Per-agent-type circuit breaker.
//!
//! The state machine itself ([`CircuitState`]) is a plain value with pure
//! transition functions; [`CircuitBreaker`] owns one mutex-protected state per
//! agent type and applies those transitions under the lock.

use paperflow_config::CircuitBreakerConfig;
use paperflow_core::{AgentError, AgentType};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Coarse state reported to callers and monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitStatus {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CircuitStatus::Closed => "CLOSED",
            CircuitStatus::Open => "OPEN",
            CircuitStatus::HalfOpen => "HALF_OPEN",
        })
    }
}

/// Outcome of one guarded operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitEvent {
    Success,
    Failure,
}

/// Thresholds and timings shared by every breaker in a registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerPolicy {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    /// How long an open circuit stays open after its last failure.
    pub open_timeout: Duration,
    /// Minimum spacing between trial calls while half-open.
    pub probe_interval: Duration,
}

impl Default for BreakerPolicy {
    fn default() -> Self {
        Self::from(&CircuitBreakerConfig::default())
    }
}

impl From<&CircuitBreakerConfig> for BreakerPolicy {
    fn from(config: &CircuitBreakerConfig) -> Self {
        Self {
            failure_threshold: config.failure_threshold,
            success_threshold: config.success_threshold,
            open_timeout: config.open_timeout(),
            probe_interval: config.half_open_probe_interval(),
        }
    }
}

/// State of one breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed {
        failures: u32,
    },
    Open {
        /// Time of the most recent failure.
        since: Instant,
        failures: u32,
    },
    HalfOpen {
        since: Instant,
        successes: u32,
        last_probe: Option<Instant>,
    },
}

impl Default for CircuitState {
    fn default() -> Self {
        CircuitState::Closed { failures: 0 }
    }
}

impl CircuitState {
    pub fn status(&self) -> CircuitStatus {
        match self {
            CircuitState::Closed { .. } => CircuitStatus::Closed,
            CircuitState::Open { .. } => CircuitStatus::Open,
            CircuitState::HalfOpen { .. } => CircuitStatus::HalfOpen,
        }
    }

    /// Apply the outcome of a guarded operation.
    pub fn on_event(self, event: CircuitEvent, now: Instant, policy: &BreakerPolicy) -> Self {
        match (self, event) {
            // A success decays the failure count by one.
            (CircuitState::Closed { failures }, CircuitEvent::Success) => CircuitState::Closed {
                failures: failures.saturating_sub(1),
            },
            (CircuitState::Closed { failures }, CircuitEvent::Failure) => {
                let failures = failures.saturating_add(1);
                if failures >= policy.failure_threshold {
                    CircuitState::Open {
                        since: now,
                        failures,
                    }
                } else {
                    CircuitState::Closed { failures }
                }
            }
            // A late result from a call admitted before the circuit opened.
            (open @ CircuitState::Open { .. }, CircuitEvent::Success) => open,
            (CircuitState::Open { failures, .. }, CircuitEvent::Failure) => CircuitState::Open {
                since: now,
                failures: failures.saturating_add(1),
            },
            (
                CircuitState::HalfOpen {
                    since,
                    successes,
                    last_probe,
                },
                CircuitEvent::Success,
            ) => {
                let successes = successes + 1;
                if successes >= policy.success_threshold {
                    CircuitState::Closed { failures: 0 }
                } else {
                    CircuitState::HalfOpen {
                        since,
                        successes,
                        last_probe,
                    }
                }
            }
            (CircuitState::HalfOpen { .. }, CircuitEvent::Failure) => CircuitState::Open {
                since: now,
                failures: policy.failure_threshold,
            },
        }
    }

    /// Move an open circuit to half-open once its cooldown has elapsed.
    pub fn poll(self, now: Instant, policy: &BreakerPolicy) -> Self {
        match self {
            CircuitState::Open { since, .. }
                if now.saturating_duration_since(since) > policy.open_timeout =>
            {
                CircuitState::HalfOpen {
                    since: now,
                    successes: 0,
                    last_probe: None,
                }
            }
            other => other,
        }
    }

    /// Decide whether a call may go through, recording the probe if half-open.
    pub fn admit(self, now: Instant, policy: &BreakerPolicy) -> (Self, bool) {
        match self.poll(now, policy) {
            closed @ CircuitState::Closed { .. } => (closed, true),
            open @ CircuitState::Open { .. } => (open, false),
            CircuitState::HalfOpen {
                since,
                successes,
                last_probe,
            } => {
                let ready = last_probe
                    .is_none_or(|probe| now.saturating_duration_since(probe) >= policy.probe_interval);
                let last_probe = if ready { Some(now) } else { last_probe };
                (
                    CircuitState::HalfOpen {
                        since,
                        successes,
                        last_probe,
                    },
                    ready,
                )
            }
        }
    }

    fn failure_count(&self) -> u32 {
        match self {
            CircuitState::Closed { failures } | CircuitState::Open { failures, .. } => *failures,
            CircuitState::HalfOpen { .. } => 0,
        }
    }

    fn success_count(&self) -> u32 {
        match self {
            CircuitState::HalfOpen { successes, .. } => *successes,
            _ => 0,
        }
    }
}

/// Monitoring view of one breaker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitSnapshot {
    pub agent_type: AgentType,
    pub status: CircuitStatus,
    pub failure_count: u32,
    pub success_count: u32,
    /// Milliseconds spent in the current OPEN or HALF_OPEN state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_age_ms: Option<u64>,
}

/// Registry of breakers, one per agent type, created lazily.
///
/// Shared across every concurrent pipeline run; each agent type's state sits
/// behind its own mutex.
pub struct CircuitBreaker {
    policy: BreakerPolicy,
    circuits: RwLock<HashMap<AgentType, Arc<Mutex<CircuitState>>>>,
}

impl CircuitBreaker {
    pub fn new(config: &CircuitBreakerConfig) -> Self {
        Self::with_policy(BreakerPolicy::from(config))
    }

    pub fn with_policy(policy: BreakerPolicy) -> Self {
        Self {
            policy,
            circuits: RwLock::new(HashMap::new()),
        }
    }

    pub fn policy(&self) -> &BreakerPolicy {
        &self.policy
    }

    fn circuit(&self, agent_type: AgentType) -> Arc<Mutex<CircuitState>> {
        if let Some(circuit) = self
            .circuits
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&agent_type)
        {
            return circuit.clone();
        }
        self.circuits
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(agent_type)
            .or_default()
            .clone()
    }

    /// Run `f` on one agent type's state under its lock, logging transitions.
    fn transition<R>(
        &self,
        agent_type: AgentType,
        f: impl FnOnce(CircuitState, Instant, &BreakerPolicy) -> (CircuitState, R),
    ) -> R {
        let circuit = self.circuit(agent_type);
        let mut state = circuit.lock().unwrap_or_else(|e| e.into_inner());
        let before = state.status();
        let (next, out) = f(*state, Instant::now(), &self.policy);
        *state = next;
        let after = next.status();
        if before != after {
            match after {
                CircuitStatus::Open => warn!(
                    agent_type = %agent_type,
                    failures = next.failure_count(),
                    from = %before,
                    "Circuit breaker opened"
                ),
                CircuitStatus::HalfOpen => {
                    info!(agent_type = %agent_type, "Circuit breaker half-open, probing")
                }
                CircuitStatus::Closed => info!(agent_type = %agent_type, "Circuit breaker closed"),
            }
        }
        out
    }

    /// Whether calls for `agent_type` are currently refused outright.
    ///
    /// Moves an expired open circuit to half-open as a side effect.
    pub fn is_open(&self, agent_type: AgentType) -> bool {
        self.status(agent_type) == CircuitStatus::Open
    }

    /// Admission check. While half-open, admits one probe per probe interval.
    pub fn can_execute(&self, agent_type: AgentType) -> bool {
        self.transition(agent_type, |state, now, policy| state.admit(now, policy))
    }

    pub fn status(&self, agent_type: AgentType) -> CircuitStatus {
        self.transition(agent_type, |state, now, policy| {
            let next = state.poll(now, policy);
            (next, next.status())
        })
    }

    pub fn record_success(&self, agent_type: AgentType) {
        self.transition(agent_type, |state, now, policy| {
            (state.on_event(CircuitEvent::Success, now, policy), ())
        })
    }

    pub fn record_failure(&self, agent_type: AgentType) {
        self.transition(agent_type, |state, now, policy| {
            (state.on_event(CircuitEvent::Failure, now, policy), ())
        })
    }

    /// Guard an async operation: refuse it if the circuit does not admit the
    /// call, otherwise run it and record the outcome.
    pub async fn execute<T, F, Fut>(&self, agent_type: AgentType, operation: F) -> Result<T, AgentError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, AgentError>>,
    {
        if !self.can_execute(agent_type) {
            debug!(agent_type = %agent_type, "Circuit breaker refused call");
            return Err(AgentError::CircuitOpen { agent_type });
        }

        let outcome = operation().await;
        match &outcome {
            Ok(_) => self.record_success(agent_type),
            Err(_) => self.record_failure(agent_type),
        }
        outcome
    }

    /// Administrative reset to CLOSED with zeroed counters.
    pub fn reset(&self, agent_type: AgentType) {
        self.transition(agent_type, |_, _, _| (CircuitState::default(), ()));
        info!(agent_type = %agent_type, "Circuit breaker reset");
    }

    pub fn snapshot(&self, agent_type: AgentType) -> CircuitSnapshot {
        self.transition(agent_type, |state, now, policy| {
            let state = state.poll(now, policy);
            let state_age_ms = match state {
                CircuitState::Open { since, .. } | CircuitState::HalfOpen { since, .. } => {
                    Some(now.saturating_duration_since(since).as_millis() as u64)
                }
                CircuitState::Closed { .. } => None,
            };
            let snapshot = CircuitSnapshot {
                agent_type,
                status: state.status(),
                failure_count: state.failure_count(),
                success_count: state.success_count(),
                state_age_ms,
            };
            (state, snapshot)
        })
    }

    /// Snapshots of every breaker that has seen traffic, ordered by agent type.
    pub fn stats(&self) -> Vec<CircuitSnapshot> {
        let mut known: Vec<AgentType> = self
            .circuits
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .copied()
            .collect();
        known.sort();
        known.into_iter().map(|t| self.snapshot(t)).collect()
    }

    /// Move every expired open circuit to half-open. Returns how many moved.
    pub fn sweep(&self) -> usize {
        let known: Vec<AgentType> = self
            .circuits
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .copied()
            .collect();
        known
            .into_iter()
            .filter(|t| {
                self.transition(*t, |state, now, policy| {
                    let next = state.poll(now, policy);
                    (next, state.status() != next.status())
                })
            })
            .count()
    }

    /// Start the proactive sweep loop. Stops when `shutdown` flips to `true`
    /// or its sender is dropped.
    pub fn spawn_monitor(
        self: Arc<Self>,
        every: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let moved = self.sweep();
                        if moved > 0 {
                            debug!(moved, "Circuit monitor moved breakers to half-open");
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            debug!("Circuit monitor stopping");
                            break;
                        }
                    }
                }
            }
        })
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::with_policy(BreakerPolicy::default())
    }
}
