//! Retry policy: circuit-breaker admission, exponential backoff with jitter,
//! and fallback substitution once the primary agent gives up.

use crate::circuit_breaker::CircuitBreaker;
use crate::classify::is_retryable;
use crate::fallback::FallbackRegistry;
use paperflow_config::{RetryConfig, RetrySettings};
use paperflow_core::{AgentError, AgentResult, AgentTask, AgentType};
use paperflow_telemetry::RetryMetrics;
use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// `initial * 2^attempt`, capped at `max`.
pub fn exponential_delay(initial: Duration, attempt: u32, max: Duration) -> Duration {
    let secs = initial.as_secs_f64() * 2f64.powi(attempt.min(63) as i32);
    if secs >= max.as_secs_f64() {
        max
    } else {
        Duration::from_secs_f64(secs)
    }
}

/// Like [`exponential_delay`] but scaled by a random factor in
/// `[1 - jitter, 1 + jitter]` before the cap is applied.
pub fn jittered_delay(initial: Duration, attempt: u32, max: Duration, jitter: f64) -> Duration {
    let jitter = jitter.clamp(0.0, 0.99);
    let factor = rand::rng().random_range(1.0 - jitter..=1.0 + jitter);
    let secs = initial.as_secs_f64() * 2f64.powi(attempt.min(63) as i32) * factor;
    if secs >= max.as_secs_f64() {
        max
    } else {
        Duration::from_secs_f64(secs)
    }
}

/// Wraps agent invocations with the full recovery ladder.
///
/// The breaker, fallback registry and metrics are shared handles; one policy
/// serves every concurrent pipeline run.
pub struct RetryPolicy {
    config: RetryConfig,
    breaker: Arc<CircuitBreaker>,
    fallbacks: Arc<FallbackRegistry>,
    metrics: Arc<RetryMetrics>,
}

impl RetryPolicy {
    pub fn new(
        config: RetryConfig,
        breaker: Arc<CircuitBreaker>,
        fallbacks: Arc<FallbackRegistry>,
        metrics: Arc<RetryMetrics>,
    ) -> Self {
        Self {
            config,
            breaker,
            fallbacks,
            metrics,
        }
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn fallbacks(&self) -> &Arc<FallbackRegistry> {
        &self.fallbacks
    }

    pub fn metrics(&self) -> &Arc<RetryMetrics> {
        &self.metrics
    }

    pub fn settings_for(&self, agent_type: AgentType) -> RetrySettings {
        self.config.settings_for(agent_type)
    }

    /// The delay before retry number `attempt + 1`.
    pub fn backoff_delay(&self, initial: Duration, attempt: u32) -> Duration {
        jittered_delay(initial, attempt, self.config.max_delay(), self.config.jitter)
    }

    /// Run `operation` for `agent_type` with breaker admission, retries and
    /// fallback.
    ///
    /// `task` is the real task being processed; a fallback agent receives it
    /// unchanged. A circuit-open refusal ends the call at once without
    /// fallback. Any other failure is retried while it classifies as
    /// transient and budget remains, then handed to the fallback if one is
    /// registered. A fallback failure is logged and the primary error is
    /// returned.
    pub async fn execute_with_retry<F, Fut>(
        &self,
        agent_type: AgentType,
        task: &AgentTask,
        mut operation: F,
    ) -> Result<AgentResult, AgentError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<AgentResult, AgentError>>,
    {
        if task.id.trim().is_empty() || task.user_id.trim().is_empty() {
            return Err(AgentError::InvalidTask(
                "task id and user id are required".into(),
            ));
        }

        let settings = self.settings_for(agent_type);
        let mut attempt: u32 = 0;

        loop {
            if self.breaker.is_open(agent_type) {
                self.metrics.record_circuit_trip(agent_type);
                warn!(agent_type = %agent_type, task_id = %task.id, "Circuit open, failing fast");
                return Err(AgentError::CircuitOpen { agent_type });
            }

            let outcome = self
                .breaker
                .execute(agent_type, || {
                    self.metrics.record_attempt(agent_type, attempt);
                    operation()
                })
                .await;

            let err = match outcome {
                Ok(result) => {
                    self.metrics.record_success(agent_type, attempt);
                    if attempt > 0 {
                        info!(
                            agent_type = %agent_type,
                            retries = attempt,
                            "Operation succeeded after retries"
                        );
                    }
                    return Ok(result);
                }
                Err(err) => err,
            };

            if err.is_circuit_open() {
                self.metrics.record_circuit_trip(agent_type);
                debug!(agent_type = %agent_type, "Circuit refused attempt, not retrying");
                return Err(err);
            }

            let retryable = is_retryable(&err);
            if retryable && attempt < settings.max_retries {
                let delay = self.backoff_delay(settings.initial_delay(), attempt);
                warn!(
                    agent_type = %agent_type,
                    attempt = attempt + 1,
                    max_retries = settings.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Retryable failure, backing off"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
                continue;
            }

            if retryable {
                warn!(agent_type = %agent_type, retries = attempt, error = %err, "Retries exhausted");
            } else {
                warn!(agent_type = %agent_type, error = %err, "Non-retryable failure");
            }
            return self.fall_back(agent_type, task, err).await;
        }
    }

    async fn fall_back(
        &self,
        agent_type: AgentType,
        task: &AgentTask,
        primary: AgentError,
    ) -> Result<AgentResult, AgentError> {
        let Some(fallback) = self.fallbacks.get(agent_type) else {
            self.metrics.record_failure(agent_type);
            return Err(primary);
        };

        self.metrics.record_fallback_attempt(agent_type);
        info!(
            agent_type = %agent_type,
            fallback = fallback.name(),
            task_id = %task.id,
            "Invoking fallback agent"
        );

        match fallback.process(task.clone()).await {
            Ok(result) if result.success => {
                self.metrics.record_fallback_success(agent_type);
                info!(agent_type = %agent_type, fallback = fallback.name(), "Fallback succeeded");
                Ok(result)
            }
            Ok(result) => {
                self.metrics.record_fallback_failure(agent_type);
                self.metrics.record_failure(agent_type);
                error!(
                    agent_type = %agent_type,
                    fallback = fallback.name(),
                    error = result.error_message.as_deref().unwrap_or("unknown"),
                    "Fallback reported failure"
                );
                Err(primary)
            }
            Err(fallback_err) => {
                self.metrics.record_fallback_failure(agent_type);
                self.metrics.record_failure(agent_type);
                error!(
                    agent_type = %agent_type,
                    fallback = fallback.name(),
                    error = %fallback_err,
                    "Fallback failed"
                );
                Err(primary)
            }
        }
    }
}
