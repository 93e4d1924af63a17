//! Cloud-backed agent: rate-limited provider calls under the retry policy.

use crate::prompt;
use async_trait::async_trait;
use paperflow_core::{
    Agent, AgentError, AgentLoad, AgentResult, AgentStatus, AgentTask, AgentType, AiProvider,
    CompletionRequest, Provider,
};
use paperflow_providers::RateLimiter;
use paperflow_resilience::RetryPolicy;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Instant;
use tracing::{debug, info};

/// In-flight calls at which an agent reports itself busy.
const BUSY_AT: usize = 3;

/// An agent whose work is done by an external AI provider.
///
/// Each attempt takes a permit from the provider's rate limiter before the
/// request goes out; attempts run inside [`RetryPolicy::execute_with_retry`],
/// so breaker admission, backoff and fallback apply uniformly.
pub struct CloudAgent {
    agent_type: AgentType,
    name: String,
    provider: AiProvider,
    model: String,
    client: Arc<dyn Provider>,
    limiter: Arc<RateLimiter>,
    retry: Arc<RetryPolicy>,
    in_flight: AtomicUsize,
    processed: AtomicU64,
    failed: AtomicU64,
}

impl CloudAgent {
    pub fn new(
        agent_type: AgentType,
        provider: AiProvider,
        model: impl Into<String>,
        client: Arc<dyn Provider>,
        limiter: Arc<RateLimiter>,
        retry: Arc<RetryPolicy>,
    ) -> Self {
        Self {
            agent_type,
            name: format!("{provider}-{agent_type}"),
            provider,
            model: model.into(),
            client,
            limiter,
            retry,
            in_flight: AtomicUsize::new(0),
            processed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    pub fn provider(&self) -> AiProvider {
        self.provider
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// One attempt: admission, then the provider call.
    async fn call_once(&self, task: &AgentTask) -> Result<AgentResult, AgentError> {
        let messages = prompt::messages_for(task)?;

        self.limiter
            .acquire_permit(self.provider)
            .await
            .map_err(|e| AgentError::Rejected {
                agent_type: self.agent_type,
                message: e.to_string(),
            })?;

        let request = CompletionRequest::new(&self.model, messages);
        let response = self.client.complete(request).await?;

        debug!(
            agent = %self.name,
            model = %response.model,
            tokens = response.usage.as_ref().map(|u| u.total_tokens),
            "Provider responded"
        );

        let data = serde_json::json!({
            "output": prompt::decode_response(&response.content),
            "model": response.model,
        });
        Ok(AgentResult::success(task, &self.name, data))
    }
}

#[async_trait]
impl Agent for CloudAgent {
    fn agent_type(&self) -> AgentType {
        self.agent_type
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn process(&self, task: AgentTask) -> Result<AgentResult, AgentError> {
        if task.agent_type != self.agent_type {
            return Err(AgentError::InvalidTask(format!(
                "{} cannot process a {} task",
                self.name, task.agent_type
            )));
        }

        let started = Instant::now();
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let task_ref = &task;
        let outcome = self
            .retry
            .execute_with_retry(self.agent_type, task_ref, move || self.call_once(task_ref))
            .await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match outcome {
            Ok(result) => {
                self.processed.fetch_add(1, Ordering::Relaxed);
                info!(
                    agent = %self.name,
                    task_id = %task.id,
                    produced_by = %result.produced_by,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Task processed"
                );
                Ok(result.with_duration(started.elapsed()))
            }
            Err(err) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                Err(err)
            }
        }
    }

    fn status(&self) -> AgentStatus {
        let in_flight = self.in_flight.load(Ordering::SeqCst);
        let load = match in_flight {
            0 => AgentLoad::Idle,
            n if n >= BUSY_AT => AgentLoad::Busy,
            _ => AgentLoad::Active,
        };
        AgentStatus {
            agent_type: self.agent_type,
            name: self.name.clone(),
            load,
            in_flight,
            processed: self.processed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use paperflow_config::{RateLimitConfig, RetryConfig};
    use paperflow_core::{CompletionResponse, ProviderError};
    use paperflow_resilience::{CircuitBreaker, FallbackRegistry};
    use paperflow_telemetry::RetryMetrics;
    use std::sync::Mutex;

    /// Returns scripted outcomes in order, then repeats the last one.
    struct ScriptedProvider {
        script: Mutex<Vec<Result<String, ProviderError>>>,
        calls: Mutex<usize>,
    }

    impl ScriptedProvider {
        fn new(script: Vec<Result<String, ProviderError>>) -> Self {
            Self {
                script: Mutex::new(script),
                calls: Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl Provider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, ProviderError> {
            let mut calls = self.calls.lock().unwrap();
            let script = self.script.lock().unwrap();
            let step = script[(*calls).min(script.len() - 1)].clone();
            *calls += 1;
            step.map(|content| CompletionResponse {
                content,
                model: request.model,
                usage: None,
            })
        }
    }

    fn agent(provider: Arc<ScriptedProvider>) -> (CloudAgent, Arc<RetryPolicy>) {
        let retry = Arc::new(RetryPolicy::new(
            RetryConfig::default(),
            Arc::new(CircuitBreaker::default()),
            Arc::new(FallbackRegistry::new()),
            Arc::new(RetryMetrics::new()),
        ));
        let limiter = Arc::new(RateLimiter::new(&RateLimitConfig::default()));
        let agent = CloudAgent::new(
            AgentType::ContentSummarizer,
            AiProvider::Anthropic,
            "claude-test",
            provider,
            limiter,
            retry.clone(),
        );
        (agent, retry)
    }

    fn task() -> AgentTask {
        AgentTask::new(AgentType::ContentSummarizer, "user-1")
            .with_paper("p-1")
            .with_input("content", "Transformers changed NLP.")
    }

    #[tokio::test(start_paused = true)]
    async fn successful_call_decodes_output() {
        let provider = Arc::new(ScriptedProvider::new(vec![Ok(r#"{"summary": "short"}"#.into())]));
        let (agent, _) = agent(provider.clone());

        let result = agent.process(task()).await.unwrap();
        assert!(result.success);
        assert_eq!(result.produced_by, "anthropic-content-summarizer");
        assert_eq!(result.result_data["output"]["summary"], "short");
        assert_eq!(result.result_data["model"], "claude-test");
        assert_eq!(agent.status().processed, 1);
        assert_eq!(agent.status().load, AgentLoad::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_provider_errors_are_retried() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Err(ProviderError::Overloaded("busy".into())),
            Err(ProviderError::Timeout("slow".into())),
            Ok("plain text summary".into()),
        ]));
        let (agent, retry) = agent(provider.clone());

        let result = agent.process(task()).await.unwrap();
        assert_eq!(result.result_data["output"]["text"], "plain text summary");
        assert_eq!(*provider.calls.lock().unwrap(), 3);
        assert_eq!(retry.metrics().stats_for(AgentType::ContentSummarizer).total_retries, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn auth_failure_is_not_retried() {
        let provider = Arc::new(ScriptedProvider::new(vec![Err(
            ProviderError::AuthenticationFailed("bad key".into()),
        )]));
        let (agent, _) = agent(provider.clone());

        let err = agent.process(task()).await.unwrap_err();
        assert!(matches!(err, AgentError::Provider(ProviderError::AuthenticationFailed(_))));
        assert_eq!(*provider.calls.lock().unwrap(), 1);
        assert_eq!(agent.status().failed, 1);
    }

    #[tokio::test]
    async fn rejects_foreign_task_type() {
        let provider = Arc::new(ScriptedProvider::new(vec![Ok("{}".into())]));
        let (agent, _) = agent(provider);
        let foreign = AgentTask::new(AgentType::QualityChecker, "user-1").with_input("content", "x");
        assert!(matches!(agent.process(foreign).await, Err(AgentError::InvalidTask(_))));
    }
}
