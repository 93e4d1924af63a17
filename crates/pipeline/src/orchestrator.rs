//! The pipeline orchestrator: runs a paper through its execution plan.
//!
//! Stages run strictly in plan order. The first stage that fails aborts the
//! run; later stages are never dispatched. Runs for different papers are
//! independent tasks and only meet at the shared breaker and rate limiter
//! inside the agents.

use crate::plan::{ExecutionPlan, PipelineConfiguration};
use crate::state::{PipelineState, PipelineStatus, StageResult, StateManager};
use crate::task::TaskBuilder;
use chrono::Utc;
use paperflow_core::{
    AgentRegistry, AgentStatus, EventBus, PaperRecord, PaperStore, PipelineError, PipelineEvent,
    ProgressSink, ProgressUpdate, StageType, StoreError,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Outcome of one run.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineResult {
    pub run_id: String,
    pub paper_id: String,
    pub status: PipelineStatus,
    pub success: bool,
    pub stage_results: BTreeMap<StageType, StageResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub duration_ms: u64,
}

impl PipelineResult {
    fn from_state(state: &PipelineState, elapsed: Duration) -> Self {
        Self {
            run_id: state.id.clone(),
            paper_id: state.paper_id.clone(),
            status: state.status,
            success: state.status == PipelineStatus::Completed,
            stage_results: state.stage_results.clone(),
            error_message: state.error_message.clone(),
            duration_ms: elapsed.as_millis() as u64,
        }
    }
}

/// A run executing in the background.
pub struct RunHandle {
    pub run_id: String,
    handle: JoinHandle<Result<PipelineResult, PipelineError>>,
}

impl RunHandle {
    /// Wait for the run to finish.
    pub async fn wait(self) -> Result<PipelineResult, PipelineError> {
        let RunHandle { run_id, handle } = self;
        match handle.await {
            Ok(result) => result,
            Err(e) => Err(PipelineError::Aborted {
                run_id,
                message: e.to_string(),
            }),
        }
    }
}

pub struct PipelineOrchestrator {
    agents: AgentRegistry,
    state: StateManager,
    store: Arc<dyn PaperStore>,
    events: Option<Arc<EventBus>>,
}

impl PipelineOrchestrator {
    pub fn new(agents: AgentRegistry, store: Arc<dyn PaperStore>, retention: Duration) -> Self {
        Self {
            agents,
            state: StateManager::new(store.clone(), retention),
            store,
            events: None,
        }
    }

    /// Also publish progress and stage events on `events`.
    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn state(&self) -> &StateManager {
        &self.state
    }

    /// Self-reported load of every registered agent.
    pub fn agent_statuses(&self) -> Vec<AgentStatus> {
        self.agents.statuses()
    }

    /// Ask a run to stop. Honoured before the next stage starts; the stage
    /// in progress always finishes.
    pub fn cancel(&self, run_id: &str) -> bool {
        let flagged = self.state.request_cancel(run_id);
        if flagged {
            info!(run_id = %run_id, "Pipeline cancellation requested");
        }
        flagged
    }

    /// Start a run for `paper_id` and return once it is registered.
    ///
    /// The stages execute on a spawned task; the returned handle yields the
    /// final [`PipelineResult`].
    pub async fn process_paper(
        self: &Arc<Self>,
        paper_id: &str,
        user_id: &str,
        config: PipelineConfiguration,
        sink: Arc<dyn ProgressSink>,
    ) -> Result<RunHandle, PipelineError> {
        let paper = self
            .store
            .find_by_id(paper_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(paper_id.to_string()))?;

        let plan = ExecutionPlan::build(&config);
        let run_id = self
            .state
            .initialize(paper_id, user_id, config.clone(), plan.clone())
            .await?;

        info!(
            run_id = %run_id,
            paper_id = %paper_id,
            stages = plan.len(),
            "Starting pipeline"
        );

        let this = Arc::clone(self);
        let user_id = user_id.to_string();
        let task_run_id = run_id.clone();
        let handle = tokio::spawn(async move {
            let worker = Arc::clone(&this);
            let worker_run_id = task_run_id.clone();
            let outcome = tokio::spawn(async move {
                worker
                    .execute(&worker_run_id, &paper, &user_id, &config, &plan, sink.as_ref())
                    .await
            })
            .await;

            let message = match outcome {
                Ok(Ok(result)) => return Ok(result),
                Ok(Err(e)) => e.to_string(),
                Err(e) => e.to_string(),
            };
            this.abort(&task_run_id, message).await
        });

        Ok(RunHandle { run_id, handle })
    }

    async fn execute(
        &self,
        run_id: &str,
        paper: &PaperRecord,
        user_id: &str,
        config: &PipelineConfiguration,
        plan: &ExecutionPlan,
        sink: &dyn ProgressSink,
    ) -> Result<PipelineResult, PipelineError> {
        let started = Instant::now();
        self.state.mark_running(run_id)?;

        let builder = TaskBuilder::new(paper, user_id, config);
        let total = plan.len();
        let mut results: BTreeMap<StageType, StageResult> = BTreeMap::new();

        for (index, definition) in plan.stages().iter().enumerate() {
            let stage = definition.stage;

            if self.state.is_cancel_requested(run_id) {
                info!(run_id = %run_id, next_stage = %stage, "Pipeline cancelled between stages");
                let state = self.state.cancel(run_id).await?;
                self.emit(sink, &state.progress(None, "Pipeline cancelled"));
                self.publish_run_finished(&state);
                return Ok(PipelineResult::from_state(&state, started.elapsed()));
            }

            let message = format!("{} ({}/{})", stage.description(), index + 1, total);
            if let Some(update) = self.state.progress(run_id, Some(stage), message) {
                self.emit(sink, &update);
            }

            self.state.start_stage(run_id, stage)?;
            let task = builder.build(stage, &results);
            debug!(run_id = %run_id, stage = %stage, task_id = %task.id, "Dispatching stage");

            let stage_started = Instant::now();
            let outcome = self.agents.process(task).await;
            let elapsed_ms = stage_started.elapsed().as_millis() as u64;

            let failure = match outcome {
                Ok(result) if result.success => {
                    let stage_result = StageResult::from(result);
                    self.state.complete_stage(run_id, stage, stage_result.clone())?;
                    results.insert(stage, stage_result);
                    self.publish_stage(run_id, stage, true, elapsed_ms);
                    debug!(run_id = %run_id, stage = %stage, elapsed_ms, "Stage completed");
                    continue;
                }
                Ok(result) => result
                    .error_message
                    .unwrap_or_else(|| "agent reported failure".into()),
                Err(e) => e.to_string(),
            };

            self.state
                .fail_stage(run_id, stage, StageResult::failed(&failure, elapsed_ms))?;
            self.publish_stage(run_id, stage, false, elapsed_ms);

            let error = PipelineError::StageFailed {
                stage,
                message: failure,
            };
            warn!(run_id = %run_id, error = %error, "Aborting pipeline");

            let state = self.state.fail(run_id, error.to_string()).await?;
            self.emit(sink, &state.progress(Some(stage), error.to_string()));
            self.publish_run_finished(&state);
            return Ok(PipelineResult::from_state(&state, started.elapsed()));
        }

        let state = self.state.complete(run_id).await?;
        self.emit(sink, &state.progress(None, "Pipeline completed"));
        self.publish_run_finished(&state);
        info!(
            run_id = %run_id,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Pipeline completed"
        );
        Ok(PipelineResult::from_state(&state, started.elapsed()))
    }

    /// Finish a run whose task panicked or returned an error.
    async fn abort(&self, run_id: &str, message: String) -> Result<PipelineResult, PipelineError> {
        error!(run_id = %run_id, error = %message, "Pipeline task aborted");
        let unfinished = self
            .state
            .get(run_id)
            .is_some_and(|state| !state.status.is_terminal());
        if unfinished {
            match self.state.fail(run_id, message.clone()).await {
                Ok(state) => self.publish_run_finished(&state),
                Err(e) => warn!(run_id = %run_id, error = %e, "Failed to finish aborted run"),
            }
        }
        Err(PipelineError::Aborted {
            run_id: run_id.to_string(),
            message,
        })
    }

    // ── Notifications ──────────────────────────────────────────────────────

    fn emit(&self, sink: &dyn ProgressSink, update: &ProgressUpdate) {
        sink.notify(update);
        if let Some(events) = &self.events {
            events.notify(update);
        }
    }

    fn publish_stage(&self, run_id: &str, stage: StageType, success: bool, duration_ms: u64) {
        if let Some(events) = &self.events {
            events.publish(PipelineEvent::StageFinished {
                run_id: run_id.to_string(),
                stage,
                success,
                duration_ms,
                timestamp: Utc::now(),
            });
        }
    }

    fn publish_run_finished(&self, state: &PipelineState) {
        if let Some(events) = &self.events {
            events.publish(PipelineEvent::RunFinished {
                run_id: state.id.clone(),
                paper_id: state.paper_id.clone(),
                success: state.status == PipelineStatus::Completed,
                error_message: state.error_message.clone(),
                timestamp: Utc::now(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryPaperStore;
    use async_trait::async_trait;
    use paperflow_core::{
        Agent, AgentError, AgentResult, AgentTask, AgentType, NoopProgressSink, PaperStatus,
    };
    use std::sync::Mutex;
    use tokio::sync::Notify;

    /// Counts calls; fails when told to.
    struct CountingAgent {
        agent_type: AgentType,
        fail_with: Option<String>,
        calls: Mutex<usize>,
    }

    impl CountingAgent {
        fn ok(agent_type: AgentType) -> Arc<Self> {
            Arc::new(Self {
                agent_type,
                fail_with: None,
                calls: Mutex::new(0),
            })
        }

        fn failing(agent_type: AgentType, message: &str) -> Arc<Self> {
            Arc::new(Self {
                agent_type,
                fail_with: Some(message.to_string()),
                calls: Mutex::new(0),
            })
        }

        fn calls(&self) -> usize {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl Agent for CountingAgent {
        fn agent_type(&self) -> AgentType {
            self.agent_type
        }

        fn name(&self) -> &str {
            "counting"
        }

        async fn process(&self, task: AgentTask) -> Result<AgentResult, AgentError> {
            *self.calls.lock().unwrap() += 1;
            match &self.fail_with {
                Some(message) => Err(AgentError::Rejected {
                    agent_type: self.agent_type,
                    message: message.clone(),
                }),
                None => Ok(AgentResult::success(
                    &task,
                    "counting",
                    serde_json::json!({ "text": format!("{} done", self.agent_type) }),
                )),
            }
        }
    }

    /// Blocks inside `process` until released.
    struct GateAgent {
        entered: Notify,
        release: Notify,
    }

    #[async_trait]
    impl Agent for GateAgent {
        fn agent_type(&self) -> AgentType {
            AgentType::PaperProcessor
        }

        fn name(&self) -> &str {
            "gate"
        }

        async fn process(&self, task: AgentTask) -> Result<AgentResult, AgentError> {
            self.entered.notify_one();
            self.release.notified().await;
            Ok(AgentResult::success(&task, "gate", serde_json::json!({})))
        }
    }

    struct PanickingAgent;

    #[async_trait]
    impl Agent for PanickingAgent {
        fn agent_type(&self) -> AgentType {
            AgentType::PaperProcessor
        }

        fn name(&self) -> &str {
            "panicking"
        }

        async fn process(&self, _task: AgentTask) -> Result<AgentResult, AgentError> {
            panic!("agent bug");
        }
    }

    async fn store() -> Arc<InMemoryPaperStore> {
        let store = Arc::new(InMemoryPaperStore::new());
        store
            .save(PaperRecord::new("paper-1", "user-1", "A Paper", "Some content."))
            .await
            .unwrap();
        store
    }

    fn orchestrator(agents: Vec<Arc<dyn Agent>>, store: Arc<InMemoryPaperStore>) -> Arc<PipelineOrchestrator> {
        let mut registry = AgentRegistry::new();
        for agent in agents {
            registry.register(agent);
        }
        Arc::new(PipelineOrchestrator::new(registry, store, Duration::from_secs(3600)))
    }

    async fn run(orchestrator: &Arc<PipelineOrchestrator>) -> PipelineResult {
        orchestrator
            .process_paper(
                "paper-1",
                "user-1",
                PipelineConfiguration::minimal(),
                Arc::new(NoopProgressSink),
            )
            .await
            .unwrap()
            .wait()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn all_stages_run_in_order() {
        let extract = CountingAgent::ok(AgentType::PaperProcessor);
        let summarize = CountingAgent::ok(AgentType::ContentSummarizer);
        let concepts = CountingAgent::ok(AgentType::ConceptExplainer);
        let quality = CountingAgent::ok(AgentType::QualityChecker);
        let store = store().await;
        let orchestrator = orchestrator(
            vec![extract.clone() as Arc<dyn Agent>, summarize.clone(), concepts.clone(), quality.clone()],
            store.clone(),
        );

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let sink = Arc::new(move |u: &ProgressUpdate| {
            seen_clone.lock().unwrap().push((u.current_stage, u.percent_complete));
        });

        let result = orchestrator
            .process_paper("paper-1", "user-1", PipelineConfiguration::minimal(), sink)
            .await
            .unwrap()
            .wait()
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(result.status, PipelineStatus::Completed);
        assert_eq!(result.stage_results.len(), 4);
        for agent in [&extract, &summarize, &concepts, &quality] {
            assert_eq!(agent.calls(), 1);
        }

        let seen = seen.lock().unwrap();
        let percents: Vec<f32> = seen.iter().map(|(_, p)| *p).collect();
        assert_eq!(percents, vec![0.0, 25.0, 50.0, 75.0, 100.0]);
        assert_eq!(seen[0].0, Some(StageType::TextExtraction));
        assert_eq!(seen[3].0, Some(StageType::QualityCheck));
        assert_eq!(seen[4].0, None);

        let paper = store.find_by_id("paper-1").await.unwrap().unwrap();
        assert_eq!(paper.status, PaperStatus::Completed);
    }

    #[tokio::test]
    async fn failing_stage_aborts_the_rest() {
        let extract = CountingAgent::ok(AgentType::PaperProcessor);
        let summarize = CountingAgent::failing(AgentType::ContentSummarizer, "model refused");
        let concepts = CountingAgent::ok(AgentType::ConceptExplainer);
        let quality = CountingAgent::ok(AgentType::QualityChecker);
        let store = store().await;
        let orchestrator = orchestrator(
            vec![extract.clone() as Arc<dyn Agent>, summarize.clone(), concepts.clone(), quality.clone()],
            store.clone(),
        );

        let result = run(&orchestrator).await;

        assert!(!result.success);
        assert_eq!(result.status, PipelineStatus::Failed);
        let message = result.error_message.unwrap();
        assert!(message.contains("content-summarization"));
        assert!(message.contains("model refused"));
        assert_eq!(extract.calls(), 1);
        assert_eq!(summarize.calls(), 1);
        assert_eq!(concepts.calls(), 0);
        assert_eq!(quality.calls(), 0);

        let state = orchestrator.state().get(&result.run_id).unwrap();
        assert_eq!(
            state.stage_statuses[&StageType::ContentSummarization],
            crate::state::StageStatus::Failed
        );
        assert_eq!(
            state.stage_statuses[&StageType::QualityCheck],
            crate::state::StageStatus::Pending
        );

        let paper = store.find_by_id("paper-1").await.unwrap().unwrap();
        assert_eq!(paper.status, PaperStatus::Failed);
    }

    #[tokio::test]
    async fn unregistered_agent_fails_its_stage() {
        let extract = CountingAgent::ok(AgentType::PaperProcessor);
        let orchestrator = orchestrator(vec![extract.clone() as Arc<dyn Agent>], store().await);

        let result = run(&orchestrator).await;
        assert!(!result.success);
        assert!(result.error_message.unwrap().contains("No agent registered"));
        assert_eq!(extract.calls(), 1);
    }

    #[tokio::test]
    async fn unknown_paper_is_an_error() {
        let orchestrator = orchestrator(vec![], store().await);
        let err = orchestrator
            .process_paper(
                "missing",
                "user-1",
                PipelineConfiguration::minimal(),
                Arc::new(NoopProgressSink),
            )
            .await
            .err()
            .unwrap();
        assert!(matches!(err, PipelineError::Store(StoreError::NotFound(_))));
        assert!(orchestrator.state().is_empty());
    }

    #[tokio::test]
    async fn cancel_takes_effect_between_stages() {
        let gate = Arc::new(GateAgent {
            entered: Notify::new(),
            release: Notify::new(),
        });
        let summarize = CountingAgent::ok(AgentType::ContentSummarizer);
        let store = store().await;
        let orchestrator = orchestrator(vec![gate.clone() as Arc<dyn Agent>, summarize.clone()], store.clone());

        let handle = orchestrator
            .process_paper(
                "paper-1",
                "user-1",
                PipelineConfiguration::minimal(),
                Arc::new(NoopProgressSink),
            )
            .await
            .unwrap();

        gate.entered.notified().await;
        assert!(orchestrator.cancel(&handle.run_id));
        gate.release.notify_one();

        let result = handle.wait().await.unwrap();
        assert_eq!(result.status, PipelineStatus::Cancelled);
        assert!(!result.success);
        assert_eq!(result.stage_results.len(), 1);
        assert_eq!(summarize.calls(), 0);
    }

    #[tokio::test]
    async fn events_are_published() {
        let bus = Arc::new(EventBus::new(64));
        let mut rx = bus.subscribe();
        let agents: Vec<Arc<dyn Agent>> = vec![
            CountingAgent::ok(AgentType::PaperProcessor),
            CountingAgent::ok(AgentType::ContentSummarizer),
            CountingAgent::ok(AgentType::ConceptExplainer),
            CountingAgent::ok(AgentType::QualityChecker),
        ];
        let mut registry = AgentRegistry::new();
        for agent in agents {
            registry.register(agent);
        }
        let orchestrator = Arc::new(
            PipelineOrchestrator::new(registry, store().await, Duration::from_secs(60))
                .with_events(bus.clone()),
        );

        let result = run(&orchestrator).await;
        assert!(result.success);

        let mut stages_finished = 0;
        let mut run_finished = false;
        while let Ok(event) = rx.try_recv() {
            match event.as_ref() {
                PipelineEvent::StageFinished { success, .. } => {
                    assert!(*success);
                    stages_finished += 1;
                }
                PipelineEvent::RunFinished { success, .. } => {
                    assert!(*success);
                    run_finished = true;
                }
                PipelineEvent::Progress(_) => {}
            }
        }
        assert_eq!(stages_finished, 4);
        assert!(run_finished);
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_agent_fails_and_expires_the_run() {
        let store = store().await;
        let orchestrator = orchestrator(vec![Arc::new(PanickingAgent) as Arc<dyn Agent>], store.clone());

        let handle = orchestrator
            .process_paper(
                "paper-1",
                "user-1",
                PipelineConfiguration::minimal(),
                Arc::new(NoopProgressSink),
            )
            .await
            .unwrap();
        let run_id = handle.run_id.clone();

        let err = handle.wait().await.unwrap_err();
        assert!(matches!(err, PipelineError::Aborted { .. }));

        let state = orchestrator.state().get(&run_id).unwrap();
        assert_eq!(state.status, PipelineStatus::Failed);
        assert!(state.end_time.is_some());
        let paper = store.find_by_id("paper-1").await.unwrap().unwrap();
        assert_eq!(paper.status, PaperStatus::Failed);

        tokio::time::sleep(Duration::from_secs(3601)).await;
        assert!(orchestrator.state().get(&run_id).is_none());
    }

    #[tokio::test]
    async fn agent_statuses_cover_registry() {
        let orchestrator = orchestrator(
            vec![
                CountingAgent::ok(AgentType::QualityChecker) as Arc<dyn Agent>,
                CountingAgent::ok(AgentType::PaperProcessor),
            ],
            store().await,
        );
        let statuses = orchestrator.agent_statuses();
        assert_eq!(statuses.len(), 2);
        assert_eq!(statuses[0].agent_type, AgentType::PaperProcessor);
    }
}
