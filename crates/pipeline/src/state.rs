//! Run state: the active-run map, per-stage bookkeeping and retention.

use crate::plan::{ExecutionPlan, PipelineConfiguration};
use chrono::{DateTime, Utc};
use paperflow_core::{AgentResult, PaperStatus, PaperStore, PipelineError, ProgressUpdate, StageType};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StageStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PipelineStatus {
    Initializing,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl PipelineStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PipelineStatus::Completed | PipelineStatus::Failed | PipelineStatus::Cancelled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PipelineStatus::Initializing => "INITIALIZING",
            PipelineStatus::Running => "RUNNING",
            PipelineStatus::Completed => "COMPLETED",
            PipelineStatus::Failed => "FAILED",
            PipelineStatus::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What one stage produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageResult {
    pub success: bool,
    pub produced_by: String,
    pub data: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub duration_ms: u64,
}

impl StageResult {
    pub fn failed(message: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            success: false,
            produced_by: String::new(),
            data: serde_json::Value::Null,
            error_message: Some(message.into()),
            duration_ms,
        }
    }
}

impl From<AgentResult> for StageResult {
    fn from(result: AgentResult) -> Self {
        Self {
            success: result.success,
            produced_by: result.produced_by,
            data: result.result_data,
            error_message: result.error_message,
            duration_ms: result.processing_time_ms,
        }
    }
}

/// One pipeline run. Stage keys are exactly the stages of its plan.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineState {
    pub id: String,
    pub paper_id: String,
    pub user_id: String,
    pub configuration: PipelineConfiguration,
    pub plan: ExecutionPlan,
    pub status: PipelineStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub stage_statuses: BTreeMap<StageType, StageStatus>,
    pub stage_results: BTreeMap<StageType, StageResult>,
    pub error_message: Option<String>,
    pub cancel_requested: bool,
}

impl PipelineState {
    fn new(
        id: String,
        paper_id: &str,
        user_id: &str,
        configuration: PipelineConfiguration,
        plan: ExecutionPlan,
    ) -> Self {
        let stage_statuses = plan.stage_types().map(|s| (s, StageStatus::Pending)).collect();
        Self {
            id,
            paper_id: paper_id.to_string(),
            user_id: user_id.to_string(),
            configuration,
            plan,
            status: PipelineStatus::Initializing,
            start_time: Utc::now(),
            end_time: None,
            stage_statuses,
            stage_results: BTreeMap::new(),
            error_message: None,
            cancel_requested: false,
        }
    }

    pub fn stages_completed(&self) -> usize {
        self.stage_statuses
            .values()
            .filter(|s| **s == StageStatus::Completed)
            .count()
    }

    /// Progress with `percent_complete` = completed / total.
    pub fn progress(&self, current_stage: Option<StageType>, message: impl Into<String>) -> ProgressUpdate {
        let total = self.plan.len();
        let completed = self.stages_completed();
        let percent = if total == 0 {
            100.0
        } else {
            completed as f32 / total as f32 * 100.0
        };
        ProgressUpdate {
            run_id: self.id.clone(),
            paper_id: self.paper_id.clone(),
            current_stage,
            percent_complete: percent,
            message: message.into(),
            stages_completed: completed,
            total_stages: total,
            timestamp: Utc::now(),
        }
    }
}

type ActiveRuns = Arc<RwLock<HashMap<String, PipelineState>>>;

/// Tracks active runs and stamps coarse status onto the paper record.
///
/// Finished runs stay visible for the retention period, then a background
/// task removes them. The task holds only a weak reference to the map.
pub struct StateManager {
    active: ActiveRuns,
    store: Arc<dyn PaperStore>,
    retention: Duration,
}

impl StateManager {
    pub fn new(store: Arc<dyn PaperStore>, retention: Duration) -> Self {
        Self {
            active: Arc::new(RwLock::new(HashMap::new())),
            store,
            retention,
        }
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    // ── Lifecycle ──────────────────────────────────────────────────────────

    /// Register a new run and stamp PIPELINE_INITIATED on the paper.
    pub async fn initialize(
        &self,
        paper_id: &str,
        user_id: &str,
        configuration: PipelineConfiguration,
        plan: ExecutionPlan,
    ) -> Result<String, PipelineError> {
        let run_id = uuid::Uuid::new_v4().to_string();
        let state = PipelineState::new(run_id.clone(), paper_id, user_id, configuration, plan);
        self.write().insert(run_id.clone(), state);

        if let Err(e) = self
            .store
            .update_status(paper_id, PaperStatus::PipelineInitiated, None)
            .await
        {
            self.write().remove(&run_id);
            return Err(e.into());
        }

        info!(run_id = %run_id, paper_id = %paper_id, "Pipeline initialized");
        Ok(run_id)
    }

    pub fn mark_running(&self, run_id: &str) -> Result<(), PipelineError> {
        self.update(run_id, |state| {
            state.status = PipelineStatus::Running;
            Ok(())
        })
    }

    pub fn start_stage(&self, run_id: &str, stage: StageType) -> Result<(), PipelineError> {
        self.set_stage(run_id, stage, StageStatus::Running, None)
    }

    pub fn complete_stage(&self, run_id: &str, stage: StageType, result: StageResult) -> Result<(), PipelineError> {
        self.set_stage(run_id, stage, StageStatus::Completed, Some(result))
    }

    pub fn fail_stage(&self, run_id: &str, stage: StageType, result: StageResult) -> Result<(), PipelineError> {
        self.set_stage(run_id, stage, StageStatus::Failed, Some(result))
    }

    /// Finish the run successfully and stamp COMPLETED on the paper.
    pub async fn complete(&self, run_id: &str) -> Result<PipelineState, PipelineError> {
        self.finish(run_id, PipelineStatus::Completed, None, PaperStatus::Completed)
            .await
    }

    /// Finish the run as failed and stamp FAILED on the paper.
    pub async fn fail(&self, run_id: &str, message: impl Into<String>) -> Result<PipelineState, PipelineError> {
        self.finish(run_id, PipelineStatus::Failed, Some(message.into()), PaperStatus::Failed)
            .await
    }

    /// Finish a run whose cancellation was honoured.
    pub async fn cancel(&self, run_id: &str) -> Result<PipelineState, PipelineError> {
        self.finish(
            run_id,
            PipelineStatus::Cancelled,
            Some("Pipeline cancelled".into()),
            PaperStatus::Failed,
        )
        .await
    }

    async fn finish(
        &self,
        run_id: &str,
        status: PipelineStatus,
        message: Option<String>,
        paper_status: PaperStatus,
    ) -> Result<PipelineState, PipelineError> {
        let snapshot = {
            let mut runs = self.write();
            let state = runs
                .get_mut(run_id)
                .ok_or_else(|| PipelineError::UnknownRun(run_id.to_string()))?;
            state.status = status;
            state.end_time = Some(Utc::now());
            state.error_message = message.clone();
            state.clone()
        };

        if let Err(e) = self
            .store
            .update_status(&snapshot.paper_id, paper_status, message)
            .await
        {
            warn!(run_id = %run_id, paper_id = %snapshot.paper_id, error = %e, "Failed to persist paper status");
        }

        self.schedule_cleanup(run_id.to_string());
        info!(run_id = %run_id, status = %status, "Pipeline finished");
        Ok(snapshot)
    }

    // ── Cancellation ───────────────────────────────────────────────────────

    /// Flag a run for cancellation. False for unknown or finished runs.
    pub fn request_cancel(&self, run_id: &str) -> bool {
        let mut runs = self.write();
        match runs.get_mut(run_id) {
            Some(state) if !state.status.is_terminal() => {
                state.cancel_requested = true;
                true
            }
            _ => false,
        }
    }

    pub fn is_cancel_requested(&self, run_id: &str) -> bool {
        self.read().get(run_id).is_some_and(|s| s.cancel_requested)
    }

    // ── Queries ────────────────────────────────────────────────────────────

    pub fn get(&self, run_id: &str) -> Option<PipelineState> {
        self.read().get(run_id).cloned()
    }

    pub fn progress(&self, run_id: &str, current_stage: Option<StageType>, message: impl Into<String>) -> Option<ProgressUpdate> {
        self.read().get(run_id).map(|s| s.progress(current_stage, message))
    }

    pub fn active_runs(&self) -> Vec<PipelineState> {
        let mut runs: Vec<_> = self.read().values().cloned().collect();
        runs.sort_by(|a, b| a.start_time.cmp(&b.start_time));
        runs
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Drop a run immediately instead of waiting for retention.
    pub fn remove(&self, run_id: &str) -> Option<PipelineState> {
        self.write().remove(run_id)
    }

    // ── Internals ──────────────────────────────────────────────────────────

    fn schedule_cleanup(&self, run_id: String) {
        let runs = Arc::downgrade(&self.active);
        let retention = self.retention;
        tokio::spawn(async move {
            tokio::time::sleep(retention).await;
            if let Some(runs) = runs.upgrade() {
                let removed = runs
                    .write()
                    .unwrap_or_else(|e| e.into_inner())
                    .remove(&run_id)
                    .is_some();
                if removed {
                    debug!(run_id = %run_id, "Removed expired pipeline state");
                }
            }
        });
    }

    fn set_stage(
        &self,
        run_id: &str,
        stage: StageType,
        status: StageStatus,
        result: Option<StageResult>,
    ) -> Result<(), PipelineError> {
        self.update(run_id, |state| {
            let slot = state
                .stage_statuses
                .get_mut(&stage)
                .ok_or_else(|| PipelineError::StageNotInPlan {
                    run_id: run_id.to_string(),
                    stage,
                })?;
            *slot = status;
            if let Some(result) = result {
                state.stage_results.insert(stage, result);
            }
            Ok(())
        })
    }

    fn update<T>(
        &self,
        run_id: &str,
        f: impl FnOnce(&mut PipelineState) -> Result<T, PipelineError>,
    ) -> Result<T, PipelineError> {
        let mut runs = self.write();
        let state = runs
            .get_mut(run_id)
            .ok_or_else(|| PipelineError::UnknownRun(run_id.to_string()))?;
        f(state)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, PipelineState>> {
        self.active.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, PipelineState>> {
        self.active.write().unwrap_or_else(|e| e.into_inner())
    }
}
