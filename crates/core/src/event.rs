//! Progress notifications and the pipeline event bus.
//!
//! The pipeline reports progress through a [`ProgressSink`]; it does not care
//! whether updates end up on a websocket, in a log, or in a metrics system.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::stage::StageType;

/// One progress notification for a pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub run_id: String,
    pub paper_id: String,

    /// The stage about to run (or that just finished); `None` once the run ends
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_stage: Option<StageType>,

    /// 0.0 ..= 100.0
    pub percent_complete: f32,
    pub message: String,
    pub stages_completed: usize,
    pub total_stages: usize,
    pub timestamp: DateTime<Utc>,
}

/// Anything that can receive progress updates.
pub trait ProgressSink: Send + Sync {
    fn notify(&self, update: &ProgressUpdate);
}

/// A sink that drops every update.
pub struct NoopProgressSink;

impl ProgressSink for NoopProgressSink {
    fn notify(&self, _update: &ProgressUpdate) {}
}

impl<F> ProgressSink for F
where
    F: Fn(&ProgressUpdate) + Send + Sync,
{
    fn notify(&self, update: &ProgressUpdate) {
        self(update)
    }
}

/// Events published while pipelines run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PipelineEvent {
    /// A progress update for a run
    Progress(ProgressUpdate),

    /// A stage finished (successfully or not)
    StageFinished {
        run_id: String,
        stage: StageType,
        success: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// A run reached a terminal state
    RunFinished {
        run_id: String,
        paper_id: String,
        success: bool,
        error_message: Option<String>,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus for pipeline events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
pub struct EventBus {
    sender: broadcast::Sender<Arc<PipelineEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: PipelineEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<PipelineEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl ProgressSink for EventBus {
    fn notify(&self, update: &ProgressUpdate) {
        self.publish(PipelineEvent::Progress(update.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn update(percent: f32) -> ProgressUpdate {
        ProgressUpdate {
            run_id: "run-1".into(),
            paper_id: "paper-1".into(),
            current_stage: Some(StageType::TextExtraction),
            percent_complete: percent,
            message: "Extracting text".into(),
            stages_completed: 0,
            total_stages: 4,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn event_bus_forwards_progress() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.notify(&update(25.0));

        let event = rx.recv().await.unwrap();
        match event.as_ref() {
            PipelineEvent::Progress(p) => {
                assert_eq!(p.run_id, "run-1");
                assert!((p.percent_complete - 25.0).abs() < f32::EPSILON);
            }
            _ => panic!("Expected Progress event"),
        }
    }

    #[test]
    fn event_bus_no_subscribers_doesnt_panic() {
        let bus = EventBus::new(16);
        bus.notify(&update(0.0));
    }

    #[test]
    fn closures_are_sinks() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let sink = move |u: &ProgressUpdate| seen_clone.lock().unwrap().push(u.percent_complete);
        sink.notify(&update(50.0));
        assert_eq!(*seen.lock().unwrap(), vec![50.0]);
    }
}
