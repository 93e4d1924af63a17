//! Paper records and the paper-status store contract.
//!
//! The pipeline only stamps coarse status strings onto a paper; reading the
//! paper's content is left to the task builder.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::StoreError;

/// Coarse processing status persisted on a paper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaperStatus {
    Uploaded,
    PipelineInitiated,
    Completed,
    Failed,
}

impl PaperStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PaperStatus::Uploaded => "UPLOADED",
            PaperStatus::PipelineInitiated => "PIPELINE_INITIATED",
            PaperStatus::Completed => "COMPLETED",
            PaperStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for PaperStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A paper as seen by the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaperRecord {
    pub id: String,
    pub user_id: String,
    pub title: String,

    /// Raw text content as uploaded
    #[serde(default)]
    pub content: String,

    /// Optional bibliographic fields (authors, year, venue, doi, ...)
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,

    pub status: PaperStatus,

    /// Human-readable detail for the last status change
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_message: Option<String>,

    pub updated_at: DateTime<Utc>,
}

impl PaperRecord {
    pub fn new(id: impl Into<String>, user_id: impl Into<String>, title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            user_id: user_id.into(),
            title: title.into(),
            content: content.into(),
            metadata: serde_json::Map::new(),
            status: PaperStatus::Uploaded,
            status_message: None,
            updated_at: Utc::now(),
        }
    }

    /// Stamp a new status onto the record.
    pub fn mark(&mut self, status: PaperStatus, message: Option<String>) {
        self.status = status;
        self.status_message = message;
        self.updated_at = Utc::now();
    }
}

/// Persistence collaborator for paper records.
#[async_trait]
pub trait PaperStore: Send + Sync {
    async fn find_by_id(&self, id: &str) -> std::result::Result<Option<PaperRecord>, StoreError>;

    async fn save(&self, paper: PaperRecord) -> std::result::Result<(), StoreError>;

    /// Load a paper, stamp `status` on it and save it back.
    async fn update_status(
        &self,
        id: &str,
        status: PaperStatus,
        message: Option<String>,
    ) -> std::result::Result<(), StoreError> {
        let mut paper = self
            .find_by_id(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        paper.mark(status, message);
        self.save(paper).await
    }
}
