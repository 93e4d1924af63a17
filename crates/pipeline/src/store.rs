//! In-memory paper store, for the CLI and tests.

use async_trait::async_trait;
use paperflow_core::{PaperRecord, PaperStore, StoreError};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Keeps paper records in a map keyed by paper id.
pub struct InMemoryPaperStore {
    papers: Arc<RwLock<HashMap<String, PaperRecord>>>,
}

impl InMemoryPaperStore {
    pub fn new() -> Self {
        Self {
            papers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn len(&self) -> usize {
        self.papers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.papers.read().await.is_empty()
    }
}

impl Default for InMemoryPaperStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PaperStore for InMemoryPaperStore {
    async fn find_by_id(&self, id: &str) -> Result<Option<PaperRecord>, StoreError> {
        Ok(self.papers.read().await.get(id).cloned())
    }

    async fn save(&self, paper: PaperRecord) -> Result<(), StoreError> {
        if paper.id.is_empty() {
            return Err(StoreError::Storage("paper id must not be empty".into()));
        }
        self.papers.write().await.insert(paper.id.clone(), paper);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use paperflow_core::PaperStatus;

    #[tokio::test]
    async fn save_and_find() {
        let store = InMemoryPaperStore::new();
        store
            .save(PaperRecord::new("p1", "u1", "Title", "Body"))
            .await
            .unwrap();
        assert_eq!(store.len().await, 1);

        let found = store.find_by_id("p1").await.unwrap().unwrap();
        assert_eq!(found.title, "Title");
        assert!(store.find_by_id("p2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn update_status_through_trait_default() {
        let store = InMemoryPaperStore::new();
        store
            .save(PaperRecord::new("p1", "u1", "Title", "Body"))
            .await
            .unwrap();

        store
            .update_status("p1", PaperStatus::Completed, None)
            .await
            .unwrap();
        assert_eq!(
            store.find_by_id("p1").await.unwrap().unwrap().status,
            PaperStatus::Completed
        );

        let err = store
            .update_status("missing", PaperStatus::Failed, None)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn empty_id_is_rejected() {
        let store = InMemoryPaperStore::new();
        let err = store.save(PaperRecord::new("", "u1", "T", "B")).await.unwrap_err();
        assert!(matches!(err, StoreError::Storage(_)));
        assert!(store.is_empty().await);
    }
}
