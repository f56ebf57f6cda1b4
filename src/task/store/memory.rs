//! In-memory task store (non-persistent).

use super::{
    new_record_id, PatchOutcome, RecordDraft, RecordPatch, ServerClock, StoreError, TaskQuery,
    TaskRecord, TaskStore,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Clone)]
pub struct InMemoryTaskStore {
    tasks: Arc<RwLock<HashMap<String, TaskRecord>>>,
    clock: Arc<ServerClock>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self {
            tasks: Arc::new(RwLock::new(HashMap::new())),
            clock: Arc::new(ServerClock::new()),
        }
    }
}

impl Default for InMemoryTaskStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    fn is_persistent(&self) -> bool {
        false
    }

    async fn insert(&self, draft: RecordDraft) -> Result<String, StoreError> {
        let id = new_record_id();
        let mut tasks = self.tasks.write().await;
        let record = draft.into_record(id.clone(), self.clock.now());
        tasks.insert(id.clone(), record);
        Ok(id)
    }

    async fn fetch(&self, id: &str) -> Result<Option<TaskRecord>, StoreError> {
        Ok(self.tasks.read().await.get(id).cloned())
    }

    async fn patch(&self, id: &str, patch: RecordPatch) -> Result<PatchOutcome, StoreError> {
        let mut tasks = self.tasks.write().await;
        let Some(record) = tasks.get_mut(id) else {
            return Ok(PatchOutcome::NotFound);
        };
        if patch.apply(record, self.clock.now()) {
            Ok(PatchOutcome::Applied)
        } else {
            Ok(PatchOutcome::PreconditionFailed)
        }
    }

    async fn remove(&self, id: &str) -> Result<bool, StoreError> {
        Ok(self.tasks.write().await.remove(id).is_some())
    }

    async fn query(&self, query: &TaskQuery) -> Result<Vec<TaskRecord>, StoreError> {
        Ok(query.run(self.tasks.read().await.values()))
    }
}
