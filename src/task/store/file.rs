//! JSON snapshot task store.
//!
//! The whole collection is rewritten on every mutation: serialised to a temp
//! file, then renamed over the snapshot while holding an advisory lock on a
//! sibling `.lock` file. A failed write leaves the in-memory view unchanged.

use super::{
    new_record_id, PatchOutcome, RecordDraft, RecordPatch, ServerClock, StoreError,
    StoreTimestamp, TaskQuery, TaskRecord, TaskStore,
};
use async_trait::async_trait;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs;
use tokio::sync::{Mutex, RwLock};

const SNAPSHOT_FILE: &str = "tasks.json";

#[derive(Debug, Serialize, Deserialize, Default)]
struct TaskStoreSnapshot {
    tasks: HashMap<String, TaskRecord>,
}

#[derive(Clone)]
pub struct FileTaskStore {
    path: PathBuf,
    tasks: Arc<RwLock<HashMap<String, TaskRecord>>>,
    persist_lock: Arc<Mutex<()>>,
    clock: Arc<ServerClock>,
}

impl FileTaskStore {
    pub async fn new(base_dir: PathBuf) -> Result<Self, StoreError> {
        fs::create_dir_all(&base_dir).await?;
        let path = base_dir.join(SNAPSHOT_FILE);
        let snapshot = match fs::read(&path).await {
            Ok(bytes) => match serde_json::from_slice::<TaskStoreSnapshot>(&bytes) {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    tracing::error!("Failed to parse task store {}: {}", path.display(), e);
                    return Err(e.into());
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => TaskStoreSnapshot::default(),
            Err(err) => return Err(err.into()),
        };
        tracing::debug!(
            path = %path.display(),
            tasks = snapshot.tasks.len(),
            "Loaded task snapshot"
        );

        Ok(Self {
            path,
            tasks: Arc::new(RwLock::new(snapshot.tasks)),
            persist_lock: Arc::new(Mutex::new(())),
            clock: Arc::new(ServerClock::new()),
        })
    }

    async fn persist(&self, tasks: &HashMap<String, TaskRecord>) -> Result<(), StoreError> {
        let data = serde_json::to_vec_pretty(&TaskStoreSnapshot {
            tasks: tasks.clone(),
        })?;
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || -> Result<(), StoreError> {
            let lock_file = std::fs::OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(false)
                .open(path.with_extension("lock"))?;
            lock_file.lock_exclusive()?;
            let tmp_path = path.with_extension("json.tmp");
            let result = std::fs::write(&tmp_path, data).and_then(|_| std::fs::rename(&tmp_path, &path));
            let _ = lock_file.unlock();
            result.map_err(StoreError::from)
        })
        .await??;
        Ok(())
    }

    /// Run `mutate` against a copy of the collection and commit it only if the
    /// snapshot write succeeds. `mutate` returns the outcome plus whether anything changed.
    ///
    /// The write stamp is taken under `persist_lock`, so commit order and stamp order agree.
    async fn commit<R>(
        &self,
        mutate: impl FnOnce(&mut HashMap<String, TaskRecord>, StoreTimestamp) -> (R, bool),
    ) -> Result<R, StoreError> {
        let _guard = self.persist_lock.lock().await;
        let now = self.clock.now();
        let mut next = self.tasks.read().await.clone();
        let (outcome, changed) = mutate(&mut next, now);
        if changed {
            self.persist(&next).await?;
            *self.tasks.write().await = next;
        }
        Ok(outcome)
    }
}

#[async_trait]
impl TaskStore for FileTaskStore {
    fn is_persistent(&self) -> bool {
        true
    }

    async fn insert(&self, draft: RecordDraft) -> Result<String, StoreError> {
        let id = new_record_id();
        self.commit(|tasks, now| {
            tasks.insert(id.clone(), draft.into_record(id.clone(), now));
            ((), true)
        })
        .await?;
        Ok(id)
    }

    async fn fetch(&self, id: &str) -> Result<Option<TaskRecord>, StoreError> {
        Ok(self.tasks.read().await.get(id).cloned())
    }

    async fn patch(&self, id: &str, patch: RecordPatch) -> Result<PatchOutcome, StoreError> {
        self.commit(|tasks, now| match tasks.get_mut(id) {
            None => (PatchOutcome::NotFound, false),
            Some(record) => {
                if patch.apply(record, now) {
                    (PatchOutcome::Applied, true)
                } else {
                    (PatchOutcome::PreconditionFailed, false)
                }
            }
        })
        .await
    }

    async fn remove(&self, id: &str) -> Result<bool, StoreError> {
        self.commit(|tasks, _| {
            let removed = tasks.remove(id).is_some();
            (removed, removed)
        })
        .await
    }

    async fn query(&self, query: &TaskQuery) -> Result<Vec<TaskRecord>, StoreError> {
        Ok(query.run(self.tasks.read().await.values()))
    }
}
