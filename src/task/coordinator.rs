//! Task coordinator: CRUD plus advisory claiming over a [`TaskStore`].
//!
//! The coordinator is an explicit service value. It is constructed once at
//! startup and shared through the HTTP state; there is no global instance.
//!
//! `claim` is a single unconditional document write (last write wins). Callers
//! that need exclusivity either re-read `claimed_by` after claiming and back
//! off on mismatch, or use [`TaskCoordinator::try_claim`], which relies on the
//! store's conditional write.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;

use super::store::{
    FieldWrite, Filter, PatchOutcome, Precondition, RecordDraft, RecordPatch, SortDirection,
    SortKey, StoreError, StoreTimestamp, TaskQuery, TaskStore, TimestampWrite,
};
use super::types::{Task, TaskDraft, TaskPatch, TaskPriority, TaskStatus};

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("task {0} not found")]
    NotFound(String),

    #[error("persistence failed: {0}")]
    Persistence(#[from] StoreError),
}

/// Result of [`TaskCoordinator::try_claim`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    Claimed,
    /// Someone else holds the claim; `holder` is `None` if the task was
    /// unclaimed again before it could be re-read.
    AlreadyClaimed { holder: Option<String> },
}

#[derive(Clone)]
pub struct TaskCoordinator {
    store: Arc<dyn TaskStore>,
}

impl TaskCoordinator {
    pub fn new(store: Arc<dyn TaskStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.store
    }

    /// All tasks, newest first.
    pub async fn list_all(&self) -> Result<Vec<Task>, CoordinatorError> {
        let query = TaskQuery::new().order_by(SortKey::CreatedAt, SortDirection::Descending);
        self.run(query).await
    }

    /// Tasks in `status`, most urgent first, then newest first.
    pub async fn list_by_status(&self, status: TaskStatus) -> Result<Vec<Task>, CoordinatorError> {
        let query = TaskQuery::new()
            .filter(Filter::StatusIs(status))
            .order_by(SortKey::Priority, SortDirection::Descending)
            .order_by(SortKey::CreatedAt, SortDirection::Descending);
        self.run(query).await
    }

    /// Tasks `actor` is actively working on, most recently claimed first.
    pub async fn list_claimed_by(&self, actor: &str) -> Result<Vec<Task>, CoordinatorError> {
        let query = TaskQuery::new()
            .filter(Filter::ClaimedBy(actor.to_string()))
            .filter(Filter::StatusIn(
                TaskStatus::ALL
                    .into_iter()
                    .filter(|status| status.is_claimed_work())
                    .collect(),
            ))
            .order_by(SortKey::ClaimedAt, SortDirection::Descending);
        self.run(query).await
    }

    /// Absence is `Ok(None)`, not an error.
    pub async fn get(&self, id: &str) -> Result<Option<Task>, CoordinatorError> {
        Ok(self.store.fetch(id).await?.map(|r| r.into_task()))
    }

    pub async fn create(&self, draft: TaskDraft) -> Result<String, CoordinatorError> {
        if draft.title.trim().is_empty() {
            return Err(CoordinatorError::Validation(
                "title must not be empty".to_string(),
            ));
        }

        let record = RecordDraft {
            title: draft.title,
            description: draft.description,
            priority: draft.priority,
            status: draft.status,
            assignee: draft.assignee,
            assigned_to: draft.assigned_to,
            due_date: draft
                .due_date
                .map(|dt| store_timestamp("dueDate", dt))
                .transpose()?,
            completed_at: if draft.status == TaskStatus::Completed {
                TimestampWrite::ServerNowIfUnset
            } else {
                TimestampWrite::Keep
            },
            released_at: if draft.status == TaskStatus::Released {
                TimestampWrite::ServerNowIfUnset
            } else {
                TimestampWrite::Keep
            },
            tags: draft.tags,
            dependencies: draft.dependencies,
            created_by: draft.created_by,
            metadata: draft.metadata,
        };

        let id = self.store.insert(record).await?;
        tracing::info!(task_id = %id, "Created task");
        Ok(id)
    }

    /// Merge the allow-listed fields of `patch` into the stored task.
    pub async fn update(&self, id: &str, patch: TaskPatch) -> Result<(), CoordinatorError> {
        let record_patch = lower_patch(patch)?;
        match self.store.patch(id, record_patch).await? {
            PatchOutcome::Applied => {
                tracing::debug!(task_id = %id, "Updated task");
                Ok(())
            }
            PatchOutcome::NotFound => Err(CoordinatorError::NotFound(id.to_string())),
            // Only conditional writes carry preconditions and `update` issues none.
            PatchOutcome::PreconditionFailed => Ok(()),
        }
    }

    pub async fn update_status(&self, id: &str, status: TaskStatus) -> Result<(), CoordinatorError> {
        self.update(id, TaskPatch::status(status)).await
    }

    pub async fn update_priority(
        &self,
        id: &str,
        priority: TaskPriority,
    ) -> Result<(), CoordinatorError> {
        self.update(id, TaskPatch::priority(priority)).await
    }

    /// Hard delete. Deleting a missing id is not an error.
    pub async fn delete(&self, id: &str) -> Result<(), CoordinatorError> {
        let removed = self.store.remove(id).await?;
        tracing::info!(task_id = %id, removed, "Deleted task");
        Ok(())
    }

    /// Assign the task to `actor` unconditionally and move it to `in_progress`.
    pub async fn claim(&self, id: &str, actor: &str) -> Result<(), CoordinatorError> {
        let patch = claim_patch(actor)?;
        match self.store.patch(id, patch).await? {
            PatchOutcome::NotFound => Err(CoordinatorError::NotFound(id.to_string())),
            PatchOutcome::Applied | PatchOutcome::PreconditionFailed => {
                tracing::info!(task_id = %id, actor = %actor, "Claimed task");
                Ok(())
            }
        }
    }

    /// Claim only if nobody currently holds the task.
    pub async fn try_claim(&self, id: &str, actor: &str) -> Result<ClaimOutcome, CoordinatorError> {
        let mut patch = claim_patch(actor)?;
        patch.precondition = Some(Precondition::Unclaimed);
        match self.store.patch(id, patch).await? {
            PatchOutcome::Applied => {
                tracing::info!(task_id = %id, actor = %actor, "Claimed task exclusively");
                Ok(ClaimOutcome::Claimed)
            }
            PatchOutcome::NotFound => Err(CoordinatorError::NotFound(id.to_string())),
            PatchOutcome::PreconditionFailed => {
                let holder = self.store.fetch(id).await?.and_then(|r| r.claimed_by);
                tracing::info!(
                    task_id = %id,
                    actor = %actor,
                    holder = ?holder,
                    "Claim rejected, task already held"
                );
                Ok(ClaimOutcome::AlreadyClaimed { holder })
            }
        }
    }

    /// Release the claim and return the task to `pending`. No ownership check.
    pub async fn unclaim(&self, id: &str) -> Result<(), CoordinatorError> {
        let patch = RecordPatch {
            claimed_by: FieldWrite::Clear,
            claimed_at: TimestampWrite::Clear,
            status: Some(TaskStatus::Pending),
            ..Default::default()
        };
        match self.store.patch(id, patch).await? {
            PatchOutcome::NotFound => Err(CoordinatorError::NotFound(id.to_string())),
            PatchOutcome::Applied | PatchOutcome::PreconditionFailed => {
                tracing::info!(task_id = %id, "Unclaimed task");
                Ok(())
            }
        }
    }

    async fn run(&self, query: TaskQuery) -> Result<Vec<Task>, CoordinatorError> {
        let records = self.store.query(&query).await?;
        Ok(records.into_iter().map(|r| r.into_task()).collect())
    }
}

fn claim_patch(actor: &str) -> Result<RecordPatch, CoordinatorError> {
    if actor.trim().is_empty() {
        return Err(CoordinatorError::Validation(
            "actor id must not be empty".to_string(),
        ));
    }
    Ok(RecordPatch {
        claimed_by: FieldWrite::Set(actor.to_string()),
        claimed_at: TimestampWrite::ServerNow,
        status: Some(TaskStatus::InProgress),
        ..Default::default()
    })
}

fn store_timestamp(field: &str, dt: DateTime<Utc>) -> Result<StoreTimestamp, CoordinatorError> {
    StoreTimestamp::checked_from_datetime(dt).ok_or_else(|| {
        CoordinatorError::Validation(format!(
            "{} {} is outside the supported range (1677 to 2262)",
            field,
            dt.to_rfc3339()
        ))
    })
}

fn nullable_timestamp(
    field: &str,
    value: Option<Option<DateTime<Utc>>>,
) -> Result<TimestampWrite, CoordinatorError> {
    Ok(match value {
        None => TimestampWrite::Keep,
        Some(None) => TimestampWrite::Clear,
        Some(Some(dt)) => TimestampWrite::Set(store_timestamp(field, dt)?),
    })
}

fn nullable_field<T>(value: Option<Option<T>>) -> FieldWrite<T> {
    match value {
        None => FieldWrite::Keep,
        Some(None) => FieldWrite::Clear,
        Some(Some(v)) => FieldWrite::Set(v),
    }
}

/// Lower a caller patch to a store write set, applying the auto-stamp rules.
fn lower_patch(patch: TaskPatch) -> Result<RecordPatch, CoordinatorError> {
    if let Some(title) = &patch.title {
        if title.trim().is_empty() {
            return Err(CoordinatorError::Validation(
                "title must not be empty".to_string(),
            ));
        }
    }

    // The store fills completedAt/releasedAt (and ignores clears) while the
    // resulting status needs them.
    let completed_at = nullable_timestamp("completedAt", patch.completed_at)?;
    let released_at = nullable_timestamp("releasedAt", patch.released_at)?;

    let claimed_at = match patch.claimed_at {
        None => TimestampWrite::Keep,
        Some(None) => TimestampWrite::Clear,
        Some(Some(_)) => TimestampWrite::ServerNow,
    };

    Ok(RecordPatch {
        title: patch.title,
        description: patch.description,
        status: patch.status,
        priority: patch.priority,
        assignee: patch.assignee,
        assigned_to: nullable_field(patch.assigned_to),
        tags: patch.tags,
        due_date: nullable_timestamp("dueDate", patch.due_date)?,
        completed_at,
        released_at,
        claimed_by: nullable_field(patch.claimed_by),
        claimed_at,
        metadata: patch.metadata,
        precondition: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::store::InMemoryTaskStore;
    use serde_json::json;

    fn coordinator() -> TaskCoordinator {
        TaskCoordinator::new(Arc::new(InMemoryTaskStore::new()))
    }

    fn draft(title: &str, priority: TaskPriority, status: TaskStatus) -> TaskDraft {
        TaskDraft {
            title: title.to_string(),
            priority,
            status,
            created_by: "operator".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_list_all_empty_is_ok() {
        let tasks = coordinator().list_all().await.expect("list");
        assert!(tasks.is_empty());
    }

    #[tokio::test]
    async fn test_create_rejects_blank_title() {
        let err = coordinator()
            .create(draft("   ", TaskPriority::Low, TaskStatus::Pending))
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::Validation(_)));
    }

    #[tokio::test]
    async fn test_create_converts_due_date_and_defaults() {
        let coordinator = coordinator();
        let due = DateTime::<Utc>::from_timestamp(1_800_000_000, 0).unwrap();
        let mut new_task = draft("Plan week", TaskPriority::High, TaskStatus::Pending);
        new_task.due_date = Some(due);
        let id = coordinator.create(new_task).await.expect("create");

        let task = coordinator.get(&id).await.expect("get").expect("present");
        assert_eq!(task.due_date, Some(due));
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.created_at, task.updated_at);
        assert!(task.claimed_by.is_none());
        assert!(task.completed_at.is_none());
    }

    #[tokio::test]
    async fn test_get_missing_is_none() {
        assert!(coordinator().get("nope").await.expect("get").is_none());
    }

    #[tokio::test]
    async fn test_list_by_status_orders_priority_then_recency() {
        let coordinator = coordinator();
        let old_high = coordinator
            .create(draft("old high", TaskPriority::High, TaskStatus::Pending))
            .await
            .unwrap();
        let low = coordinator
            .create(draft("low", TaskPriority::Low, TaskStatus::Pending))
            .await
            .unwrap();
        let urgent = coordinator
            .create(draft("urgent", TaskPriority::Urgent, TaskStatus::Pending))
            .await
            .unwrap();
        let new_high = coordinator
            .create(draft("new high", TaskPriority::High, TaskStatus::Pending))
            .await
            .unwrap();
        coordinator
            .create(draft("in review", TaskPriority::Urgent, TaskStatus::Review))
            .await
            .unwrap();
        coordinator
            .create(draft("medium", TaskPriority::Medium, TaskStatus::Pending))
            .await
            .unwrap();

        let pending = coordinator
            .list_by_status(TaskStatus::Pending)
            .await
            .expect("list");
        assert_eq!(pending.len(), 5);
        assert!(pending.iter().all(|t| t.status == TaskStatus::Pending));
        for pair in pending.windows(2) {
            let a = (pair[0].priority, pair[0].created_at);
            let b = (pair[1].priority, pair[1].created_at);
            assert!(a >= b, "expected non-increasing order, got {:?} then {:?}", a, b);
        }
        assert_eq!(pending[0].id, urgent);
        assert_eq!(pending[1].id, new_high);
        assert_eq!(pending[2].id, old_high);
        assert_eq!(pending[4].id, low);
    }

    #[tokio::test]
    async fn test_claim_sets_holder_and_status() {
        let coordinator = coordinator();
        let id = coordinator
            .create(draft("Review macros", TaskPriority::Medium, TaskStatus::Pending))
            .await
            .unwrap();

        let before = Utc::now();
        coordinator.claim(&id, "agent-1").await.expect("claim");

        let task = coordinator.get(&id).await.unwrap().unwrap();
        assert_eq!(task.claimed_by.as_deref(), Some("agent-1"));
        assert_eq!(task.status, TaskStatus::InProgress);
        assert!(task.claimed_at.expect("claimed_at") >= before);
        assert!(task.updated_at > task.created_at);
    }

    #[tokio::test]
    async fn test_claim_is_last_write_wins() {
        let coordinator = coordinator();
        let id = coordinator
            .create(draft("Shared", TaskPriority::Medium, TaskStatus::Pending))
            .await
            .unwrap();

        coordinator.claim(&id, "agent-1").await.unwrap();
        coordinator.claim(&id, "agent-2").await.unwrap();

        let task = coordinator.get(&id).await.unwrap().unwrap();
        assert_eq!(task.claimed_by.as_deref(), Some("agent-2"));
    }

    #[tokio::test]
    async fn test_try_claim_rejects_second_claimant() {
        let coordinator = coordinator();
        let id = coordinator
            .create(draft("Exclusive", TaskPriority::Medium, TaskStatus::Pending))
            .await
            .unwrap();

        assert_eq!(
            coordinator.try_claim(&id, "agent-1").await.unwrap(),
            ClaimOutcome::Claimed
        );
        assert_eq!(
            coordinator.try_claim(&id, "agent-2").await.unwrap(),
            ClaimOutcome::AlreadyClaimed {
                holder: Some("agent-1".to_string())
            }
        );

        coordinator.unclaim(&id).await.unwrap();
        assert_eq!(
            coordinator.try_claim(&id, "agent-2").await.unwrap(),
            ClaimOutcome::Claimed
        );
    }

    #[tokio::test]
    async fn test_concurrent_try_claim_has_single_winner() {
        let coordinator = coordinator();
        let id = coordinator
            .create(draft("Race", TaskPriority::Urgent, TaskStatus::Pending))
            .await
            .unwrap();

        let mut handles = Vec::new();
        for n in 0..8 {
            let coordinator = coordinator.clone();
            let id = id.clone();
            handles.push(tokio::spawn(async move {
                coordinator.try_claim(&id, &format!("agent-{}", n)).await
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap().unwrap() == ClaimOutcome::Claimed {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_claim_rejects_blank_actor_and_missing_task() {
        let coordinator = coordinator();
        let id = coordinator
            .create(draft("t", TaskPriority::Low, TaskStatus::Pending))
            .await
            .unwrap();
        assert!(matches!(
            coordinator.claim(&id, "").await.unwrap_err(),
            CoordinatorError::Validation(_)
        ));
        assert!(matches!(
            coordinator.claim("missing", "agent-1").await.unwrap_err(),
            CoordinatorError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_unclaim_resets_task() {
        let coordinator = coordinator();
        let id = coordinator
            .create(draft("Stretch", TaskPriority::Low, TaskStatus::Pending))
            .await
            .unwrap();
        coordinator.claim(&id, "agent-1").await.unwrap();
        coordinator.update_status(&id, TaskStatus::Review).await.unwrap();

        coordinator.unclaim(&id).await.expect("unclaim");

        let task = coordinator.get(&id).await.unwrap().unwrap();
        assert!(task.claimed_by.is_none());
        assert!(task.claimed_at.is_none());
        assert_eq!(task.status, TaskStatus::Pending);
    }

    #[tokio::test]
    async fn test_completed_stamp_is_not_advanced() {
        let coordinator = coordinator();
        let id = coordinator
            .create(draft("Finish", TaskPriority::Medium, TaskStatus::InProgress))
            .await
            .unwrap();

        let patch = || TaskPatch::from_json(json!({"status": "completed"})).unwrap();
        coordinator.update(&id, patch()).await.unwrap();
        let first = coordinator.get(&id).await.unwrap().unwrap();
        let stamped = first.completed_at.expect("completed_at stamped");

        coordinator.update(&id, patch()).await.unwrap();
        let second = coordinator.get(&id).await.unwrap().unwrap();
        assert_eq!(second.completed_at, Some(stamped));
        assert!(second.updated_at > first.updated_at);
    }

    #[tokio::test]
    async fn test_released_is_stamped_and_explicit_stamp_wins() {
        let coordinator = coordinator();
        let id = coordinator
            .create(draft("Release", TaskPriority::Medium, TaskStatus::Completed))
            .await
            .unwrap();
        let created = coordinator.get(&id).await.unwrap().unwrap();
        assert!(created.completed_at.is_some());

        coordinator.update_status(&id, TaskStatus::Released).await.unwrap();
        let released = coordinator.get(&id).await.unwrap().unwrap();
        assert!(released.released_at.is_some());

        let explicit = DateTime::<Utc>::from_timestamp(1_750_000_000, 0).unwrap();
        let patch = TaskPatch {
            status: Some(TaskStatus::Completed),
            completed_at: Some(Some(explicit)),
            ..Default::default()
        };
        coordinator.update(&id, patch).await.unwrap();
        let task = coordinator.get(&id).await.unwrap().unwrap();
        assert_eq!(task.completed_at, Some(explicit));
    }

    #[tokio::test]
    async fn test_completed_and_released_stamps_cannot_be_cleared() {
        let coordinator = coordinator();
        let id = coordinator
            .create(draft("Weigh in", TaskPriority::Medium, TaskStatus::Pending))
            .await
            .unwrap();

        let patch =
            TaskPatch::from_json(json!({"status": "completed", "completedAt": null})).unwrap();
        coordinator.update(&id, patch).await.unwrap();
        let task = coordinator.get(&id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        let stamped = task.completed_at.expect("completed task carries completedAt");

        let patch = TaskPatch::from_json(json!({"completedAt": null})).unwrap();
        coordinator.update(&id, patch).await.unwrap();
        let task = coordinator.get(&id).await.unwrap().unwrap();
        assert_eq!(task.completed_at, Some(stamped));

        let patch =
            TaskPatch::from_json(json!({"status": "released", "releasedAt": null})).unwrap();
        coordinator.update(&id, patch).await.unwrap();
        let task = coordinator.get(&id).await.unwrap().unwrap();
        assert!(task.released_at.is_some());

        // Once the task is reopened the stamps may be cleared.
        let patch = TaskPatch::from_json(
            json!({"status": "pending", "completedAt": null, "releasedAt": null}),
        )
        .unwrap();
        coordinator.update(&id, patch).await.unwrap();
        let task = coordinator.get(&id).await.unwrap().unwrap();
        assert_eq!(task.completed_at, None);
        assert_eq!(task.released_at, None);
    }

    #[tokio::test]
    async fn test_unrepresentable_dates_are_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = crate::task::store::SqliteTaskStore::new(dir.path().to_path_buf())
            .await
            .expect("open store");
        let coordinator = TaskCoordinator::new(Arc::new(store));
        let far = DateTime::<Utc>::from_timestamp(9_999_999_999, 0).unwrap();

        let mut new_task = draft("Someday", TaskPriority::Low, TaskStatus::Pending);
        new_task.due_date = Some(far);
        let err = coordinator.create(new_task).await.unwrap_err();
        assert!(matches!(err, CoordinatorError::Validation(_)));
        assert!(coordinator.list_all().await.unwrap().is_empty());

        let near = DateTime::<Utc>::from_timestamp(7_000_000_000, 42).unwrap();
        let mut new_task = draft("Later", TaskPriority::Low, TaskStatus::Pending);
        new_task.due_date = Some(near);
        let id = coordinator.create(new_task).await.unwrap();
        let task = coordinator.get(&id).await.unwrap().unwrap();
        assert_eq!(task.due_date, Some(near));

        let patch = TaskPatch {
            due_date: Some(Some(far)),
            ..Default::default()
        };
        let err = coordinator.update(&id, patch).await.unwrap_err();
        assert!(matches!(err, CoordinatorError::Validation(_)));
        let task = coordinator.get(&id).await.unwrap().unwrap();
        assert_eq!(task.due_date, Some(near));
    }

    #[tokio::test]
    async fn test_update_drops_unknown_fields() {
        let coordinator = coordinator();
        let id = coordinator
            .create(draft("Allow list", TaskPriority::Medium, TaskStatus::Pending))
            .await
            .unwrap();

        let patch = TaskPatch::from_json(json!({"status": "review", "hacked": "x"})).unwrap();
        coordinator.update(&id, patch).await.expect("update");

        let task = coordinator.get(&id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Review);
        let as_json = serde_json::to_value(&task).unwrap();
        assert!(as_json.get("hacked").is_none());
        assert!(task.metadata.get("hacked").is_none());
    }

    #[tokio::test]
    async fn test_update_ignores_client_claimed_at_value() {
        let coordinator = coordinator();
        let id = coordinator
            .create(draft("Stamp", TaskPriority::Medium, TaskStatus::Pending))
            .await
            .unwrap();

        let before = Utc::now();
        let patch = TaskPatch::from_json(json!({
            "claimedBy": "agent-9",
            "claimedAt": "2001-01-01T00:00:00Z"
        }))
        .unwrap();
        coordinator.update(&id, patch).await.unwrap();

        let task = coordinator.get(&id).await.unwrap().unwrap();
        assert_eq!(task.claimed_by.as_deref(), Some("agent-9"));
        assert!(task.claimed_at.unwrap() >= before);
    }

    #[tokio::test]
    async fn test_update_missing_is_not_found() {
        let err = coordinator()
            .update_priority("missing", TaskPriority::Urgent)
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let coordinator = coordinator();
        let id = coordinator
            .create(draft("Gone", TaskPriority::Low, TaskStatus::Pending))
            .await
            .unwrap();
        coordinator.delete(&id).await.expect("delete");
        coordinator.delete(&id).await.expect("delete again");
        assert!(coordinator.get(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_claimed_by_filters_and_orders() {
        let coordinator = coordinator();
        let first = coordinator
            .create(draft("first", TaskPriority::Low, TaskStatus::Pending))
            .await
            .unwrap();
        let second = coordinator
            .create(draft("second", TaskPriority::Low, TaskStatus::Pending))
            .await
            .unwrap();
        let done = coordinator
            .create(draft("done", TaskPriority::Low, TaskStatus::Pending))
            .await
            .unwrap();
        let other = coordinator
            .create(draft("other", TaskPriority::Low, TaskStatus::Pending))
            .await
            .unwrap();

        coordinator.claim(&first, "agent-1").await.unwrap();
        coordinator.claim(&second, "agent-1").await.unwrap();
        coordinator.update_status(&second, TaskStatus::Review).await.unwrap();
        coordinator.claim(&done, "agent-1").await.unwrap();
        coordinator.update_status(&done, TaskStatus::Completed).await.unwrap();
        coordinator.claim(&other, "agent-2").await.unwrap();

        let mine = coordinator.list_claimed_by("agent-1").await.unwrap();
        let ids: Vec<&str> = mine.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec![second.as_str(), first.as_str()]);
    }

    #[tokio::test]
    async fn test_claim_unclaim_scenario() {
        let coordinator = coordinator();
        let id = coordinator
            .create(draft("Scenario", TaskPriority::High, TaskStatus::Pending))
            .await
            .unwrap();

        coordinator.claim(&id, "agent-1").await.unwrap();
        let task = coordinator.get(&id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::InProgress);
        assert_eq!(task.claimed_by.as_deref(), Some("agent-1"));

        coordinator.unclaim(&id).await.unwrap();
        let task = coordinator.get(&id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(task.claimed_by.is_none());
    }
}
