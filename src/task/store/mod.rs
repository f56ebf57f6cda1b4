//! Task storage module with pluggable backends.
//!
//! Supports:
//! - `memory`: In-memory storage (non-persistent, for testing)
//! - `file`: JSON snapshot file
//! - `sqlite`: SQLite database (default)
//!
//! Stores speak in [`StoreTimestamp`]s and own the clock that assigns them.
//! Conversion to `DateTime<Utc>` happens in [`TaskRecord::into_task`] and in the
//! coordinator when it lowers drafts and patches.

mod file;
mod memory;
mod sqlite;

pub use file::FileTaskStore;
pub use memory::InMemoryTaskStore;
pub use sqlite::SqliteTaskStore;

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::types::{AssigneeKind, Metadata, Task, TaskPriority, TaskStatus};

/// Store-native timestamp: seconds and nanoseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StoreTimestamp {
    pub seconds: i64,
    pub nanos: u32,
}

impl StoreTimestamp {
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self {
            seconds: dt.timestamp(),
            nanos: dt.timestamp_subsec_nanos(),
        }
    }

    /// `None` when `dt` does not fit the SQLite column format (years 1677 to 2262).
    pub fn checked_from_datetime(dt: DateTime<Utc>) -> Option<Self> {
        dt.timestamp_nanos_opt()?;
        Some(Self::from_datetime(dt))
    }

    pub fn to_datetime(self) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(self.seconds, self.nanos).unwrap_or_default()
    }

    /// Nanoseconds since the epoch, the column format used by the SQLite backend.
    ///
    /// Saturates outside the range accepted by [`StoreTimestamp::checked_from_datetime`].
    pub fn as_nanos(self) -> i64 {
        self.seconds
            .saturating_mul(1_000_000_000)
            .saturating_add(self.nanos as i64)
    }

    pub fn from_nanos(nanos: i64) -> Self {
        Self {
            seconds: nanos.div_euclid(1_000_000_000),
            nanos: nanos.rem_euclid(1_000_000_000) as u32,
        }
    }

    fn next(self) -> Self {
        if self.nanos >= 999_999_999 {
            Self {
                seconds: self.seconds + 1,
                nanos: 0,
            }
        } else {
            Self {
                seconds: self.seconds,
                nanos: self.nanos + 1,
            }
        }
    }
}

/// Authoritative write-time clock owned by a store.
///
/// Stamps are strictly increasing even when the wall clock stalls or steps back.
#[derive(Debug, Default)]
pub struct ServerClock {
    last: Mutex<Option<StoreTimestamp>>,
}

impl ServerClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> StoreTimestamp {
        let mut stamp = StoreTimestamp::from_datetime(Utc::now());
        let mut last = self.last.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(prev) = *last {
            if stamp <= prev {
                stamp = prev.next();
            }
        }
        *last = Some(stamp);
        stamp
    }
}

/// A task as persisted by a store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: String,
    pub title: String,
    pub description: String,
    pub priority: TaskPriority,
    pub status: TaskStatus,
    pub assignee: AssigneeKind,
    pub assigned_to: Option<String>,
    pub claimed_by: Option<String>,
    pub claimed_at: Option<StoreTimestamp>,
    pub due_date: Option<StoreTimestamp>,
    pub created_at: StoreTimestamp,
    pub updated_at: StoreTimestamp,
    pub completed_at: Option<StoreTimestamp>,
    pub released_at: Option<StoreTimestamp>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub dependencies: Option<Vec<String>>,
    pub created_by: String,
    #[serde(default)]
    pub metadata: Metadata,
}

impl TaskRecord {
    /// Convert to the caller-facing representation.
    pub fn into_task(self) -> Task {
        Task {
            id: self.id,
            title: self.title,
            description: self.description,
            priority: self.priority,
            status: self.status,
            assignee: self.assignee,
            assigned_to: self.assigned_to,
            claimed_by: self.claimed_by,
            claimed_at: self.claimed_at.map(StoreTimestamp::to_datetime),
            due_date: self.due_date.map(StoreTimestamp::to_datetime),
            created_at: self.created_at.to_datetime(),
            updated_at: self.updated_at.to_datetime(),
            completed_at: self.completed_at.map(StoreTimestamp::to_datetime),
            released_at: self.released_at.map(StoreTimestamp::to_datetime),
            tags: self.tags,
            dependencies: self.dependencies,
            created_by: self.created_by,
            metadata: self.metadata,
        }
    }
}

/// Write instruction for a nullable field.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum FieldWrite<T> {
    #[default]
    Keep,
    Set(T),
    Clear,
}

impl<T> FieldWrite<T> {
    fn apply(self, slot: &mut Option<T>) {
        match self {
            FieldWrite::Keep => {}
            FieldWrite::Set(value) => *slot = Some(value),
            FieldWrite::Clear => *slot = None,
        }
    }
}

/// Write instruction for a nullable timestamp field.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub enum TimestampWrite {
    #[default]
    Keep,
    Set(StoreTimestamp),
    /// Resolve to the store clock at write time.
    ServerNow,
    /// Resolve to the store clock only if the field is currently empty.
    ServerNowIfUnset,
    Clear,
}

impl TimestampWrite {
    /// While `required`, the field may be set but never left empty: a clear is
    /// ignored and an empty slot is filled from the store clock.
    fn required_if(self, required: bool) -> Self {
        match self {
            TimestampWrite::Keep | TimestampWrite::Clear if required => {
                TimestampWrite::ServerNowIfUnset
            }
            other => other,
        }
    }

    fn apply(self, slot: &mut Option<StoreTimestamp>, now: StoreTimestamp) {
        match self {
            TimestampWrite::Keep => {}
            TimestampWrite::Set(ts) => *slot = Some(ts),
            TimestampWrite::ServerNow => *slot = Some(now),
            TimestampWrite::ServerNowIfUnset => {
                if slot.is_none() {
                    *slot = Some(now);
                }
            }
            TimestampWrite::Clear => *slot = None,
        }
    }
}

/// Condition a document must satisfy for a patch to be applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precondition {
    /// `claimed_by` is currently unset.
    Unclaimed,
}

impl Precondition {
    fn holds(self, record: &TaskRecord) -> bool {
        match self {
            Precondition::Unclaimed => record.claimed_by.is_none(),
        }
    }
}

/// Fields for a new document. The store assigns `id`, `created_at` and `updated_at`.
#[derive(Debug, Clone, Default)]
pub struct RecordDraft {
    pub title: String,
    pub description: String,
    pub priority: TaskPriority,
    pub status: TaskStatus,
    pub assignee: AssigneeKind,
    pub assigned_to: Option<String>,
    pub due_date: Option<StoreTimestamp>,
    pub completed_at: TimestampWrite,
    pub released_at: TimestampWrite,
    pub tags: BTreeSet<String>,
    pub dependencies: Option<Vec<String>>,
    pub created_by: String,
    pub metadata: Metadata,
}

impl RecordDraft {
    fn into_record(self, id: String, now: StoreTimestamp) -> TaskRecord {
        let mut completed_at = None;
        self.completed_at
            .required_if(self.status == TaskStatus::Completed)
            .apply(&mut completed_at, now);
        let mut released_at = None;
        self.released_at
            .required_if(self.status == TaskStatus::Released)
            .apply(&mut released_at, now);
        TaskRecord {
            id,
            title: self.title,
            description: self.description,
            priority: self.priority,
            status: self.status,
            assignee: self.assignee,
            assigned_to: self.assigned_to,
            claimed_by: None,
            claimed_at: None,
            due_date: self.due_date,
            created_at: now,
            updated_at: now,
            completed_at,
            released_at,
            tags: self.tags,
            dependencies: self.dependencies,
            created_by: self.created_by,
            metadata: self.metadata,
        }
    }
}

/// Per-field write set applied atomically to one document.
///
/// `updated_at` is always stamped by the store when a patch is applied.
#[derive(Debug, Clone, Default)]
pub struct RecordPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
    pub assignee: Option<AssigneeKind>,
    pub assigned_to: FieldWrite<String>,
    pub tags: Option<BTreeSet<String>>,
    pub due_date: TimestampWrite,
    pub completed_at: TimestampWrite,
    pub released_at: TimestampWrite,
    pub claimed_by: FieldWrite<String>,
    pub claimed_at: TimestampWrite,
    pub metadata: Option<Metadata>,
    pub precondition: Option<Precondition>,
}

impl RecordPatch {
    /// Apply to `record` in place. Returns `false` (leaving `record` untouched)
    /// when the precondition does not hold.
    pub fn apply(self, record: &mut TaskRecord, now: StoreTimestamp) -> bool {
        if let Some(precondition) = self.precondition {
            if !precondition.holds(record) {
                return false;
            }
        }
        if let Some(title) = self.title {
            record.title = title;
        }
        if let Some(description) = self.description {
            record.description = description;
        }
        if let Some(status) = self.status {
            record.status = status;
        }
        if let Some(priority) = self.priority {
            record.priority = priority;
        }
        if let Some(assignee) = self.assignee {
            record.assignee = assignee;
        }
        self.assigned_to.apply(&mut record.assigned_to);
        if let Some(tags) = self.tags {
            record.tags = tags;
        }
        self.due_date.apply(&mut record.due_date, now);
        self.completed_at
            .required_if(record.status == TaskStatus::Completed)
            .apply(&mut record.completed_at, now);
        self.released_at
            .required_if(record.status == TaskStatus::Released)
            .apply(&mut record.released_at, now);
        self.claimed_by.apply(&mut record.claimed_by);
        self.claimed_at.apply(&mut record.claimed_at, now);
        if let Some(metadata) = self.metadata {
            record.metadata = metadata;
        }
        record.updated_at = now;
        true
    }
}

/// Result of [`TaskStore::patch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchOutcome {
    Applied,
    NotFound,
    PreconditionFailed,
}

/// Field filter for [`TaskQuery`].
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    StatusIs(TaskStatus),
    StatusIn(Vec<TaskStatus>),
    ClaimedBy(String),
}

impl Filter {
    fn matches(&self, record: &TaskRecord) -> bool {
        match self {
            Filter::StatusIs(status) => record.status == *status,
            Filter::StatusIn(statuses) => statuses.contains(&record.status),
            Filter::ClaimedBy(actor) => record.claimed_by.as_deref() == Some(actor.as_str()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    CreatedAt,
    UpdatedAt,
    /// Ordered by rank (`urgent > high > medium > low`), not by name.
    Priority,
    /// Unset values sort lowest.
    ClaimedAt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

/// Filtered, ordered retrieval.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskQuery {
    pub filters: Vec<Filter>,
    pub order: Vec<(SortKey, SortDirection)>,
}

impl TaskQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn order_by(mut self, key: SortKey, direction: SortDirection) -> Self {
        self.order.push((key, direction));
        self
    }

    pub fn matches(&self, record: &TaskRecord) -> bool {
        self.filters.iter().all(|f| f.matches(record))
    }

    pub fn compare(&self, a: &TaskRecord, b: &TaskRecord) -> Ordering {
        for (key, direction) in &self.order {
            let ord = match key {
                SortKey::CreatedAt => a.created_at.cmp(&b.created_at),
                SortKey::UpdatedAt => a.updated_at.cmp(&b.updated_at),
                SortKey::Priority => a.priority.cmp(&b.priority),
                SortKey::ClaimedAt => a.claimed_at.cmp(&b.claimed_at),
            };
            let ord = match direction {
                SortDirection::Ascending => ord,
                SortDirection::Descending => ord.reverse(),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }

    /// Evaluate against an in-memory collection.
    pub fn run<'a>(&self, records: impl IntoIterator<Item = &'a TaskRecord>) -> Vec<TaskRecord> {
        let mut matched: Vec<TaskRecord> = records
            .into_iter()
            .filter(|r| self.matches(r))
            .cloned()
            .collect();
        matched.sort_by(|a, b| self.compare(a, b));
        matched
    }
}

/// Failure reported by a storage backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("storage task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Generate a fresh document id.
pub fn new_record_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Task store trait - implemented by all storage backends.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Whether this store persists data across restarts.
    fn is_persistent(&self) -> bool;

    /// Persist a new document and return its store-assigned id.
    async fn insert(&self, draft: RecordDraft) -> Result<String, StoreError>;

    /// Get a single document by id.
    async fn fetch(&self, id: &str) -> Result<Option<TaskRecord>, StoreError>;

    /// Apply a write set to one document atomically.
    async fn patch(&self, id: &str, patch: RecordPatch) -> Result<PatchOutcome, StoreError>;

    /// Hard delete. Returns whether a document was removed.
    async fn remove(&self, id: &str) -> Result<bool, StoreError>;

    /// Filtered, ordered retrieval.
    async fn query(&self, query: &TaskQuery) -> Result<Vec<TaskRecord>, StoreError>;
}

/// Task store type selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TaskStoreType {
    Memory,
    File,
    #[default]
    Sqlite,
}

impl TaskStoreType {
    /// Parse from environment variable value.
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "memory" => Self::Memory,
            "file" | "json" => Self::File,
            "sqlite" | "db" => Self::Sqlite,
            _ => Self::default(),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::File => "file",
            Self::Sqlite => "sqlite",
        }
    }
}

/// Create a task store based on type and data directory.
pub async fn create_task_store(
    store_type: TaskStoreType,
    data_dir: PathBuf,
) -> Result<Box<dyn TaskStore>, StoreError> {
    match store_type {
        TaskStoreType::Memory => Ok(Box::new(InMemoryTaskStore::new())),
        TaskStoreType::File => {
            let store = FileTaskStore::new(data_dir).await?;
            Ok(Box::new(store))
        }
        TaskStoreType::Sqlite => {
            let store = SqliteTaskStore::new(data_dir).await?;
            Ok(Box::new(store))
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_round_trip_through_datetime() {
        let dt = DateTime::<Utc>::from_timestamp(1_700_000_000, 123_456_789).unwrap();
        let ts = StoreTimestamp::from_datetime(dt);
        assert_eq!(ts.seconds, 1_700_000_000);
        assert_eq!(ts.nanos, 123_456_789);
        assert_eq!(ts.to_datetime(), dt);
        assert_eq!(StoreTimestamp::from_nanos(ts.as_nanos()), ts);
    }

    #[test]
    fn test_server_clock_is_strictly_increasing() {
        let clock = ServerClock::new();
        let mut prev = clock.now();
        for _ in 0..1000 {
            let next = clock.now();
            assert!(next > prev);
            prev = next;
        }
    }

    #[test]
    fn test_next_carries_into_seconds() {
        let ts = StoreTimestamp {
            seconds: 10,
            nanos: 999_999_999,
        };
        assert_eq!(
            ts.next(),
            StoreTimestamp {
                seconds: 11,
                nanos: 0
            }
        );
    }

    #[test]
    fn test_stamp_if_unset_keeps_existing_value() {
        let first = StoreTimestamp {
            seconds: 1,
            nanos: 0,
        };
        let later = StoreTimestamp {
            seconds: 2,
            nanos: 0,
        };
        let mut slot = None;
        TimestampWrite::ServerNowIfUnset.apply(&mut slot, first);
        TimestampWrite::ServerNowIfUnset.apply(&mut slot, later);
        assert_eq!(slot, Some(first));
    }

    #[test]
    fn test_checked_from_datetime_rejects_unrepresentable_dates() {
        let far = DateTime::<Utc>::from_timestamp(10_000_000_000, 0).unwrap();
        assert_eq!(StoreTimestamp::checked_from_datetime(far), None);
        let near = DateTime::<Utc>::from_timestamp(1_800_000_000, 5).unwrap();
        assert_eq!(
            StoreTimestamp::checked_from_datetime(near),
            Some(StoreTimestamp::from_datetime(near))
        );
    }

    #[test]
    fn test_completed_task_keeps_its_stamp() {
        let now = StoreTimestamp {
            seconds: 5,
            nanos: 0,
        };
        let mut record = RecordDraft {
            title: "t".to_string(),
            ..Default::default()
        }
        .into_record("id".to_string(), now);

        let patch = RecordPatch {
            status: Some(TaskStatus::Completed),
            completed_at: TimestampWrite::Clear,
            ..Default::default()
        };
        assert!(patch.apply(&mut record, now));
        assert_eq!(record.completed_at, Some(now));

        let later = now.next();
        let patch = RecordPatch {
            completed_at: TimestampWrite::Clear,
            released_at: TimestampWrite::Clear,
            ..Default::default()
        };
        assert!(patch.apply(&mut record, later));
        assert_eq!(record.completed_at, Some(now));
        assert_eq!(record.released_at, None);
    }

    #[test]
    fn test_store_type_parsing() {
        assert_eq!(TaskStoreType::from_str("memory"), TaskStoreType::Memory);
        assert_eq!(TaskStoreType::from_str("JSON"), TaskStoreType::File);
        assert_eq!(TaskStoreType::from_str("db"), TaskStoreType::Sqlite);
        assert_eq!(TaskStoreType::from_str("other"), TaskStoreType::Sqlite);
    }
}
