//! SQLite-based task store.

use super::{
    new_record_id, Filter, PatchOutcome, RecordDraft, RecordPatch, ServerClock, SortDirection,
    SortKey, StoreError, StoreTimestamp, TaskQuery, TaskRecord, TaskStore,
};
use async_trait::async_trait;
use rusqlite::types::{ToSql, Type};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::Mutex;

const DB_FILE: &str = "tasks.db";

const SCHEMA: &str = r#"
PRAGMA journal_mode = WAL;

CREATE TABLE IF NOT EXISTS tasks (
    id TEXT PRIMARY KEY NOT NULL,
    title TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    priority TEXT NOT NULL,
    priority_rank INTEGER NOT NULL,
    status TEXT NOT NULL,
    assignee TEXT NOT NULL,
    assigned_to TEXT,
    claimed_by TEXT,
    claimed_at INTEGER,
    due_date INTEGER,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    completed_at INTEGER,
    released_at INTEGER,
    tags TEXT NOT NULL DEFAULT '[]',
    dependencies TEXT,
    created_by TEXT NOT NULL,
    metadata TEXT NOT NULL DEFAULT '{}'
);

CREATE INDEX IF NOT EXISTS idx_tasks_created_at ON tasks(created_at DESC);
CREATE INDEX IF NOT EXISTS idx_tasks_status_rank ON tasks(status, priority_rank DESC, created_at DESC);
CREATE INDEX IF NOT EXISTS idx_tasks_claimed_by ON tasks(claimed_by, claimed_at DESC) WHERE claimed_by IS NOT NULL;
"#;

const COLUMNS: &str = "id, title, description, priority, status, assignee, assigned_to,
    claimed_by, claimed_at, due_date, created_at, updated_at, completed_at, released_at,
    tags, dependencies, created_by, metadata";

pub struct SqliteTaskStore {
    conn: Arc<Mutex<Connection>>,
    clock: Arc<ServerClock>,
}

impl SqliteTaskStore {
    pub async fn new(base_dir: PathBuf) -> Result<Self, StoreError> {
        tokio::fs::create_dir_all(&base_dir).await?;
        let db_path = base_dir.join(DB_FILE);

        let conn = tokio::task::spawn_blocking(move || -> Result<Connection, StoreError> {
            let conn = Connection::open(&db_path)?;
            conn.execute_batch(SCHEMA)?;
            tracing::debug!(path = %db_path.display(), "Opened SQLite task store");
            Ok(conn)
        })
        .await??;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            clock: Arc::new(ServerClock::new()),
        })
    }

    fn upsert(conn: &Connection, record: &TaskRecord) -> Result<(), StoreError> {
        let tags = serde_json::to_string(&record.tags)?;
        let dependencies = record
            .dependencies
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let metadata = serde_json::to_string(&record.metadata)?;

        conn.execute(
            "INSERT OR REPLACE INTO tasks (
                id, title, description, priority, priority_rank, status, assignee, assigned_to,
                claimed_by, claimed_at, due_date, created_at, updated_at, completed_at, released_at,
                tags, dependencies, created_by, metadata
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)",
            params![
                record.id,
                record.title,
                record.description,
                record.priority.as_str(),
                record.priority.rank(),
                record.status.as_str(),
                record.assignee.as_str(),
                record.assigned_to,
                record.claimed_by,
                record.claimed_at.map(StoreTimestamp::as_nanos),
                record.due_date.map(StoreTimestamp::as_nanos),
                record.created_at.as_nanos(),
                record.updated_at.as_nanos(),
                record.completed_at.map(StoreTimestamp::as_nanos),
                record.released_at.map(StoreTimestamp::as_nanos),
                tags,
                dependencies,
                record.created_by,
                metadata,
            ],
        )?;
        Ok(())
    }

    fn select_one(conn: &Connection, id: &str) -> Result<Option<TaskRecord>, StoreError> {
        let sql = format!("SELECT {} FROM tasks WHERE id = ?1", COLUMNS);
        let record = conn
            .query_row(&sql, params![id], parse_row)
            .optional()?;
        Ok(record)
    }
}

fn parse_enum<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.get(idx)?;
    raw.parse::<T>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parse_json<T: serde::de::DeserializeOwned>(
    idx: usize,
    raw: &str,
) -> rusqlite::Result<T> {
    serde_json::from_str(raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parse_row(row: &Row<'_>) -> rusqlite::Result<TaskRecord> {
    let timestamp = |idx: usize| -> rusqlite::Result<Option<StoreTimestamp>> {
        Ok(row.get::<_, Option<i64>>(idx)?.map(StoreTimestamp::from_nanos))
    };
    let tags: String = row.get(14)?;
    let dependencies: Option<String> = row.get(15)?;
    let metadata: String = row.get(17)?;

    Ok(TaskRecord {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        priority: parse_enum(row, 3)?,
        status: parse_enum(row, 4)?,
        assignee: parse_enum(row, 5)?,
        assigned_to: row.get(6)?,
        claimed_by: row.get(7)?,
        claimed_at: timestamp(8)?,
        due_date: timestamp(9)?,
        created_at: StoreTimestamp::from_nanos(row.get(10)?),
        updated_at: StoreTimestamp::from_nanos(row.get(11)?),
        completed_at: timestamp(12)?,
        released_at: timestamp(13)?,
        tags: parse_json(14, &tags)?,
        dependencies: dependencies
            .as_deref()
            .map(|raw| parse_json(15, raw))
            .transpose()?,
        created_by: row.get(16)?,
        metadata: parse_json(17, &metadata)?,
    })
}

/// Render a query as SQL plus its positional parameters.
fn build_select(query: &TaskQuery) -> (String, Vec<Box<dyn ToSql + Send>>) {
    let mut clauses = Vec::new();
    let mut values: Vec<Box<dyn ToSql + Send>> = Vec::new();

    for filter in &query.filters {
        match filter {
            Filter::StatusIs(status) => {
                values.push(Box::new(status.as_str()));
                clauses.push(format!("status = ?{}", values.len()));
            }
            Filter::StatusIn(statuses) if statuses.is_empty() => {
                clauses.push("0".to_string());
            }
            Filter::StatusIn(statuses) => {
                let mut slots = Vec::with_capacity(statuses.len());
                for status in statuses {
                    values.push(Box::new(status.as_str()));
                    slots.push(format!("?{}", values.len()));
                }
                clauses.push(format!("status IN ({})", slots.join(", ")));
            }
            Filter::ClaimedBy(actor) => {
                values.push(Box::new(actor.clone()));
                clauses.push(format!("claimed_by = ?{}", values.len()));
            }
        }
    }

    let mut sql = format!("SELECT {} FROM tasks", COLUMNS);
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    if !query.order.is_empty() {
        let order: Vec<String> = query
            .order
            .iter()
            .map(|(key, direction)| {
                let column = match key {
                    SortKey::CreatedAt => "created_at",
                    SortKey::UpdatedAt => "updated_at",
                    SortKey::Priority => "priority_rank",
                    SortKey::ClaimedAt => "claimed_at",
                };
                let direction = match direction {
                    SortDirection::Ascending => "ASC",
                    SortDirection::Descending => "DESC",
                };
                format!("{} {}", column, direction)
            })
            .collect();
        sql.push_str(" ORDER BY ");
        sql.push_str(&order.join(", "));
    }
    (sql, values)
}

#[async_trait]
impl TaskStore for SqliteTaskStore {
    fn is_persistent(&self) -> bool {
        true
    }

    async fn insert(&self, draft: RecordDraft) -> Result<String, StoreError> {
        let conn = self.conn.clone();
        let clock = self.clock.clone();
        let id = new_record_id();
        let record_id = id.clone();

        tokio::task::spawn_blocking(move || -> Result<(), StoreError> {
            let conn = conn.blocking_lock();
            let record = draft.into_record(record_id, clock.now());
            Self::upsert(&conn, &record)
        })
        .await??;
        Ok(id)
    }

    async fn fetch(&self, id: &str) -> Result<Option<TaskRecord>, StoreError> {
        let conn = self.conn.clone();
        let id = id.to_string();

        tokio::task::spawn_blocking(move || -> Result<Option<TaskRecord>, StoreError> {
            let conn = conn.blocking_lock();
            Self::select_one(&conn, &id)
        })
        .await?
    }

    async fn patch(&self, id: &str, patch: RecordPatch) -> Result<PatchOutcome, StoreError> {
        let conn = self.conn.clone();
        let clock = self.clock.clone();
        let id = id.to_string();

        tokio::task::spawn_blocking(move || -> Result<PatchOutcome, StoreError> {
            let mut conn = conn.blocking_lock();
            // Stamp under the connection lock so commit order and stamp order agree.
            let now = clock.now();
            let tx = conn.transaction()?;
            let Some(mut record) = Self::select_one(&tx, &id)? else {
                return Ok(PatchOutcome::NotFound);
            };
            if !patch.apply(&mut record, now) {
                return Ok(PatchOutcome::PreconditionFailed);
            }
            Self::upsert(&tx, &record)?;
            tx.commit()?;
            Ok(PatchOutcome::Applied)
        })
        .await?
    }

    async fn remove(&self, id: &str) -> Result<bool, StoreError> {
        let conn = self.conn.clone();
        let id = id.to_string();

        tokio::task::spawn_blocking(move || -> Result<bool, StoreError> {
            let conn = conn.blocking_lock();
            let deleted = conn.execute("DELETE FROM tasks WHERE id = ?1", params![id])?;
            Ok(deleted > 0)
        })
        .await?
    }

    async fn query(&self, query: &TaskQuery) -> Result<Vec<TaskRecord>, StoreError> {
        let conn = self.conn.clone();
        let (sql, values) = build_select(query);

        tokio::task::spawn_blocking(move || -> Result<Vec<TaskRecord>, StoreError> {
            let conn = conn.blocking_lock();
            let mut stmt = conn.prepare(&sql)?;
            let params: Vec<&dyn ToSql> = values.iter().map(|v| v.as_ref() as &dyn ToSql).collect();
            let records = stmt
                .query_map(params.as_slice(), parse_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(records)
        })
        .await?
    }
}
