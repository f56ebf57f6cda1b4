//! Task module - task records, storage backends, and the claiming coordinator.
//!
//! - `types`: caller-facing task, draft and patch shapes
//! - `store`: pluggable persistence (memory, JSON file, SQLite)
//! - `coordinator`: CRUD and advisory claiming on top of a store

mod coordinator;
pub mod store;
mod types;

pub use coordinator::{ClaimOutcome, CoordinatorError, TaskCoordinator};
pub use store::{create_task_store, StoreError, TaskStore, TaskStoreType};
pub use types::{
    AssigneeKind, Metadata, ParseEnumError, Task, TaskDraft, TaskPatch, TaskPriority, TaskStatus,
};
