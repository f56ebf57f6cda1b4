//! API request and response types.

use serde::{Deserialize, Serialize};

use crate::task::{TaskPriority, TaskStatus};

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// Service status
    pub status: String,

    /// Service version
    pub version: String,

    /// Active task store backend (`memory`, `file` or `sqlite`)
    pub task_store: String,

    /// Whether chat replies are streamed from the backend
    pub streaming: bool,
}

/// Response after creating a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTaskResponse {
    /// Store-assigned task identifier
    pub id: String,
}

/// Query parameters for listing tasks.
#[derive(Debug, Default, Deserialize)]
pub struct ListTasksQuery {
    pub status: Option<TaskStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusRequest {
    pub status: TaskStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriorityRequest {
    pub priority: TaskPriority,
}

/// Request to claim a task for an actor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimRequest {
    pub actor_id: String,

    /// Refuse the claim (409) when another actor already holds it
    #[serde(default)]
    pub exclusive: bool,
}
