//! Task board endpoints.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use serde_json::Value;

use crate::task::{ClaimOutcome, CoordinatorError, Task, TaskDraft, TaskPatch};

use super::routes::AppState;
use super::types::*;

type ApiResult<T> = Result<T, (StatusCode, String)>;

fn error_response(err: CoordinatorError) -> (StatusCode, String) {
    match err {
        CoordinatorError::Validation(message) => (StatusCode::BAD_REQUEST, message),
        CoordinatorError::NotFound(id) => (StatusCode::NOT_FOUND, format!("Task {} not found", id)),
        CoordinatorError::Persistence(e) => {
            tracing::error!("Task store failure: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

/// Re-read a task after a write so the response carries server timestamps.
async fn reload(state: &AppState, id: &str) -> ApiResult<Json<Task>> {
    state
        .coordinator
        .get(id)
        .await
        .map_err(error_response)?
        .map(Json)
        .ok_or_else(|| (StatusCode::NOT_FOUND, format!("Task {} not found", id)))
}

/// List tasks, newest first, or by priority when filtered by status.
pub async fn list_tasks(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListTasksQuery>,
) -> ApiResult<Json<Vec<Task>>> {
    let tasks = match query.status {
        Some(status) => state.coordinator.list_by_status(status).await,
        None => state.coordinator.list_all().await,
    };
    tasks.map(Json).map_err(error_response)
}

pub async fn create_task(
    State(state): State<Arc<AppState>>,
    Json(draft): Json<TaskDraft>,
) -> ApiResult<(StatusCode, Json<CreateTaskResponse>)> {
    let id = state.coordinator.create(draft).await.map_err(error_response)?;
    tracing::info!(task = %id, "Task created");
    Ok((StatusCode::CREATED, Json(CreateTaskResponse { id })))
}

pub async fn get_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Task>> {
    reload(&state, &id).await
}

/// Partial update. Keys outside the mutable allow-list are ignored.
pub async fn update_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> ApiResult<Json<Task>> {
    let patch = TaskPatch::from_json(body)
        .map_err(|e| (StatusCode::BAD_REQUEST, format!("Invalid task update: {}", e)))?;
    state
        .coordinator
        .update(&id, patch)
        .await
        .map_err(error_response)?;
    reload(&state, &id).await
}

pub async fn set_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<StatusRequest>,
) -> ApiResult<Json<Task>> {
    state
        .coordinator
        .update_status(&id, req.status)
        .await
        .map_err(error_response)?;
    reload(&state, &id).await
}

pub async fn set_priority(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<PriorityRequest>,
) -> ApiResult<Json<Task>> {
    state
        .coordinator
        .update_priority(&id, req.priority)
        .await
        .map_err(error_response)?;
    reload(&state, &id).await
}

pub async fn delete_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    state.coordinator.delete(&id).await.map_err(error_response)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn claim_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<ClaimRequest>,
) -> ApiResult<Json<Task>> {
    if req.exclusive {
        let outcome = state
            .coordinator
            .try_claim(&id, &req.actor_id)
            .await
            .map_err(error_response)?;
        if let ClaimOutcome::AlreadyClaimed { holder } = outcome {
            let holder = holder.unwrap_or_else(|| "another actor".to_string());
            return Err((
                StatusCode::CONFLICT,
                format!("Task {} is already claimed by {}", id, holder),
            ));
        }
    } else {
        state
            .coordinator
            .claim(&id, &req.actor_id)
            .await
            .map_err(error_response)?;
    }
    tracing::debug!(task = %id, actor = %req.actor_id, "Task claimed");
    reload(&state, &id).await
}

pub async fn unclaim_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Task>> {
    state.coordinator.unclaim(&id).await.map_err(error_response)?;
    reload(&state, &id).await
}

pub async fn list_actor_tasks(
    State(state): State<Arc<AppState>>,
    Path(actor): Path<String>,
) -> ApiResult<Json<Vec<Task>>> {
    state
        .coordinator
        .list_claimed_by(&actor)
        .await
        .map(Json)
        .map_err(error_response)
}

#[cfg(test)]
mod tests {
    use super::super::routes::test_support::spawn_app;
    use super::*;
    use crate::relay::testing::ScriptedLlm;
    use crate::task::{TaskPriority, TaskStatus};
    use reqwest::Client;
    use serde_json::json;

    async fn app() -> (Client, String) {
        let (base, _state) = spawn_app(Arc::new(ScriptedLlm::blocking("ok"))).await;
        (Client::new(), base)
    }

    async fn create(client: &Client, base: &str, body: Value) -> String {
        let response = client
            .post(format!("{}/api/tasks", base))
            .json(&body)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        response.json::<CreateTaskResponse>().await.unwrap().id
    }

    #[tokio::test]
    async fn test_create_get_and_delete() {
        let (client, base) = app().await;
        let id = create(
            &client,
            &base,
            json!({"title": "Log breakfast", "priority": "high", "createdBy": "coach"}),
        )
        .await;

        let task: Task = client
            .get(format!("{}/api/tasks/{}", base, id))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(task.title, "Log breakfast");
        assert_eq!(task.priority, TaskPriority::High);
        assert_eq!(task.status, TaskStatus::Pending);

        for _ in 0..2 {
            let response = client
                .delete(format!("{}/api/tasks/{}", base, id))
                .send()
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::NO_CONTENT);
        }
        let response = client
            .get(format!("{}/api/tasks/{}", base, id))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_blank_title_is_rejected() {
        let (client, base) = app().await;
        let response = client
            .post(format!("{}/api/tasks", base))
            .json(&json!({"title": "   "}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let tasks: Vec<Task> = client
            .get(format!("{}/api/tasks", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert!(tasks.is_empty());
    }

    #[tokio::test]
    async fn test_status_filter_and_patch() {
        let (client, base) = app().await;
        let first = create(&client, &base, json!({"title": "Stretch"})).await;
        let second = create(&client, &base, json!({"title": "Hydrate"})).await;

        let task: Task = client
            .put(format!("{}/api/tasks/{}/status", base, first))
            .json(&json!({"status": "completed"}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert!(task.completed_at.is_some());

        let task: Task = client
            .patch(format!("{}/api/tasks/{}", base, second))
            .json(&json!({"description": "8 glasses", "createdAt": "1999-01-01T00:00:00Z"}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(task.description, "8 glasses");
        assert!(task.created_at.timestamp() > 0);
        assert_ne!(task.created_at.to_rfc3339(), "1999-01-01T00:00:00+00:00");

        let completed: Vec<Task> = client
            .get(format!("{}/api/tasks?status=completed", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].id, first);
    }

    #[tokio::test]
    async fn test_missing_task_is_not_found() {
        let (client, base) = app().await;
        let response = client
            .put(format!("{}/api/tasks/nope/priority", base))
            .json(&json!({"priority": "urgent"}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_claims_over_http() {
        let (client, base) = app().await;
        let id = create(&client, &base, json!({"title": "Plan meals"})).await;
        let claim_url = format!("{}/api/tasks/{}/claim", base, id);

        let task: Task = client
            .post(&claim_url)
            .json(&json!({"actorId": "agent-a", "exclusive": true}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(task.claimed_by.as_deref(), Some("agent-a"));
        assert!(task.claimed_at.is_some());

        let response = client
            .post(&claim_url)
            .json(&json!({"actorId": "agent-b", "exclusive": true}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert!(response.text().await.unwrap().contains("agent-a"));

        let mine: Vec<Task> = client
            .get(format!("{}/api/actors/agent-a/tasks", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(mine.len(), 1);

        // A plain claim overwrites the holder.
        let task: Task = client
            .post(&claim_url)
            .json(&json!({"actorId": "agent-b"}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(task.claimed_by.as_deref(), Some("agent-b"));

        let task: Task = client
            .post(format!("{}/api/tasks/{}/unclaim", base, id))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(task.claimed_by, None);
        assert_eq!(task.claimed_at, None);
    }
}
