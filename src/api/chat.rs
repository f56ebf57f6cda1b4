//! Coaching chat endpoints.
//!
//! Request bodies are read as raw bytes so that malformed JSON gets the same
//! `{"error": ...}` body as any other rejected request.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::State,
    http::{header, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Json, Response,
    },
};
use futures::StreamExt;

use crate::relay::wire::NO_CACHE;
use crate::relay::{ChatRequest, ChatResponse, RelayError};

use super::routes::AppState;

const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

fn status_for(err: &RelayError) -> StatusCode {
    match err {
        RelayError::Validation(_) => StatusCode::BAD_REQUEST,
        RelayError::Backend(_) => StatusCode::BAD_GATEWAY,
        RelayError::Transport(_) => StatusCode::GATEWAY_TIMEOUT,
    }
}

fn error_response(err: RelayError) -> Response {
    (status_for(&err), Json(ChatResponse::error(err.message()))).into_response()
}

fn parse_request(body: &[u8]) -> Result<ChatRequest, RelayError> {
    let value: serde_json::Value = serde_json::from_slice(body)
        .map_err(|e| RelayError::Validation(format!("invalid JSON body: {}", e)))?;
    ChatRequest::from_json(value)
}

/// Complete reply in one response.
pub async fn chat(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let request = match parse_request(&body) {
        Ok(request) => request,
        Err(e) => return error_response(e),
    };

    let relay = state.relay.with_cancellation(state.shutdown.child_token());
    match relay.send_message(&request).await {
        Ok(content) => Json(ChatResponse::content(content)).into_response(),
        Err(e) => {
            tracing::warn!("Chat request failed: {}", e);
            error_response(e)
        }
    }
}

/// Reply as server-sent events: `{"content"}` fragments, then `[DONE]` or
/// a single `{"error"}`.
pub async fn chat_stream(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let request = match parse_request(&body) {
        Ok(request) => request,
        Err(e) => return error_response(e),
    };

    let relay = state.relay.with_cancellation(state.shutdown.child_token());
    let stream = match relay.open(&request).await {
        Ok(stream) => stream,
        Err(e) => {
            tracing::warn!("Chat stream could not be opened: {}", e);
            return error_response(e);
        }
    };

    let events = stream
        .into_events()
        .map(|event| Ok::<_, Infallible>(Event::default().data(event.to_data())));

    (
        [(header::CACHE_CONTROL, NO_CACHE)],
        Sse::new(events).keep_alive(
            KeepAlive::new()
                .interval(KEEP_ALIVE_INTERVAL)
                .text("keepalive"),
        ),
    )
        .into_response()
}
