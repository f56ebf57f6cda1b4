//! Router, shared state and server lifecycle.

use std::sync::Arc;

use axum::{
    extract::State,
    response::Json,
    routing::{get, post, put},
    Router,
};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::llm::{LlmClient, OpenRouterClient};
use crate::relay::{PromptBuilder, StreamingRelay};
use crate::task::{create_task_store, TaskCoordinator};

use super::chat;
use super::tasks;
use super::types::HealthResponse;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    /// Task CRUD and claiming
    pub coordinator: TaskCoordinator,
    /// Coaching chat relay
    pub relay: StreamingRelay,
    /// Fired on shutdown so open chat streams end and the server can drain
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(config: Config, coordinator: TaskCoordinator, relay: StreamingRelay) -> Self {
        Self {
            config,
            coordinator,
            relay,
            shutdown: CancellationToken::new(),
        }
    }
}

/// Build the application router.
pub fn router(state: Arc<AppState>) -> Router {
    let task_routes = Router::new()
        .route("/api/tasks", get(tasks::list_tasks).post(tasks::create_task))
        .route(
            "/api/tasks/:id",
            get(tasks::get_task)
                .patch(tasks::update_task)
                .delete(tasks::delete_task),
        )
        .route("/api/tasks/:id/status", put(tasks::set_status))
        .route("/api/tasks/:id/priority", put(tasks::set_priority))
        .route("/api/tasks/:id/claim", post(tasks::claim_task))
        .route("/api/tasks/:id/unclaim", post(tasks::unclaim_task))
        .route("/api/actors/:actor/tasks", get(tasks::list_actor_tasks));

    let chat_routes = Router::new()
        .route("/api/chat", post(chat::chat))
        .route("/api/chat/stream", post(chat::chat_stream));

    Router::new()
        .route("/api/health", get(health))
        .merge(task_routes)
        .merge(chat_routes)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP server.
pub async fn serve(config: Config) -> anyhow::Result<()> {
    let store = create_task_store(config.task_store, config.data_dir.clone()).await?;
    tracing::info!(
        backend = config.task_store.as_str(),
        persistent = store.is_persistent(),
        "Task store ready"
    );
    let coordinator = TaskCoordinator::new(Arc::from(store));

    let llm: Arc<dyn LlmClient> = Arc::new(
        OpenRouterClient::new(config.api_key.clone(), config.model.clone())
            .with_base_url(config.api_url.clone())
            .with_temperature(config.temperature)
            .with_streaming(config.streaming),
    );
    let relay = StreamingRelay::new(llm, PromptBuilder::new(config.history_turns));
    tracing::info!(
        model = %config.model,
        streaming = config.streaming,
        history_turns = config.history_turns,
        "Chat relay ready"
    );

    let addr = format!("{}:{}", config.host, config.port);
    let state = Arc::new(AppState::new(config, coordinator, relay));
    let app = router(Arc::clone(&state));

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(state))
        .await?;

    tracing::info!("Graceful shutdown complete");
    Ok(())
}

/// Wait for Ctrl-C or SIGTERM, then end open chat streams.
async fn shutdown_signal(state: Arc<AppState>) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, closing open chat streams");
    state.shutdown.cancel();
}

/// Health check endpoint.
async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        task_store: state.config.task_store.as_str().to_string(),
        streaming: state.relay.supports_streaming(),
    })
}
