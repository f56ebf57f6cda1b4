//! # coachboard
//!
//! Backend for a fitness coaching dashboard.
//!
//! This library provides:
//! - A task board shared by human coaches and automated agents, with
//!   advisory claiming over a pluggable document store
//! - A streaming relay that turns one chat request into an ordered,
//!   finite sequence of coaching reply fragments
//! - An HTTP API exposing both, with server-sent events for replies
//!
//! ## Architecture
//!
//! ```text
//!            ┌───────────────────────────────┐
//!            │            api (axum)         │
//!            └───────┬───────────────┬───────┘
//!                    │               │
//!                    ▼               ▼
//!          ┌─────────────────┐ ┌──────────────────┐
//!          │ TaskCoordinator │ │  StreamingRelay  │
//!          └────────┬────────┘ └────────┬─────────┘
//!                   ▼                   ▼
//!          ┌─────────────────┐ ┌──────────────────┐
//!          │    TaskStore    │ │    LlmClient     │
//!          │ memory/file/sql │ │   (OpenRouter)   │
//!          └─────────────────┘ └──────────────────┘
//! ```
//!
//! ## Modules
//! - `task`: Task model, coordinator and store backends
//! - `relay`: Chat request validation, prompt assembly and reply streaming
//! - `llm`: Text-generation backend client
//! - `api`: HTTP routes
//! - `config`: Environment configuration

pub mod api;
pub mod config;
pub mod llm;
pub mod relay;
pub mod task;

pub use config::Config;
pub use relay::{ChatRequest, RelayError, RelayEvent, StreamingRelay};
pub use task::{Task, TaskCoordinator, TaskStatus};
