//! HTTP API for the coaching dashboard.
//!
//! ## Endpoints
//!
//! - `GET /api/health` - Service status
//! - `GET /api/tasks` - List tasks, optionally `?status=`
//! - `POST /api/tasks` - Create a task
//! - `GET /api/tasks/:id` - Get one task
//! - `PATCH /api/tasks/:id` - Partial update
//! - `PUT /api/tasks/:id/status` - Set status
//! - `PUT /api/tasks/:id/priority` - Set priority
//! - `DELETE /api/tasks/:id` - Delete (idempotent)
//! - `POST /api/tasks/:id/claim` - Claim for an actor
//! - `POST /api/tasks/:id/unclaim` - Release a claim
//! - `GET /api/actors/:actor/tasks` - Tasks claimed by an actor
//! - `POST /api/chat` - Complete coaching reply
//! - `POST /api/chat/stream` - Coaching reply as server-sent events

mod chat;
mod routes;
mod tasks;
pub mod types;

pub use routes::{router, serve, AppState};
