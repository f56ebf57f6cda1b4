//! Text-generation backend client.
//!
//! This module provides a trait-based abstraction over chat-completion
//! providers, with OpenRouter (or any OpenAI-compatible endpoint) as the
//! primary implementation.

mod error;
mod openrouter;

pub use error::{classify_http_status, LlmError, LlmErrorKind, RetryConfig};
pub use openrouter::{OpenRouterClient, DEFAULT_API_URL};

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};

/// Role in a chat conversation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A message in a chat conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        ChatMessage {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Incremental reply: text fragments in arrival order.
///
/// The sequence ends when the backend signals completion. An `Err` item is
/// terminal. Dropping the stream releases the underlying connection.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String, LlmError>> + Send>>;

/// Trait for text-generation clients.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Whether [`LlmClient::stream_completion`] is available.
    fn supports_streaming(&self) -> bool {
        false
    }

    /// Generate a complete reply in one blocking call.
    async fn chat_completion(&self, messages: &[ChatMessage]) -> Result<String, LlmError>;

    /// Open an incremental reply.
    ///
    /// Request-level failures (non-success status, connection refused) are
    /// returned here, before any fragment is produced.
    async fn stream_completion(&self, _messages: &[ChatMessage]) -> Result<TextStream, LlmError> {
        Err(LlmError::unsupported(
            "backend does not support incremental output".to_string(),
        ))
    }
}
