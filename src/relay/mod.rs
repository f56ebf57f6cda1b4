//! Streaming relay - delivers one coaching reply as an ordered, finite
//! sequence of text fragments.
//!
//! With a streaming backend the relay holds a single long-lived channel open
//! and forwards fragments as they arrive. Otherwise it makes one blocking call
//! and presents the complete text as a single fragment, so consumers see the
//! same event shape either way.
//!
//! ```text
//!  ChatRequest ──► PromptBuilder ──► LlmClient ──► RelayStream ──► RelayEvent*
//!                                                      │
//!                           ReplyAccumulator ◄─────────┘ (or SSE via api::chat)
//! ```

mod accumulator;
mod client;
mod prompt;
mod stream;
pub mod wire;

pub use accumulator::{ChatStreamReader, ReplyAccumulator, ReplyOutcome, StreamState};
pub use client::RelayClient;
pub use prompt::{PromptBuilder, DEFAULT_HISTORY_TURNS};
pub use stream::{RelayState, RelayStream};
pub use wire::{ChatResponse, FrameDecoder, RelayEvent};

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::llm::{LlmClient, LlmError, LlmErrorKind, TextStream};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RelayError {
    /// Rejected before any backend call.
    #[error("invalid chat request: {0}")]
    Validation(String),

    #[error("backend error: {0}")]
    Backend(String),

    /// The channel dropped without a terminal marker, or the exchange was cancelled.
    #[error("transport error: {0}")]
    Transport(String),
}

impl RelayError {
    /// User-facing message without the category prefix.
    pub fn message(&self) -> &str {
        match self {
            RelayError::Validation(m) | RelayError::Backend(m) | RelayError::Transport(m) => m,
        }
    }
}

impl From<LlmError> for RelayError {
    fn from(err: LlmError) -> Self {
        RelayError::Backend(backend_message(&err))
    }
}

/// Backend payload errors are shown verbatim; everything else keeps its kind.
pub(crate) fn backend_message(err: &LlmError) -> String {
    match err.kind {
        LlmErrorKind::Upstream => err.message.clone(),
        _ => err.to_string(),
    }
}

/// Who said a prior turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    #[serde(alias = "assistant")]
    Coach,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub content: String,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn coach(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Coach,
            content: content.into(),
        }
    }
}

/// Identifies the user and the coach persona they picked.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    #[serde(default, alias = "uid", skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, alias = "coach", skip_serializing_if = "Option::is_none")]
    pub selected_coach: Option<String>,
    /// Any other profile keys, rendered into the prompt.
    #[serde(flatten)]
    pub details: BTreeMap<String, Value>,
}

/// One validated chat exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub message: String,
    pub user_profile: UserProfile,
    #[serde(default)]
    pub chat_history: Vec<ChatTurn>,
}

impl ChatRequest {
    pub fn new(message: impl Into<String>, user_profile: UserProfile) -> Self {
        Self {
            message: message.into(),
            user_profile,
            chat_history: Vec::new(),
        }
    }

    pub fn with_history(mut self, history: Vec<ChatTurn>) -> Self {
        self.chat_history = history;
        self
    }

    /// Validate a raw request body.
    pub fn from_json(value: Value) -> Result<Self, RelayError> {
        let Value::Object(mut body) = value else {
            return Err(RelayError::Validation(
                "request body must be a JSON object".to_string(),
            ));
        };

        let message = match body.remove("message") {
            Some(Value::String(message)) if !message.trim().is_empty() => message,
            _ => {
                return Err(RelayError::Validation(
                    "message must be a non-empty string".to_string(),
                ))
            }
        };

        let user_profile = match body.remove("userProfile") {
            Some(profile @ Value::Object(_)) => serde_json::from_value(profile)
                .map_err(|e| RelayError::Validation(format!("invalid userProfile: {}", e)))?,
            _ => {
                return Err(RelayError::Validation(
                    "userProfile must be an object".to_string(),
                ))
            }
        };

        let chat_history = match body.remove("chatHistory") {
            None | Some(Value::Null) => Vec::new(),
            Some(history) => serde_json::from_value(history)
                .map_err(|e| RelayError::Validation(format!("invalid chatHistory: {}", e)))?,
        };

        Ok(Self {
            message,
            user_profile,
            chat_history,
        })
    }
}

/// Entry point for chat exchanges.
#[derive(Clone)]
pub struct StreamingRelay {
    llm: Arc<dyn LlmClient>,
    prompt: PromptBuilder,
    cancel: CancellationToken,
}

impl StreamingRelay {
    pub fn new(llm: Arc<dyn LlmClient>, prompt: PromptBuilder) -> Self {
        Self {
            llm,
            prompt,
            cancel: CancellationToken::new(),
        }
    }

    /// A relay whose exchanges stop as soon as `cancel` fires.
    pub fn with_cancellation(&self, cancel: CancellationToken) -> Self {
        Self {
            cancel,
            ..self.clone()
        }
    }

    pub fn supports_streaming(&self) -> bool {
        self.llm.supports_streaming()
    }

    /// Open a reply sequence.
    ///
    /// With a streaming backend the channel is opened here, so request-level
    /// failures surface as `Err`. With a blocking backend the call is deferred
    /// to the first pull and its failure arrives as a terminal error event.
    pub async fn open(&self, request: &ChatRequest) -> Result<RelayStream, RelayError> {
        let messages = self.prompt.build(request);
        let source: TextStream = if self.llm.supports_streaming() {
            tracing::debug!(turns = request.chat_history.len(), "Opening streaming reply");
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    return Err(RelayError::Transport("request cancelled".to_string()));
                }
                opened = self.llm.stream_completion(&messages) => opened.map_err(|e| {
                    tracing::warn!("Backend refused streaming request: {}", e);
                    RelayError::from(e)
                })?,
            }
        } else {
            tracing::debug!(turns = request.chat_history.len(), "Using blocking reply");
            let llm = Arc::clone(&self.llm);
            Box::pin(futures::stream::once(async move {
                llm.chat_completion(&messages).await
            }))
        };
        Ok(RelayStream::new(source, self.cancel.clone()))
    }

    /// Non-streaming fallback: the complete reply as one string.
    pub async fn send_message(&self, request: &ChatRequest) -> Result<String, RelayError> {
        if !self.llm.supports_streaming() {
            let messages = self.prompt.build(request);
            return tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    Err(RelayError::Transport("request cancelled".to_string()))
                }
                reply = self.llm.chat_completion(&messages) => reply.map_err(RelayError::from),
            };
        }

        let mut stream = self.open(request).await?;
        let mut reply = ReplyAccumulator::new();
        reply.begin();
        while let Some(event) = stream.next_event().await {
            reply.apply(event);
        }
        match reply.into_outcome() {
            ReplyOutcome::Complete(text) => Ok(text),
            ReplyOutcome::Failed { message, .. } => Err(RelayError::Backend(message)),
            ReplyOutcome::Interrupted { .. } => {
                Err(RelayError::Transport("reply interrupted".to_string()))
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::llm::ChatMessage;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// In-process backend that replays a fixed script.
    pub struct ScriptedLlm {
        streaming: bool,
        script: Vec<Result<String, LlmError>>,
        hang: bool,
        open_error: Option<LlmError>,
        pub calls: AtomicUsize,
        pub released: Arc<AtomicBool>,
        pub seen: Mutex<Vec<ChatMessage>>,
    }

    struct ReleaseGuard(Arc<AtomicBool>);

    impl Drop for ReleaseGuard {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    impl ScriptedLlm {
        fn with_script(streaming: bool, script: Vec<Result<String, LlmError>>) -> Self {
            Self {
                streaming,
                script,
                hang: false,
                open_error: None,
                calls: AtomicUsize::new(0),
                released: Arc::new(AtomicBool::new(false)),
                seen: Mutex::new(Vec::new()),
            }
        }

        pub fn streaming(fragments: &[&str]) -> Self {
            Self::with_script(
                true,
                fragments.iter().map(|f| Ok(f.to_string())).collect(),
            )
        }

        pub fn blocking(reply: &str) -> Self {
            Self::with_script(false, vec![Ok(reply.to_string())])
        }

        /// Streams `fragments`, then fails with an upstream error.
        pub fn failing_mid_stream(fragments: &[&str], message: &str) -> Self {
            let mut llm = Self::streaming(fragments);
            llm.script.push(Err(LlmError::upstream(message.to_string())));
            llm
        }

        pub fn failing_open(streaming: bool, error: LlmError) -> Self {
            let mut llm = Self::with_script(streaming, Vec::new());
            llm.open_error = Some(error);
            llm
        }

        /// Never finishes after the scripted items.
        pub fn hanging(mut self) -> Self {
            self.hang = true;
            self
        }

        pub fn was_released(&self) -> bool {
            self.released.load(Ordering::SeqCst)
        }

        fn record(&self, messages: &[ChatMessage]) {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.seen.lock().unwrap() = messages.to_vec();
        }
    }

    #[async_trait]
    impl LlmClient for ScriptedLlm {
        fn supports_streaming(&self) -> bool {
            self.streaming
        }

        async fn chat_completion(&self, messages: &[ChatMessage]) -> Result<String, LlmError> {
            self.record(messages);
            if let Some(err) = &self.open_error {
                return Err(err.clone());
            }
            if self.hang {
                futures::future::pending::<()>().await;
            }
            let mut reply = String::new();
            for item in &self.script {
                reply.push_str(&item.clone()?);
            }
            Ok(reply)
        }

        async fn stream_completion(&self, messages: &[ChatMessage]) -> Result<TextStream, LlmError> {
            self.record(messages);
            if let Some(err) = &self.open_error {
                return Err(err.clone());
            }
            let script = self.script.clone();
            let hang = self.hang;
            let guard = ReleaseGuard(Arc::clone(&self.released));
            Ok(Box::pin(async_stream::stream! {
                let _guard = guard;
                for item in script {
                    yield item;
                }
                if hang {
                    futures::future::pending::<()>().await;
                }
            }))
        }
    }
}
