//! Event-stream wire format between the relay and its consumers.
//!
//! One logical event per `data:` line, separated by a blank line:
//!
//! ```text
//! data: {"content":"<fragment>"}   zero or more, in order
//! data: {"error":"<message>"}      at most one, terminal
//! data: [DONE]                     terminal, marks success
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub const TEXT_EVENT_STREAM: &str = "text/event-stream";
pub const NO_CACHE: &str = "no-cache";
pub const DONE_MARKER: &str = "[DONE]";

/// One event in a relay sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEvent {
    Fragment(String),
    Error(String),
    Done,
}

impl RelayEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RelayEvent::Fragment(_))
    }

    /// Payload of the `data:` line, without the prefix.
    pub fn to_data(&self) -> String {
        match self {
            RelayEvent::Fragment(text) => json!({ "content": text }).to_string(),
            RelayEvent::Error(message) => json!({ "error": message }).to_string(),
            RelayEvent::Done => DONE_MARKER.to_string(),
        }
    }

    /// Full frame including the `data: ` prefix and the blank-line terminator.
    pub fn encode(&self) -> String {
        format!("data: {}\n\n", self.to_data())
    }

    /// Parse a `data:` payload. Returns `None` for anything that is not one of
    /// the three event shapes.
    pub fn parse_data(payload: &str) -> Option<Self> {
        let payload = payload.trim();
        if payload == DONE_MARKER {
            return Some(RelayEvent::Done);
        }
        let value: Value = serde_json::from_str(payload).ok()?;
        let object = value.as_object()?;
        if let Some(error) = object.get("error") {
            let message = match error {
                Value::String(s) => s.clone(),
                Value::Null => return None,
                other => other.to_string(),
            };
            return Some(RelayEvent::Error(message));
        }
        object
            .get("content")
            .and_then(Value::as_str)
            .map(|text| RelayEvent::Fragment(text.to_string()))
    }
}

/// Incremental decoder for a byte stream of `data:` frames.
///
/// Bytes are buffered across chunk boundaries so that a frame (or a multi-byte
/// character) split between reads is decoded once it is complete.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return every event completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<RelayEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(event) = Self::decode_line(&line) {
                events.push(event);
            }
        }
        events
    }

    /// Decode whatever is left once the byte stream has ended.
    pub fn finish(&mut self) -> Option<RelayEvent> {
        let line = std::mem::take(&mut self.buffer);
        Self::decode_line(&line)
    }

    fn decode_line(line: &[u8]) -> Option<RelayEvent> {
        let line = String::from_utf8_lossy(line);
        let line = line.trim_end_matches(['\n', '\r']);
        let payload = line.strip_prefix("data:")?;
        let payload = payload.strip_prefix(' ').unwrap_or(payload);
        let event = RelayEvent::parse_data(payload);
        if event.is_none() {
            tracing::debug!("Skipping malformed relay frame: {}", payload);
        }
        event
    }
}

/// Body of the non-streaming chat endpoint: `{"content": …}` or `{"error": …}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ChatResponse {
    pub fn content(text: impl Into<String>) -> Self {
        Self {
            content: Some(text.into()),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: None,
            error: Some(message.into()),
        }
    }

    /// An error field wins over content; a body with neither is an empty reply.
    pub fn into_result(self) -> Result<String, String> {
        match (self.error, self.content) {
            (Some(error), _) => Err(error),
            (None, content) => Ok(content.unwrap_or_default()),
        }
    }
}
