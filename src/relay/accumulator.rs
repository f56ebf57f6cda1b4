//! Consumer-side reply assembly.

use std::collections::VecDeque;
use std::fmt;

use bytes::Bytes;
use futures::{Stream, StreamExt};

use super::wire::{FrameDecoder, RelayEvent};
use super::RelayError;

/// Where a reply is in its lifecycle, as seen by the consumer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum StreamState {
    #[default]
    Idle,
    Streaming,
    Done,
    Failed(String),
    /// The sequence stopped without a terminal marker.
    Interrupted,
}

impl StreamState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StreamState::Idle | StreamState::Streaming)
    }
}

/// Final reading of a reply. Partial text is never reported as `Complete`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyOutcome {
    Complete(String),
    Failed { message: String, partial: String },
    Interrupted { partial: String },
}

/// Running concatenation of fragments plus a streaming flag, for progressive rendering.
#[derive(Debug, Clone, Default)]
pub struct ReplyAccumulator {
    text: String,
    state: StreamState,
}

impl ReplyAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a request as in flight and clear any previous text.
    pub fn begin(&mut self) {
        self.text.clear();
        self.state = StreamState::Streaming;
    }

    pub fn apply(&mut self, event: RelayEvent) {
        if self.state.is_terminal() {
            tracing::debug!(?event, "Ignoring event after terminal state");
            return;
        }
        match event {
            RelayEvent::Fragment(fragment) => {
                self.state = StreamState::Streaming;
                self.text.push_str(&fragment);
            }
            RelayEvent::Error(message) => self.state = StreamState::Failed(message),
            RelayEvent::Done => self.state = StreamState::Done,
        }
    }

    /// The sequence ended without `Done` or an error.
    pub fn interrupt(&mut self) {
        if !self.state.is_terminal() {
            self.state = StreamState::Interrupted;
        }
    }

    /// Text received so far.
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn state(&self) -> &StreamState {
        &self.state
    }

    pub fn is_streaming(&self) -> bool {
        self.state == StreamState::Streaming
    }

    /// `None` while the reply is still idle or streaming.
    pub fn outcome(&self) -> Option<ReplyOutcome> {
        self.state
            .is_terminal()
            .then(|| self.clone().into_outcome())
    }

    /// Consume the accumulator. A reply that never reached a terminal state
    /// counts as interrupted.
    pub fn into_outcome(self) -> ReplyOutcome {
        match self.state {
            StreamState::Done => ReplyOutcome::Complete(self.text),
            StreamState::Failed(message) => ReplyOutcome::Failed {
                message,
                partial: self.text,
            },
            StreamState::Idle | StreamState::Streaming | StreamState::Interrupted => {
                ReplyOutcome::Interrupted { partial: self.text }
            }
        }
    }
}

/// Reads relay events from a raw event-stream body.
///
/// The underlying byte stream is dropped as soon as a terminal event is
/// read, on a read error, or when the reader itself is dropped.
pub struct ChatStreamReader<S> {
    inner: Option<S>,
    decoder: FrameDecoder,
    pending: VecDeque<RelayEvent>,
    finished: bool,
}

impl<S, E> ChatStreamReader<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: fmt::Display,
{
    pub fn new(inner: S) -> Self {
        Self {
            inner: Some(inner),
            decoder: FrameDecoder::new(),
            pending: VecDeque::new(),
            finished: false,
        }
    }

    /// Whether the underlying byte stream has been dropped.
    pub fn is_released(&self) -> bool {
        self.inner.is_none()
    }

    /// Next event, `Ok(None)` after a terminal event, or a transport error if
    /// the body ends (or fails) before one arrives.
    pub async fn next_event(&mut self) -> Result<Option<RelayEvent>, RelayError> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                if event.is_terminal() {
                    self.release();
                }
                return Ok(Some(event));
            }
            if self.finished {
                return Ok(None);
            }

            let Some(inner) = self.inner.as_mut() else {
                self.release();
                return Err(RelayError::Transport(
                    "event stream ended without a terminal marker".to_string(),
                ));
            };
            match inner.next().await {
                Some(Ok(chunk)) => {
                    let events = self.decoder.push(&chunk);
                    self.pending.extend(events);
                }
                Some(Err(e)) => {
                    self.release();
                    return Err(RelayError::Transport(format!("event stream failed: {}", e)));
                }
                None => {
                    self.inner = None;
                    if let Some(event) = self.decoder.finish() {
                        self.pending.push_back(event);
                    }
                }
            }
        }
    }

    /// Drain the body into an accumulator.
    pub async fn accumulate(mut self) -> ReplyAccumulator {
        let mut reply = ReplyAccumulator::new();
        reply.begin();
        loop {
            match self.next_event().await {
                Ok(Some(event)) => reply.apply(event),
                Ok(None) => break,
                Err(e) => {
                    tracing::debug!("Reply interrupted: {}", e);
                    reply.interrupt();
                    break;
                }
            }
        }
        reply
    }

    fn release(&mut self) {
        self.inner = None;
        self.pending.clear();
        self.finished = true;
    }
}
