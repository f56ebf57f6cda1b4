//! Pull-based reply sequence.
//!
//! # State Machine
//! ```text
//! Idle ──first pull──► Streaming ──backend end──► Done      (emits Done)
//!                          │     ──backend err──► Errored   (emits Error)
//!                          └─────cancel/token───► Cancelled (emits nothing)
//! ```
//!
//! Leaving `Idle`/`Streaming` drops the backend channel. Terminal states
//! always answer `None`; a stream is never restarted.

use futures::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;

use super::backend_message;
use super::wire::RelayEvent;
use crate::llm::{LlmError, TextStream};

/// Observable state of a [`RelayStream`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    Idle,
    Streaming,
    Done,
    Errored,
    Cancelled,
}

impl RelayState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, RelayState::Idle | RelayState::Streaming)
    }
}

enum Phase {
    Idle(TextStream),
    Streaming(TextStream),
    Done,
    Errored,
    Cancelled,
}

enum Pulled {
    Cancelled,
    Item(Option<Result<String, LlmError>>),
}

/// Single-consumer, non-restartable sequence of [`RelayEvent`]s.
pub struct RelayStream {
    phase: Phase,
    cancel: CancellationToken,
}

impl RelayStream {
    pub(crate) fn new(source: TextStream, cancel: CancellationToken) -> Self {
        Self {
            phase: Phase::Idle(source),
            cancel,
        }
    }

    pub fn state(&self) -> RelayState {
        match self.phase {
            Phase::Idle(_) => RelayState::Idle,
            Phase::Streaming(_) => RelayState::Streaming,
            Phase::Done => RelayState::Done,
            Phase::Errored => RelayState::Errored,
            Phase::Cancelled => RelayState::Cancelled,
        }
    }

    /// Pull the next fragment or terminal marker.
    ///
    /// Returns `None` once a terminal event has been delivered, or when the
    /// exchange is cancelled (no `Done` is emitted in that case).
    pub async fn next_event(&mut self) -> Option<RelayEvent> {
        if self.state().is_terminal() {
            return None;
        }
        if self.cancel.is_cancelled() {
            self.cancel();
            return None;
        }

        self.phase = match std::mem::replace(&mut self.phase, Phase::Done) {
            Phase::Idle(source) => {
                tracing::debug!("Relay stream started");
                Phase::Streaming(source)
            }
            other => other,
        };

        let cancel = self.cancel.clone();
        let Phase::Streaming(source) = &mut self.phase else {
            return None;
        };
        let pulled = loop {
            let pulled = tokio::select! {
                biased;
                _ = cancel.cancelled() => Pulled::Cancelled,
                item = source.next() => Pulled::Item(item),
            };
            match pulled {
                Pulled::Item(Some(Ok(text))) if text.is_empty() => continue,
                other => break other,
            }
        };

        match pulled {
            Pulled::Cancelled => {
                self.cancel();
                None
            }
            Pulled::Item(Some(Ok(text))) => Some(RelayEvent::Fragment(text)),
            Pulled::Item(Some(Err(err))) => {
                tracing::warn!("Relay stream failed: {}", err);
                self.phase = Phase::Errored;
                Some(RelayEvent::Error(backend_message(&err)))
            }
            Pulled::Item(None) => {
                tracing::debug!("Relay stream completed");
                self.phase = Phase::Done;
                Some(RelayEvent::Done)
            }
        }
    }

    /// Stop emitting and release the backend channel now.
    pub fn cancel(&mut self) {
        if !self.state().is_terminal() {
            tracing::debug!("Relay stream cancelled");
            self.phase = Phase::Cancelled;
        }
    }

    /// Adapt into a `Stream` (for SSE responses). Dropping it releases the channel.
    pub fn into_events(self) -> impl Stream<Item = RelayEvent> + Send {
        futures::stream::unfold(self, |mut stream| async move {
            let event = stream.next_event().await?;
            Some((event, stream))
        })
    }
}

impl Drop for RelayStream {
    fn drop(&mut self) {
        if !self.state().is_terminal() {
            tracing::debug!(state = ?self.state(), "Relay stream abandoned before completion");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn source(items: Vec<Result<&'static str, LlmError>>) -> TextStream {
        Box::pin(stream::iter(
            items.into_iter().map(|item| item.map(str::to_string)),
        ))
    }

    #[tokio::test]
    async fn test_state_progression() {
        let mut relay = RelayStream::new(
            source(vec![Ok("a"), Ok(""), Ok("b")]),
            CancellationToken::new(),
        );
        assert_eq!(relay.state(), RelayState::Idle);

        assert_eq!(relay.next_event().await, Some(RelayEvent::Fragment("a".into())));
        assert_eq!(relay.state(), RelayState::Streaming);
        assert_eq!(relay.next_event().await, Some(RelayEvent::Fragment("b".into())));
        assert_eq!(relay.next_event().await, Some(RelayEvent::Done));
        assert_eq!(relay.state(), RelayState::Done);
        assert_eq!(relay.next_event().await, None);
        assert_eq!(relay.next_event().await, None);
    }

    #[tokio::test]
    async fn test_error_is_terminal() {
        let mut relay = RelayStream::new(
            source(vec![
                Err(LlmError::network_error("reset by peer".to_string())),
                Ok("unreachable"),
            ]),
            CancellationToken::new(),
        );
        match relay.next_event().await {
            Some(RelayEvent::Error(message)) => assert!(message.contains("reset by peer")),
            other => panic!("expected error event, got {:?}", other),
        }
        assert_eq!(relay.state(), RelayState::Errored);
        assert_eq!(relay.next_event().await, None);
    }

    #[tokio::test]
    async fn test_cancel_before_first_pull() {
        let mut relay = RelayStream::new(source(vec![Ok("a")]), CancellationToken::new());
        relay.cancel();
        assert_eq!(relay.state(), RelayState::Cancelled);
        assert_eq!(relay.next_event().await, None);
    }

    #[tokio::test]
    async fn test_cancelled_token_stops_idle_stream() {
        let token = CancellationToken::new();
        let mut relay = RelayStream::new(source(vec![Ok("a")]), token.clone());
        token.cancel();
        assert_eq!(relay.next_event().await, None);
        assert_eq!(relay.state(), RelayState::Cancelled);
    }

    #[tokio::test]
    async fn test_into_events_ends_after_terminal() {
        let relay = RelayStream::new(
            source(vec![Ok("Hel"), Ok("lo")]),
            CancellationToken::new(),
        );
        let events: Vec<RelayEvent> = relay.into_events().collect().await;
        assert_eq!(
            events,
            vec![
                RelayEvent::Fragment("Hel".into()),
                RelayEvent::Fragment("lo".into()),
                RelayEvent::Done,
            ]
        );
    }
}
