//! OpenRouter API client implementation with automatic retry for transient errors.
//!
//! Works against any OpenAI-compatible `/chat/completions` endpoint.

use std::future::Future;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, RequestBuilder};
use reqwest_eventsource::{Error as EventSourceError, Event, EventSource};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::{extract_error_message, LlmError, RetryConfig};
use super::{ChatMessage, LlmClient, TextStream};

pub const DEFAULT_API_URL: &str = "https://openrouter.ai/api/v1";

/// OpenRouter API client with automatic retry for transient errors.
pub struct OpenRouterClient {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    temperature: Option<f64>,
    streaming: bool,
    retry_config: RetryConfig,
}

impl OpenRouterClient {
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url: DEFAULT_API_URL.to_string(),
            model,
            temperature: None,
            streaming: true,
            retry_config: RetryConfig::default(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_temperature(mut self, temperature: Option<f64>) -> Self {
        self.temperature = temperature;
        self
    }

    /// Advertise (or withhold) incremental output to callers.
    pub fn with_streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }

    pub fn with_retry_config(mut self, retry_config: RetryConfig) -> Self {
        self.retry_config = retry_config;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    fn build_request(&self, messages: &[ChatMessage], stream: bool) -> CompletionRequest {
        CompletionRequest {
            model: self.model.clone(),
            messages: messages.to_vec(),
            stream,
            temperature: self.temperature,
        }
    }

    fn request_builder(&self, request: &CompletionRequest) -> RequestBuilder {
        self.client
            .post(self.endpoint())
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("HTTP-Referer", "https://github.com/coachboard")
            .header("X-Title", "Coachboard")
            .json(request)
    }

    /// Parse Retry-After header if present (seconds form only).
    fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
        headers
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse::<u64>().ok())
            .map(Duration::from_secs)
    }

    fn send_error(e: reqwest::Error) -> LlmError {
        if e.is_timeout() {
            LlmError::network_error(format!("Request timeout: {}", e))
        } else if e.is_connect() {
            LlmError::network_error(format!("Connection failed: {}", e))
        } else {
            LlmError::network_error(format!("Request failed: {}", e))
        }
    }

    /// Execute a single blocking request without retry.
    async fn execute_request(&self, request: &CompletionRequest) -> Result<String, LlmError> {
        let response = self
            .request_builder(request)
            .send()
            .await
            .map_err(Self::send_error)?;

        let status = response.status();
        let retry_after = Self::parse_retry_after(response.headers());
        let body = response.text().await.unwrap_or_default();

        if !status.is_success() {
            return Err(LlmError::from_status(status.as_u16(), &body, retry_after));
        }

        let parsed: CompletionResponse = serde_json::from_str(&body).map_err(|e| {
            LlmError::parse_error(format!("Failed to parse response: {}, body: {}", e, body))
        })?;
        if let Some(error) = parsed.error {
            return Err(LlmError::upstream(error_message(&error)));
        }

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::parse_error("No choices in response".to_string()))?;
        choice
            .message
            .content
            .ok_or_else(|| LlmError::parse_error("No content in response".to_string()))
    }

    /// Open an event stream and wait for the server to accept it.
    async fn open_stream(&self, request: &CompletionRequest) -> Result<EventSource, LlmError> {
        let mut source = EventSource::new(self.request_builder(request))
            .map_err(|e| LlmError::network_error(format!("Cannot open event stream: {}", e)))?;
        source.set_retry_policy(Box::new(reqwest_eventsource::retry::Never));

        match source.next().await {
            Some(Ok(Event::Open)) => Ok(source),
            Some(Ok(Event::Message(_))) => {
                source.close();
                Err(LlmError::parse_error(
                    "event stream produced data before opening".to_string(),
                ))
            }
            Some(Err(err)) => {
                source.close();
                Err(Self::open_error(err).await)
            }
            None => Err(LlmError::network_error(
                "event stream closed before opening".to_string(),
            )),
        }
    }

    async fn open_error(err: EventSourceError) -> LlmError {
        match err {
            EventSourceError::InvalidStatusCode(status, response) => {
                let retry_after = Self::parse_retry_after(response.headers());
                let body = response.text().await.unwrap_or_default();
                LlmError::from_status(status.as_u16(), &body, retry_after)
            }
            EventSourceError::InvalidContentType(content_type, response) => {
                // Some providers answer a streaming request with a plain JSON error.
                let body = response.text().await.unwrap_or_default();
                if serde_json::from_str::<Value>(&body)
                    .map(|v| v.get("error").is_some())
                    .unwrap_or(false)
                {
                    LlmError::upstream(extract_error_message(&body))
                } else {
                    LlmError::parse_error(format!(
                        "Expected text/event-stream, got {:?}",
                        content_type
                    ))
                }
            }
            EventSourceError::Transport(e) => Self::send_error(e),
            other => LlmError::network_error(other.to_string()),
        }
    }

    /// Run `op` with automatic retry for transient errors.
    async fn with_retry<T, F, Fut>(&self, mut op: F) -> Result<T, LlmError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, LlmError>>,
    {
        let start = Instant::now();
        let mut attempt = 0;

        loop {
            match op().await {
                Ok(value) => {
                    if attempt > 0 {
                        tracing::info!(
                            "Request succeeded after {} retries (total time: {:?})",
                            attempt,
                            start.elapsed()
                        );
                    }
                    return Ok(value);
                }
                Err(error) => {
                    let should_retry = self.retry_config.should_retry(&error)
                        && attempt < self.retry_config.max_retries;
                    let remaining = self
                        .retry_config
                        .max_retry_duration
                        .saturating_sub(start.elapsed());
                    let delay = error.suggested_delay(attempt).min(remaining);

                    if !should_retry || delay.is_zero() {
                        if attempt > 0 {
                            tracing::error!(
                                "Request failed after {} retries (total time: {:?}): {}",
                                attempt,
                                start.elapsed(),
                                error
                            );
                        } else {
                            tracing::error!("Request failed (non-retryable): {}", error);
                        }
                        return Err(error);
                    }

                    tracing::warn!(
                        "Retry attempt {} failed with {}, retrying in {:?}: {}",
                        attempt + 1,
                        error.kind,
                        delay,
                        error.message
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[async_trait]
impl LlmClient for OpenRouterClient {
    fn supports_streaming(&self) -> bool {
        self.streaming
    }

    async fn chat_completion(&self, messages: &[ChatMessage]) -> Result<String, LlmError> {
        let request = self.build_request(messages, false);
        tracing::debug!(model = %self.model, messages = messages.len(), "Sending completion request");
        self.with_retry(|| self.execute_request(&request)).await
    }

    async fn stream_completion(&self, messages: &[ChatMessage]) -> Result<TextStream, LlmError> {
        let request = self.build_request(messages, true);
        tracing::debug!(model = %self.model, messages = messages.len(), "Opening completion stream");
        let source = self.with_retry(|| self.open_stream(&request)).await?;
        Ok(into_text_stream(source))
    }
}

/// Map an opened event source to content fragments.
///
/// Ends cleanly only on `[DONE]`. A server that closes the stream without it
/// yields a network error. The event source is closed on every exit path, and
/// dropping the returned stream drops it too.
fn into_text_stream(mut source: EventSource) -> TextStream {
    Box::pin(async_stream::stream! {
        let mut terminated = false;
        while let Some(event) = source.next().await {
            match event {
                Ok(Event::Open) => {}
                Ok(Event::Message(message)) => match parse_stream_chunk(&message.data) {
                    StreamChunk::Text(text) => yield Ok(text),
                    StreamChunk::Empty => {}
                    StreamChunk::Done => {
                        terminated = true;
                        break;
                    }
                    StreamChunk::Upstream(msg) => {
                        terminated = true;
                        yield Err(LlmError::upstream(msg));
                        break;
                    }
                    StreamChunk::Malformed(reason) => {
                        tracing::debug!("Skipping malformed stream frame: {}", reason);
                    }
                },
                Err(EventSourceError::StreamEnded) => break,
                Err(err) => {
                    terminated = true;
                    yield Err(LlmError::network_error(format!("Stream interrupted: {}", err)));
                    break;
                }
            }
        }
        source.close();
        if !terminated {
            tracing::warn!("Backend closed the event stream without [DONE]");
            yield Err(LlmError::network_error(
                "stream ended without [DONE]".to_string(),
            ));
        }
    })
}

#[derive(Debug, PartialEq)]
enum StreamChunk {
    Text(String),
    /// Role-only deltas, usage frames, finish markers.
    Empty,
    Done,
    Upstream(String),
    Malformed(String),
}

fn parse_stream_chunk(data: &str) -> StreamChunk {
    let data = data.trim();
    if data == "[DONE]" {
        return StreamChunk::Done;
    }
    let chunk: CompletionChunk = match serde_json::from_str(data) {
        Ok(chunk) => chunk,
        Err(e) => return StreamChunk::Malformed(e.to_string()),
    };
    if let Some(error) = chunk.error {
        return StreamChunk::Upstream(error_message(&error));
    }
    match chunk
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.delta.content)
    {
        Some(text) if !text.is_empty() => StreamChunk::Text(text),
        _ => StreamChunk::Empty,
    }
}

fn error_message(error: &Value) -> String {
    error
        .get("message")
        .and_then(|m| m.as_str())
        .or_else(|| error.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| error.to_string())
}

#[derive(Debug, Serialize)]
struct CompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
    #[serde(default)]
    error: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    error: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    content: Option<String>,
}
