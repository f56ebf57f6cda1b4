//! HTTP client for the relay's chat endpoints.

use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use reqwest::{Client, StatusCode};

use super::accumulator::ChatStreamReader;
use super::wire::{ChatResponse, TEXT_EVENT_STREAM};
use super::{ChatRequest, RelayError};

pub type ByteStream = BoxStream<'static, reqwest::Result<Bytes>>;

pub struct RelayClient {
    client: Client,
    base_url: String,
}

impl RelayClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    /// Complete reply through `POST /api/chat`.
    pub async fn send_message(&self, request: &ChatRequest) -> Result<String, RelayError> {
        let response = self
            .client
            .post(self.url("/api/chat"))
            .json(request)
            .send()
            .await
            .map_err(|e| RelayError::Transport(format!("request failed: {}", e)))?;

        let status = response.status();
        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| RelayError::Transport(format!("invalid response body: {}", e)))?;
        match body.into_result() {
            Ok(text) if status.is_success() => Ok(text),
            Ok(_) => Err(error_for_status(status, status.to_string())),
            Err(message) => Err(error_for_status(status, message)),
        }
    }

    /// Incremental reply through `POST /api/chat/stream`.
    pub async fn stream_message(
        &self,
        request: &ChatRequest,
    ) -> Result<ChatStreamReader<ByteStream>, RelayError> {
        let response = self
            .client
            .post(self.url("/api/chat/stream"))
            .header(reqwest::header::ACCEPT, TEXT_EVENT_STREAM)
            .json(request)
            .send()
            .await
            .map_err(|e| RelayError::Transport(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .json::<ChatResponse>()
                .await
                .ok()
                .and_then(|body| body.error)
                .unwrap_or_else(|| status.to_string());
            return Err(error_for_status(status, message));
        }
        Ok(ChatStreamReader::new(response.bytes_stream().boxed()))
    }
}

fn error_for_status(status: StatusCode, message: String) -> RelayError {
    match status {
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => RelayError::Validation(message),
        StatusCode::GATEWAY_TIMEOUT => RelayError::Transport(message),
        _ => RelayError::Backend(message),
    }
}
