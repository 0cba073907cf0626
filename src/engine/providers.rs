// Plantz Engine — Completion service client
// Opens one streaming completion call against the hosted chat endpoint.
// Retry, timeout and deduplication live in the relay; this client's only
// jobs are the HTTP exchange and classifying open failures.

use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::traits::{ChunkStream, CompletionStream};
use crate::engine::config::EngineConfig;
use crate::engine::types::{truncate_chars, CompletionRequest};
use async_trait::async_trait;
use futures::StreamExt;
use log::{error, info};
use reqwest::Client;
use std::time::Duration;

pub struct HttpCompletionClient {
    client: Client,
    endpoint: String,
}

impl HttpCompletionClient {
    /// Build the client. A missing endpoint is fatal here, at startup.
    /// No overall request timeout is set on the HTTP client — the relay
    /// owns the wall-clock deadline for streaming calls.
    pub fn new(config: &EngineConfig) -> EngineResult<Self> {
        if config.chat_endpoint.trim().is_empty() {
            return Err(EngineError::Config("chat endpoint is not set".into()));
        }
        Ok(HttpCompletionClient {
            client: Client::builder()
                .connect_timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
            endpoint: config.chat_endpoint.clone(),
        })
    }
}

#[async_trait]
impl CompletionStream for HttpCompletionClient {
    async fn open(&self, request: &CompletionRequest) -> EngineResult<ChunkStream> {
        info!(
            "[provider] Opening completion stream, mode={:?} continuing={}",
            request.agent_mode,
            request.continuation_token.is_some(),
        );

        let response = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", "application/json")
            .json(request)
            .send()
            .await
            .map_err(|e| EngineError::Transport(format!("HTTP request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<serde_json::Value>(&body)
                .ok()
                .and_then(|v| v["error"].as_str().map(str::to_string))
                .unwrap_or_else(|| truncate_chars(&body, 200));
            error!("[provider] Completion service answered {status}: {message}");
            return Err(EngineError::Rejection { status, message });
        }

        let stream = response
            .bytes_stream()
            .map(|chunk| match chunk {
                Ok(bytes) => Ok(bytes.to_vec()),
                Err(e) => Err(EngineError::Transport(format!("Stream read error: {e}"))),
            })
            .boxed();
        Ok(stream)
    }
}
