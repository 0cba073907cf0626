// Plantz Engine — Simulated completion endpoint
// A scripted stand-in for the hosted completion service: replies are split
// into word-sized deltas and framed exactly like the production wire, with
// an optional artificial inter-chunk delay for a streaming feel. Used by
// local development and by the engine's own tests; never in production.

use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::traits::{ChunkStream, CompletionStream};
use crate::engine::types::CompletionRequest;
use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// One scripted answer to an `open` call, consumed in push order.
#[derive(Debug, Clone)]
pub enum SimulatedResponse {
    /// Stream `text` as word deltas, then a completion record.
    Reply { text: String, continuation_token: Option<String> },
    /// Stream exactly these raw chunks — for exercising framing edge cases.
    Frames(Vec<Vec<u8>>),
    /// Reject the open call with this status and message.
    Failure { status: u16, message: String },
    /// Accept the open call but never deliver a chunk.
    Hang,
}

impl SimulatedResponse {
    pub fn reply(text: impl Into<String>, continuation_token: Option<&str>) -> Self {
        SimulatedResponse::Reply {
            text: text.into(),
            continuation_token: continuation_token.map(|s| s.to_string()),
        }
    }

    pub fn failure(status: u16, message: impl Into<String>) -> Self {
        SimulatedResponse::Failure { status, message: message.into() }
    }

    pub fn frames(chunks: Vec<Vec<u8>>) -> Self {
        SimulatedResponse::Frames(chunks)
    }
}

pub struct SimulatedCompletion {
    script: Mutex<VecDeque<SimulatedResponse>>,
    chunk_delay: Duration,
    calls: AtomicUsize,
}

impl Default for SimulatedCompletion {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedCompletion {
    pub fn new() -> Self {
        SimulatedCompletion {
            script: Mutex::new(VecDeque::new()),
            chunk_delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    /// Delay inserted between chunks, mimicking network pacing.
    pub fn with_chunk_delay(delay: Duration) -> Self {
        SimulatedCompletion { chunk_delay: delay, ..Self::new() }
    }

    /// Queue the next scripted response.
    pub fn push(&self, response: SimulatedResponse) {
        self.script.lock().push_back(response);
    }

    /// How many times `open` has been called.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }

    fn frames_for_reply(text: &str, continuation_token: Option<&str>) -> Vec<Vec<u8>> {
        let mut frames: Vec<Vec<u8>> = Vec::new();
        let words: Vec<&str> = text.split(' ').collect();
        for (i, word) in words.iter().enumerate() {
            let delta = if i + 1 < words.len() { format!("{word} ") } else { (*word).to_string() };
            let body = serde_json::json!({
                "type": "response.output_text.delta",
                "delta": delta,
            });
            frames.push(format!("data: {body}\n\n").into_bytes());
        }
        let mut done = serde_json::json!({ "type": "response.completed" });
        if let Some(token) = continuation_token {
            done["threadId"] = serde_json::Value::String(token.to_string());
        }
        frames.push(format!("data: {done}\n\n").into_bytes());
        frames
    }

    fn chunk_stream(&self, chunks: Vec<Vec<u8>>) -> ChunkStream {
        let delay = self.chunk_delay;
        futures::stream::iter(chunks.into_iter().map(Ok))
            .then(move |chunk: EngineResult<Vec<u8>>| async move {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                chunk
            })
            .boxed()
    }
}

#[async_trait]
impl CompletionStream for SimulatedCompletion {
    async fn open(&self, _request: &CompletionRequest) -> EngineResult<ChunkStream> {
        self.calls.fetch_add(1, Ordering::Relaxed);

        let next = self.script.lock().pop_front().unwrap_or_else(|| {
            SimulatedResponse::reply(
                "I'm a simulated Plantz agent response.",
                Some("sim-thread"),
            )
        });

        match next {
            SimulatedResponse::Reply { text, continuation_token } => {
                Ok(self.chunk_stream(Self::frames_for_reply(&text, continuation_token.as_deref())))
            }
            SimulatedResponse::Frames(chunks) => Ok(self.chunk_stream(chunks)),
            SimulatedResponse::Failure { status, message } => {
                Err(EngineError::Rejection { status, message })
            }
            SimulatedResponse::Hang => Ok(futures::stream::pending().boxed()),
        }
    }
}
