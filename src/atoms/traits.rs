// ── Plantz Atoms: Collaborator Traits ──────────────────────────────────────
// The engine talks to two remote collaborators: the completion service (a
// streaming chat endpoint) and the appointments backend (booking submission
// plus an advisory slot check). Both are abstracted behind traits so the
// transport policy and the intake flow never depend on a concrete client —
// `engine::providers` and `engine::appointments` are the production
// implementations, `engine::sim` the scripted one.

use crate::atoms::error::EngineResult;
use crate::engine::types::{AppointmentRequest, CompletionRequest};
use async_trait::async_trait;
use futures::stream::BoxStream;

/// Raw byte chunks from an open completion stream, in arrival order.
/// Chunk boundaries are arbitrary — the decoder reassembles records.
pub type ChunkStream = BoxStream<'static, EngineResult<Vec<u8>>>;

/// The "open a stream" capability the transport policy wraps.
#[async_trait]
pub trait CompletionStream: Send + Sync {
    /// Open one streaming completion call. A non-success HTTP response maps
    /// to `EngineError::Rejection`; connection failures to
    /// `EngineError::Transport`. Retry is the caller's concern.
    async fn open(&self, request: &CompletionRequest) -> EngineResult<ChunkStream>;
}

/// The booking backend consumed by the intake flow's terminal step.
#[async_trait]
pub trait AppointmentBackend: Send + Sync {
    /// Submit one booking. `Ok(())` means the record was written.
    async fn submit(&self, request: &AppointmentRequest) -> EngineResult<()>;

    /// Advisory slot check: `true` means the slot looks free. Callers apply
    /// fail-open policy to errors; this method just reports them.
    async fn slot_available(&self, date: &str, time: &str) -> EngineResult<bool>;
}
