// ── Plantz Atoms: Error Types ──────────────────────────────────────────────
// Single canonical error enum for the engine, built with `thiserror`.
//
// Design rules:
//   • Variants are coarse-grained by failure class (transport, timeout,
//     rejection, protocol, config) rather than by collaborator.
//   • `#[from]` wires std/serde conversions automatically.
//   • No variant carries secret material in its message.

use std::time::Duration;
use thiserror::Error;

// ── Primary error enum ─────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum EngineError {
    /// Network-level failure (DNS, connect, reset). Transient: the transport
    /// policy retries these before surfacing them.
    #[error("Network error: {0}")]
    Transport(String),

    /// The wall-clock deadline for a call expired.
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// The remote service answered with a non-success status and a
    /// structured error body.
    #[error("Service rejected the request ({status}): {message}")]
    Rejection { status: u16, message: String },

    /// The event stream was malformed or ended without a terminal record.
    #[error("Stream protocol error: {0}")]
    StreamProtocol(String),

    /// Required configuration (endpoint, credential) is missing or invalid.
    /// Fatal at client construction, never per-request.
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON serialization / deserialization failure.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Filesystem or OS-level I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ── Convenience alias ──────────────────────────────────────────────────────

/// All engine operations return this type.
pub type EngineResult<T> = Result<T, EngineError>;

impl EngineError {
    /// Create a transport error from anything displayable.
    pub fn transport(message: impl std::fmt::Display) -> Self {
        Self::Transport(message.to_string())
    }
}
