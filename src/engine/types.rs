// Plantz Engine — Core types
// The data structures that flow through the engine: transcript entries,
// decoded stream events, and the wire shapes of both remote collaborators.

use serde::{Deserialize, Serialize};

// ── Transcript ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One line of the conversation. The content of the last assistant entry is
/// mutated in place while a response streams, then frozen on completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub role: Role,
    pub content: String,
}

impl TranscriptEntry {
    pub fn user(content: impl Into<String>) -> Self {
        TranscriptEntry { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        TranscriptEntry { role: Role::Assistant, content: content.into() }
    }
}

// ── Agent modes ────────────────────────────────────────────────────────

/// Which specialist persona the completion service should answer as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentMode {
    Information,
    Eligibility,
    Booking,
}

impl AgentMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentMode::Information => "information",
            AgentMode::Eligibility => "eligibility",
            AgentMode::Booking => "booking",
        }
    }
}

// ── Decoded stream events ──────────────────────────────────────────────

/// One decoded record from the completion service's event stream.
/// At most one `Completed` or `StreamError` terminates a stream; the
/// decoder drops anything arriving after a terminal event.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// The service is still working ("queued", "in_progress", ...).
    Status { phase: String },
    /// An incremental fragment of the reply text.
    Delta { fragment: String },
    /// The reply finished; carries the conversation continuation token
    /// when the service opened a new thread for this session.
    Completed { continuation_token: Option<String> },
    /// The stream failed — either reported by the service or synthesized
    /// by the transport layer on read failure or timeout.
    StreamError { message: String },
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Completed { .. } | StreamEvent::StreamError { .. })
    }
}

// ── Completion request (wire) ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionRequest {
    pub input: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub continuation_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_mode: Option<AgentMode>,
}

impl CompletionRequest {
    /// Deduplication fingerprint: two requests with the same input, thread
    /// and agent mode are the same logical call and share one connection.
    pub fn fingerprint(&self) -> String {
        format!(
            "{}|{}|{}",
            self.input,
            self.continuation_token.as_deref().unwrap_or(""),
            self.agent_mode.map(|m| m.as_str()).unwrap_or(""),
        )
    }
}

// ── Appointment submission (wire) ──────────────────────────────────────

/// Payload for the booking backend. `phone` is digits-only; the date and
/// time are preserved exactly as the user entered them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppointmentRequest {
    pub name: String,
    pub phone: String,
    pub preferred_date_time_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prior_treatments: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contraindication_history: Option<String>,
}

// ── Helpers ────────────────────────────────────────────────────────────

/// Truncate to at most `max` characters on a char boundary.
/// Used for history previews and log lines.
pub fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}
