// Plantz Engine — Conversation Session
// Owns the transcript, the active agent mode and the conversation's
// continuation token. All mutation flows through `&mut self`, so the
// transcript has exactly one writer by construction; the booking flow and
// the embed bridge ask the session to append, never reach in themselves.
//
// Send discipline: one response at a time. While a reply is streaming the
// session is not Idle and further sends no-op. Every streaming turn begins
// with an empty assistant placeholder that the assembler fills in place;
// any failure removes that placeholder — a half-written reply never
// survives in the transcript.

use crate::engine::assembler::{assemble, AssemblerHooks, AssemblyOutcome};
use crate::engine::history::HistoryLog;
use crate::engine::http::{
    Relay, MSG_REQUEST_TIMED_OUT, MSG_STREAM_ENDED_EARLY, MSG_STREAM_INTERRUPTED,
};
use crate::engine::types::{
    truncate_chars, AgentMode, CompletionRequest, Role, TranscriptEntry,
};
use log::{debug, info, warn};
use std::sync::Arc;

// ── Session events ─────────────────────────────────────────────────────────

/// Lifecycle notifications for the host page (and, through the embed
/// bridge, the parent frame).
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    ConversationStarted { preview: String },
    /// Full accumulated reply text after each fragment — render as replace.
    AssistantDelta { text: String },
    FirstReplyReceived,
    ConversationReset,
    BookingStarted,
    BookingCompleted { date: String, time: String, phone: String },
    ErrorOccurred { message: String },
}

impl SessionEvent {
    pub fn name(&self) -> &'static str {
        match self {
            SessionEvent::ConversationStarted { .. } => "conversation-started",
            SessionEvent::AssistantDelta { .. } => "assistant-delta",
            SessionEvent::FirstReplyReceived => "first-reply-received",
            SessionEvent::ConversationReset => "conversation-reset",
            SessionEvent::BookingStarted => "booking-started",
            SessionEvent::BookingCompleted { .. } => "booking-completed",
            SessionEvent::ErrorOccurred { .. } => "error",
        }
    }

    pub fn detail(&self) -> serde_json::Value {
        match self {
            SessionEvent::ConversationStarted { preview } => {
                serde_json::json!({ "preview": preview })
            }
            SessionEvent::AssistantDelta { text } => serde_json::json!({ "text": text }),
            SessionEvent::BookingCompleted { date, time, phone } => {
                serde_json::json!({ "date": date, "time": time, "phone": phone })
            }
            SessionEvent::ErrorOccurred { message } => serde_json::json!({ "message": message }),
            _ => serde_json::Value::Null,
        }
    }
}

/// Where session events go. The host wires this to its UI layer or to the
/// embed bridge.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &SessionEvent);
}

/// Discards everything — for headless use and tests.
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: &SessionEvent) {}
}

// ── Phase gate ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    Sending,
    Streaming,
}

// ── The session ────────────────────────────────────────────────────────────

pub struct ChatSession {
    relay: Relay,
    transcript: Vec<TranscriptEntry>,
    continuation_token: Option<String>,
    agent_mode: AgentMode,
    phase: SessionPhase,
    first_user_message: bool,
    last_error: Option<String>,
    greeting: String,
    history: HistoryLog,
    events: Arc<dyn EventSink>,
}

impl ChatSession {
    pub fn new(
        relay: Relay,
        greeting: impl Into<String>,
        history: HistoryLog,
        events: Arc<dyn EventSink>,
    ) -> Self {
        let greeting = greeting.into();
        ChatSession {
            relay,
            transcript: vec![TranscriptEntry::assistant(greeting.clone())],
            continuation_token: None,
            agent_mode: AgentMode::Information,
            phase: SessionPhase::Idle,
            first_user_message: true,
            last_error: None,
            greeting,
            history,
            events,
        }
    }

    // ── Accessors ──────────────────────────────────────────────────────

    pub fn transcript(&self) -> &[TranscriptEntry] {
        &self.transcript
    }

    pub fn continuation_token(&self) -> Option<&str> {
        self.continuation_token.as_deref()
    }

    pub fn agent_mode(&self) -> AgentMode {
        self.agent_mode
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// The dismissible inline error from the last failed turn, if any.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn history(&self) -> &HistoryLog {
        &self.history
    }

    pub fn relay(&self) -> &Relay {
        &self.relay
    }

    /// Emit a lifecycle event on the session's sink. Used by the caller
    /// for flow-level events (booking started / completed).
    pub fn emit(&self, event: SessionEvent) {
        self.events.emit(&event);
    }

    // ── Operations ─────────────────────────────────────────────────────

    /// Send one user message and stream the reply into the transcript.
    /// No-ops (silently) on blank input or when a send is already active.
    pub async fn send(&mut self, text: &str) {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return;
        }
        if self.phase != SessionPhase::Idle {
            debug!("[session] Ignoring send while {:?}", self.phase);
            return;
        }

        self.last_error = None;
        self.phase = SessionPhase::Sending;
        self.transcript.push(TranscriptEntry::user(trimmed));
        info!("[session] Sending: {}", truncate_chars(trimmed, 80));

        if self.first_user_message {
            self.first_user_message = false;
            self.history.record(trimmed);
            self.events.emit(&SessionEvent::ConversationStarted {
                preview: truncate_chars(trimmed, 100),
            });
        }

        let request = CompletionRequest {
            input: trimmed.to_string(),
            continuation_token: self.continuation_token.clone(),
            agent_mode: Some(self.agent_mode),
        };
        let mut handle = self.relay.send(&request);

        // The placeholder the assembler fills. From here on, every exit
        // path must either freeze it or remove it.
        self.transcript.push(TranscriptEntry::assistant(""));
        self.phase = SessionPhase::Streaming;

        let outcome = {
            let transcript = &mut self.transcript;
            let events_for_delta = Arc::clone(&self.events);
            let events_for_first = Arc::clone(&self.events);
            let mut hooks = AssemblerHooks {
                on_delta: Box::new(move |full: &str| {
                    if let Some(entry) = transcript.last_mut() {
                        entry.content = full.to_string();
                    }
                    events_for_delta.emit(&SessionEvent::AssistantDelta { text: full.to_string() });
                }),
                on_first_content: Box::new(move || {
                    events_for_first.emit(&SessionEvent::FirstReplyReceived);
                }),
                on_status: Box::new(|phase| debug!("[session] Completion phase: {phase}")),
            };
            assemble(&mut handle, &mut hooks).await
        };

        match outcome {
            AssemblyOutcome::Completed { text, continuation_token } => {
                if let Some(entry) = self.transcript.last_mut() {
                    entry.content = text;
                }
                self.pin_continuation_token(continuation_token);
            }
            AssemblyOutcome::Failed { message } => {
                // Roll back the in-progress reply — never leave it half-written.
                if self.transcript.last().map(|e| e.role) == Some(Role::Assistant) {
                    self.transcript.pop();
                }
                warn!("[session] Turn failed: {message}");
                let user_message = user_facing_stream_error(&message);
                self.last_error = Some(user_message.clone());
                self.events.emit(&SessionEvent::ErrorOccurred { message: user_message });
            }
        }
        self.phase = SessionPhase::Idle;
    }

    /// Start over: greeting-only transcript, no continuation token,
    /// Information mode, in-flight work cancelled.
    pub fn reset(&mut self) {
        self.relay.reset();
        self.transcript = vec![TranscriptEntry::assistant(self.greeting.clone())];
        self.continuation_token = None;
        self.agent_mode = AgentMode::Information;
        self.phase = SessionPhase::Idle;
        self.first_user_message = true;
        self.last_error = None;
        info!("[session] Reset");
        self.events.emit(&SessionEvent::ConversationReset);
    }

    pub fn switch_agent(&mut self, mode: AgentMode) {
        debug!("[session] Agent mode -> {:?}", mode);
        self.agent_mode = mode;
    }

    /// Append a finished assistant message (booking confirmations,
    /// cancellation notices). Not valid mid-stream.
    pub fn append_assistant_message(&mut self, text: &str) {
        if self.phase != SessionPhase::Idle {
            warn!("[session] Dropping assistant message appended mid-stream");
            return;
        }
        self.transcript.push(TranscriptEntry::assistant(text));
    }

    /// Plain-text transcript for the download button.
    pub fn export_transcript(&self) -> String {
        self.transcript
            .iter()
            .map(|entry| {
                let who = match entry.role {
                    Role::User => "You",
                    Role::Assistant => "Agent",
                };
                format!("{who}: {}", entry.content)
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// First write wins: the token identifies this session's conversation
    /// on the provider side and must never change once set.
    fn pin_continuation_token(&mut self, token: Option<String>) {
        match (&self.continuation_token, token) {
            (None, Some(token)) => {
                info!("[session] Continuation token pinned");
                self.continuation_token = Some(token);
            }
            (Some(current), Some(token)) if *current != token => {
                debug!("[session] Ignoring differing continuation token after pin");
            }
            _ => {}
        }
    }
}

fn user_facing_stream_error(message: &str) -> String {
    match message {
        MSG_STREAM_INTERRUPTED | MSG_STREAM_ENDED_EARLY => {
            "Something went wrong. Please try again.".into()
        }
        MSG_REQUEST_TIMED_OUT => "The request timed out. Please try again.".into(),
        other => format!("Error: {other}"),
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────
