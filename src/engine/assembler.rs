// Plantz Engine — Message Assembler
// Folds a call's decoded events into one accumulating reply. Each delta
// hands the caller the *full* text so far, so rendering is a plain replace.
// The first non-empty accumulation fires a separate one-shot signal (used
// for reply-latency measurement). The caller owns the transcript and is
// responsible for rolling back the in-progress entry when assembly fails.

use crate::engine::http::{StreamHandle, MSG_STREAM_ENDED_EARLY};
use crate::engine::types::StreamEvent;
use log::debug;

/// Callbacks invoked while a reply assembles. `AssemblerHooks::noop()` is
/// for callers that only want the final outcome (eligibility checks).
pub struct AssemblerHooks<'a> {
    /// Full accumulated text after each fragment.
    pub on_delta: Box<dyn FnMut(&str) + 'a>,
    /// Fired once, on the first non-empty accumulated text.
    pub on_first_content: Box<dyn FnMut() + 'a>,
    /// Service-side phase updates ("queued", "in_progress", ...).
    pub on_status: Box<dyn FnMut(&str) + 'a>,
}

impl AssemblerHooks<'_> {
    pub fn noop() -> Self {
        AssemblerHooks {
            on_delta: Box::new(|_| {}),
            on_first_content: Box::new(|| {}),
            on_status: Box::new(|_| {}),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AssemblyOutcome {
    /// The stream completed; `text` is the frozen reply.
    Completed { text: String, continuation_token: Option<String> },
    /// The stream failed mid-flight. Whatever was accumulated must be
    /// discarded by the caller — never left half-written.
    Failed { message: String },
}

/// Drive one call's events to a terminal outcome.
pub async fn assemble(
    handle: &mut StreamHandle,
    hooks: &mut AssemblerHooks<'_>,
) -> AssemblyOutcome {
    let mut text = String::new();
    let mut first_content_seen = false;

    while let Some(event) = handle.next_event().await {
        match event {
            StreamEvent::Status { phase } => {
                debug!("[assembler] Service phase: {phase}");
                (hooks.on_status)(&phase);
            }
            StreamEvent::Delta { fragment } => {
                text.push_str(&fragment);
                if !first_content_seen && !text.trim().is_empty() {
                    first_content_seen = true;
                    (hooks.on_first_content)();
                }
                (hooks.on_delta)(&text);
            }
            StreamEvent::Completed { continuation_token } => {
                return AssemblyOutcome::Completed { text, continuation_token };
            }
            StreamEvent::StreamError { message } => {
                return AssemblyOutcome::Failed { message };
            }
        }
    }

    // The channel closed without a terminal event — aborted or reset.
    AssemblyOutcome::Failed { message: MSG_STREAM_ENDED_EARLY.into() }
}

// ── Tests ──────────────────────────────────────────────────────────────────
