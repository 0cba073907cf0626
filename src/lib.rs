// Plantz Engine — streaming chat core for the Plantz advice widget.
// The embedding application owns rendering; this crate owns the completion
// stream relay, the conversation session, the eligibility/booking intake
// flow, and the cross-frame embed bridge.

pub mod atoms;
pub mod engine;

pub use atoms::error::{EngineError, EngineResult};
pub use engine::booking::{BookingFlow, BookingStep, FlowOutcome};
pub use engine::config::EngineConfig;
pub use engine::embed::{EmbedBridge, EmbedCommand, FrameTransport};
pub use engine::http::{Relay, StreamHandle};
pub use engine::session::{ChatSession, EventSink, SessionEvent, SessionPhase};
pub use engine::types::{AgentMode, Role, StreamEvent, TranscriptEntry};
