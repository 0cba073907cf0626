// Plantz Engine — Embed Bridge
// Cross-frame relay between the embedded widget and its host page. The
// embedded side does not know the parent's origin up front: it learns it
// from the first inbound message that passes the allow-list, pins it, and
// from then on every outbound message targets exactly that origin. The
// two phases are a sum type, so "sending real data to a wildcard target"
// is not a state this code can reach.
//
// Inbound:  {type:"seed", payload:{question}} — honored once per page load
//           {type:"command", payload:{name:"reset"|"focus"}}
// Outbound: {type:"ready"}                       (pre-pin, wildcard target)
//           {type:"height", payload:{height}}    (per-frame, on change only)
//           {type:"event", payload:{name, detail, source}}

use crate::engine::session::SessionEvent;
use log::{debug, info, warn};
use serde::Deserialize;
use serde_json::{json, Value};

/// Wildcard target, only ever used for the payload-free ready signal.
pub const ANY_TARGET: &str = "*";

/// How outbound frames leave the widget. The host page wires this to its
/// postMessage machinery; tests record the traffic.
pub trait FrameTransport {
    fn post(&mut self, message: String, target_origin: &str);
}

/// Inbound commands the widget should act on.
#[derive(Debug, Clone, PartialEq)]
pub enum EmbedCommand {
    /// Inject this question as if the user typed it.
    Seed(String),
    Reset,
    Focus,
}

#[derive(Debug, Deserialize)]
struct InboundFrame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: Value,
}

enum ChannelState {
    /// No trusted parent seen yet; outbound is limited to the ready signal.
    Unauthenticated,
    /// Parent origin learned and fixed for the page's lifetime.
    Pinned { origin: String },
}

pub struct EmbedBridge<T: FrameTransport> {
    transport: T,
    allowed_domains: Vec<String>,
    state: ChannelState,
    seed_consumed: bool,
    source_tag: Option<String>,
    pending_height: Option<u32>,
    last_height: Option<u32>,
}

impl<T: FrameTransport> EmbedBridge<T> {
    pub fn new(transport: T, allowed_domains: Vec<String>, source_tag: Option<String>) -> Self {
        EmbedBridge {
            transport,
            allowed_domains,
            state: ChannelState::Unauthenticated,
            seed_consumed: false,
            source_tag,
            pending_height: None,
            last_height: None,
        }
    }

    /// Tell the parent the widget is up. Wildcard target is acceptable
    /// here only because the frame carries no payload; after pinning this
    /// is a no-op.
    pub fn announce_ready(&mut self) {
        if let ChannelState::Pinned { .. } = self.state {
            return;
        }
        self.transport.post(json!({ "type": "ready" }).to_string(), ANY_TARGET);
    }

    pub fn pinned_origin(&self) -> Option<&str> {
        match &self.state {
            ChannelState::Pinned { origin } => Some(origin),
            ChannelState::Unauthenticated => None,
        }
    }

    /// Process one inbound frame. Messages from origins outside the
    /// allow-list are dropped before parsing; the first accepted origin
    /// becomes the pinned outbound target.
    pub fn handle_inbound(&mut self, origin: &str, raw: &str) -> Option<EmbedCommand> {
        if !self.is_allowed(origin) {
            debug!("[embed] Dropping message from disallowed origin {origin}");
            return None;
        }

        if matches!(self.state, ChannelState::Unauthenticated) {
            info!("[embed] Pinned parent origin {origin}");
            self.state = ChannelState::Pinned { origin: origin.to_string() };
        }

        let frame: InboundFrame = match serde_json::from_str(raw) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("[embed] Unparseable inbound frame: {e}");
                return None;
            }
        };

        match frame.kind.as_str() {
            "seed" => {
                let question = frame.payload["question"].as_str()?.trim().to_string();
                if question.is_empty() {
                    return None;
                }
                if self.seed_consumed {
                    debug!("[embed] Ignoring repeat seed");
                    return None;
                }
                self.seed_consumed = true;
                Some(EmbedCommand::Seed(question))
            }
            "command" => match frame.payload["name"].as_str() {
                Some("reset") => Some(EmbedCommand::Reset),
                Some("focus") => Some(EmbedCommand::Focus),
                other => {
                    debug!("[embed] Unknown command {other:?}");
                    None
                }
            },
            other => {
                debug!("[embed] Unknown frame type {other:?}");
                None
            }
        }
    }

    /// Note a new measured height. Nothing is sent until the next
    /// animation-frame tick, and then only if the value changed.
    pub fn report_height(&mut self, height: u32) {
        self.pending_height = Some(height);
    }

    /// The per-animation-frame flush point for height notifications.
    pub fn on_frame(&mut self) {
        let Some(height) = self.pending_height.take() else { return };
        if self.last_height == Some(height) {
            return;
        }
        let origin = match &self.state {
            ChannelState::Pinned { origin } => origin.clone(),
            ChannelState::Unauthenticated => return,
        };
        self.last_height = Some(height);
        let message = json!({ "type": "height", "payload": { "height": height } }).to_string();
        self.transport.post(message, &origin);
    }

    /// Relay a session lifecycle event to the parent, tagged with the
    /// continuation token. Per-delta updates stay inside the widget.
    pub fn relay_session_event(&mut self, event: &SessionEvent, continuation_token: Option<&str>) {
        if matches!(event, SessionEvent::AssistantDelta { .. }) {
            return;
        }
        let mut detail = event.detail();
        if let Some(token) = continuation_token {
            if detail.is_null() {
                detail = json!({});
            }
            detail["continuationToken"] = Value::String(token.to_string());
        }
        self.relay_named_event(event.name(), detail);
    }

    /// Generic named-event relay; only possible once an origin is pinned.
    pub fn relay_named_event(&mut self, name: &str, detail: Value) {
        let origin = match &self.state {
            ChannelState::Pinned { origin } => origin.clone(),
            ChannelState::Unauthenticated => {
                debug!("[embed] Holding event '{name}' — no pinned origin yet");
                return;
            }
        };
        let message = json!({
            "type": "event",
            "payload": { "name": name, "detail": detail, "source": self.source_tag },
        })
        .to_string();
        self.transport.post(message, &origin);
    }

    fn is_allowed(&self, origin: &str) -> bool {
        let Some(host) = origin_host(origin) else { return false };
        self.allowed_domains.iter().any(|domain| host.ends_with(domain.as_str()))
    }
}

/// The authority part of an origin, port included:
/// "https://partner.com:8443/x" -> "partner.com:8443".
fn origin_host(origin: &str) -> Option<&str> {
    let rest = origin.split_once("://").map(|(_, rest)| rest).unwrap_or(origin);
    let host = rest.split('/').next().unwrap_or("");
    if host.is_empty() {
        None
    } else {
        Some(host)
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct TestTransport {
        sent: Arc<Mutex<Vec<(String, String)>>>,
    }

    impl FrameTransport for TestTransport {
        fn post(&mut self, message: String, target_origin: &str) {
            self.sent.lock().push((message, target_origin.to_string()));
        }
    }

    fn bridge() -> (TestTransport, EmbedBridge<TestTransport>) {
        let transport = TestTransport::default();
        let bridge = EmbedBridge::new(
            transport.clone(),
            vec!["plantz.io".into(), "localhost:3000".into()],
            Some("partner-blog".into()),
        );
        (transport, bridge)
    }

    #[test]
    fn ready_goes_to_wildcard_before_pinning_only() {
        let (transport, mut bridge) = bridge();
        bridge.announce_ready();
        bridge.handle_inbound("https://app.plantz.io", r#"{"type":"command","payload":{"name":"focus"}}"#);
        bridge.announce_ready(); // after pinning — must not send

        let sent = transport.sent.lock();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1, ANY_TARGET);
    }

    #[test]
    fn first_allowed_origin_is_pinned_and_reused() {
        let (transport, mut bridge) = bridge();

        let command =
            bridge.handle_inbound("https://app.plantz.io", r#"{"type":"command","payload":{"name":"reset"}}"#);
        assert_eq!(command, Some(EmbedCommand::Reset));
        assert_eq!(bridge.pinned_origin(), Some("https://app.plantz.io"));

        bridge.relay_named_event("conversation-started", serde_json::Value::Null);
        let sent = transport.sent.lock();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1, "https://app.plantz.io");
        assert!(sent[0].0.contains("conversation-started"));
        assert!(sent[0].0.contains("partner-blog"));
    }

    #[test]
    fn disallowed_origins_are_dropped_and_do_not_pin() {
        let (_transport, mut bridge) = bridge();
        let command =
            bridge.handle_inbound("https://evil.example", r#"{"type":"command","payload":{"name":"reset"}}"#);
        assert_eq!(command, None);
        assert_eq!(bridge.pinned_origin(), None);
    }

    #[test]
    fn seed_is_honored_exactly_once() {
        let (_transport, mut bridge) = bridge();
        let raw = r#"{"type":"seed","payload":{"question":"Is it legal?"}}"#;

        assert_eq!(
            bridge.handle_inbound("https://plantz.io", raw),
            Some(EmbedCommand::Seed("Is it legal?".into()))
        );
        assert_eq!(bridge.handle_inbound("https://plantz.io", raw), None);
    }

    #[test]
    fn height_flushes_once_per_frame_and_only_on_change() {
        let (transport, mut bridge) = bridge();
        bridge.handle_inbound("http://localhost:3000", r#"{"type":"command","payload":{"name":"focus"}}"#);

        // Several reports within one frame collapse to the last value.
        bridge.report_height(480);
        bridge.report_height(520);
        bridge.on_frame();
        // Unchanged height next frame: nothing sent.
        bridge.report_height(520);
        bridge.on_frame();
        // Changed height: sent.
        bridge.report_height(610);
        bridge.on_frame();
        // Tick with nothing pending: nothing sent.
        bridge.on_frame();

        let sent = transport.sent.lock();
        let heights: Vec<&str> = sent.iter().map(|(m, _)| m.as_str()).collect();
        assert_eq!(heights.len(), 2);
        assert!(heights[0].contains("520"));
        assert!(heights[1].contains("610"));
    }

    #[test]
    fn height_is_held_until_an_origin_is_pinned() {
        let (transport, mut bridge) = bridge();
        bridge.report_height(480);
        bridge.on_frame();
        assert!(transport.sent.lock().is_empty());
    }

    #[test]
    fn session_events_carry_the_continuation_token() {
        let (transport, mut bridge) = bridge();
        bridge.handle_inbound("https://plantz.io", r#"{"type":"command","payload":{"name":"focus"}}"#);

        bridge.relay_session_event(&SessionEvent::FirstReplyReceived, Some("t1"));
        // Deltas are not relayed across the frame boundary.
        bridge.relay_session_event(&SessionEvent::AssistantDelta { text: "hi".into() }, Some("t1"));

        let sent = transport.sent.lock();
        assert_eq!(sent.len(), 1);
        let frame: serde_json::Value = serde_json::from_str(&sent[0].0).unwrap();
        assert_eq!(frame["type"], "event");
        assert_eq!(frame["payload"]["name"], "first-reply-received");
        assert_eq!(frame["payload"]["detail"]["continuationToken"], "t1");
    }

    #[test]
    fn host_suffix_matching_includes_ports() {
        let (_t, bridge) = bridge();
        assert!(bridge.is_allowed("https://plantz.io"));
        assert!(bridge.is_allowed("https://app.plantz.io"));
        assert!(bridge.is_allowed("http://localhost:3000"));
        assert!(!bridge.is_allowed("http://localhost:4000"));
        assert!(!bridge.is_allowed("https://plantz.io.evil.example"));
        assert!(!bridge.is_allowed("not a url at all://"));
    }
}
