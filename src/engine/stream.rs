// Plantz Engine — Stream Decoder
// Turns the completion service's event-framed byte stream into typed
// `StreamEvent`s. Records are separated by a blank line and each line is
// optionally prefixed with a `data: ` marker; chunk boundaries are
// arbitrary, so incomplete trailing fragments are buffered until their
// terminator arrives.
//
// Malformed records are logged and skipped — a single bad record must never
// kill a stream that is otherwise delivering text. The one exception is a
// well-formed `error` record, which decodes to the terminal `StreamError`
// event. Transport-level read failures are not the decoder's concern; the
// relay synthesizes the terminal event for those.

use crate::engine::types::{truncate_chars, StreamEvent};
use log::{debug, warn};
use serde_json::Value;

const RECORD_SEPARATOR: &str = "\n\n";
const DATA_PREFIX: &str = "data: ";

pub struct StreamDecoder {
    buffer: String,
    finished: bool,
    dropped_records: u64,
}

impl Default for StreamDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamDecoder {
    pub fn new() -> Self {
        StreamDecoder { buffer: String::new(), finished: false, dropped_records: 0 }
    }

    /// Feed one chunk of bytes; returns every event whose record became
    /// complete with this chunk, in arrival order.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        if self.finished {
            if !chunk.is_empty() {
                debug!("[stream] Dropping {} bytes received after terminal event", chunk.len());
            }
            return vec![];
        }

        self.buffer.push_str(&String::from_utf8_lossy(chunk));

        let mut events = Vec::new();
        while let Some(end) = self.buffer.find(RECORD_SEPARATOR) {
            let record = self.buffer[..end].to_string();
            self.buffer.drain(..end + RECORD_SEPARATOR.len());

            if let Some(event) = self.parse_record(&record) {
                if event.is_terminal() {
                    self.finished = true;
                }
                events.push(event);
                if self.finished {
                    if !self.buffer.trim().is_empty() {
                        debug!("[stream] Discarding buffered input after terminal event");
                    }
                    self.buffer.clear();
                    return events;
                }
            }
        }
        events
    }

    /// Whether a terminal event has been decoded.
    pub fn finished(&self) -> bool {
        self.finished
    }

    /// How many records were dropped as malformed. Non-zero counts are
    /// already logged; this exists for diagnostics.
    pub fn dropped_records(&self) -> u64 {
        self.dropped_records
    }

    fn parse_record(&mut self, record: &str) -> Option<StreamEvent> {
        // A record may span several lines; the payload lives on the line
        // carrying the data marker. Bare lines (comments, keep-alives) are
        // tolerated and skipped.
        let data = record
            .lines()
            .map(|line| line.trim())
            .find_map(|line| line.strip_prefix(DATA_PREFIX).or_else(|| line.strip_prefix("data:")));

        let data = match data {
            Some(d) if !d.trim().is_empty() => d.trim(),
            _ => {
                if !record.trim().is_empty() {
                    debug!("[stream] Record without data marker: {}", truncate_chars(record, 80));
                }
                return None;
            }
        };

        match self.parse_data(data) {
            Ok(event) => Some(event),
            Err(reason) => {
                self.dropped_records += 1;
                warn!("[stream] Dropping malformed record ({}): {}", reason, truncate_chars(data, 120));
                None
            }
        }
    }

    fn parse_data(&self, data: &str) -> Result<StreamEvent, String> {
        let value: Value =
            serde_json::from_str(data).map_err(|e| format!("invalid JSON: {e}"))?;

        let kind = value["type"].as_str().ok_or("missing type discriminant")?;

        match kind {
            "status" => {
                let phase = value["status"].as_str().ok_or("status record without status field")?;
                Ok(StreamEvent::Status { phase: phase.to_string() })
            }
            "response.output_text.delta" => {
                let fragment = value["delta"].as_str().ok_or("delta record without delta field")?;
                Ok(StreamEvent::Delta { fragment: fragment.to_string() })
            }
            "response.completed" => Ok(StreamEvent::Completed {
                continuation_token: value["threadId"].as_str().map(|s| s.to_string()),
            }),
            "error" => {
                let message = value["error"].as_str().unwrap_or("unknown stream error");
                Ok(StreamEvent::StreamError { message: message.to_string() })
            }
            other => Err(format!("unknown record type '{other}'")),
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn record(json: &str) -> String {
        format!("data: {json}\n\n")
    }

    fn sample_stream() -> String {
        let mut s = String::new();
        s.push_str(&record(r#"{"type":"status","status":"in_progress","threadId":"t1"}"#));
        s.push_str(&record(r#"{"type":"response.output_text.delta","delta":"Several "}"#));
        s.push_str(&record(r#"{"type":"response.output_text.delta","delta":"conditions "}"#));
        s.push_str(&record(r#"{"type":"response.output_text.delta","delta":"qualify."}"#));
        s.push_str(&record(r#"{"type":"response.completed","threadId":"t1"}"#));
        s
    }

    fn expected_events() -> Vec<StreamEvent> {
        vec![
            StreamEvent::Status { phase: "in_progress".into() },
            StreamEvent::Delta { fragment: "Several ".into() },
            StreamEvent::Delta { fragment: "conditions ".into() },
            StreamEvent::Delta { fragment: "qualify.".into() },
            StreamEvent::Completed { continuation_token: Some("t1".into()) },
        ]
    }

    #[test]
    fn decodes_a_whole_stream_in_one_chunk() {
        let mut decoder = StreamDecoder::new();
        let events = decoder.feed(sample_stream().as_bytes());
        assert_eq!(events, expected_events());
        assert!(decoder.finished());
    }

    #[test]
    fn chunk_boundaries_do_not_change_the_event_sequence() {
        let raw = sample_stream();
        let bytes = raw.as_bytes();

        // Split the serialized stream at every possible boundary.
        for split in 0..=bytes.len() {
            let mut decoder = StreamDecoder::new();
            let mut events = decoder.feed(&bytes[..split]);
            events.extend(decoder.feed(&bytes[split..]));
            assert_eq!(events, expected_events(), "split at byte {split}");
        }

        // And byte-by-byte, the worst case.
        let mut decoder = StreamDecoder::new();
        let mut events = Vec::new();
        for b in bytes {
            events.extend(decoder.feed(std::slice::from_ref(b)));
        }
        assert_eq!(events, expected_events());
    }

    #[test]
    fn malformed_records_are_skipped_not_fatal() {
        let mut raw = String::new();
        raw.push_str(&record(r#"{"type":"response.output_text.delta","delta":"one "}"#));
        raw.push_str("data: {not json at all\n\n");
        raw.push_str(&record(r#"{"type":"mystery.kind","delta":"x"}"#));
        raw.push_str(&record(r#"{"type":"response.output_text.delta"}"#)); // missing delta
        raw.push_str(&record(r#"{"type":"response.output_text.delta","delta":"two"}"#));
        raw.push_str(&record(r#"{"type":"response.completed"}"#));

        let mut decoder = StreamDecoder::new();
        let events = decoder.feed(raw.as_bytes());
        assert_eq!(
            events,
            vec![
                StreamEvent::Delta { fragment: "one ".into() },
                StreamEvent::Delta { fragment: "two".into() },
                StreamEvent::Completed { continuation_token: None },
            ]
        );
        assert_eq!(decoder.dropped_records(), 3);
    }

    #[test]
    fn error_record_is_terminal() {
        let mut raw = String::new();
        raw.push_str(&record(r#"{"type":"response.output_text.delta","delta":"part"}"#));
        raw.push_str(&record(r#"{"type":"error","error":"Run failed with status: failed"}"#));
        raw.push_str(&record(r#"{"type":"response.output_text.delta","delta":"late"}"#));

        let mut decoder = StreamDecoder::new();
        let events = decoder.feed(raw.as_bytes());
        assert_eq!(
            events,
            vec![
                StreamEvent::Delta { fragment: "part".into() },
                StreamEvent::StreamError { message: "Run failed with status: failed".into() },
            ]
        );
        // Everything after the terminal event is dropped.
        assert!(decoder.feed(record(r#"{"type":"response.completed"}"#).as_bytes()).is_empty());
    }

    #[test]
    fn incomplete_trailing_record_is_never_parsed_early() {
        let mut decoder = StreamDecoder::new();
        let events =
            decoder.feed(br#"data: {"type":"response.output_text.delta","delta":"partial"}"#);
        assert!(events.is_empty(), "no terminator yet");
        let events = decoder.feed(b"\n\n");
        assert_eq!(events, vec![StreamEvent::Delta { fragment: "partial".into() }]);
    }

    #[test]
    fn bare_data_prefix_without_space_is_accepted() {
        let mut decoder = StreamDecoder::new();
        let events = decoder.feed(b"data:{\"type\":\"status\",\"status\":\"queued\"}\n\n");
        assert_eq!(events, vec![StreamEvent::Status { phase: "queued".into() }]);
    }
}
