// ── Plantz Engine: Transport Policy ────────────────────────────────────────
// Wraps the completion service's "open a stream" capability with everything
// a flaky network needs:
//
//   • Exponential backoff retry on transient open failures (1s, 2s, 4s)
//   • A hard wall-clock timeout over the whole call (default 60s)
//   • Request de-duplication: concurrent calls with the same fingerprint
//     share one connection; a completed call is replayed from cache
//   • Token-based cancellation — an aborted call emits nothing further
//
// Mid-stream read failures are NOT retried: once deltas have been observed
// the partial reply is already on screen, so the call terminates with a
// synthetic "stream interrupted" error and the session rolls back.
// Failed calls are evicted from the cache so the user can retry at once.

use crate::atoms::error::EngineError;
use crate::atoms::traits::{ChunkStream, CompletionStream};
use crate::engine::stream::StreamDecoder;
use crate::engine::types::{truncate_chars, CompletionRequest, StreamEvent};
use futures::StreamExt;
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

// ── Constants ──────────────────────────────────────────────────────────────

/// Maximum number of retry attempts per call.
pub const MAX_RETRIES: u32 = 3;

/// Initial retry delay in milliseconds (doubles each attempt).
const INITIAL_RETRY_DELAY_MS: u64 = 1_000;

/// Retry delay cap in milliseconds.
const MAX_RETRY_DELAY_MS: u64 = 30_000;

/// Default wall-clock deadline for one call, retries included.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Terminal error message for a read failure mid-stream.
pub const MSG_STREAM_INTERRUPTED: &str = "stream interrupted";

/// Terminal error message when the wall-clock deadline expires.
pub const MSG_REQUEST_TIMED_OUT: &str = "request timed out";

/// Terminal error message for a stream that ended without a terminal record.
pub const MSG_STREAM_ENDED_EARLY: &str = "stream ended unexpectedly";

// ── Retryable status detection ─────────────────────────────────────────────

/// Check if an HTTP status code represents a transient/retryable error.
pub fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

// ── Backoff delay ──────────────────────────────────────────────────────────

/// Sleep with exponential backoff. `attempt` is 0-based.
/// Returns the delay that was applied, for logging.
pub async fn retry_delay(attempt: u32) -> Duration {
    let base_ms = INITIAL_RETRY_DELAY_MS * 2u64.pow(attempt.min(10));
    let delay = Duration::from_millis(base_ms.min(MAX_RETRY_DELAY_MS));
    tokio::time::sleep(delay).await;
    delay
}

// ── Stream handle ──────────────────────────────────────────────────────────

/// The caller's view of one logical call: a sequence of `StreamEvent`s
/// ending with exactly one terminal event, plus an abort switch.
pub struct StreamHandle {
    backlog: VecDeque<StreamEvent>,
    live: Option<mpsc::UnboundedReceiver<StreamEvent>>,
    token: CancellationToken,
}

impl StreamHandle {
    fn replay(events: Vec<StreamEvent>) -> Self {
        StreamHandle { backlog: events.into(), live: None, token: CancellationToken::new() }
    }

    /// Next event in arrival order; `None` once the stream is exhausted.
    pub async fn next_event(&mut self) -> Option<StreamEvent> {
        if let Some(event) = self.backlog.pop_front() {
            return Some(event);
        }
        match self.live.as_mut()?.recv().await {
            Some(event) => Some(event),
            None => {
                self.live = None;
                None
            }
        }
    }

    /// Abort the underlying call. Releases the connection; no further
    /// events are delivered to any subscriber of this call.
    pub fn abort(&self) {
        self.token.cancel();
    }
}

// ── Relay ──────────────────────────────────────────────────────────────────

struct InFlight {
    id: u64,
    subscribers: Vec<mpsc::UnboundedSender<StreamEvent>>,
    emitted: Vec<StreamEvent>,
    token: CancellationToken,
}

enum CacheEntry {
    InFlight(InFlight),
    Done(Vec<StreamEvent>),
}

/// Session-scoped transport policy over an abstract completion stream.
/// The dedup cache lives for the session and is rebuilt on [`Relay::reset`].
pub struct Relay {
    provider: Arc<dyn CompletionStream>,
    cache: Arc<Mutex<HashMap<String, CacheEntry>>>,
    timeout: Duration,
    root: Mutex<CancellationToken>,
    next_id: AtomicU64,
}

impl Relay {
    pub fn new(provider: Arc<dyn CompletionStream>, timeout: Duration) -> Self {
        Relay {
            provider,
            cache: Arc::new(Mutex::new(HashMap::new())),
            timeout,
            root: Mutex::new(CancellationToken::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Issue (or join, or replay) the call identified by the request's
    /// fingerprint. Never blocks: the work runs on a spawned task.
    pub fn send(&self, request: &CompletionRequest) -> StreamHandle {
        let key = request.fingerprint();
        let mut cache = self.cache.lock();

        match cache.get_mut(&key) {
            Some(CacheEntry::Done(events)) => {
                debug!("[relay] Replaying cached result for {}", truncate_chars(&key, 60));
                return StreamHandle::replay(events.clone());
            }
            Some(CacheEntry::InFlight(flight)) => {
                debug!("[relay] Joining in-flight call for {}", truncate_chars(&key, 60));
                // Snapshot + subscribe under the cache lock, so no event can
                // slip between the backlog and the live subscription.
                let (tx, rx) = mpsc::unbounded_channel();
                flight.subscribers.push(tx);
                return StreamHandle {
                    backlog: flight.emitted.clone().into(),
                    live: Some(rx),
                    token: flight.token.clone(),
                };
            }
            None => {}
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        let token = self.root.lock().child_token();
        cache.insert(
            key.clone(),
            CacheEntry::InFlight(InFlight {
                id,
                subscribers: vec![tx],
                emitted: Vec::new(),
                token: token.clone(),
            }),
        );
        drop(cache);

        let driver = Driver {
            provider: Arc::clone(&self.provider),
            cache: Arc::clone(&self.cache),
            request: request.clone(),
            key,
            id,
            timeout: self.timeout,
            token: token.clone(),
        };
        tokio::spawn(driver.run());

        StreamHandle { backlog: VecDeque::new(), live: Some(rx), token }
    }

    /// Cancel every in-flight call and clear the cache. Called on session
    /// reset so a late network resolution can never touch fresh state.
    pub fn reset(&self) {
        {
            let mut root = self.root.lock();
            root.cancel();
            *root = CancellationToken::new();
        }
        self.cache.lock().clear();
        debug!("[relay] Reset — cache cleared, in-flight calls cancelled");
    }
}

// ── Driver task ────────────────────────────────────────────────────────────

enum CallOutcome {
    Success,
    Failed,
}

struct Driver {
    provider: Arc<dyn CompletionStream>,
    cache: Arc<Mutex<HashMap<String, CacheEntry>>>,
    request: CompletionRequest,
    key: String,
    id: u64,
    timeout: Duration,
    token: CancellationToken,
}

impl Driver {
    async fn run(self) {
        let outcome = tokio::select! {
            _ = self.token.cancelled() => {
                debug!("[relay] Call aborted for {}", truncate_chars(&self.key, 60));
                self.remove_entry();
                return;
            }
            result = tokio::time::timeout(self.timeout, self.attempts()) => result,
        };

        match outcome {
            Err(_) => {
                warn!("[relay] Call exceeded {:?} deadline", self.timeout);
                self.emit(StreamEvent::StreamError { message: MSG_REQUEST_TIMED_OUT.into() });
                self.remove_entry();
            }
            Ok(CallOutcome::Success) => self.finish_success(),
            Ok(CallOutcome::Failed) => self.remove_entry(),
        }
    }

    /// Open the stream with bounded retries, then pump it to completion.
    async fn attempts(&self) -> CallOutcome {
        let mut last_error = String::new();
        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                let delay = retry_delay(attempt - 1).await;
                info!("[relay] Retry {}/{} after {:?}", attempt, MAX_RETRIES, delay);
            }

            match self.provider.open(&self.request).await {
                Ok(stream) => return self.pump(stream).await,
                Err(EngineError::Rejection { status, message }) => {
                    warn!("[relay] Open rejected ({status}): {}", truncate_chars(&message, 200));
                    last_error = message;
                    if is_retryable_status(status) && attempt < MAX_RETRIES {
                        continue;
                    }
                    break;
                }
                Err(e) => {
                    last_error = e.to_string();
                    warn!("[relay] Open failed: {last_error}");
                    if attempt < MAX_RETRIES {
                        continue;
                    }
                }
            }
        }

        self.emit(StreamEvent::StreamError { message: last_error });
        CallOutcome::Failed
    }

    /// Decode and fan out events until a terminal record or read failure.
    async fn pump(&self, mut stream: ChunkStream) -> CallOutcome {
        let mut decoder = StreamDecoder::new();
        while let Some(chunk) = stream.next().await {
            let bytes = match chunk {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!("[relay] Stream read failed: {e}");
                    self.emit(StreamEvent::StreamError { message: MSG_STREAM_INTERRUPTED.into() });
                    return CallOutcome::Failed;
                }
            };
            for event in decoder.feed(&bytes) {
                let failed = matches!(event, StreamEvent::StreamError { .. });
                let terminal = event.is_terminal();
                self.emit(event);
                if terminal {
                    return if failed { CallOutcome::Failed } else { CallOutcome::Success };
                }
            }
        }

        warn!("[relay] Stream ended without a terminal record");
        self.emit(StreamEvent::StreamError { message: MSG_STREAM_ENDED_EARLY.into() });
        CallOutcome::Failed
    }

    /// Record an event and fan it out to subscribers. A driver whose cache
    /// entry has been superseded (reset) silently drops its events.
    fn emit(&self, event: StreamEvent) {
        let mut cache = self.cache.lock();
        if let Some(CacheEntry::InFlight(flight)) = cache.get_mut(&self.key) {
            if flight.id == self.id {
                flight.emitted.push(event.clone());
                flight.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
                return;
            }
        }
        debug!("[relay] Dropping event from superseded call");
    }

    fn finish_success(&self) {
        let mut cache = self.cache.lock();
        let matches_self = matches!(
            cache.get(&self.key),
            Some(CacheEntry::InFlight(flight)) if flight.id == self.id
        );
        if matches_self {
            if let Some(CacheEntry::InFlight(flight)) = cache.remove(&self.key) {
                cache.insert(self.key.clone(), CacheEntry::Done(flight.emitted));
            }
        }
    }

    fn remove_entry(&self) {
        let mut cache = self.cache.lock();
        let matches_self = matches!(
            cache.get(&self.key),
            Some(CacheEntry::InFlight(flight)) if flight.id == self.id
        );
        if matches_self {
            cache.remove(&self.key);
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────
