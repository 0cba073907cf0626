// Plantz Engine — Session history log
// A bounded, most-recent-first log of past sessions: one entry per
// session's first user message, kept as a small JSON file so it survives
// reloads. Entries are never edited — only prepended and evicted.
// A file that fails to parse is discarded wholesale, not patched up.

use crate::engine::types::truncate_chars;
use log::warn;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Most entries kept at once; the oldest is evicted beyond this.
pub const HISTORY_LIMIT: usize = 20;

/// Preview length in characters.
const PREVIEW_CHARS: usize = 100;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryEntry {
    /// Unix milliseconds at creation — doubles as a unique id.
    pub id: i64,
    /// First characters of the session's first user message.
    pub preview: String,
}

pub struct HistoryLog {
    path: PathBuf,
    entries: Vec<HistoryEntry>,
}

impl HistoryLog {
    /// Load the log from `path`. Unreadable or corrupted content starts
    /// the log fresh — stale previews are not worth failing a session for.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match std::fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str::<Vec<HistoryEntry>>(&raw) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!("[history] Discarding corrupted log at {:?}: {e}", path);
                    vec![]
                }
            },
            Err(_) => vec![],
        };
        HistoryLog { path, entries }
    }

    /// Record a new session's first message, newest first, evicting past
    /// the cap, and persist.
    pub fn record(&mut self, first_message: &str) {
        let entry = HistoryEntry {
            id: chrono::Utc::now().timestamp_millis(),
            preview: truncate_chars(first_message, PREVIEW_CHARS),
        };
        self.entries.insert(0, entry);
        self.entries.truncate(HISTORY_LIMIT);
        self.save();
    }

    /// Newest first.
    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.save();
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn save(&self) {
        let json = match serde_json::to_string(&self.entries) {
            Ok(json) => json,
            Err(e) => {
                warn!("[history] Serialize failed: {e}");
                return;
            }
        };
        if let Err(e) = std::fs::write(&self.path, json) {
            warn!("[history] Write to {:?} failed: {e}", self.path);
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────
