// Plantz Engine — Configuration
// Read once at startup and passed into constructed clients; nothing in the
// engine reads the environment after this point. Missing required values
// fail here, loudly, instead of surfacing mid-conversation.

use crate::atoms::error::{EngineError, EngineResult};
use log::info;
use std::path::PathBuf;
use std::time::Duration;

/// Greeting shown as the transcript's first entry.
pub const DEFAULT_GREETING: &str = "Ask our Plantz Agent about medical cannabis";

/// Default wall-clock deadline for one completion call.
const DEFAULT_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Completion service endpoint (required).
    pub chat_endpoint: String,
    /// Appointments service endpoint (required).
    pub appointments_endpoint: String,
    /// Wall-clock deadline per completion call.
    pub request_timeout: Duration,
    /// Domains allowed to embed the widget, matched as host suffixes
    /// (port included), e.g. "plantz.io,partner.com,localhost:3000".
    pub allowed_embed_origins: Vec<String>,
    /// First transcript entry of every fresh session.
    pub greeting: String,
    /// Where the session history log lives.
    pub history_path: PathBuf,
    /// Identifies which embedding page produced an event, if set.
    pub source_tag: Option<String>,
}

impl EngineConfig {
    /// Build from the process environment. Required: `PLANTZ_CHAT_URL`,
    /// `PLANTZ_APPOINTMENTS_URL`.
    pub fn from_env() -> EngineResult<Self> {
        let chat_endpoint = required_var("PLANTZ_CHAT_URL")?;
        let appointments_endpoint = required_var("PLANTZ_APPOINTMENTS_URL")?;

        let request_timeout = std::env::var("PLANTZ_REQUEST_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(DEFAULT_TIMEOUT_SECS));

        let allowed_embed_origins = std::env::var("PLANTZ_EMBED_ALLOWED_ORIGINS")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let history_path = std::env::var("PLANTZ_HISTORY_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_history_path());

        let config = EngineConfig {
            chat_endpoint,
            appointments_endpoint,
            request_timeout,
            allowed_embed_origins,
            greeting: std::env::var("PLANTZ_GREETING")
                .unwrap_or_else(|_| DEFAULT_GREETING.to_string()),
            history_path,
            source_tag: std::env::var("PLANTZ_SOURCE_TAG").ok(),
        };
        info!(
            "[config] Loaded — chat={} appointments={} timeout={:?}",
            config.chat_endpoint, config.appointments_endpoint, config.request_timeout
        );
        Ok(config)
    }

    #[cfg(test)]
    pub(crate) fn for_tests() -> Self {
        EngineConfig {
            chat_endpoint: "http://localhost:3000/api/chat".into(),
            appointments_endpoint: "http://localhost:3000/api/appointments".into(),
            request_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            allowed_embed_origins: vec!["plantz.io".into(), "localhost:3000".into()],
            greeting: DEFAULT_GREETING.into(),
            history_path: std::env::temp_dir().join("plantz-history-test.json"),
            source_tag: None,
        }
    }
}

fn required_var(name: &str) -> EngineResult<String> {
    match std::env::var(name) {
        Ok(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(EngineError::Config(format!("missing environment variable {name}"))),
    }
}

/// `~/.plantz/history.json`, creating the directory on first use.
fn default_history_path() -> PathBuf {
    let home = dirs::home_dir().unwrap_or_default();
    let dir = home.join(".plantz");
    std::fs::create_dir_all(&dir).ok();
    dir.join("history.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_required_vars_fail_loudly() {
        // Serialize access to the process environment within this test.
        std::env::remove_var("PLANTZ_CHAT_URL");
        assert!(matches!(EngineConfig::from_env(), Err(EngineError::Config(_))));
    }
}
