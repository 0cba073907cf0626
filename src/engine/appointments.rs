// Plantz Engine — Appointments backend client
// Submits bookings to the appointments service and answers the advisory
// slot check. The service replies `{success, error?}` on 2xx or a JSON
// `{error}` body on failure; recognizable error text is translated to a
// curated user-facing message, anything else passes through verbatim.

use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::traits::AppointmentBackend;
use crate::engine::config::EngineConfig;
use crate::engine::types::{truncate_chars, AppointmentRequest};
use async_trait::async_trait;
use log::{error, info, warn};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

/// How long one booking call may take end to end.
const SUBMIT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize, Default)]
struct SubmissionReply {
    #[serde(default)]
    success: bool,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AvailabilityReply {
    available: bool,
}

pub struct HttpAppointmentsClient {
    client: Client,
    endpoint: String,
}

impl HttpAppointmentsClient {
    /// Build the client. A missing endpoint is a configuration error —
    /// callers fail at startup, never mid-booking.
    pub fn new(config: &EngineConfig) -> EngineResult<Self> {
        if config.appointments_endpoint.trim().is_empty() {
            return Err(EngineError::Config("appointments endpoint is not set".into()));
        }
        Ok(HttpAppointmentsClient {
            client: Client::builder()
                .connect_timeout(Duration::from_secs(10))
                .timeout(SUBMIT_TIMEOUT)
                .build()
                .unwrap_or_default(),
            endpoint: config.appointments_endpoint.trim_end_matches('/').to_string(),
        })
    }

    fn classify(e: reqwest::Error) -> EngineError {
        if e.is_timeout() {
            EngineError::Timeout(SUBMIT_TIMEOUT)
        } else {
            EngineError::Transport(e.to_string())
        }
    }
}

#[async_trait]
impl AppointmentBackend for HttpAppointmentsClient {
    async fn submit(&self, request: &AppointmentRequest) -> EngineResult<()> {
        info!("[appointments] Submitting booking to {}", self.endpoint);

        let response = self
            .client
            .post(&self.endpoint)
            .json(request)
            .send()
            .await
            .map_err(Self::classify)?;

        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();

        if !(200..300).contains(&status) {
            let message = serde_json::from_str::<serde_json::Value>(&body)
                .ok()
                .and_then(|v| v["error"].as_str().map(str::to_string))
                .unwrap_or_else(|| truncate_chars(&body, 200));
            error!("[appointments] Submission rejected ({status}): {message}");
            return Err(EngineError::Rejection { status, message });
        }

        let reply: SubmissionReply = serde_json::from_str(&body).unwrap_or_default();
        if reply.success {
            Ok(())
        } else {
            let message = reply.error.unwrap_or_else(|| "Failed to book appointment".into());
            error!("[appointments] Submission reported failure: {message}");
            Err(EngineError::Rejection { status, message })
        }
    }

    async fn slot_available(&self, date: &str, time: &str) -> EngineResult<bool> {
        let url = format!("{}/availability", self.endpoint);
        let response = self
            .client
            .get(&url)
            .query(&[("date", date), ("time", time)])
            .send()
            .await
            .map_err(Self::classify)?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            warn!("[appointments] Availability check answered {status}");
            return Err(EngineError::Rejection {
                status,
                message: "availability check failed".into(),
            });
        }

        let reply: AvailabilityReply = response
            .json()
            .await
            .map_err(|e| EngineError::Transport(e.to_string()))?;
        Ok(reply.available)
    }
}

// ── Rejection translation ──────────────────────────────────────────────────

/// Map a raw backend error onto the message the widget shows. Matching is
/// case-insensitive on known substrings; unmatched text passes through so
/// a meaningful service message is never hidden.
pub fn user_facing_rejection(raw: &str) -> String {
    let lower = raw.to_lowercase();

    if lower.contains("already booked") || lower.contains("slot") {
        return "This time slot is already booked. Please choose a different time.".into();
    }
    if lower.contains("missing required") {
        return "Some required details were missing. Please start the booking again.".into();
    }
    if lower.contains("invalid date")
        || lower.contains("invalid time")
        || lower.contains("invalid phone")
        || lower.contains("cannot parse")
        || lower.contains("format")
    {
        return "Some of the booking details look invalid. \
                Please check the date, time and phone number."
            .into();
    }
    if lower.contains("unknown field") || lower.contains("invalid_value_for_column") {
        return "The booking service is temporarily misconfigured. Please try again later.".into();
    }
    if lower.contains("network")
        || lower.contains("connect")
        || lower.contains("timed out")
        || lower.contains("timeout")
    {
        return "Could not reach the booking service. \
                Please check your connection and try again."
            .into();
    }

    raw.to_string()
}

// ── Tests ──────────────────────────────────────────────────────────────────
