// Plantz Engine — Booking Intake Flow
// One canonical state machine for the eligibility check and call booking:
// a linear sequence of typed steps, each with a validator, advancing only
// on success and submitting exactly once past the last step. Collected
// values survive submission failure so the user never re-enters data.
//
// The flow never touches the transcript — it reports outcomes and the
// session owner appends the confirmation or cancellation message.

use crate::atoms::traits::AppointmentBackend;
use crate::engine::assembler::{assemble, AssemblerHooks, AssemblyOutcome};
use crate::engine::http::Relay;
use crate::engine::types::{AgentMode, AppointmentRequest, CompletionRequest};
use crate::engine::validate;
use log::{info, warn};

/// Appended to the transcript when the user abandons the flow.
pub const CANCEL_MESSAGE: &str =
    "Booking cancelled. You can continue asking questions about medical cannabis.";

// ── Steps ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookingStep {
    Condition,
    PriorTreatments,
    PsychosisHistory,
    FullName,
    Phone,
    PreferredDate,
    PreferredTime,
    Submitting,
    Complete,
}

impl BookingStep {
    /// The question the widget shows for this step.
    pub fn prompt(&self) -> &'static str {
        match self {
            BookingStep::Condition => "What condition do you want to treat with cannabis?",
            BookingStep::PriorTreatments => {
                "Have you previously tried two treatments that didn't work?"
            }
            BookingStep::PsychosisHistory => {
                "Have you, or an immediate family member, been diagnosed with psychosis or schizophrenia?"
            }
            BookingStep::FullName => "What is your full name?",
            BookingStep::Phone => "What is your phone number?",
            BookingStep::PreferredDate => "What date would you prefer for your call?",
            BookingStep::PreferredTime => "What time would you prefer for your call?",
            BookingStep::Submitting => "Booking your call...",
            BookingStep::Complete => "Your call is booked.",
        }
    }
}

// ── Collected values ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BookingForm {
    pub condition: String,
    pub treatable: Option<bool>,
    pub prior_treatments: Option<bool>,
    pub psychosis_history: Option<bool>,
    pub name: String,
    pub phone: String,
    pub date: String,
    pub time: String,
}

/// Summary handed back when a booking lands.
#[derive(Debug, Clone, PartialEq)]
pub struct BookingConfirmation {
    pub name: String,
    pub phone: String,
    pub date: String,
    pub time: String,
}

impl BookingConfirmation {
    /// The assistant message confirming the booking.
    pub fn message(&self) -> String {
        format!(
            "Great! I've booked your call for {} at {}, {}. We'll call you at {}. \
             Thank you for choosing our service!",
            self.date, self.time, self.name, self.phone,
        )
    }
}

// ── Outcome of one advance ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum FlowOutcome {
    /// Input rejected (or submission failed); `BookingFlow::error` explains
    /// and the pointer did not move forward.
    Stay,
    /// Value persisted, pointer moved to the next step.
    Advanced,
    /// The booking was submitted and confirmed; the machine has reset.
    Confirmed(BookingConfirmation),
}

// ── Eligibility classification ─────────────────────────────────────────────

const NOT_TREATABLE_KEYWORDS: &[&str] =
    &["not treatable", "not eligible", "cannot be treated", "not suitable", "not appropriate"];

const TREATABLE_KEYWORDS: &[&str] =
    &["treatable", "eligible", "can be treated", "suitable", "appropriate"];

/// Scan an advisor reply for an eligibility verdict. Explicit negation wins
/// over explicit affirmation; no match at all returns `None`.
pub fn classify_eligibility(reply: &str) -> Option<bool> {
    let lower = reply.to_lowercase();
    if NOT_TREATABLE_KEYWORDS.iter().any(|k| lower.contains(k)) {
        return Some(false);
    }
    if TREATABLE_KEYWORDS.iter().any(|k| lower.contains(k)) {
        return Some(true);
    }
    None
}

/// Product policy: when the advisor's answer is ambiguous, or the check
/// itself fails, treat the condition as treatable rather than blocking the
/// user. Swap this one function to route such cases elsewhere.
pub fn eligibility_fallback_verdict() -> bool {
    true
}

/// Ask the completion service whether a condition is treatable.
async fn check_condition_treatable(relay: &Relay, condition: &str) -> bool {
    let request = CompletionRequest {
        input: format!("Check if this condition is treatable with medical cannabis: {condition}"),
        continuation_token: None,
        agent_mode: Some(AgentMode::Eligibility),
    };
    let mut handle = relay.send(&request);
    match assemble(&mut handle, &mut AssemblerHooks::noop()).await {
        AssemblyOutcome::Completed { text, .. } => {
            classify_eligibility(&text).unwrap_or_else(eligibility_fallback_verdict)
        }
        AssemblyOutcome::Failed { message } => {
            warn!("[booking] Eligibility check failed ({message}), applying fallback verdict");
            eligibility_fallback_verdict()
        }
    }
}

// ── The flow ───────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct BookingFlow {
    step: BookingStep,
    form: BookingForm,
    error: Option<String>,
}

impl Default for BookingStep {
    fn default() -> Self {
        BookingStep::Condition
    }
}

impl BookingFlow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn step(&self) -> BookingStep {
        self.step
    }

    pub fn form(&self) -> &BookingForm {
        &self.form
    }

    /// The message for the most recent rejected input, if any.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Abandon the flow from any non-terminal state, discarding all
    /// collected values. The caller restores Information mode and appends
    /// [`CANCEL_MESSAGE`] to the transcript.
    pub fn cancel(&mut self) {
        info!("[booking] Flow cancelled at {:?}", self.step);
        *self = Self::new();
    }

    /// Feed the current step's answer. Runs the step validator; on failure
    /// records a message and stays put, on success persists the value and
    /// moves on. Completing the final step submits the booking.
    pub async fn advance(
        &mut self,
        value: &str,
        relay: &Relay,
        backend: &dyn AppointmentBackend,
    ) -> FlowOutcome {
        self.error = None;
        let value = value.trim();

        match self.step {
            BookingStep::Condition => {
                if value.is_empty() {
                    return self.reject("Please enter your condition");
                }
                self.form.condition = value.to_string();
                let treatable = check_condition_treatable(relay, value).await;
                self.form.treatable = Some(treatable);
                if !treatable {
                    return self.reject(
                        "Sorry, this condition is not currently treatable with cannabis in the UK.",
                    );
                }
                self.step = BookingStep::PriorTreatments;
                FlowOutcome::Advanced
            }
            BookingStep::PriorTreatments => match validate::yes_no(value) {
                Some(answer) => {
                    self.form.prior_treatments = Some(answer);
                    self.step = BookingStep::PsychosisHistory;
                    FlowOutcome::Advanced
                }
                None => self.reject("Please answer Yes or No"),
            },
            BookingStep::PsychosisHistory => match validate::yes_no(value) {
                Some(answer) => {
                    self.form.psychosis_history = Some(answer);
                    self.step = BookingStep::FullName;
                    FlowOutcome::Advanced
                }
                None => self.reject("Please answer Yes or No"),
            },
            BookingStep::FullName => {
                if !validate::valid_name(value) {
                    return self.reject("Please enter your full name");
                }
                self.form.name = value.to_string();
                self.step = BookingStep::Phone;
                FlowOutcome::Advanced
            }
            BookingStep::Phone => {
                if !validate::valid_phone(value) {
                    return self.reject("Please enter a valid UK phone number");
                }
                self.form.phone = value.to_string();
                self.step = BookingStep::PreferredDate;
                FlowOutcome::Advanced
            }
            BookingStep::PreferredDate => {
                if !validate::valid_date(value) {
                    return self.reject("Please use DD/MM/YYYY format");
                }
                self.form.date = value.to_string();
                self.step = BookingStep::PreferredTime;
                FlowOutcome::Advanced
            }
            BookingStep::PreferredTime => {
                if !validate::valid_time(value) {
                    return self
                        .reject("Please use 12-hour format with am/pm (e.g., 2:30pm)");
                }
                self.form.time = value.to_string();
                self.submit(backend).await
            }
            BookingStep::Submitting => self.reject("Your booking is already being submitted."),
            BookingStep::Complete => FlowOutcome::Stay,
        }
    }

    /// Terminal submission: business-hours policy, advisory slot check
    /// (fail-open), then exactly one backend call. Failure returns the
    /// pointer to PreferredTime with every collected value intact.
    async fn submit(&mut self, backend: &dyn AppointmentBackend) -> FlowOutcome {
        if !validate::within_business_hours(&self.form.date, &self.form.time) {
            self.step = BookingStep::PreferredTime;
            return self.reject(
                "Calls are available Monday to Friday, 9am to 5pm UK time. \
                 Please choose another time.",
            );
        }

        let free = match backend.slot_available(&self.form.date, &self.form.time).await {
            Ok(free) => free,
            Err(e) => {
                // The check is advisory: an outage must not block bookings.
                warn!("[booking] Slot check failed ({e}), assuming available");
                true
            }
        };
        if !free {
            self.step = BookingStep::PreferredTime;
            return self
                .reject("This time slot is already booked. Please choose a different time.");
        }

        self.step = BookingStep::Submitting;
        let request = self.appointment_request();
        info!(
            "[booking] Submitting booking for {} on {}",
            request.name, request.preferred_date_time_text
        );

        match backend.submit(&request).await {
            Ok(()) => {
                let confirmation = BookingConfirmation {
                    name: self.form.name.clone(),
                    phone: self.form.phone.clone(),
                    date: self.form.date.clone(),
                    time: self.form.time.clone(),
                };
                info!("[booking] Booking confirmed for {}", confirmation.name);
                *self = Self::new();
                FlowOutcome::Confirmed(confirmation)
            }
            Err(e) => {
                warn!("[booking] Submission failed: {e}");
                self.step = BookingStep::PreferredTime;
                self.reject(crate::engine::appointments::user_facing_rejection(&e.to_string()))
            }
        }
    }

    fn appointment_request(&self) -> AppointmentRequest {
        let as_yes_no = |answer: Option<bool>| {
            answer.map(|b| if b { "Yes" } else { "No" }.to_string())
        };
        AppointmentRequest {
            name: self.form.name.clone(),
            phone: validate::normalize_phone(&self.form.phone),
            preferred_date_time_text: format!("{} {}", self.form.date, self.form.time),
            condition: (!self.form.condition.is_empty()).then(|| self.form.condition.clone()),
            prior_treatments: as_yes_no(self.form.prior_treatments),
            contraindication_history: as_yes_no(self.form.psychosis_history),
        }
    }

    fn reject(&mut self, message: impl Into<String>) -> FlowOutcome {
        self.error = Some(message.into());
        FlowOutcome::Stay
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atoms::error::{EngineError, EngineResult};
    use crate::engine::http::{Relay, DEFAULT_TIMEOUT};
    use crate::engine::sim::{SimulatedCompletion, SimulatedResponse};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::Arc;

    struct MockBackend {
        requests: Mutex<Vec<AppointmentRequest>>,
        reject_with: Mutex<Option<(u16, String)>>,
        /// `Some(free)` answers the slot check; `None` makes it error.
        slot_free: Mutex<Option<bool>>,
    }

    impl MockBackend {
        fn new() -> Self {
            MockBackend {
                requests: Mutex::new(Vec::new()),
                reject_with: Mutex::new(None),
                slot_free: Mutex::new(Some(true)),
            }
        }
    }

    #[async_trait]
    impl AppointmentBackend for MockBackend {
        async fn submit(&self, request: &AppointmentRequest) -> EngineResult<()> {
            if let Some((status, message)) = self.reject_with.lock().take() {
                return Err(EngineError::Rejection { status, message });
            }
            self.requests.lock().push(request.clone());
            Ok(())
        }

        async fn slot_available(&self, _date: &str, _time: &str) -> EngineResult<bool> {
            match *self.slot_free.lock() {
                Some(free) => Ok(free),
                None => Err(EngineError::Transport("availability service down".into())),
            }
        }
    }

    fn eligibility_relay(reply: &str) -> Relay {
        let sim = Arc::new(SimulatedCompletion::new());
        sim.push(SimulatedResponse::reply(reply, None));
        Relay::new(sim, DEFAULT_TIMEOUT)
    }

    async fn flow_at_preferred_time(relay: &Relay, backend: &MockBackend) -> BookingFlow {
        let mut flow = BookingFlow::new();
        assert_eq!(flow.advance("anxiety", relay, backend).await, FlowOutcome::Advanced);
        assert_eq!(flow.advance("Yes", relay, backend).await, FlowOutcome::Advanced);
        assert_eq!(flow.advance("No", relay, backend).await, FlowOutcome::Advanced);
        assert_eq!(flow.advance("Jane Doe", relay, backend).await, FlowOutcome::Advanced);
        assert_eq!(flow.advance("07700 900000", relay, backend).await, FlowOutcome::Advanced);
        assert_eq!(flow.advance("15/12/2025", relay, backend).await, FlowOutcome::Advanced);
        assert_eq!(flow.step(), BookingStep::PreferredTime);
        flow
    }

    #[tokio::test]
    async fn full_booking_flow_normalizes_phone_and_preserves_date_time() {
        let _ = env_logger::builder().is_test(true).try_init();
        let relay = eligibility_relay("Yes, anxiety is eligible for treatment.");
        let backend = MockBackend::new();
        let mut flow = flow_at_preferred_time(&relay, &backend).await;

        let outcome = flow.advance("2:30pm", &relay, &backend).await;
        let FlowOutcome::Confirmed(confirmation) = outcome else {
            panic!("expected confirmation, got {outcome:?}");
        };

        let requests = backend.requests.lock();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].phone, "07700900000");
        assert_eq!(requests[0].phone.len(), 11);
        assert_eq!(requests[0].preferred_date_time_text, "15/12/2025 2:30pm");
        assert_eq!(requests[0].prior_treatments.as_deref(), Some("Yes"));
        assert_eq!(requests[0].contraindication_history.as_deref(), Some("No"));

        let message = confirmation.message();
        assert!(message.contains("15/12/2025"));
        assert!(message.contains("2:30pm"));
        assert!(message.contains("Jane Doe"));

        // Machine is back at its initial state.
        assert_eq!(flow.step(), BookingStep::Condition);
        assert_eq!(flow.form(), &BookingForm::default());
    }

    #[tokio::test]
    async fn invalid_phone_keeps_the_pointer_on_phone() {
        let relay = eligibility_relay("eligible");
        let backend = MockBackend::new();
        let mut flow = BookingFlow::new();
        flow.advance("anxiety", &relay, &backend).await;
        flow.advance("Yes", &relay, &backend).await;
        flow.advance("No", &relay, &backend).await;
        flow.advance("Jane Doe", &relay, &backend).await;

        assert_eq!(flow.advance("abc", &relay, &backend).await, FlowOutcome::Stay);
        assert_eq!(flow.step(), BookingStep::Phone);
        assert_eq!(flow.error(), Some("Please enter a valid UK phone number"));
    }

    #[tokio::test]
    async fn empty_name_never_advances() {
        let relay = eligibility_relay("eligible");
        let backend = MockBackend::new();
        let mut flow = BookingFlow::new();
        flow.advance("anxiety", &relay, &backend).await;
        flow.advance("Yes", &relay, &backend).await;
        flow.advance("No", &relay, &backend).await;

        assert_eq!(flow.advance("", &relay, &backend).await, FlowOutcome::Stay);
        assert_eq!(flow.advance("   ", &relay, &backend).await, FlowOutcome::Stay);
        assert_eq!(flow.step(), BookingStep::FullName);
    }

    #[tokio::test]
    async fn out_of_hours_time_reprompts_on_preferred_time() {
        let relay = eligibility_relay("eligible");
        let backend = MockBackend::new();
        let mut flow = BookingFlow::new();
        flow.advance("anxiety", &relay, &backend).await;
        flow.advance("Yes", &relay, &backend).await;
        flow.advance("No", &relay, &backend).await;
        flow.advance("Jane Doe", &relay, &backend).await;
        flow.advance("07700 900000", &relay, &backend).await;
        // 13/12/2025 is a Saturday.
        flow.advance("13/12/2025", &relay, &backend).await;

        assert_eq!(flow.advance("2:00pm", &relay, &backend).await, FlowOutcome::Stay);
        assert_eq!(flow.step(), BookingStep::PreferredTime);
        assert!(flow.error().unwrap().contains("Monday to Friday"));
        assert!(backend.requests.lock().is_empty());
    }

    #[tokio::test]
    async fn submission_failure_preserves_collected_values() {
        let relay = eligibility_relay("eligible");
        let backend = MockBackend::new();
        *backend.reject_with.lock() = Some((500, "Could not connect to the booking sheet".into()));
        let mut flow = flow_at_preferred_time(&relay, &backend).await;

        assert_eq!(flow.advance("2:30pm", &relay, &backend).await, FlowOutcome::Stay);
        assert_eq!(flow.step(), BookingStep::PreferredTime);
        assert!(flow.error().is_some());
        // Everything entered so far survives for the retry.
        assert_eq!(flow.form().name, "Jane Doe");
        assert_eq!(flow.form().phone, "07700 900000");
        assert_eq!(flow.form().date, "15/12/2025");

        // Retrying the terminal step succeeds without re-entering data.
        let outcome = flow.advance("2:30pm", &relay, &backend).await;
        assert!(matches!(outcome, FlowOutcome::Confirmed(_)));
    }

    #[tokio::test]
    async fn taken_slot_blocks_submission() {
        let relay = eligibility_relay("eligible");
        let backend = MockBackend::new();
        *backend.slot_free.lock() = Some(false);
        let mut flow = flow_at_preferred_time(&relay, &backend).await;

        assert_eq!(flow.advance("2:30pm", &relay, &backend).await, FlowOutcome::Stay);
        assert!(flow.error().unwrap().contains("already booked"));
        assert!(backend.requests.lock().is_empty());
    }

    #[tokio::test]
    async fn slot_check_outage_fails_open() {
        let relay = eligibility_relay("eligible");
        let backend = MockBackend::new();
        *backend.slot_free.lock() = None;
        let mut flow = flow_at_preferred_time(&relay, &backend).await;

        let outcome = flow.advance("2:30pm", &relay, &backend).await;
        assert!(matches!(outcome, FlowOutcome::Confirmed(_)));
        assert_eq!(backend.requests.lock().len(), 1);
    }

    #[tokio::test]
    async fn negative_eligibility_reprompts_on_condition() {
        let relay = eligibility_relay("I'm afraid that is not treatable with medical cannabis.");
        let backend = MockBackend::new();
        let mut flow = BookingFlow::new();

        assert_eq!(flow.advance("hiccups", &relay, &backend).await, FlowOutcome::Stay);
        assert_eq!(flow.step(), BookingStep::Condition);
        assert!(flow.error().unwrap().contains("not currently treatable"));
    }

    #[tokio::test]
    async fn failed_eligibility_check_defaults_to_treatable() {
        let sim = Arc::new(SimulatedCompletion::new());
        sim.push(SimulatedResponse::failure(400, "no such agent"));
        let relay = Relay::new(sim, DEFAULT_TIMEOUT);
        let backend = MockBackend::new();
        let mut flow = BookingFlow::new();

        assert_eq!(flow.advance("anxiety", &relay, &backend).await, FlowOutcome::Advanced);
        assert_eq!(flow.form().treatable, Some(true));
    }

    #[test]
    fn negation_outranks_affirmation() {
        assert_eq!(classify_eligibility("This is treatable."), Some(true));
        assert_eq!(classify_eligibility("This is not treatable."), Some(false));
        // Both keyword classes present — explicit negation wins.
        assert_eq!(
            classify_eligibility("It is eligible in some countries but not eligible in the UK."),
            Some(false)
        );
        assert_eq!(classify_eligibility("Hard to say."), None);
    }

    #[tokio::test]
    async fn cancel_discards_collected_values() {
        let relay = eligibility_relay("eligible");
        let backend = MockBackend::new();
        let mut flow = BookingFlow::new();
        flow.advance("anxiety", &relay, &backend).await;
        flow.advance("Yes", &relay, &backend).await;

        flow.cancel();
        assert_eq!(flow.step(), BookingStep::Condition);
        assert_eq!(flow.form(), &BookingForm::default());
    }
}
