// Plantz Engine — Intake validators
// Pure input checks for the booking flow: UK phone numbers, DD/MM/YYYY
// dates, 12-hour clock times, and the call-centre business-hours policy
// (weekdays, 9am–5pm UK time). All functions are side-effect free.

use chrono::{Datelike, NaiveDate, Weekday};
use regex::Regex;
use std::sync::LazyLock;

/// DD/MM/YYYY with day 01–31 and month 01–12.
static DATE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(0[1-9]|[12][0-9]|3[01])/(0[1-9]|1[0-2])/\d{4}$").expect("date pattern")
});

/// 12-hour clock with optional minutes: "2pm", "2:30pm", "11:05 am".
static TIME_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(1[0-2]|0?[1-9]):?([0-5][0-9])?\s?(am|pm)$").expect("time pattern")
});

/// Opening and closing hour of the booking line (24h; close is exclusive).
const OPENING_HOUR: u32 = 9;
const CLOSING_HOUR: u32 = 17;

// ── Field validators ───────────────────────────────────────────────────────

pub fn valid_name(name: &str) -> bool {
    !name.trim().is_empty()
}

/// UK phone numbers are 10–11 digits once formatting is stripped.
pub fn valid_phone(phone: &str) -> bool {
    let digits = normalize_phone(phone);
    (10..=11).contains(&digits.len())
}

/// Strip everything but digits — the shape the backend stores.
pub fn normalize_phone(phone: &str) -> String {
    phone.chars().filter(|c| c.is_ascii_digit()).collect()
}

pub fn valid_date(date: &str) -> bool {
    DATE_PATTERN.is_match(date)
}

pub fn valid_time(time: &str) -> bool {
    TIME_PATTERN.is_match(time.trim())
}

pub fn yes_no(answer: &str) -> Option<bool> {
    match answer.trim().to_lowercase().as_str() {
        "yes" | "y" => Some(true),
        "no" | "n" => Some(false),
        _ => None,
    }
}

// ── Business-hours policy ──────────────────────────────────────────────────

/// Parse a 12-hour time into (hour, minute) on the 24-hour clock.
pub fn parse_time_12h(time: &str) -> Option<(u32, u32)> {
    let caps = TIME_PATTERN.captures(time.trim())?;
    let mut hour: u32 = caps.get(1)?.as_str().parse().ok()?;
    let minute: u32 = caps.get(2).map_or(0, |m| m.as_str().parse().unwrap_or(0));
    let meridiem = caps.get(3)?.as_str().to_lowercase();

    if hour == 12 {
        hour = 0;
    }
    if meridiem == "pm" {
        hour += 12;
    }
    Some((hour, minute))
}

pub fn parse_date(date: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(date, "%d/%m/%Y").ok()
}

/// Calls are taken Monday–Friday, 09:00 inclusive to 17:00 exclusive.
/// Both arguments are assumed to have passed their format validators;
/// anything unparseable is out of hours.
pub fn within_business_hours(date: &str, time: &str) -> bool {
    let Some(date) = parse_date(date) else { return false };
    if matches!(date.weekday(), Weekday::Sat | Weekday::Sun) {
        return false;
    }
    let Some((hour, minute)) = parse_time_12h(time) else { return false };
    (hour, minute) >= (OPENING_HOUR, 0) && hour < CLOSING_HOUR
}

// ── Tests ──────────────────────────────────────────────────────────────────
