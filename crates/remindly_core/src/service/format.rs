//! Human-readable rendering of reminder moments and messages.
//!
//! All functions are pure; callers pass the operating offset explicitly.

use crate::model::reminder::Reminder;
use chrono::{DateTime, FixedOffset};

/// `10 May at 09:25`, in the given offset.
pub fn format_moment(instant: DateTime<FixedOffset>, zone: FixedOffset) -> String {
    instant.with_timezone(&zone).format("%-d %b at %H:%M").to_string()
}

/// `10 May 2025 09:25`, used where the year matters (past entries).
pub fn format_full(instant: DateTime<FixedOffset>, zone: FixedOffset) -> String {
    instant.with_timezone(&zone).format("%-d %b %Y %H:%M").to_string()
}

/// Lead time phrase: `30 min`, `1 h`, `1 h 30 min` or `at event time`.
pub fn format_lead(lead_minutes: u32) -> String {
    let hours = lead_minutes / 60;
    let minutes = lead_minutes % 60;
    match (hours, minutes) {
        (0, 0) => "at event time".to_string(),
        (0, m) => format!("{m} min"),
        (h, 0) => format!("{h} h"),
        (h, m) => format!("{h} h {m} min"),
    }
}

/// Trims and upper-cases the first character.
pub fn capitalize_first(text: &str) -> String {
    let trimmed = text.trim();
    let mut chars = trimmed.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Notification text pushed to the owner when a reminder fires.
pub fn delivery_message(reminder: &Reminder, zone: FixedOffset) -> String {
    let when = reminder
        .scheduled_instant()
        .map(|instant| format_moment(instant, zone))
        .unwrap_or_else(|_| reminder.scheduled_at.clone());
    format!("Reminder: {}\nWhen: {when}", reminder.description.trim())
}

/// Acknowledgement returned to the requester after a successful intake.
pub fn confirmation_message(reminder: &Reminder, zone: FixedOffset) -> String {
    let (event, notify) = match (reminder.scheduled_instant(), reminder.delivery_instant()) {
        (Ok(event), Ok(notify)) => (format_moment(event, zone), format_moment(notify, zone)),
        _ => (reminder.scheduled_at.clone(), reminder.scheduled_at.clone()),
    };
    let lead = if reminder.lead_minutes == 0 {
        format_lead(0)
    } else {
        format!("{} before", format_lead(reminder.lead_minutes))
    };

    format!(
        "Event: {event}\n{}\nNotify: {notify} ({lead})",
        capitalize_first(&reminder.description)
    )
}
