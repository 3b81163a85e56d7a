//! Timestamp normalization for reminder schedules.
//!
//! # Responsibility
//! - Turn candidate timestamp strings into unambiguous instants.
//! - Compute the delivery instant from a schedule and its lead time.
//!
//! # Invariants
//! - Only `YYYY-MM-DDTHH:MM[:SS[.fff]]<offset>` is accepted, where offset is
//!   `Z` or `±HH:MM`. Anything else is a `ParseFailure`.
//! - Parsing is pure: no clock reads, no I/O, never panics.

use chrono::{DateTime, Duration, FixedOffset};
use once_cell::sync::Lazy;
use regex::Regex;

static SCHEDULE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^([0-9]{4}-[0-9]{2}-[0-9]{2})T([0-9]{2}):([0-9]{2})(?::([0-9]{2})(\.[0-9]{1,9})?)?(Z|[+-][0-9]{2}:[0-9]{2})$",
    )
    .expect("valid schedule regex")
});
static OFFSET_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([+-])([0-9]{2}):([0-9]{2})$").expect("valid offset regex"));

/// Why a candidate timestamp was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseFailureKind {
    /// Input was empty or whitespace only.
    Empty,
    /// Input does not match the accepted date-time shape.
    Shape,
    /// Shape matched but a component is out of range (e.g. month 13).
    OutOfRange,
}

/// Rejected timestamp candidate.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed schedule `{input}`: {kind}")]
pub struct ParseFailure {
    pub input: String,
    pub kind: ParseFailureKind,
}

impl ParseFailure {
    fn new(input: &str, kind: ParseFailureKind) -> Self {
        Self {
            input: input.to_string(),
            kind,
        }
    }
}

impl std::fmt::Display for ParseFailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::Empty => "empty value",
            Self::Shape => "expected YYYY-MM-DDTHH:MM[:SS]<offset>",
            Self::OutOfRange => "date or time component out of range",
        };
        f.write_str(text)
    }
}

/// Parses a candidate schedule string into an instant with explicit offset.
///
/// # Contract
/// - Seconds and fractional seconds are optional.
/// - The offset is mandatory; `Z` is read as `+00:00`.
/// - Surrounding whitespace is not trimmed and is a shape failure.
/// - Only ASCII digits are accepted; second `60` is out of range.
pub fn parse_instant(candidate: &str) -> Result<DateTime<FixedOffset>, ParseFailure> {
    if candidate.trim().is_empty() {
        return Err(ParseFailure::new(candidate, ParseFailureKind::Empty));
    }

    let captures = SCHEDULE_RE
        .captures(candidate)
        .ok_or_else(|| ParseFailure::new(candidate, ParseFailureKind::Shape))?;

    let date = &captures[1];
    let hour = &captures[2];
    let minute = &captures[3];
    let second = captures.get(4).map_or("00", |m| m.as_str());
    // chrono reads `:60` as a leap second; one instant, one spelling.
    if second.parse::<u8>().map_or(true, |value| value > 59) {
        return Err(ParseFailure::new(candidate, ParseFailureKind::OutOfRange));
    }
    let fraction = captures.get(5).map_or("", |m| m.as_str());
    let offset = match &captures[6] {
        "Z" => "+00:00",
        other => other,
    };

    // rfc3339 requires seconds; rebuild the canonical form so chrono can
    // validate calendar ranges for us.
    let canonical = format!("{date}T{hour}:{minute}:{second}{fraction}{offset}");
    DateTime::parse_from_rfc3339(&canonical)
        .map_err(|_| ParseFailure::new(candidate, ParseFailureKind::OutOfRange))
}

/// Returns `true` when `candidate` is accepted by [`parse_instant`].
pub fn is_valid_schedule(candidate: &str) -> bool {
    parse_instant(candidate).is_ok()
}

/// Moment a notification should fire: `scheduled_at - lead_minutes`.
pub fn delivery_instant(
    scheduled_at: DateTime<FixedOffset>,
    lead_minutes: u32,
) -> DateTime<FixedOffset> {
    scheduled_at - Duration::minutes(i64::from(lead_minutes))
}

/// Parses a `±HH:MM` (or `Z`) offset used to configure the operating zone.
pub fn parse_offset(value: &str) -> Option<FixedOffset> {
    let trimmed = value.trim();
    if trimmed.eq_ignore_ascii_case("z") || trimmed.eq_ignore_ascii_case("utc") {
        return FixedOffset::east_opt(0);
    }

    let captures = OFFSET_RE.captures(trimmed)?;
    let hours: i32 = captures[2].parse().ok()?;
    let minutes: i32 = captures[3].parse().ok()?;
    if hours > 23 || minutes > 59 {
        return None;
    }

    let seconds = hours * 3600 + minutes * 60;
    if &captures[1] == "-" {
        FixedOffset::west_opt(seconds)
    } else {
        FixedOffset::east_opt(seconds)
    }
}
