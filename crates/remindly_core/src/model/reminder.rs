//! Reminder domain model.
//!
//! # Responsibility
//! - Define the persisted reminder record and its lifecycle status.
//! - Provide derived instants (event time, delivery instant).
//!
//! # Invariants
//! - `status` only moves forward: `Active -> Sent` or `Active -> Invalid`.
//! - `scheduled_at` keeps the raw text exactly as it was stored; callers use
//!   `scheduled_instant()` to re-validate it.
//! - `lead_minutes` is never negative (enforced by the type).

use crate::normalizer::{delivery_instant, parse_instant, ParseFailure};
use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};

/// Store-assigned identifier. Monotonic, so it doubles as a stable tiebreak.
pub type ReminderId = i64;

/// Reminder lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReminderStatus {
    /// Waiting for its delivery instant.
    Active,
    /// Delivered to the owner. Terminal.
    Sent,
    /// Never deliverable (corrupt schedule or dead-lettered). Terminal.
    Invalid,
}

impl ReminderStatus {
    /// Returns whether no further transition may leave this state.
    pub fn is_terminal(self) -> bool {
        match self {
            Self::Active => false,
            Self::Sent | Self::Invalid => true,
        }
    }

    /// Returns whether `self -> next` is a permitted lifecycle transition.
    /// Only `Active` moves, and only into a terminal state.
    pub fn can_transition_to(self, next: ReminderStatus) -> bool {
        !self.is_terminal() && next.is_terminal()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Sent => "sent",
            Self::Invalid => "invalid",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "active" => Some(Self::Active),
            "sent" => Some(Self::Sent),
            "invalid" => Some(Self::Invalid),
            _ => None,
        }
    }
}

/// Canonical persisted reminder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reminder {
    pub id: ReminderId,
    /// Opaque identifier of the requesting user (channel recipient).
    pub owner_id: String,
    /// Event moment, stored verbatim as submitted.
    pub scheduled_at: String,
    /// Minutes before `scheduled_at` at which the notification fires.
    pub lead_minutes: u32,
    pub description: String,
    pub status: ReminderStatus,
    /// Informational only.
    pub created_at: DateTime<Utc>,
    /// Failed delivery attempts so far. Never affects `status` on its own.
    pub delivery_attempts: u32,
    /// Reason of the most recent failed delivery attempt.
    pub last_error: Option<String>,
}

impl Reminder {
    /// Re-validates and parses the stored schedule.
    pub fn scheduled_instant(&self) -> Result<DateTime<FixedOffset>, ParseFailure> {
        parse_instant(&self.scheduled_at)
    }

    /// Moment the notification becomes eligible, if the schedule is valid.
    pub fn delivery_instant(&self) -> Result<DateTime<FixedOffset>, ParseFailure> {
        self.scheduled_instant()
            .map(|scheduled| delivery_instant(scheduled, self.lead_minutes))
    }

    pub fn is_active(&self) -> bool {
        self.status == ReminderStatus::Active
    }
}

/// Insert request for a new reminder. The store assigns id and status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewReminder {
    pub owner_id: String,
    /// Raw schedule; rejected by the store unless it normalizes.
    pub scheduled_at: String,
    pub lead_minutes: u32,
    pub description: String,
}

impl NewReminder {
    pub fn new(
        owner_id: impl Into<String>,
        scheduled_at: impl Into<String>,
        lead_minutes: u32,
        description: impl Into<String>,
    ) -> Self {
        Self {
            owner_id: owner_id.into(),
            scheduled_at: scheduled_at.into(),
            lead_minutes,
            description: description.into(),
        }
    }
}
