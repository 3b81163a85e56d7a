//! Domain model for timed reminders.
//!
//! # Responsibility
//! - Define the reminder record and its closed lifecycle state set.
//! - Define the structured candidate produced by the external extractor.
//!
//! # Invariants
//! - Every reminder is identified by a stable, store-assigned `ReminderId`.
//! - Reminders are never deleted; terminal records stay as history.

pub mod candidate;
pub mod reminder;
