//! Due-reminder polling and delivery.
//!
//! # Responsibility
//! - Drive the periodic due-scan and apply delivery outcomes to the store.
//! - Own the only code path that mutates reminder status.

pub mod clock;
pub mod due_scheduler;
