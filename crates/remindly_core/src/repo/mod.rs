//! Repository layer abstractions and persistence implementations.
//!
//! # Responsibility
//! - Define the reminder store contract used by intake, view and scheduler.
//! - Isolate SQLite query details from service/scheduler orchestration.
//!
//! # Invariants
//! - Writes validate the schedule before persistence.
//! - Repository APIs return semantic errors (`NotFound`, `MalformedSchedule`)
//!   in addition to DB transport errors.

pub mod reminder_repo;
