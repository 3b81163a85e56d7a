//! Core engine of the remindly personal reminder service.
//! Owns time normalization, the reminder store, due-time delivery and the
//! list projection; front ends only call into this crate.

pub mod config;
pub mod db;
pub mod delivery;
pub mod logging;
pub mod model;
pub mod normalizer;
pub mod repo;
pub mod scheduler;
pub mod service;

pub use config::{ConfigError, EngineConfig};
pub use delivery::alerts::{AlertSink, Alerter, ChannelAlertSink, LogAlertSink};
pub use delivery::channel::{ChannelError, NotificationChannel};
pub use delivery::dispatcher::{DeliveryOutcome, DispatchPolicy, NotificationDispatcher};
pub use delivery::telegram::TelegramChannel;
pub use logging::{default_log_level, init_logging, init_logging_with, logging_status, LogOptions};
pub use model::candidate::ReminderCandidate;
pub use model::reminder::{NewReminder, Reminder, ReminderId, ReminderStatus};
pub use normalizer::{delivery_instant, is_valid_schedule, parse_instant, ParseFailure};
pub use repo::reminder_repo::{
    DueBatch, RepoError, RepoResult, ReminderRepository, SqliteReminderRepository, Transition,
    UndecodableRow,
};
pub use scheduler::clock::{Clock, ManualClock, SystemClock};
pub use scheduler::due_scheduler::{
    DueReminderScheduler, PassReport, RecordOutcome, SchedulerConfig, SchedulerHandle,
};
pub use service::intake_service::{CandidateExtractor, IntakeError, IntakeService};
pub use service::list_view::{render, ReminderListService, ReminderListView};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
