//! Outbound delivery: channel contract, adapters, dispatcher and alerting.
//!
//! # Responsibility
//! - Abstract the external messaging transport behind `NotificationChannel`.
//! - Turn one delivery attempt into a typed `DeliveryOutcome`.
//! - Surface operational failures to an `AlertSink` without blocking callers.

pub mod alerts;
pub mod channel;
pub mod dispatcher;
pub mod telegram;
