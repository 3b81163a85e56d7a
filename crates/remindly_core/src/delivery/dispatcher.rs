//! Single-reminder delivery attempt.
//!
//! # Responsibility
//! - Render the notification text and push it through the channel once.
//! - Bound the attempt with a timeout so a stalled channel cannot stall the
//!   scheduler.
//! - Classify failures into transient or permanent outcomes.
//!
//! # Invariants
//! - `deliver` never returns an error: every channel failure becomes a
//!   `DeliveryOutcome`.
//! - With the default policy every failure is transient.

use super::channel::{ChannelError, NotificationChannel};
use crate::model::reminder::Reminder;
use crate::service::format::delivery_message;
use chrono::FixedOffset;
use log::warn;
use std::sync::Arc;
use std::time::Duration;

/// How delivery attempts are bounded and classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchPolicy {
    pub delivery_timeout: Duration,
    /// When set, `ChannelError::Rejected` is permanent instead of transient.
    pub permanent_on_rejection: bool,
}

impl Default for DispatchPolicy {
    fn default() -> Self {
        Self {
            delivery_timeout: Duration::from_secs(10),
            permanent_on_rejection: false,
        }
    }
}

/// Result of one delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Success,
    /// Retry on a later pass.
    TransientFailure(String),
    /// Retrying will not help; the reminder should be dead-lettered.
    PermanentFailure(String),
}

pub struct NotificationDispatcher {
    channel: Arc<dyn NotificationChannel>,
    policy: DispatchPolicy,
    zone: FixedOffset,
}

impl NotificationDispatcher {
    pub fn new(
        channel: Arc<dyn NotificationChannel>,
        policy: DispatchPolicy,
        zone: FixedOffset,
    ) -> Self {
        Self {
            channel,
            policy,
            zone,
        }
    }

    pub fn policy(&self) -> DispatchPolicy {
        self.policy
    }

    /// Attempts to deliver `reminder` to its owner.
    pub async fn deliver(&self, reminder: &Reminder) -> DeliveryOutcome {
        let message = delivery_message(reminder, self.zone);
        let send = self.channel.send(&reminder.owner_id, &message);

        match tokio::time::timeout(self.policy.delivery_timeout, send).await {
            Ok(Ok(())) => DeliveryOutcome::Success,
            Ok(Err(err)) => self.classify(reminder, err),
            Err(_) => {
                warn!(
                    "event=deliver module=delivery status=error id={} channel={} error_code=timeout timeout_ms={}",
                    reminder.id,
                    self.channel.name(),
                    self.policy.delivery_timeout.as_millis()
                );
                DeliveryOutcome::TransientFailure(format!(
                    "delivery timed out after {}s",
                    self.policy.delivery_timeout.as_secs_f32()
                ))
            }
        }
    }

    fn classify(&self, reminder: &Reminder, err: ChannelError) -> DeliveryOutcome {
        let permanent =
            matches!(err, ChannelError::Rejected(_)) && self.policy.permanent_on_rejection;
        warn!(
            "event=deliver module=delivery status=error id={} channel={} permanent={} error={}",
            reminder.id,
            self.channel.name(),
            permanent,
            err
        );

        if permanent {
            DeliveryOutcome::PermanentFailure(err.to_string())
        } else {
            DeliveryOutcome::TransientFailure(err.to_string())
        }
    }
}
