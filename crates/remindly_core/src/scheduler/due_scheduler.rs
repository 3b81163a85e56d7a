//! Due-reminder scheduler.
//!
//! # Responsibility
//! - Every `poll_interval`, fetch due reminders and attempt delivery in
//!   delivery-instant order.
//! - Apply the outcome of each attempt to the store and report failures to
//!   the alert sink.
//!
//! # Invariants
//! - Passes never overlap: the next wait starts after the batch finishes.
//! - Each record is processed inside its own isolation boundary; a failure
//!   on one record never stops the rest of the batch or later passes.
//! - A reminder whose stored schedule fails re-validation, or whose row cannot
//!   be decoded at all, is marked `Invalid` and never retried.
//! - A transient failure leaves the record `Active` (at-least-once delivery).
//!   Retry is unbounded unless `max_delivery_attempts` is configured.
//! - Shutdown stops future ticks and lets an in-flight batch finish.

use crate::delivery::alerts::Alerter;
use crate::delivery::dispatcher::{DeliveryOutcome, NotificationDispatcher};
use crate::model::reminder::{Reminder, ReminderId};
use crate::repo::reminder_repo::{ReminderRepository, Transition, UndecodableRow};
use crate::scheduler::clock::Clock;
use chrono::{DateTime, FixedOffset};
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Loop cadence and retry ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub poll_interval: Duration,
    /// `None` keeps retrying transient failures forever.
    pub max_delivery_attempts: Option<u32>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            max_delivery_attempts: None,
        }
    }
}

/// What happened to one due reminder during a pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    /// Delivered and marked `Sent`.
    Sent,
    /// Delivery failed; still `Active` and offered again next pass.
    Retrying { attempts: u32 },
    /// Delivery failed permanently or hit the attempt ceiling; now `Invalid`.
    DeadLettered { reason: String },
    /// Stored schedule failed re-validation; now `Invalid`.
    Invalidated,
    /// The store rejected the follow-up write. The record keeps its previous
    /// state and is re-evaluated next pass.
    StoreFailure(String),
}

/// Summary of one due-scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassReport {
    pub now: DateTime<FixedOffset>,
    pub outcomes: Vec<(ReminderId, RecordOutcome)>,
    /// Set when the due-scan query itself failed.
    pub scan_error: Option<String>,
}

impl PassReport {
    pub fn due(&self) -> usize {
        self.outcomes.len()
    }

    pub fn sent(&self) -> Vec<ReminderId> {
        self.ids_where(|outcome| matches!(outcome, RecordOutcome::Sent))
    }

    pub fn retrying(&self) -> Vec<ReminderId> {
        self.ids_where(|outcome| matches!(outcome, RecordOutcome::Retrying { .. }))
    }

    /// Records that ended `Invalid` this pass, for either reason.
    pub fn invalidated(&self) -> Vec<ReminderId> {
        self.ids_where(|outcome| {
            matches!(
                outcome,
                RecordOutcome::Invalidated | RecordOutcome::DeadLettered { .. }
            )
        })
    }

    pub fn outcome_of(&self, id: ReminderId) -> Option<&RecordOutcome> {
        self.outcomes
            .iter()
            .find(|(candidate, _)| *candidate == id)
            .map(|(_, outcome)| outcome)
    }

    fn ids_where(&self, predicate: impl Fn(&RecordOutcome) -> bool) -> Vec<ReminderId> {
        self.outcomes
            .iter()
            .filter(|(_, outcome)| predicate(outcome))
            .map(|(id, _)| *id)
            .collect()
    }
}

pub struct DueReminderScheduler<R: ReminderRepository> {
    store: Arc<R>,
    dispatcher: NotificationDispatcher,
    alerter: Alerter,
    clock: Arc<dyn Clock>,
    config: SchedulerConfig,
}

impl<R: ReminderRepository + 'static> DueReminderScheduler<R> {
    pub fn new(
        store: Arc<R>,
        dispatcher: NotificationDispatcher,
        alerter: Alerter,
        clock: Arc<dyn Clock>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            store,
            dispatcher,
            alerter,
            clock,
            config,
        }
    }

    /// Runs one due-scan at the clock's current instant.
    pub async fn run_pass(&self) -> PassReport {
        let started_at = Instant::now();
        let now = self.clock.now();

        let due = match self.store.due_for_delivery(now) {
            Ok(due) => due,
            Err(err) => {
                error!(
                    "event=due_scan module=scheduler status=error duration_ms={} error={err}",
                    started_at.elapsed().as_millis()
                );
                self.alerter.raise(format!("due-scan failed: {err}"));
                return PassReport {
                    now,
                    outcomes: Vec::new(),
                    scan_error: Some(err.to_string()),
                };
            }
        };

        let mut outcomes = Vec::with_capacity(due.len());
        for row in &due.undecodable {
            outcomes.push((row.id, self.invalidate_undecodable(row)));
        }
        for reminder in &due.reminders {
            let outcome = self.process(reminder).await;
            outcomes.push((reminder.id, outcome));
        }

        let report = PassReport {
            now,
            outcomes,
            scan_error: None,
        };
        let level = if report.due() == 0 {
            log::Level::Debug
        } else {
            log::Level::Info
        };
        log::log!(
            level,
            "event=due_scan module=scheduler status=ok due={} sent={} retrying={} invalid={} duration_ms={}",
            report.due(),
            report.sent().len(),
            report.retrying().len(),
            report.invalidated().len(),
            started_at.elapsed().as_millis()
        );
        report
    }

    /// Isolation boundary for one due reminder.
    async fn process(&self, reminder: &Reminder) -> RecordOutcome {
        if let Err(parse_err) = reminder.scheduled_instant() {
            warn!(
                "event=revalidate module=scheduler status=error id={} error={parse_err}",
                reminder.id
            );
            return match self.store.mark_invalid(reminder.id) {
                Ok(_) => {
                    self.alerter.raise(format!(
                        "reminder {} has a malformed schedule and was marked invalid",
                        reminder.id
                    ));
                    RecordOutcome::Invalidated
                }
                Err(err) => self.store_failure(reminder.id, "mark_invalid", err.to_string()),
            };
        }

        match self.dispatcher.deliver(reminder).await {
            DeliveryOutcome::Success => match self.store.mark_sent(reminder.id) {
                Ok(Transition::Applied) => {
                    info!(
                        "event=deliver module=scheduler status=ok id={} owner_id={}",
                        reminder.id, reminder.owner_id
                    );
                    RecordOutcome::Sent
                }
                Ok(Transition::Unchanged(current)) => {
                    warn!(
                        "event=deliver module=scheduler status=skip id={} current={}",
                        reminder.id,
                        current.as_str()
                    );
                    RecordOutcome::Sent
                }
                // Delivered but not recorded: the next pass sends it again.
                Err(err) => self.store_failure(reminder.id, "mark_sent", err.to_string()),
            },
            DeliveryOutcome::TransientFailure(reason) => self.handle_transient(reminder, reason),
            DeliveryOutcome::PermanentFailure(reason) => self.dead_letter(reminder.id, reason),
        }
    }

    fn invalidate_undecodable(&self, row: &UndecodableRow) -> RecordOutcome {
        warn!(
            "event=revalidate module=scheduler status=error id={} error={}",
            row.id, row.reason
        );
        match self.store.mark_invalid(row.id) {
            Ok(Transition::Applied) => {
                self.alerter.raise(format!(
                    "reminder {} could not be read from the store and was marked invalid: {}",
                    row.id, row.reason
                ));
                RecordOutcome::Invalidated
            }
            Ok(Transition::Unchanged(_)) => RecordOutcome::Invalidated,
            Err(err) => self.store_failure(row.id, "mark_invalid", err.to_string()),
        }
    }

    fn handle_transient(&self, reminder: &Reminder, reason: String) -> RecordOutcome {
        let attempts = match self.store.record_failed_attempt(reminder.id, &reason) {
            Ok(attempts) => attempts,
            Err(err) => {
                error!(
                    "event=record_attempt module=scheduler status=error id={} error={err}",
                    reminder.id
                );
                reminder.delivery_attempts.saturating_add(1)
            }
        };

        if let Some(max) = self.config.max_delivery_attempts {
            if attempts >= max {
                return self.dead_letter(
                    reminder.id,
                    format!("gave up after {attempts} attempts: {reason}"),
                );
            }
        }

        self.alerter.raise(format!(
            "delivery of reminder {} failed (attempt {attempts}): {reason}",
            reminder.id
        ));
        debug!(
            "event=deliver module=scheduler status=retry id={} attempts={attempts}",
            reminder.id
        );
        RecordOutcome::Retrying { attempts }
    }

    fn dead_letter(&self, id: ReminderId, reason: String) -> RecordOutcome {
        match self.store.mark_invalid(id) {
            Ok(_) => {
                warn!("event=dead_letter module=scheduler status=ok id={id} reason={reason}");
                self.alerter.raise(format!(
                    "reminder {id} was marked invalid after delivery failure: {reason}"
                ));
                RecordOutcome::DeadLettered { reason }
            }
            Err(err) => self.store_failure(id, "mark_invalid", err.to_string()),
        }
    }

    fn store_failure(&self, id: ReminderId, operation: &str, message: String) -> RecordOutcome {
        error!(
            "event=store_write module=scheduler status=error id={id} op={operation} error={message}"
        );
        self.alerter
            .raise(format!("store {operation} failed for reminder {id}: {message}"));
        RecordOutcome::StoreFailure(message)
    }

    /// Spawns the polling loop on the current tokio runtime.
    ///
    /// The loop waits `poll_interval`, runs one pass, and repeats until the
    /// returned handle is shut down.
    pub fn start(self) -> SchedulerHandle {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let period = self.config.poll_interval;

        let join = tokio::spawn(async move {
            info!(
                "event=scheduler_start module=scheduler status=ok poll_interval_ms={} delivery_timeout_ms={} max_attempts={:?}",
                period.as_millis(),
                self.dispatcher.policy().delivery_timeout.as_millis(),
                self.config.max_delivery_attempts
            );
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(period) => {
                        // Not raced against cancellation: a started batch
                        // always completes.
                        self.run_pass().await;
                    }
                }
            }
            info!("event=scheduler_stop module=scheduler status=ok");
        });

        SchedulerHandle { cancel, join }
    }
}

/// Control handle of a running scheduler loop.
pub struct SchedulerHandle {
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

impl SchedulerHandle {
    pub fn is_running(&self) -> bool {
        !self.join.is_finished()
    }

    /// Stops ticking and waits for an in-flight batch to finish.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(err) = self.join.await {
            error!("event=scheduler_stop module=scheduler status=error error={err}");
        }
    }
}
