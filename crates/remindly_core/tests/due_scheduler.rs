use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use remindly_core::delivery::alerts::{AlertSink, Alerter};
use remindly_core::normalizer::parse_instant;
use remindly_core::{
    ChannelError, Clock, DispatchPolicy, DueBatch, DueReminderScheduler, ManualClock, NewReminder,
    NotificationChannel, NotificationDispatcher, RecordOutcome, Reminder, ReminderId,
    ReminderRepository, ReminderStatus, RepoError, RepoResult, SchedulerConfig,
    SqliteReminderRepository, Transition,
};
use rusqlite::Connection;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Clone)]
enum Behavior {
    Deliver,
    FailTimes(u32),
    AlwaysFail,
    Reject,
    Hang,
}

#[derive(Default)]
struct FakeChannel {
    behaviors: Mutex<HashMap<String, Behavior>>,
    calls: Mutex<Vec<String>>,
    delivered: Mutex<Vec<(String, String)>>,
}

impl FakeChannel {
    fn behave(&self, recipient: &str, behavior: Behavior) {
        self.behaviors
            .lock()
            .unwrap()
            .insert(recipient.to_string(), behavior);
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn delivered(&self) -> Vec<(String, String)> {
        self.delivered.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationChannel for FakeChannel {
    fn name(&self) -> &str {
        "fake"
    }

    async fn send(&self, recipient: &str, message: &str) -> Result<(), ChannelError> {
        self.calls.lock().unwrap().push(recipient.to_string());
        let behavior = {
            let mut behaviors = self.behaviors.lock().unwrap();
            let entry = behaviors
                .entry(recipient.to_string())
                .or_insert(Behavior::Deliver);
            let current = entry.clone();
            if let Behavior::FailTimes(left) = entry {
                *left = left.saturating_sub(1);
            }
            current
        };

        match behavior {
            Behavior::Deliver | Behavior::FailTimes(0) => {
                self.delivered
                    .lock()
                    .unwrap()
                    .push((recipient.to_string(), message.to_string()));
                Ok(())
            }
            Behavior::FailTimes(_) | Behavior::AlwaysFail => {
                Err(ChannelError::Transport("502 bad gateway".to_string()))
            }
            Behavior::Reject => Err(ChannelError::Rejected("bot was blocked".to_string())),
            Behavior::Hang => std::future::pending().await,
        }
    }
}

#[derive(Default)]
struct RecordingSink {
    messages: Mutex<Vec<String>>,
}

impl RecordingSink {
    fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }
}

#[async_trait]
impl AlertSink for RecordingSink {
    async fn notify(&self, message: &str) -> Result<(), ChannelError> {
        self.messages.lock().unwrap().push(message.to_string());
        Ok(())
    }
}

struct Harness {
    store: Arc<SqliteReminderRepository>,
    channel: Arc<FakeChannel>,
    sink: Arc<RecordingSink>,
    clock: Arc<ManualClock>,
}

impl Harness {
    fn new() -> Self {
        Self::with_store(SqliteReminderRepository::open_in_memory().unwrap())
    }

    fn with_store(store: SqliteReminderRepository) -> Self {
        Self {
            store: Arc::new(store),
            channel: Arc::new(FakeChannel::default()),
            sink: Arc::new(RecordingSink::default()),
            clock: Arc::new(ManualClock::new(at("2025-05-10T09:00:00+03:00"))),
        }
    }

    fn scheduler(
        &self,
        config: SchedulerConfig,
        policy: DispatchPolicy,
    ) -> DueReminderScheduler<SqliteReminderRepository> {
        let clock: Arc<dyn Clock> = self.clock.clone();
        DueReminderScheduler::new(
            Arc::clone(&self.store),
            NotificationDispatcher::new(self.channel.clone(), policy, operating_zone()),
            Alerter::new(self.sink.clone()),
            clock,
            config,
        )
    }

    fn default_scheduler(&self) -> DueReminderScheduler<SqliteReminderRepository> {
        self.scheduler(SchedulerConfig::default(), DispatchPolicy::default())
    }

    fn add(&self, owner: &str, scheduled_at: &str, lead: u32, text: &str) -> ReminderId {
        self.store
            .create(&NewReminder::new(owner, scheduled_at, lead, text), Utc::now())
            .unwrap()
            .id
    }

    fn status(&self, id: ReminderId) -> ReminderStatus {
        self.store.get(id).unwrap().unwrap().status
    }
}

/// Status read straight from the file, for rows the repository cannot decode.
fn stored_status(path: &std::path::Path, id: ReminderId) -> String {
    Connection::open(path)
        .unwrap()
        .query_row("SELECT status FROM reminders WHERE id = ?1;", [id], |row| {
            row.get(0)
        })
        .unwrap()
}

fn at(raw: &str) -> DateTime<FixedOffset> {
    parse_instant(raw).unwrap()
}

fn operating_zone() -> FixedOffset {
    FixedOffset::east_opt(3 * 3600).unwrap()
}

/// Lets detached alert tasks run. Time is paused, so this returns as soon as
/// every other task is idle.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

#[tokio::test(start_paused = true)]
async fn due_reminder_is_delivered_and_marked_sent() {
    let h = Harness::new();
    let due = h.add("42", "2025-05-10T09:25:00+03:00", 30, "stand-up");
    let not_yet = h.add("42", "2025-05-10T09:25:00+03:00", 0, "stand-up start");
    let scheduler = h.default_scheduler();

    let report = scheduler.run_pass().await;
    assert_eq!(report.sent(), vec![due]);
    assert_eq!(h.status(due), ReminderStatus::Sent);
    assert_eq!(h.status(not_yet), ReminderStatus::Active);

    let delivered = h.channel.delivered();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].0, "42");
    assert_eq!(delivered[0].1, "Reminder: stand-up\nWhen: 10 May at 09:25");

    let again = scheduler.run_pass().await;
    assert_eq!(again.due(), 0);
    assert_eq!(h.channel.calls().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn transient_failures_retry_until_delivery_succeeds() {
    let h = Harness::new();
    let id = h.add("42", "2025-05-10T08:00:00+03:00", 0, "flaky");
    h.channel.behave("42", Behavior::FailTimes(3));
    let scheduler = h.default_scheduler();

    for attempt in 1..=3 {
        let report = scheduler.run_pass().await;
        assert_eq!(
            report.outcome_of(id),
            Some(&RecordOutcome::Retrying { attempts: attempt })
        );
        assert_eq!(h.status(id), ReminderStatus::Active);
    }

    let fourth = scheduler.run_pass().await;
    assert_eq!(fourth.outcome_of(id), Some(&RecordOutcome::Sent));
    assert_eq!(h.status(id), ReminderStatus::Sent);

    let fifth = scheduler.run_pass().await;
    assert_eq!(fifth.due(), 0);
    assert_eq!(h.channel.calls().len(), 4);

    let stored = h.store.get(id).unwrap().unwrap();
    assert_eq!(stored.delivery_attempts, 3);

    settle().await;
    let failures = h
        .sink
        .messages()
        .into_iter()
        .filter(|message| message.contains("failed"))
        .count();
    assert_eq!(failures, 3);
}

#[tokio::test(start_paused = true)]
async fn corrupted_schedule_is_invalidated_and_never_retried() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.db");
    let h = Harness::with_store(SqliteReminderRepository::open(&path).unwrap());
    let corrupt = h.add("42", "2025-05-10T08:00:00+03:00", 0, "corrupt");
    let healthy = h.add("42", "2025-05-10T08:30:00+03:00", 0, "healthy");

    Connection::open(&path)
        .unwrap()
        .execute(
            "UPDATE reminders SET scheduled_at = 'not-a-date' WHERE id = ?1;",
            [corrupt],
        )
        .unwrap();

    let scheduler = h.default_scheduler();
    let report = scheduler.run_pass().await;
    assert_eq!(report.outcome_of(corrupt), Some(&RecordOutcome::Invalidated));
    assert_eq!(report.outcome_of(healthy), Some(&RecordOutcome::Sent));
    assert_eq!(h.status(corrupt), ReminderStatus::Invalid);
    assert_eq!(h.channel.calls(), vec!["42".to_string()]);

    let next = scheduler.run_pass().await;
    assert_eq!(next.due(), 0);

    settle().await;
    let alerts = h.sink.messages();
    assert_eq!(alerts.len(), 1);
    assert!(alerts[0].contains("malformed schedule"));
}

#[tokio::test(start_paused = true)]
async fn undecodable_row_is_invalidated_and_healthy_reminder_still_delivered() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.db");
    let h = Harness::with_store(SqliteReminderRepository::open(&path).unwrap());
    let broken = h.add("1", "2025-05-10T08:00:00+03:00", 0, "broken");
    let healthy = h.add("2", "2025-05-10T08:30:00+03:00", 0, "healthy");

    Connection::open(&path)
        .unwrap()
        .execute(
            "UPDATE reminders SET created_at_ms = ?2 WHERE id = ?1;",
            rusqlite::params![broken, i64::MAX],
        )
        .unwrap();

    let scheduler = h.default_scheduler();
    let first = scheduler.run_pass().await;
    assert!(first.scan_error.is_none());
    assert_eq!(first.outcome_of(broken), Some(&RecordOutcome::Invalidated));
    assert_eq!(first.outcome_of(healthy), Some(&RecordOutcome::Sent));
    assert_eq!(h.status(healthy), ReminderStatus::Sent);
    assert_eq!(stored_status(&path, broken), "invalid");
    assert_eq!(h.channel.calls(), vec!["2".to_string()]);

    for _ in 0..2 {
        let later = scheduler.run_pass().await;
        assert!(later.scan_error.is_none());
        assert_eq!(later.due(), 0);
    }

    settle().await;
    let alerts = h.sink.messages();
    assert_eq!(alerts.len(), 1);
    assert!(alerts[0].contains("could not be read"));
}

#[tokio::test(start_paused = true)]
async fn one_failing_record_does_not_block_the_batch() {
    let h = Harness::new();
    let first = h.add("1", "2025-05-10T07:00:00+03:00", 0, "first");
    let failing = h.add("2", "2025-05-10T07:30:00+03:00", 0, "second");
    let last = h.add("3", "2025-05-10T08:00:00+03:00", 0, "third");
    h.channel.behave("2", Behavior::AlwaysFail);

    let report = h.default_scheduler().run_pass().await;

    assert_eq!(h.channel.calls(), vec!["1", "2", "3"]);
    assert_eq!(report.sent(), vec![first, last]);
    assert_eq!(report.retrying(), vec![failing]);
    assert_eq!(h.status(failing), ReminderStatus::Active);
}

#[tokio::test(start_paused = true)]
async fn attempt_ceiling_dead_letters_the_reminder() {
    let h = Harness::new();
    let id = h.add("42", "2025-05-10T08:00:00+03:00", 0, "doomed");
    h.channel.behave("42", Behavior::AlwaysFail);
    let scheduler = h.scheduler(
        SchedulerConfig {
            max_delivery_attempts: Some(2),
            ..SchedulerConfig::default()
        },
        DispatchPolicy::default(),
    );

    let first = scheduler.run_pass().await;
    assert_eq!(
        first.outcome_of(id),
        Some(&RecordOutcome::Retrying { attempts: 1 })
    );

    let second = scheduler.run_pass().await;
    assert!(matches!(
        second.outcome_of(id),
        Some(RecordOutcome::DeadLettered { .. })
    ));
    assert_eq!(h.status(id), ReminderStatus::Invalid);

    assert_eq!(scheduler.run_pass().await.due(), 0);
}

#[tokio::test(start_paused = true)]
async fn rejection_is_retried_unless_classified_permanent() {
    let h = Harness::new();
    let id = h.add("42", "2025-05-10T08:00:00+03:00", 0, "blocked");
    h.channel.behave("42", Behavior::Reject);

    let lenient = h.default_scheduler().run_pass().await;
    assert_eq!(
        lenient.outcome_of(id),
        Some(&RecordOutcome::Retrying { attempts: 1 })
    );
    assert_eq!(h.status(id), ReminderStatus::Active);

    let strict = h
        .scheduler(
            SchedulerConfig::default(),
            DispatchPolicy {
                permanent_on_rejection: true,
                ..DispatchPolicy::default()
            },
        )
        .run_pass()
        .await;
    assert!(matches!(
        strict.outcome_of(id),
        Some(RecordOutcome::DeadLettered { .. })
    ));
    assert_eq!(h.status(id), ReminderStatus::Invalid);
}

#[tokio::test(start_paused = true)]
async fn stalled_channel_times_out_as_transient_failure() {
    let h = Harness::new();
    let stalled = h.add("slow", "2025-05-10T08:00:00+03:00", 0, "stalled");
    let next = h.add("fast", "2025-05-10T08:30:00+03:00", 0, "next");
    h.channel.behave("slow", Behavior::Hang);

    let scheduler = h.scheduler(
        SchedulerConfig::default(),
        DispatchPolicy {
            delivery_timeout: Duration::from_secs(5),
            ..DispatchPolicy::default()
        },
    );
    let report = scheduler.run_pass().await;

    assert_eq!(
        report.outcome_of(stalled),
        Some(&RecordOutcome::Retrying { attempts: 1 })
    );
    assert_eq!(report.outcome_of(next), Some(&RecordOutcome::Sent));
    let stored = h.store.get(stalled).unwrap().unwrap();
    assert!(stored.last_error.unwrap().contains("timed out"));
}

#[tokio::test(start_paused = true)]
async fn polling_loop_runs_passes_until_shutdown() {
    let h = Harness::new();
    let first = h.add("42", "2025-05-10T08:00:00+03:00", 0, "first");
    let handle = h
        .scheduler(
            SchedulerConfig {
                poll_interval: Duration::from_secs(30),
                max_delivery_attempts: None,
            },
            DispatchPolicy::default(),
        )
        .start();

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(h.status(first), ReminderStatus::Active);

    tokio::time::sleep(Duration::from_secs(21)).await;
    assert_eq!(h.status(first), ReminderStatus::Sent);

    let second = h.add("42", "2025-05-10T08:30:00+03:00", 0, "second");
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(h.status(second), ReminderStatus::Sent);

    assert!(handle.is_running());
    handle.shutdown().await;

    let late = h.add("42", "2025-05-10T08:45:00+03:00", 0, "after shutdown");
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(h.status(late), ReminderStatus::Active);
}

#[tokio::test(start_paused = true)]
async fn shutdown_lets_the_in_flight_batch_finish() {
    let h = Harness::new();
    let slow = h.add("slow", "2025-05-10T08:00:00+03:00", 0, "stalled");
    let fast = h.add("fast", "2025-05-10T08:30:00+03:00", 0, "next");
    h.channel.behave("slow", Behavior::Hang);

    let handle = h
        .scheduler(
            SchedulerConfig {
                poll_interval: Duration::from_secs(30),
                max_delivery_attempts: None,
            },
            DispatchPolicy {
                delivery_timeout: Duration::from_secs(5),
                ..DispatchPolicy::default()
            },
        )
        .start();

    // The tick fired at 30 s and the first send hangs until its 35 s timeout.
    tokio::time::sleep(Duration::from_secs(32)).await;
    assert_eq!(h.channel.calls(), vec!["slow".to_string()]);
    assert_eq!(h.status(fast), ReminderStatus::Active);

    handle.shutdown().await;

    assert_eq!(h.status(slow), ReminderStatus::Active);
    assert_eq!(h.store.get(slow).unwrap().unwrap().delivery_attempts, 1);
    assert_eq!(h.status(fast), ReminderStatus::Sent);

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(h.channel.calls(), vec!["slow".to_string(), "fast".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn shutdown_before_first_tick_runs_no_pass() {
    let h = Harness::new();
    let id = h.add("42", "2025-05-10T08:00:00+03:00", 0, "untouched");
    let handle = h.default_scheduler().start();

    handle.shutdown().await;
    tokio::time::sleep(Duration::from_secs(60)).await;

    assert_eq!(h.status(id), ReminderStatus::Active);
    assert!(h.channel.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn clock_controls_what_is_due() {
    let h = Harness::new();
    let id = h.add("42", "2025-05-10T12:00:00+03:00", 60, "lunch");
    let scheduler = h.default_scheduler();

    assert_eq!(scheduler.run_pass().await.due(), 0);

    h.clock.set(at("2025-05-10T11:00:00+03:00"));
    let report = scheduler.run_pass().await;
    assert_eq!(report.sent(), vec![id]);
}

struct BrokenStore;

impl ReminderRepository for BrokenStore {
    fn create(&self, _: &NewReminder, _: DateTime<Utc>) -> RepoResult<Reminder> {
        Err(RepoError::LockPoisoned)
    }
    fn get(&self, _: ReminderId) -> RepoResult<Option<Reminder>> {
        Err(RepoError::LockPoisoned)
    }
    fn list_for_owner(&self, _: &str) -> RepoResult<Vec<Reminder>> {
        Err(RepoError::LockPoisoned)
    }
    fn due_for_delivery(&self, _: DateTime<FixedOffset>) -> RepoResult<DueBatch> {
        Err(RepoError::LockPoisoned)
    }
    fn mark_sent(&self, _: ReminderId) -> RepoResult<Transition> {
        Err(RepoError::LockPoisoned)
    }
    fn mark_invalid(&self, _: ReminderId) -> RepoResult<Transition> {
        Err(RepoError::LockPoisoned)
    }
    fn record_failed_attempt(&self, _: ReminderId, _: &str) -> RepoResult<u32> {
        Err(RepoError::LockPoisoned)
    }
}

#[tokio::test(start_paused = true)]
async fn failed_scan_is_reported_and_the_loop_survives() {
    let sink = Arc::new(RecordingSink::default());
    let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(at("2025-05-10T09:00:00+03:00")));
    let scheduler = DueReminderScheduler::new(
        Arc::new(BrokenStore),
        NotificationDispatcher::new(
            Arc::new(FakeChannel::default()),
            DispatchPolicy::default(),
            operating_zone(),
        ),
        Alerter::new(sink.clone()),
        clock,
        SchedulerConfig::default(),
    );

    let report = scheduler.run_pass().await;
    assert!(report.scan_error.is_some());
    assert_eq!(report.due(), 0);

    let handle = scheduler.start();
    tokio::time::sleep(Duration::from_secs(61)).await;
    assert!(handle.is_running());
    handle.shutdown().await;

    settle().await;
    assert_eq!(sink.messages().len(), 3);
}
