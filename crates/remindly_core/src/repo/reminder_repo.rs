//! Reminder repository contract and SQLite implementation.
//!
//! # Responsibility
//! - Persist reminders and their lifecycle state (the single source of truth).
//! - Serve owner listings and the due-scan range query.
//! - Apply forward-only, idempotent status transitions.
//!
//! # Invariants
//! - `create` normalizes `scheduled_at` first and never stores a record that
//!   fails normalization.
//! - Transitions follow `ReminderStatus::can_transition_to` and are applied as
//!   conditional updates on the observed status, so `Sent` and `Invalid` rows
//!   are never modified again.
//! - Every operation runs under one connection lock; callers observe either
//!   the pre- or the post-state of a transition.
//! - Read paths pass unparseable `scheduled_at` text through for callers to
//!   re-validate.
//! - Scans decode rows one at a time: a row whose other columns cannot be
//!   decoded is reported by id (due scan) or skipped (owner listing) and
//!   never hides the rows around it.

use crate::db::{open_db, open_db_in_memory, DbError};
use crate::model::reminder::{NewReminder, Reminder, ReminderId, ReminderStatus};
use crate::normalizer::{delivery_instant, parse_instant, ParseFailure};
use chrono::{DateTime, FixedOffset, Utc};
use log::{debug, info, warn};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

const REMINDER_SELECT_SQL: &str = "SELECT
    id,
    owner_id,
    scheduled_at,
    lead_minutes,
    description,
    status,
    created_at_ms,
    delivery_attempts,
    last_error
FROM reminders";

pub type RepoResult<T> = Result<T, RepoError>;

/// Repository error for reminder persistence and query operations.
#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    /// `scheduled_at` failed normalization; nothing was stored.
    #[error(transparent)]
    MalformedSchedule(#[from] ParseFailure),
    #[error(transparent)]
    Db(#[from] DbError),
    #[error("reminder not found: {0}")]
    NotFound(ReminderId),
    #[error("invalid persisted reminder data: {0}")]
    InvalidData(String),
    #[error("reminder store lock poisoned")]
    LockPoisoned,
    #[error("inconsistent reminder state: {0}")]
    InconsistentState(&'static str),
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Result of a status transition request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The record moved from `Active` to the requested state.
    Applied,
    /// The record was already terminal; nothing changed.
    Unchanged(ReminderStatus),
}

/// Due row whose persisted columns could not be decoded into a [`Reminder`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UndecodableRow {
    pub id: ReminderId,
    pub reason: String,
}

/// Result of one due scan.
#[derive(Debug, Default)]
pub struct DueBatch {
    /// Decoded due reminders, earliest delivery instant first, ties by id.
    pub reminders: Vec<Reminder>,
    /// Due rows that failed to decode, in scan order.
    pub undecodable: Vec<UndecodableRow>,
}

impl DueBatch {
    pub fn len(&self) -> usize {
        self.reminders.len() + self.undecodable.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Repository interface for the reminder lifecycle.
pub trait ReminderRepository: Send + Sync {
    /// Normalizes and inserts a new `Active` reminder.
    fn create(&self, request: &NewReminder, created_at: DateTime<Utc>) -> RepoResult<Reminder>;
    fn get(&self, id: ReminderId) -> RepoResult<Option<Reminder>>;
    /// All reminders of one owner, any status, by `scheduled_at` ascending.
    /// Rows that cannot be decoded are skipped.
    fn list_for_owner(&self, owner_id: &str) -> RepoResult<Vec<Reminder>>;
    /// `Active` reminders whose delivery instant is `<= now`, earliest first,
    /// ties broken by id. Rows that cannot be decoded are returned by id in
    /// [`DueBatch::undecodable`].
    fn due_for_delivery(&self, now: DateTime<FixedOffset>) -> RepoResult<DueBatch>;
    fn mark_sent(&self, id: ReminderId) -> RepoResult<Transition>;
    fn mark_invalid(&self, id: ReminderId) -> RepoResult<Transition>;
    /// Bumps the failed-attempt counter of an `Active` reminder and returns
    /// the new count. Status is left untouched.
    fn record_failed_attempt(&self, id: ReminderId, reason: &str) -> RepoResult<u32>;
}

/// SQLite-backed reminder repository sharing one guarded connection.
pub struct SqliteReminderRepository {
    conn: Mutex<Connection>,
}

impl SqliteReminderRepository {
    /// Wraps an already migrated connection.
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    /// Opens (and migrates) a file database.
    pub fn open(path: impl AsRef<Path>) -> RepoResult<Self> {
        Ok(Self::new(open_db(path)?))
    }

    pub fn open_in_memory() -> RepoResult<Self> {
        Ok(Self::new(open_db_in_memory()?))
    }

    fn lock(&self) -> RepoResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| RepoError::LockPoisoned)
    }

    fn transition(&self, id: ReminderId, next: ReminderStatus) -> RepoResult<Transition> {
        let conn = self.lock()?;
        let current = current_status(&conn, id)?;
        if !current.can_transition_to(next) {
            debug!(
                "event=reminder_transition module=repo status=skip id={id} to={} current={}",
                next.as_str(),
                current.as_str()
            );
            return Ok(Transition::Unchanged(current));
        }

        let changed = conn.execute(
            "UPDATE reminders SET status = ?1 WHERE id = ?2 AND status = ?3;",
            params![next.as_str(), id, current.as_str()],
        )?;
        if changed == 1 {
            info!(
                "event=reminder_transition module=repo status=ok id={id} to={}",
                next.as_str()
            );
            Ok(Transition::Applied)
        } else {
            // Another connection to the same file moved the row first.
            Ok(Transition::Unchanged(current_status(&conn, id)?))
        }
    }
}

impl ReminderRepository for SqliteReminderRepository {
    fn create(&self, request: &NewReminder, created_at: DateTime<Utc>) -> RepoResult<Reminder> {
        let scheduled = parse_instant(&request.scheduled_at)?;
        let deliver_at = delivery_instant(scheduled, request.lead_minutes);

        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO reminders (
                owner_id,
                scheduled_at,
                scheduled_at_ms,
                deliver_at_ms,
                lead_minutes,
                description,
                status,
                created_at_ms
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'active', ?7);",
            params![
                request.owner_id.as_str(),
                request.scheduled_at.as_str(),
                scheduled.timestamp_millis(),
                deliver_at.timestamp_millis(),
                i64::from(request.lead_minutes),
                request.description.as_str(),
                created_at.timestamp_millis(),
            ],
        )?;
        let id = conn.last_insert_rowid();

        info!(
            "event=reminder_create module=repo status=ok id={id} owner_id={} deliver_at_ms={}",
            request.owner_id,
            deliver_at.timestamp_millis()
        );

        fetch_one(&conn, id)?.ok_or(RepoError::InconsistentState(
            "created reminder not found in read-back",
        ))
    }

    fn get(&self, id: ReminderId) -> RepoResult<Option<Reminder>> {
        let conn = self.lock()?;
        fetch_one(&conn, id)
    }

    fn list_for_owner(&self, owner_id: &str) -> RepoResult<Vec<Reminder>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "{REMINDER_SELECT_SQL}
             WHERE owner_id = ?1
             ORDER BY scheduled_at_ms ASC, id ASC;"
        ))?;
        let mut rows = stmt.query([owner_id])?;
        let (reminders, undecodable) = decode_rows(&mut rows)?;
        for row in &undecodable {
            warn!(
                "event=reminder_list module=repo status=skip id={} reason=undecodable_row error={}",
                row.id, row.reason
            );
        }
        Ok(reminders)
    }

    fn due_for_delivery(&self, now: DateTime<FixedOffset>) -> RepoResult<DueBatch> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "{REMINDER_SELECT_SQL}
             WHERE status = 'active'
               AND deliver_at_ms <= ?1
             ORDER BY deliver_at_ms ASC, id ASC;"
        ))?;
        let mut rows = stmt.query([now.timestamp_millis()])?;
        let (reminders, undecodable) = decode_rows(&mut rows)?;
        for row in &undecodable {
            warn!(
                "event=due_scan module=repo status=skip id={} reason=undecodable_row error={}",
                row.id, row.reason
            );
        }
        Ok(DueBatch {
            reminders,
            undecodable,
        })
    }

    fn mark_sent(&self, id: ReminderId) -> RepoResult<Transition> {
        self.transition(id, ReminderStatus::Sent)
    }

    fn mark_invalid(&self, id: ReminderId) -> RepoResult<Transition> {
        self.transition(id, ReminderStatus::Invalid)
    }

    fn record_failed_attempt(&self, id: ReminderId, reason: &str) -> RepoResult<u32> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute(
            "UPDATE reminders
             SET
                delivery_attempts = delivery_attempts + 1,
                last_error = ?2
             WHERE id = ?1 AND status = 'active';",
            params![id, reason],
        )?;
        let attempts: Option<i64> = tx
            .query_row(
                "SELECT delivery_attempts FROM reminders WHERE id = ?1;",
                [id],
                |row| row.get(0),
            )
            .optional()?;
        tx.commit()?;

        let attempts = attempts.ok_or(RepoError::NotFound(id))?;
        u32::try_from(attempts).map_err(|_| {
            RepoError::InvalidData(format!(
                "invalid delivery_attempts value `{attempts}` in reminders.delivery_attempts"
            ))
        })
    }
}

fn fetch_one(conn: &Connection, id: ReminderId) -> RepoResult<Option<Reminder>> {
    let mut stmt = conn.prepare(&format!("{REMINDER_SELECT_SQL} WHERE id = ?1;"))?;
    let mut rows = stmt.query([id])?;
    match rows.next()? {
        Some(row) => Ok(Some(parse_reminder_row(row)?)),
        None => Ok(None),
    }
}

fn current_status(conn: &Connection, id: ReminderId) -> RepoResult<ReminderStatus> {
    let text: Option<String> = conn
        .query_row(
            "SELECT status FROM reminders WHERE id = ?1;",
            [id],
            |row| row.get(0),
        )
        .optional()?;
    match text {
        Some(text) => parse_status(&text),
        None => Err(RepoError::NotFound(id)),
    }
}

/// Decodes each row on its own. Cursor errors still abort the scan.
fn decode_rows(
    rows: &mut rusqlite::Rows<'_>,
) -> RepoResult<(Vec<Reminder>, Vec<UndecodableRow>)> {
    let mut reminders = Vec::new();
    let mut undecodable = Vec::new();
    while let Some(row) = rows.next()? {
        let id: ReminderId = row.get("id")?;
        match parse_reminder_row(row) {
            Ok(reminder) => reminders.push(reminder),
            Err(err) => undecodable.push(UndecodableRow {
                id,
                reason: err.to_string(),
            }),
        }
    }
    Ok((reminders, undecodable))
}

fn parse_reminder_row(row: &Row<'_>) -> RepoResult<Reminder> {
    let status_text: String = row.get("status")?;
    let status = parse_status(&status_text)?;

    let lead: i64 = row.get("lead_minutes")?;
    let lead_minutes = u32::try_from(lead).map_err(|_| {
        RepoError::InvalidData(format!("invalid lead_minutes `{lead}` in reminders.lead_minutes"))
    })?;

    let attempts: i64 = row.get("delivery_attempts")?;
    let delivery_attempts = u32::try_from(attempts).map_err(|_| {
        RepoError::InvalidData(format!(
            "invalid delivery_attempts `{attempts}` in reminders.delivery_attempts"
        ))
    })?;

    let created_ms: i64 = row.get("created_at_ms")?;
    let created_at = DateTime::<Utc>::from_timestamp_millis(created_ms).ok_or_else(|| {
        RepoError::InvalidData(format!(
            "invalid created_at_ms `{created_ms}` in reminders.created_at_ms"
        ))
    })?;

    Ok(Reminder {
        id: row.get("id")?,
        owner_id: row.get("owner_id")?,
        scheduled_at: row.get("scheduled_at")?,
        lead_minutes,
        description: row.get("description")?,
        status,
        created_at,
        delivery_attempts,
        last_error: row.get("last_error")?,
    })
}

fn parse_status(value: &str) -> RepoResult<ReminderStatus> {
    ReminderStatus::parse(value).ok_or_else(|| {
        RepoError::InvalidData(format!("invalid status `{value}` in reminders.status"))
    })
}
