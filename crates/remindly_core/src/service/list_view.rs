//! Chronological reminder list projection.
//!
//! # Responsibility
//! - Partition one owner's reminders into upcoming day buckets and a flat
//!   past section.
//! - Render the projection as a chat message.
//!
//! # Invariants
//! - `render` is pure: identical inputs give identical output and the only
//!   notion of "now" is the supplied instant.
//! - Records whose `scheduled_at` does not parse are left out entirely.
//! - A record is upcoming iff it is `Active` and its calendar date (in the
//!   offset of `now`) is today or later; everything else is past.
//! - Buckets ascend by date; entries ascend by `scheduled_at`, then id.

use crate::model::reminder::{Reminder, ReminderId, ReminderStatus};
use crate::repo::reminder_repo::{RepoResult, ReminderRepository};
use crate::service::format::{capitalize_first, format_full};
use chrono::{DateTime, Days, FixedOffset, NaiveDate};
use log::debug;
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

/// Heading of an upcoming-day bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketLabel {
    Today,
    Tomorrow,
    /// Rendered as `15 May (Thu)`.
    Date(NaiveDate),
}

impl Display for BucketLabel {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Today => f.write_str("Today"),
            Self::Tomorrow => f.write_str("Tomorrow"),
            Self::Date(date) => write!(f, "{}", date.format("%-d %b (%a)")),
        }
    }
}

/// Upcoming reminder inside a day bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewEntry {
    pub id: ReminderId,
    /// Event moment in the offset of the view's `now`.
    pub scheduled_at: DateTime<FixedOffset>,
    pub description: String,
    pub lead_minutes: u32,
}

impl ViewEntry {
    pub fn time_label(&self) -> String {
        self.scheduled_at.format("%H:%M").to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DayBucket {
    pub date: NaiveDate,
    pub label: BucketLabel,
    pub entries: Vec<ViewEntry>,
}

/// Elapsed, delivered or invalidated reminder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PastEntry {
    pub id: ReminderId,
    pub scheduled_at: DateTime<FixedOffset>,
    pub description: String,
    pub status: ReminderStatus,
}

impl PastEntry {
    /// Full date and time, e.g. `8 May 2025 16:00`.
    pub fn annotation(&self) -> String {
        format_full(self.scheduled_at, *self.scheduled_at.offset())
    }
}

/// A view section that is either populated or an explicit placeholder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Section<T> {
    Nothing,
    Entries(Vec<T>),
}

impl<T> Section<T> {
    fn from_vec(items: Vec<T>) -> Self {
        if items.is_empty() {
            Self::Nothing
        } else {
            Self::Entries(items)
        }
    }

    pub fn items(&self) -> &[T] {
        match self {
            Self::Nothing => &[],
            Self::Entries(items) => items,
        }
    }

    pub fn is_nothing(&self) -> bool {
        matches!(self, Self::Nothing)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReminderListView {
    pub now: DateTime<FixedOffset>,
    pub future: Section<DayBucket>,
    pub past: Section<PastEntry>,
}

/// Builds the list projection of `reminders` as seen at `now`.
pub fn render(reminders: &[Reminder], now: DateTime<FixedOffset>) -> ReminderListView {
    let zone = *now.offset();
    let today = now.date_naive();
    let tomorrow = today.checked_add_days(Days::new(1));

    let mut days: BTreeMap<NaiveDate, Vec<ViewEntry>> = BTreeMap::new();
    let mut past = Vec::new();

    for reminder in reminders {
        let scheduled_at = match reminder.scheduled_instant() {
            Ok(instant) => instant.with_timezone(&zone),
            Err(_) => {
                debug!(
                    "event=list_view module=service status=skip id={} reason=malformed_schedule",
                    reminder.id
                );
                continue;
            }
        };

        let date = scheduled_at.date_naive();
        if reminder.is_active() && date >= today {
            days.entry(date).or_default().push(ViewEntry {
                id: reminder.id,
                scheduled_at,
                description: reminder.description.clone(),
                lead_minutes: reminder.lead_minutes,
            });
        } else {
            past.push(PastEntry {
                id: reminder.id,
                scheduled_at,
                description: reminder.description.clone(),
                status: reminder.status,
            });
        }
    }

    let buckets = days
        .into_iter()
        .map(|(date, mut entries)| {
            entries.sort_by(|a, b| a.scheduled_at.cmp(&b.scheduled_at).then(a.id.cmp(&b.id)));
            let label = if date == today {
                BucketLabel::Today
            } else if Some(date) == tomorrow {
                BucketLabel::Tomorrow
            } else {
                BucketLabel::Date(date)
            };
            DayBucket {
                date,
                label,
                entries,
            }
        })
        .collect();

    past.sort_by(|a, b| a.scheduled_at.cmp(&b.scheduled_at).then(a.id.cmp(&b.id)));

    ReminderListView {
        now,
        future: Section::from_vec(buckets),
        past: Section::from_vec(past),
    }
}

impl ReminderListView {
    /// Chat-ready text of the whole view.
    pub fn to_message(&self) -> String {
        let mut message = String::from("Your reminders:\n\n");

        match &self.future {
            Section::Nothing => message.push_str("No upcoming reminders.\n\n"),
            Section::Entries(buckets) => {
                for bucket in buckets {
                    message.push_str(&format!("{}\n", bucket.label));
                    for entry in &bucket.entries {
                        message.push_str(&format!(
                            "{} - {}\n",
                            entry.time_label(),
                            capitalize_first(&entry.description)
                        ));
                    }
                    message.push('\n');
                }
            }
        }

        match &self.past {
            Section::Nothing => message.push_str("No past reminders.\n"),
            Section::Entries(entries) => {
                message.push_str("Past:\n");
                for entry in entries {
                    message.push_str(&format!(
                        "{} - {}\n",
                        entry.annotation(),
                        capitalize_first(&entry.description)
                    ));
                }
            }
        }

        message
    }
}

/// Read-only list use-case over a shared store.
pub struct ReminderListService<R: ReminderRepository> {
    repo: Arc<R>,
}

impl<R: ReminderRepository> ReminderListService<R> {
    pub fn new(repo: Arc<R>) -> Self {
        Self { repo }
    }

    pub fn list_for_owner(
        &self,
        owner_id: &str,
        now: DateTime<FixedOffset>,
    ) -> RepoResult<ReminderListView> {
        let reminders = self.repo.list_for_owner(owner_id)?;
        Ok(render(&reminders, now))
    }
}
