//! Reminder intake use-case.
//!
//! # Responsibility
//! - Gate structured candidates from the text-understanding service before
//!   they reach the store.
//! - Optionally drive the external extractor for raw user text.
//!
//! # Invariants
//! - Candidates flagged `needs_clarification`, with a negative lead, or with
//!   an unparseable `scheduled_at` never reach `ReminderRepository::create`.
//! - A successful intake returns the record as stored.

use crate::model::candidate::ReminderCandidate;
use crate::model::reminder::{NewReminder, Reminder};
use crate::normalizer::{parse_instant, ParseFailure};
use crate::repo::reminder_repo::{RepoError, ReminderRepository};
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use log::{info, warn};
use std::sync::Arc;

/// Failure reported by the external text-understanding service.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("extraction failed: {0}")]
pub struct ExtractionError(pub String);

/// Text-understanding collaborator: raw text plus a reference instant in,
/// structured candidate out.
#[async_trait]
pub trait CandidateExtractor: Send + Sync {
    async fn extract(
        &self,
        text: &str,
        reference: DateTime<FixedOffset>,
    ) -> Result<ReminderCandidate, ExtractionError>;
}

/// Service error for intake use-cases.
#[derive(Debug, thiserror::Error)]
pub enum IntakeError {
    /// The extractor could not pin down a date/time; ask the user again.
    #[error("the date or time of the reminder needs clarification")]
    ClarificationNeeded,
    #[error(transparent)]
    MalformedSchedule(ParseFailure),
    #[error("lead time must be between 0 and {max} minutes, got {0}", max = u32::MAX)]
    InvalidLead(i64),
    /// Extractor output was not a decodable candidate.
    #[error("malformed candidate: {0}")]
    MalformedCandidate(#[from] serde_json::Error),
    #[error(transparent)]
    Extraction(#[from] ExtractionError),
    #[error(transparent)]
    Repo(RepoError),
}

impl From<RepoError> for IntakeError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::MalformedSchedule(failure) => Self::MalformedSchedule(failure),
            other => Self::Repo(other),
        }
    }
}

/// Intake facade over a shared reminder store.
pub struct IntakeService<R: ReminderRepository> {
    repo: Arc<R>,
}

impl<R: ReminderRepository> IntakeService<R> {
    pub fn new(repo: Arc<R>) -> Self {
        Self { repo }
    }

    /// Validates `candidate` and stores it as an `Active` reminder.
    pub fn submit(
        &self,
        owner_id: &str,
        candidate: &ReminderCandidate,
        received_at: DateTime<FixedOffset>,
    ) -> Result<Reminder, IntakeError> {
        if candidate.needs_clarification {
            info!("event=intake module=service status=reject owner_id={owner_id} reason=clarification");
            return Err(IntakeError::ClarificationNeeded);
        }

        let lead_minutes = u32::try_from(candidate.lead_minutes).map_err(|_| {
            warn!("event=intake module=service status=reject owner_id={owner_id} reason=invalid_lead");
            IntakeError::InvalidLead(candidate.lead_minutes)
        })?;

        if let Err(failure) = parse_instant(&candidate.scheduled_at) {
            warn!(
                "event=intake module=service status=reject owner_id={owner_id} reason=malformed_schedule kind={:?}",
                failure.kind
            );
            return Err(IntakeError::MalformedSchedule(failure));
        }

        let request = NewReminder::new(
            owner_id,
            candidate.scheduled_at.as_str(),
            lead_minutes,
            candidate.description.as_str(),
        );
        let reminder = self
            .repo
            .create(&request, received_at.with_timezone(&Utc))?;
        info!(
            "event=intake module=service status=ok owner_id={owner_id} id={}",
            reminder.id
        );
        Ok(reminder)
    }

    /// Decodes raw extractor JSON, then behaves like [`Self::submit`].
    pub fn submit_extractor_output(
        &self,
        owner_id: &str,
        raw: &str,
        received_at: DateTime<FixedOffset>,
    ) -> Result<Reminder, IntakeError> {
        let candidate = ReminderCandidate::from_extractor_output(raw)?;
        self.submit(owner_id, &candidate, received_at)
    }

    /// Runs the extractor on raw user text, then submits the candidate.
    pub async fn submit_text(
        &self,
        extractor: &dyn CandidateExtractor,
        owner_id: &str,
        text: &str,
        received_at: DateTime<FixedOffset>,
    ) -> Result<Reminder, IntakeError> {
        let candidate = extractor.extract(text, received_at).await?;
        self.submit(owner_id, &candidate, received_at)
    }
}
