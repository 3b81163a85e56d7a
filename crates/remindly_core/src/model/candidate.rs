//! Structured reminder candidate returned by the text-understanding service.
//!
//! The extractor answers with a small JSON object. Models sometimes wrap it
//! in markdown code fences, so decoding strips those first.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static LEADING_FENCE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^```[a-zA-Z]*\n?").expect("valid leading fence regex"));
static TRAILING_FENCE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\n?```$").expect("valid trailing fence regex"));

/// Candidate reminder before intake validation.
///
/// Field aliases accept the extractor's legacy key names
/// (`remind_at`, `text`, `remind_before`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReminderCandidate {
    #[serde(default, alias = "remind_at")]
    pub scheduled_at: String,
    #[serde(default, alias = "text")]
    pub description: String,
    /// Signed on purpose: intake rejects negative values instead of the
    /// decoder silently failing on them.
    #[serde(default, alias = "remind_before", deserialize_with = "lead_or_zero")]
    pub lead_minutes: i64,
    #[serde(default)]
    pub needs_clarification: bool,
}

impl ReminderCandidate {
    pub fn new(
        scheduled_at: impl Into<String>,
        description: impl Into<String>,
        lead_minutes: i64,
    ) -> Self {
        Self {
            scheduled_at: scheduled_at.into(),
            description: description.into(),
            lead_minutes,
            needs_clarification: false,
        }
    }

    /// Decodes raw extractor output, tolerating markdown code fences.
    pub fn from_extractor_output(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(strip_code_fences(raw))
    }
}

fn lead_or_zero<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<i64>::deserialize(deserializer)?.unwrap_or(0))
}

/// Removes a surrounding markdown code fence (```` ```json ... ``` ````).
pub fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    if !trimmed.starts_with("```") {
        return trimmed;
    }

    let start = LEADING_FENCE_RE.find(trimmed).map_or(0, |m| m.end());
    let body = &trimmed[start..];
    let end = TRAILING_FENCE_RE.find(body).map_or(body.len(), |m| m.start());
    body[..end].trim()
}
