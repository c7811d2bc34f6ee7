use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

use crate::db::types::SubmissionStatus;
use crate::store::Version;

/// Partition-scoped address of a submission document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub(crate) struct SubmissionKey {
    pub(crate) assessment_id: String,
    pub(crate) id: String,
}

impl SubmissionKey {
    pub(crate) fn new(assessment_id: impl Into<String>, id: impl Into<String>) -> Self {
        Self { assessment_id: assessment_id.into(), id: id.into() }
    }
}

impl std::fmt::Display for SubmissionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.assessment_id, self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct Submission {
    pub(crate) id: String,
    pub(crate) assessment_id: String,
    pub(crate) candidate_id: String,
    pub(crate) status: SubmissionStatus,
    #[serde(with = "time::serde::rfc3339::option")]
    pub(crate) started_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub(crate) expiration_time: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub(crate) submitted_at: Option<OffsetDateTime>,
    pub(crate) evaluation_ref: Option<String>,
    pub(crate) finalize_error: Option<String>,
    pub(crate) version: Version,
    #[serde(with = "time::serde::rfc3339")]
    pub(crate) created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub(crate) updated_at: OffsetDateTime,
}

impl Submission {
    pub(crate) fn key(&self) -> SubmissionKey {
        SubmissionKey::new(self.assessment_id.clone(), self.id.clone())
    }

    /// A session without a deadline is never considered expired.
    pub(crate) fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        self.expiration_time.is_some_and(|deadline| deadline < now)
    }
}

/// Input for creating a `scheduled` submission.
#[derive(Debug, Clone)]
pub(crate) struct NewSubmission {
    pub(crate) id: String,
    pub(crate) assessment_id: String,
    pub(crate) candidate_id: String,
    pub(crate) created_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct AssessmentDefinition {
    pub(crate) id: String,
    pub(crate) title: String,
    pub(crate) duration_seconds: i64,
    #[serde(with = "time::serde::rfc3339::option")]
    pub(crate) closes_at: Option<OffsetDateTime>,
}

impl AssessmentDefinition {
    /// Upper bound on a session's nominal length (one week).
    pub(crate) const MAX_DURATION_SECONDS: i64 = 604_800;

    pub(crate) fn validate(&self) -> Result<(), String> {
        if !(1..=Self::MAX_DURATION_SECONDS).contains(&self.duration_seconds) {
            return Err(format!(
                "duration_seconds must be between 1 and {}, got {}",
                Self::MAX_DURATION_SECONDS,
                self.duration_seconds
            ));
        }
        Ok(())
    }

    /// Deadline for a session started at `started_at`: the nominal duration,
    /// cut short by the assessment window if it closes earlier. `None` if the
    /// nominal deadline is not representable.
    pub(crate) fn session_deadline(&self, started_at: OffsetDateTime) -> Option<OffsetDateTime> {
        let nominal = started_at.checked_add(Duration::seconds(self.duration_seconds.max(0)))?;
        match self.closes_at {
            Some(closes_at) if closes_at < nominal => Some(closes_at),
            _ => Some(nominal),
        }
    }

    pub(crate) fn is_closed_at(&self, now: OffsetDateTime) -> bool {
        self.closes_at.is_some_and(|closes_at| closes_at <= now)
    }
}

/// Narrow projection returned by sweep queries.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) struct SubmissionProjection {
    pub(crate) id: String,
    pub(crate) assessment_id: String,
    pub(crate) status: SubmissionStatus,
    #[serde(with = "time::serde::rfc3339::option")]
    pub(crate) expiration_time: Option<OffsetDateTime>,
    pub(crate) version: Version,
}

impl SubmissionProjection {
    pub(crate) fn key(&self) -> SubmissionKey {
        SubmissionKey::new(self.assessment_id.clone(), self.id.clone())
    }
}

impl From<&Submission> for SubmissionProjection {
    fn from(submission: &Submission) -> Self {
        Self {
            id: submission.id.clone(),
            assessment_id: submission.assessment_id.clone(),
            status: submission.status,
            expiration_time: submission.expiration_time,
            version: submission.version.clone(),
        }
    }
}
