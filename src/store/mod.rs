//! Partitioned document store contract.
//!
//! Every backend addresses submissions by `(assessment_id, id)`, guards
//! mutations with an opaque [`Version`] token, and reports the request charge
//! of each call so the access layer can account for throughput.

pub(crate) mod memory;
pub(crate) mod partition;
pub(crate) mod postgres;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;

use crate::db::models::{
    AssessmentDefinition, NewSubmission, Submission, SubmissionKey, SubmissionProjection,
};
use crate::db::types::SubmissionStatus;

/// Optimistic concurrency token. Changes on every accepted mutation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub(crate) struct Version(String);

impl Version {
    pub(crate) fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Version {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for Version {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A store response together with the throughput units it consumed.
#[derive(Debug, Clone)]
pub(crate) struct Charged<T> {
    pub(crate) value: T,
    pub(crate) charge: f64,
}

impl<T> Charged<T> {
    pub(crate) fn new(value: T, charge: f64) -> Self {
        Self { value, charge }
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub(crate) enum StoreError {
    /// Rate limited. `retry_after` is the raw server hint, if any.
    #[error("request throttled (retry after {retry_after:?})")]
    Throttled { retry_after: Option<String> },
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("precondition failed: document version changed")]
    Conflict,
    #[error("document not found")]
    NotFound,
    #[error("request rejected: {0}")]
    Rejected(String),
    #[error("malformed document: {0}")]
    Malformed(String),
}

pub(crate) type StoreResult<T> = Result<Charged<T>, StoreError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) enum Operation {
    ReadSubmission,
    ReadAssessment,
    CreateAssessment,
    CreateSubmission,
    ReplaceSubmission,
    QuerySubmissions,
    ListPartitions,
}

impl Operation {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::ReadSubmission => "read_submission",
            Self::ReadAssessment => "read_assessment",
            Self::CreateAssessment => "create_assessment",
            Self::CreateSubmission => "create_submission",
            Self::ReplaceSubmission => "replace_submission",
            Self::QuerySubmissions => "query_submissions",
            Self::ListPartitions => "list_partitions",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum QueryScope {
    Partition(String),
    CrossPartition,
}

impl QueryScope {
    pub(crate) fn is_cross_partition(&self) -> bool {
        matches!(self, Self::CrossPartition)
    }
}

/// Projected submission query. All filters are conjunctive.
#[derive(Debug, Clone)]
pub(crate) struct SubmissionQuery {
    pub(crate) scope: QueryScope,
    pub(crate) statuses: Vec<SubmissionStatus>,
    pub(crate) expires_before: Option<OffsetDateTime>,
    pub(crate) submitted_before: Option<OffsetDateTime>,
    pub(crate) missing_evaluation_ref: bool,
    pub(crate) limit: u32,
    pub(crate) continuation: Option<String>,
}

impl SubmissionQuery {
    /// Sessions the sweep may finalize: in progress (or stuck in
    /// `expired_error`) with a deadline strictly before `now`.
    pub(crate) fn expired(scope: QueryScope, now: OffsetDateTime, limit: u32) -> Self {
        Self {
            scope,
            statuses: SubmissionStatus::FINALIZABLE.to_vec(),
            expires_before: Some(now),
            submitted_before: None,
            missing_evaluation_ref: false,
            limit,
            continuation: None,
        }
    }

    /// Completed sessions whose evaluation trigger never landed.
    pub(crate) fn awaiting_evaluation(submitted_before: OffsetDateTime, limit: u32) -> Self {
        Self {
            scope: QueryScope::CrossPartition,
            statuses: SubmissionStatus::AWAITING_EVALUATION.to_vec(),
            expires_before: None,
            submitted_before: Some(submitted_before),
            missing_evaluation_ref: true,
            limit,
            continuation: None,
        }
    }

    pub(crate) fn with_continuation(mut self, continuation: Option<String>) -> Self {
        self.continuation = continuation;
        self
    }

    pub(crate) fn matches(&self, submission: &Submission) -> bool {
        if let QueryScope::Partition(partition) = &self.scope {
            if &submission.assessment_id != partition {
                return false;
            }
        }
        if !self.statuses.is_empty() && !self.statuses.contains(&submission.status) {
            return false;
        }
        if let Some(cutoff) = self.expires_before {
            if !submission.is_expired_at(cutoff) {
                return false;
            }
        }
        if let Some(cutoff) = self.submitted_before {
            if !submission.submitted_at.is_some_and(|submitted| submitted < cutoff) {
                return false;
            }
        }
        if self.missing_evaluation_ref && submission.evaluation_ref.is_some() {
            return false;
        }
        true
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct QueryPage {
    pub(crate) items: Vec<SubmissionProjection>,
    pub(crate) continuation: Option<String>,
}

/// Keyset continuation over `(assessment_id, id)`.
pub(crate) fn encode_continuation(last: &SubmissionProjection) -> String {
    serde_json::json!([last.assessment_id, last.id]).to_string()
}

pub(crate) fn decode_continuation(token: &str) -> Result<(String, String), StoreError> {
    serde_json::from_str::<(String, String)>(token)
        .map_err(|_| StoreError::Rejected(format!("invalid continuation token: {token}")))
}

#[async_trait]
pub(crate) trait DocumentStore: Send + Sync {
    fn backend(&self) -> &'static str;

    async fn ping(&self) -> Result<(), StoreError>;

    async fn read_submission(&self, key: &SubmissionKey) -> StoreResult<Option<Submission>>;

    async fn read_assessment(&self, assessment_id: &str)
        -> StoreResult<Option<AssessmentDefinition>>;

    /// Fails with [`StoreError::Conflict`] if the id is already defined.
    async fn create_assessment(&self, assessment: &AssessmentDefinition) -> StoreResult<()>;

    /// Fails with [`StoreError::Conflict`] if the id is already taken in any
    /// partition.
    async fn create_submission(&self, submission: &NewSubmission) -> StoreResult<Submission>;

    /// Replaces the mutable fields of `submission` iff the stored version
    /// still equals `if_match`. Returns the new version.
    async fn replace_submission(
        &self,
        submission: &Submission,
        if_match: &Version,
    ) -> StoreResult<Version>;

    async fn query_submissions(&self, query: &SubmissionQuery) -> StoreResult<QueryPage>;

    /// Partitions holding at least one submission in one of `statuses`
    /// whose deadline is strictly before `expires_before`.
    async fn list_partitions(
        &self,
        statuses: &[SubmissionStatus],
        expires_before: OffsetDateTime,
        limit: u32,
    ) -> StoreResult<Vec<String>>;
}
