//! Throughput-aware access to the document store.
//!
//! Every store call goes through [`ResilientStore`], which retries throttled
//! and unavailable responses according to a [`RetryPolicy`], records every
//! attempt in the shared [`StoreMetrics`], and refuses cross-partition scans
//! that are not capped.

pub(crate) mod metrics;
pub(crate) mod policy;

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use time::OffsetDateTime;

use crate::db::models::{AssessmentDefinition, NewSubmission, Submission, SubmissionKey};
use crate::db::types::SubmissionStatus;
use crate::store::{
    DocumentStore, Operation, QueryPage, StoreError, StoreResult, SubmissionQuery, Version,
};

pub(crate) use self::metrics::{AttemptOutcome, StoreMetrics};
pub(crate) use self::policy::RetryPolicy;

#[derive(Debug, Clone, Error, PartialEq)]
pub(crate) enum AccessError {
    #[error("{operation} failed after {attempts} attempt(s): {message}")]
    Transient { operation: &'static str, attempts: u32, message: String },
    #[error("precondition failed")]
    Conflict,
    #[error("not found")]
    NotFound,
    #[error("{operation} rejected: {message}")]
    Permanent { operation: &'static str, message: String },
}

impl AccessError {
    pub(crate) fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

#[derive(Clone)]
pub(crate) struct ResilientStore {
    store: Arc<dyn DocumentStore>,
    policy: RetryPolicy,
    metrics: Arc<StoreMetrics>,
    cross_partition_cap: u32,
}

impl ResilientStore {
    pub(crate) fn new(
        store: Arc<dyn DocumentStore>,
        policy: RetryPolicy,
        metrics: Arc<StoreMetrics>,
        cross_partition_cap: u32,
    ) -> Self {
        Self { store, policy, metrics, cross_partition_cap }
    }

    pub(crate) fn backend(&self) -> &'static str {
        self.store.backend()
    }

    pub(crate) fn metrics(&self) -> &Arc<StoreMetrics> {
        &self.metrics
    }

    pub(crate) fn cross_partition_cap(&self) -> u32 {
        self.cross_partition_cap
    }

    async fn execute<T, F, Fut>(&self, operation: Operation, mut call: F) -> Result<T, AccessError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = StoreResult<T>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let started = Instant::now();
            let result = call().await;
            let latency = started.elapsed();
            let (message, retry_after) = match result {
                Ok(charged) => {
                    self.metrics.record(operation, charged.charge, latency);
                    return Ok(charged.value);
                }
                Err(StoreError::Throttled { retry_after }) => {
                    self.metrics.record_failure(operation, AttemptOutcome::Throttled, latency);
                    ("throttled".to_string(), retry_after)
                }
                Err(StoreError::Unavailable(message)) => {
                    self.metrics.record_failure(operation, AttemptOutcome::Unavailable, latency);
                    (message, None)
                }
                Err(StoreError::Conflict) => {
                    self.metrics.record_failure(operation, AttemptOutcome::Conflict, latency);
                    return Err(AccessError::Conflict);
                }
                Err(StoreError::NotFound) => {
                    self.metrics.record_failure(operation, AttemptOutcome::NotFound, latency);
                    return Err(AccessError::NotFound);
                }
                Err(StoreError::Rejected(message)) | Err(StoreError::Malformed(message)) => {
                    self.metrics.record_failure(operation, AttemptOutcome::Rejected, latency);
                    tracing::error!(operation = operation.as_str(), error = %message, "Store rejected operation");
                    return Err(AccessError::Permanent { operation: operation.as_str(), message });
                }
            };

            if self.policy.is_exhausted(attempt) {
                self.metrics.record_transient_failure(operation);
                tracing::warn!(
                    operation = operation.as_str(),
                    attempts = attempt,
                    error = %message,
                    "Store operation exhausted retries"
                );
                return Err(AccessError::Transient {
                    operation: operation.as_str(),
                    attempts: attempt,
                    message,
                });
            }

            let delay = self.policy.delay_for(attempt - 1, retry_after.as_deref());
            tracing::debug!(
                operation = operation.as_str(),
                attempt,
                delay_ms = delay.as_millis() as u64,
                retry_after = retry_after.as_deref().unwrap_or(""),
                error = %message,
                "Retrying store operation"
            );
            tokio::time::sleep(delay).await;
        }
    }

    pub(crate) async fn ping(&self) -> Result<(), AccessError> {
        self.store.ping().await.map_err(|err| AccessError::Transient {
            operation: "ping",
            attempts: 1,
            message: err.to_string(),
        })
    }

    pub(crate) async fn read_submission(
        &self,
        key: &SubmissionKey,
    ) -> Result<Option<Submission>, AccessError> {
        self.execute(Operation::ReadSubmission, || self.store.read_submission(key)).await
    }

    pub(crate) async fn read_assessment(
        &self,
        assessment_id: &str,
    ) -> Result<Option<AssessmentDefinition>, AccessError> {
        self.execute(Operation::ReadAssessment, || self.store.read_assessment(assessment_id)).await
    }

    /// Conflicts when the id is already defined.
    pub(crate) async fn create_assessment(
        &self,
        assessment: &AssessmentDefinition,
    ) -> Result<(), AccessError> {
        self.execute(Operation::CreateAssessment, || self.store.create_assessment(assessment))
            .await
    }

    pub(crate) async fn create_submission(
        &self,
        submission: &NewSubmission,
    ) -> Result<Submission, AccessError> {
        self.execute(Operation::CreateSubmission, || self.store.create_submission(submission))
            .await
    }

    /// Conflicts are returned immediately; a lost conditional write is never
    /// retried against the same version.
    pub(crate) async fn replace_submission(
        &self,
        submission: &Submission,
        if_match: &Version,
    ) -> Result<Version, AccessError> {
        self.execute(Operation::ReplaceSubmission, || {
            self.store.replace_submission(submission, if_match)
        })
        .await
    }

    pub(crate) async fn query_submissions(
        &self,
        query: &SubmissionQuery,
    ) -> Result<QueryPage, AccessError> {
        if query.limit == 0 {
            return Err(AccessError::Permanent {
                operation: Operation::QuerySubmissions.as_str(),
                message: "query limit must be positive".to_string(),
            });
        }
        if query.scope.is_cross_partition() && query.limit > self.cross_partition_cap {
            return Err(AccessError::Permanent {
                operation: Operation::QuerySubmissions.as_str(),
                message: format!(
                    "cross-partition query limit {} exceeds cap {}",
                    query.limit, self.cross_partition_cap
                ),
            });
        }
        self.execute(Operation::QuerySubmissions, || self.store.query_submissions(query)).await
    }

    /// Partitions holding a document in `statuses` whose deadline is before
    /// `expires_before`, capped like any cross-partition scan.
    pub(crate) async fn list_partitions(
        &self,
        statuses: &[SubmissionStatus],
        expires_before: OffsetDateTime,
    ) -> Result<Vec<String>, AccessError> {
        let cap = self.cross_partition_cap;
        self.execute(Operation::ListPartitions, || {
            self.store.list_partitions(statuses, expires_before, cap)
        })
        .await
    }
}
