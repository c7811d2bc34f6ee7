use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::Barrier;
use uuid::Uuid;

use crate::db::models::{
    AssessmentDefinition, NewSubmission, Submission, SubmissionKey, SubmissionProjection,
};
use crate::db::types::SubmissionStatus;
use crate::store::partition::Partitioned;
use crate::store::{
    decode_continuation, encode_continuation, Charged, DocumentStore, Operation, QueryPage,
    QueryScope, StoreError, StoreResult, SubmissionQuery, Version,
};

const READ_CHARGE: f64 = 1.0;
const WRITE_CHARGE: f64 = 10.0;
const QUERY_BASE_CHARGE: f64 = 2.5;
const QUERY_ROW_CHARGE: f64 = 0.1;
const PARTITION_SCAN_CHARGE: f64 = 1.0;

/// Failure returned instead of executing an operation.
#[derive(Debug, Clone)]
pub(crate) enum Fault {
    Throttle { retry_after: Option<String> },
    Unavailable,
    Reject(String),
}

impl Fault {
    fn into_error(self) -> StoreError {
        match self {
            Self::Throttle { retry_after } => StoreError::Throttled { retry_after },
            Self::Unavailable => StoreError::Unavailable("injected outage".to_string()),
            Self::Reject(reason) => StoreError::Rejected(reason),
        }
    }
}

#[derive(Debug)]
struct FaultRule {
    operation: Operation,
    submission_id: Option<String>,
    remaining: u32,
    fault: Fault,
}

#[derive(Debug, Default)]
struct MemoryState {
    // partition -> id -> document
    submissions: BTreeMap<String, BTreeMap<String, Submission>>,
    assessments: BTreeMap<String, AssessmentDefinition>,
    mutations: u64,
}

/// Process-local store with the same contract as the database backend.
/// Used for development and by the test suite, which can inject faults
/// and hold writers at a barrier to force interleavings.
#[derive(Default)]
pub(crate) struct InMemoryStore {
    state: Mutex<MemoryState>,
    faults: Mutex<Vec<FaultRule>>,
    write_gate: Mutex<Option<Arc<Barrier>>>,
}

fn next_version() -> Version {
    Version::from(Uuid::new_v4().to_string())
}

impl InMemoryStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn take_fault(&self, operation: Operation, submission_id: Option<&str>) -> Option<StoreError> {
        let mut faults = self.faults.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let position = faults.iter().position(|rule| {
            rule.operation == operation
                && rule.remaining > 0
                && match (&rule.submission_id, submission_id) {
                    (None, _) => true,
                    (Some(expected), Some(actual)) => expected == actual,
                    (Some(_), None) => false,
                }
        })?;

        let rule = &mut faults[position];
        rule.remaining -= 1;
        let fault = rule.fault.clone();
        if rule.remaining == 0 {
            faults.remove(position);
        }
        Some(fault.into_error())
    }

    async fn pass_write_gate(&self) {
        let gate = self.write_gate.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).clone();
        if let Some(gate) = gate {
            if gate.wait().await.is_leader() {
                self.write_gate.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).take();
            }
        }
    }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn read_submission(&self, key: &SubmissionKey) -> StoreResult<Option<Submission>> {
        if let Some(err) = self.take_fault(Operation::ReadSubmission, Some(&key.id)) {
            return Err(err);
        }
        let state = self.state();
        let found = state
            .submissions
            .get(key.partition_key())
            .and_then(|partition| partition.get(&key.id))
            .cloned();
        Ok(Charged::new(found, READ_CHARGE))
    }

    async fn read_assessment(
        &self,
        assessment_id: &str,
    ) -> StoreResult<Option<AssessmentDefinition>> {
        if let Some(err) = self.take_fault(Operation::ReadAssessment, None) {
            return Err(err);
        }
        let found = self.state().assessments.get(assessment_id).cloned();
        Ok(Charged::new(found, READ_CHARGE))
    }

    async fn create_assessment(&self, assessment: &AssessmentDefinition) -> StoreResult<()> {
        if let Some(err) = self.take_fault(Operation::CreateAssessment, None) {
            return Err(err);
        }
        let mut state = self.state();
        if state.assessments.contains_key(assessment.partition_key()) {
            return Err(StoreError::Conflict);
        }
        state.assessments.insert(assessment.partition_key().to_string(), assessment.clone());
        state.mutations += 1;
        Ok(Charged::new((), WRITE_CHARGE))
    }

    async fn create_submission(&self, submission: &NewSubmission) -> StoreResult<Submission> {
        if let Some(err) = self.take_fault(Operation::CreateSubmission, Some(&submission.id)) {
            return Err(err);
        }
        let mut state = self.state();
        if state.submissions.values().any(|partition| partition.contains_key(&submission.id)) {
            return Err(StoreError::Conflict);
        }
        let partition = state.submissions.entry(submission.assessment_id.clone()).or_default();

        let created = Submission {
            id: submission.id.clone(),
            assessment_id: submission.assessment_id.clone(),
            candidate_id: submission.candidate_id.clone(),
            status: SubmissionStatus::Scheduled,
            started_at: None,
            expiration_time: None,
            submitted_at: None,
            evaluation_ref: None,
            finalize_error: None,
            version: next_version(),
            created_at: submission.created_at,
            updated_at: submission.created_at,
        };
        partition.insert(created.id.clone(), created.clone());
        state.mutations += 1;
        Ok(Charged::new(created, WRITE_CHARGE))
    }

    async fn replace_submission(
        &self,
        submission: &Submission,
        if_match: &Version,
    ) -> StoreResult<Version> {
        self.pass_write_gate().await;
        if let Some(err) = self.take_fault(Operation::ReplaceSubmission, Some(&submission.id)) {
            return Err(err);
        }

        let mut state = self.state();
        let stored = state
            .submissions
            .get_mut(submission.partition_key())
            .and_then(|partition| partition.get_mut(&submission.id))
            .ok_or(StoreError::NotFound)?;
        if &stored.version != if_match {
            return Err(StoreError::Conflict);
        }

        let version = next_version();
        stored.status = submission.status;
        stored.started_at = submission.started_at;
        stored.expiration_time = submission.expiration_time;
        stored.submitted_at = submission.submitted_at;
        stored.evaluation_ref = submission.evaluation_ref.clone();
        stored.finalize_error = submission.finalize_error.clone();
        stored.updated_at = submission.updated_at;
        stored.version = version.clone();
        state.mutations += 1;
        Ok(Charged::new(version, WRITE_CHARGE))
    }

    async fn query_submissions(&self, query: &SubmissionQuery) -> StoreResult<QueryPage> {
        if let Some(err) = self.take_fault(Operation::QuerySubmissions, None) {
            return Err(err);
        }
        let after = query.continuation.as_deref().map(decode_continuation).transpose()?;
        let limit = query.limit as usize;

        let state = self.state();
        let partitions: Vec<&BTreeMap<String, Submission>> = match &query.scope {
            QueryScope::Partition(partition) => state.submissions.get(partition).into_iter().collect(),
            QueryScope::CrossPartition => state.submissions.values().collect(),
        };
        let scanned = partitions.len();

        let mut matching = partitions
            .into_iter()
            .flat_map(|partition| partition.values())
            .filter(|submission| match &after {
                Some((assessment_id, id)) => {
                    (&submission.assessment_id, &submission.id) > (assessment_id, id)
                }
                None => true,
            })
            .filter(|submission| query.matches(submission))
            .map(SubmissionProjection::from);

        let items: Vec<SubmissionProjection> = matching.by_ref().take(limit).collect();
        let has_more = matching.next().is_some();
        let continuation = if has_more { items.last().map(encode_continuation) } else { None };

        let mut charge = QUERY_BASE_CHARGE + QUERY_ROW_CHARGE * items.len() as f64;
        if query.scope.is_cross_partition() {
            charge += PARTITION_SCAN_CHARGE * scanned as f64;
        }
        Ok(Charged::new(QueryPage { items, continuation }, charge))
    }

    async fn list_partitions(
        &self,
        statuses: &[SubmissionStatus],
        expires_before: OffsetDateTime,
        limit: u32,
    ) -> StoreResult<Vec<String>> {
        if let Some(err) = self.take_fault(Operation::ListPartitions, None) {
            return Err(err);
        }
        let state = self.state();
        let partitions: Vec<String> = state
            .submissions
            .iter()
            .filter(|(_, docs)| {
                docs.values().any(|doc| {
                    statuses.contains(&doc.status) && doc.is_expired_at(expires_before)
                })
            })
            .map(|(partition, _)| partition.clone())
            .take(limit as usize)
            .collect();
        let charge = QUERY_BASE_CHARGE + QUERY_ROW_CHARGE * partitions.len() as f64;
        Ok(Charged::new(partitions, charge))
    }
}

#[cfg(test)]
impl InMemoryStore {
    /// Stores a document as-is, bypassing faults and preconditions.
    pub(crate) fn insert_submission(&self, mut submission: Submission) -> Submission {
        submission.version = next_version();
        let mut state = self.state();
        state
            .submissions
            .entry(submission.assessment_id.clone())
            .or_default()
            .insert(submission.id.clone(), submission.clone());
        submission
    }

    pub(crate) fn insert_assessment(&self, assessment: AssessmentDefinition) {
        self.state().assessments.insert(assessment.id.clone(), assessment);
    }

    pub(crate) fn snapshot(&self, key: &SubmissionKey) -> Option<Submission> {
        self.state().submissions.get(&key.assessment_id).and_then(|p| p.get(&key.id)).cloned()
    }

    /// Accepted mutations since creation. Seeding does not count.
    pub(crate) fn mutation_count(&self) -> u64 {
        self.state().mutations
    }

    /// Fails the next `times` calls of `operation` (optionally only for one
    /// submission id) with `fault`.
    pub(crate) fn inject_fault(
        &self,
        operation: Operation,
        submission_id: Option<&str>,
        times: u32,
        fault: Fault,
    ) {
        self.faults.lock().unwrap().push(FaultRule {
            operation,
            submission_id: submission_id.map(str::to_string),
            remaining: times,
            fault,
        });
    }

    /// Makes the next `parties` writers wait for each other before applying.
    pub(crate) fn hold_writes(&self, parties: usize) {
        *self.write_gate.lock().unwrap() = Some(Arc::new(Barrier::new(parties)));
    }
}
