use std::sync::Arc;

use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::core::time::Clock;
use crate::db::models::{AssessmentDefinition, NewSubmission, Submission, SubmissionKey};
use crate::db::types::{FinalizeMode, SubmissionStatus};
use crate::resilience::{AccessError, ResilientStore};
use crate::store::Version;

const FINALIZE_ERROR_MAX_LEN: usize = 512;

#[derive(Debug, Error, PartialEq)]
pub(crate) enum LifecycleError {
    #[error("submission {0} not found")]
    NotFound(String),
    #[error("assessment {0} not found")]
    AssessmentNotFound(String),
    #[error("invalid assessment: {0}")]
    InvalidAssessment(String),
    #[error("assessment {0} is closed")]
    AssessmentClosed(String),
    #[error("submission {0} has not been started")]
    NotStarted(String),
    #[error("{0}")]
    Conflict(String),
    #[error("store temporarily unavailable: {0}")]
    Unavailable(String),
    #[error("{0}")]
    Permanent(String),
}

impl LifecycleError {
    fn from_access(err: AccessError, context: &str) -> Self {
        match err {
            AccessError::Transient { .. } => Self::Unavailable(err.to_string()),
            AccessError::Permanent { message, .. } => Self::Permanent(message),
            AccessError::Conflict => Self::Conflict(format!("{context} was modified concurrently")),
            AccessError::NotFound => Self::NotFound(context.to_string()),
        }
    }
}

#[derive(Debug, PartialEq)]
pub(crate) enum SubmitOutcome {
    Submitted(Submission),
    /// The session had already ended, or the sweep's finalize won the race.
    /// Carries the current document when it could be re-read.
    AlreadyFinalized(Option<Submission>),
}

#[derive(Debug, PartialEq)]
pub(crate) enum FinalizeOutcome {
    Finalized(Submission),
    AlreadyFinalized,
    NotYetExpired,
    Missing,
}

/// Authoritative transitions for a single submission. Every mutation is a
/// conditional replace against the version observed by the same call.
#[derive(Clone)]
pub(crate) struct SessionLifecycle {
    store: ResilientStore,
    clock: Arc<dyn Clock>,
}

impl SessionLifecycle {
    pub(crate) fn new(store: ResilientStore, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub(crate) fn store(&self) -> &ResilientStore {
        &self.store
    }

    pub(crate) fn now(&self) -> OffsetDateTime {
        self.clock.now()
    }

    pub(crate) async fn get(&self, key: &SubmissionKey) -> Result<Submission, LifecycleError> {
        self.store
            .read_submission(key)
            .await
            .map_err(|err| LifecycleError::from_access(err, &key.to_string()))?
            .ok_or_else(|| LifecycleError::NotFound(key.to_string()))
    }

    async fn assessment(&self, assessment_id: &str) -> Result<AssessmentDefinition, LifecycleError> {
        self.store
            .read_assessment(assessment_id)
            .await
            .map_err(|err| LifecycleError::from_access(err, assessment_id))?
            .ok_or_else(|| LifecycleError::AssessmentNotFound(assessment_id.to_string()))
    }

    /// Definitions are immutable once stored; redefining an id conflicts.
    pub(crate) async fn define_assessment(
        &self,
        assessment: &AssessmentDefinition,
    ) -> Result<(), LifecycleError> {
        assessment.validate().map_err(LifecycleError::InvalidAssessment)?;
        self.store.create_assessment(assessment).await.map_err(|err| match err {
            AccessError::Conflict => {
                LifecycleError::Conflict(format!("assessment {} already exists", assessment.id))
            }
            other => LifecycleError::from_access(other, &assessment.id),
        })?;

        tracing::info!(
            assessment_id = %assessment.id,
            duration_seconds = assessment.duration_seconds,
            closes_at = ?assessment.closes_at,
            "Assessment defined"
        );
        Ok(())
    }

    /// Creates a `scheduled` submission for a candidate.
    pub(crate) async fn schedule(
        &self,
        assessment_id: &str,
        candidate_id: &str,
        id: Option<String>,
    ) -> Result<Submission, LifecycleError> {
        let assessment = self.assessment(assessment_id).await?;
        let now = self.clock.now();
        if assessment.is_closed_at(now) {
            return Err(LifecycleError::AssessmentClosed(assessment.id));
        }

        let id = id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let new = NewSubmission {
            id: id.clone(),
            assessment_id: assessment.id.clone(),
            candidate_id: candidate_id.to_string(),
            created_at: now,
        };
        let created = self.store.create_submission(&new).await.map_err(|err| match err {
            AccessError::Conflict => LifecycleError::Conflict(format!("submission {id} already exists")),
            other => LifecycleError::from_access(other, &id),
        })?;

        tracing::info!(
            submission_id = %created.id,
            assessment_id = %created.assessment_id,
            candidate_id = %created.candidate_id,
            "Submission scheduled"
        );
        Ok(created)
    }

    /// `scheduled -> in_progress`. The deadline is computed here from the
    /// assessment definition, never taken from the caller.
    pub(crate) async fn start(&self, key: &SubmissionKey) -> Result<Submission, LifecycleError> {
        let current = self.get(key).await?;
        if !current.status.can_transition_to(SubmissionStatus::InProgress) {
            return Err(LifecycleError::Conflict(format!(
                "submission {key} is {}, expected scheduled",
                current.status
            )));
        }

        let assessment = self.assessment(&current.assessment_id).await?;
        let now = self.clock.now();
        if assessment.is_closed_at(now) {
            return Err(LifecycleError::AssessmentClosed(assessment.id));
        }

        let Some(deadline) = assessment.session_deadline(now) else {
            return Err(LifecycleError::InvalidAssessment(format!(
                "assessment {} yields an unrepresentable deadline",
                assessment.id
            )));
        };

        let mut updated = current.clone();
        updated.status = SubmissionStatus::InProgress;
        updated.started_at = Some(now);
        updated.expiration_time = Some(deadline);
        updated.updated_at = now;

        updated.version = self
            .store
            .replace_submission(&updated, &current.version)
            .await
            .map_err(|err| LifecycleError::from_access(err, &key.to_string()))?;

        tracing::info!(
            submission_id = %updated.id,
            assessment_id = %updated.assessment_id,
            expiration_time = ?updated.expiration_time,
            "Session started"
        );
        Ok(updated)
    }

    /// Candidate-initiated `in_progress -> completed_manual`. The deadline is
    /// not checked here: against an expired session the sweep's conditional
    /// write and this one race, and whichever lands first wins.
    pub(crate) async fn manual_submit(
        &self,
        key: &SubmissionKey,
    ) -> Result<SubmitOutcome, LifecycleError> {
        let current = self.get(key).await?;
        match current.status {
            SubmissionStatus::InProgress => {}
            SubmissionStatus::Scheduled => return Err(LifecycleError::NotStarted(key.to_string())),
            SubmissionStatus::CompletedManual
            | SubmissionStatus::CompletedAutoSubmitted
            | SubmissionStatus::EvaluationTriggered
            | SubmissionStatus::ExpiredError => {
                return Ok(SubmitOutcome::AlreadyFinalized(Some(current)));
            }
        }

        let now = self.clock.now();
        let mut updated = current.clone();
        updated.status = FinalizeMode::ManualSubmit.target_status();
        updated.submitted_at = Some(now);
        updated.updated_at = now;

        match self.store.replace_submission(&updated, &current.version).await {
            Ok(version) => {
                updated.version = version;
                tracing::info!(
                    submission_id = %updated.id,
                    assessment_id = %updated.assessment_id,
                    "Submission completed manually"
                );
                Ok(SubmitOutcome::Submitted(updated))
            }
            Err(AccessError::Conflict) => {
                tracing::info!(
                    submission_id = %current.id,
                    assessment_id = %current.assessment_id,
                    "Manual submit lost the race; session already finalized"
                );
                let latest = self.store.read_submission(key).await.ok().flatten();
                Ok(SubmitOutcome::AlreadyFinalized(latest))
            }
            Err(err) => Err(LifecycleError::from_access(err, &key.to_string())),
        }
    }

    /// Sweep-initiated finalize. Only applies if the document still carries
    /// `observed_version` and its deadline has elapsed.
    pub(crate) async fn auto_finalize(
        &self,
        key: &SubmissionKey,
        observed_version: &Version,
    ) -> Result<FinalizeOutcome, LifecycleError> {
        let current = match self.store.read_submission(key).await {
            Ok(Some(current)) => current,
            Ok(None) | Err(AccessError::NotFound) => return Ok(FinalizeOutcome::Missing),
            Err(err) => return Err(LifecycleError::from_access(err, &key.to_string())),
        };

        if &current.version != observed_version
            || !SubmissionStatus::FINALIZABLE.contains(&current.status)
        {
            return Ok(FinalizeOutcome::AlreadyFinalized);
        }

        let Some(deadline) = current.expiration_time else {
            tracing::error!(
                submission_id = %current.id,
                assessment_id = %current.assessment_id,
                status = %current.status,
                "Finalizable submission has no expiration_time; leaving untouched"
            );
            return Err(LifecycleError::Permanent(format!("submission {key} has no expiration_time")));
        };

        let now = self.clock.now();
        if deadline >= now {
            return Ok(FinalizeOutcome::NotYetExpired);
        }

        let mut updated = current.clone();
        updated.status = FinalizeMode::AutoDeadline.target_status();
        updated.submitted_at = Some(now);
        updated.finalize_error = None;
        updated.updated_at = now;

        match self.store.replace_submission(&updated, &current.version).await {
            Ok(version) => {
                updated.version = version;
                tracing::info!(
                    submission_id = %updated.id,
                    assessment_id = %updated.assessment_id,
                    deadline = %deadline,
                    "Session auto-submitted at deadline"
                );
                Ok(FinalizeOutcome::Finalized(updated))
            }
            Err(AccessError::Conflict) => Ok(FinalizeOutcome::AlreadyFinalized),
            Err(AccessError::NotFound) => Ok(FinalizeOutcome::Missing),
            Err(AccessError::Permanent { message, .. }) => {
                tracing::error!(
                    submission_id = %current.id,
                    assessment_id = %current.assessment_id,
                    error = %message,
                    "Finalize write rejected permanently"
                );
                if let Err(mark_err) = self.mark_expired_error(&current, &message).await {
                    tracing::warn!(
                        submission_id = %current.id,
                        assessment_id = %current.assessment_id,
                        error = %mark_err,
                        "Failed to record expired_error"
                    );
                }
                Err(LifecycleError::Permanent(message))
            }
            Err(err) => Err(LifecycleError::from_access(err, &key.to_string())),
        }
    }

    /// Records a permanent finalize failure so the session stays visible to
    /// the sweep and to operators.
    pub(crate) async fn mark_expired_error(
        &self,
        current: &Submission,
        reason: &str,
    ) -> Result<Submission, LifecycleError> {
        if !current.status.can_transition_to(SubmissionStatus::ExpiredError) {
            return Err(LifecycleError::Conflict(format!(
                "submission {} is {}, cannot mark expired_error",
                current.key(),
                current.status
            )));
        }

        let now = self.clock.now();
        let mut updated = current.clone();
        updated.status = SubmissionStatus::ExpiredError;
        updated.finalize_error = Some(reason.chars().take(FINALIZE_ERROR_MAX_LEN).collect());
        updated.updated_at = now;

        updated.version = self
            .store
            .replace_submission(&updated, &current.version)
            .await
            .map_err(|err| LifecycleError::from_access(err, &current.key().to_string()))?;
        Ok(updated)
    }

    /// `completed_* -> evaluation_triggered`. Idempotent for a submission
    /// that already carries a reference.
    pub(crate) async fn mark_evaluation_triggered(
        &self,
        key: &SubmissionKey,
        evaluation_ref: &str,
    ) -> Result<Submission, LifecycleError> {
        // One re-read covers a concurrent trigger for the same submission.
        for _ in 0..2 {
            let current = self.get(key).await?;
            if current.status == SubmissionStatus::EvaluationTriggered {
                return Ok(current);
            }
            if !current.status.can_transition_to(SubmissionStatus::EvaluationTriggered) {
                return Err(LifecycleError::Conflict(format!(
                    "submission {key} is {}, cannot trigger evaluation",
                    current.status
                )));
            }

            let mut updated = current.clone();
            updated.status = SubmissionStatus::EvaluationTriggered;
            updated.evaluation_ref = Some(evaluation_ref.to_string());
            updated.updated_at = self.clock.now();

            match self.store.replace_submission(&updated, &current.version).await {
                Ok(version) => {
                    updated.version = version;
                    return Ok(updated);
                }
                Err(AccessError::Conflict) => continue,
                Err(err) => return Err(LifecycleError::from_access(err, &key.to_string())),
            }
        }

        Err(LifecycleError::Conflict(format!("submission {key} was modified concurrently")))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use time::Duration;

    use super::*;
    use crate::store::memory::Fault;
    use crate::store::Operation;
    use crate::test_support::Harness;

    #[tokio::test]
    async fn start_sets_deadline_from_assessment() {
        let harness = Harness::new();
        harness.assessment("a-1", 3600, None);
        let scheduled = harness.lifecycle.schedule("a-1", "cand-1", Some("s-1".into())).await.unwrap();
        assert_eq!(scheduled.status, SubmissionStatus::Scheduled);

        let started = harness.lifecycle.start(&scheduled.key()).await.unwrap();
        assert_eq!(started.status, SubmissionStatus::InProgress);
        assert_eq!(started.started_at, Some(harness.now()));
        assert_eq!(started.expiration_time, Some(harness.now() + Duration::hours(1)));
        assert_ne!(started.version, scheduled.version);
    }

    #[tokio::test]
    async fn start_clamps_deadline_and_refuses_closed_assessments() {
        let harness = Harness::new();
        let closes_at = harness.now() + Duration::minutes(10);
        harness.assessment("a-1", 3600, Some(closes_at));
        let scheduled = harness.lifecycle.schedule("a-1", "cand-1", None).await.unwrap();
        let late = harness.lifecycle.schedule("a-1", "cand-2", None).await.unwrap();

        let started = harness.lifecycle.start(&scheduled.key()).await.unwrap();
        assert_eq!(started.expiration_time, Some(closes_at));

        harness.clock.advance(Duration::minutes(11));
        let err = harness.lifecycle.start(&late.key()).await.unwrap_err();
        assert_eq!(err, LifecycleError::AssessmentClosed("a-1".into()));
    }

    #[tokio::test]
    async fn start_twice_conflicts() {
        let harness = Harness::new();
        harness.assessment("a-1", 60, None);
        let scheduled = harness.lifecycle.schedule("a-1", "cand-1", None).await.unwrap();
        harness.lifecycle.start(&scheduled.key()).await.unwrap();

        let err = harness.lifecycle.start(&scheduled.key()).await.unwrap_err();
        assert!(matches!(err, LifecycleError::Conflict(_)), "{err:?}");
    }

    #[tokio::test]
    async fn schedule_rejects_duplicate_ids_and_unknown_assessments() {
        let harness = Harness::new();
        harness.assessment("a-1", 60, None);
        harness.assessment("a-2", 60, None);
        harness.lifecycle.schedule("a-1", "cand-1", Some("s-1".into())).await.unwrap();

        let dup = harness.lifecycle.schedule("a-1", "cand-2", Some("s-1".into())).await.unwrap_err();
        assert!(matches!(dup, LifecycleError::Conflict(_)));
        let elsewhere =
            harness.lifecycle.schedule("a-2", "cand-2", Some("s-1".into())).await.unwrap_err();
        assert!(matches!(elsewhere, LifecycleError::Conflict(_)), "{elsewhere:?}");
        assert!(harness.store.snapshot(&SubmissionKey::new("a-2", "s-1")).is_none());
        let missing = harness.lifecycle.schedule("a-9", "cand-1", None).await.unwrap_err();
        assert_eq!(missing, LifecycleError::AssessmentNotFound("a-9".into()));
    }

    #[tokio::test]
    async fn assessment_definitions_are_immutable() {
        let harness = Harness::new();
        let original = AssessmentDefinition {
            id: "a-1".to_string(),
            title: "Midterm".to_string(),
            duration_seconds: 3600,
            closes_at: None,
        };
        harness.lifecycle.define_assessment(&original).await.unwrap();

        let shortened = AssessmentDefinition { duration_seconds: 60, ..original.clone() };
        let err = harness.lifecycle.define_assessment(&shortened).await.unwrap_err();
        assert!(matches!(err, LifecycleError::Conflict(_)), "{err:?}");

        let stored = harness.access.read_assessment("a-1").await.unwrap().unwrap();
        assert_eq!(stored.duration_seconds, 3600);
    }

    #[tokio::test]
    async fn out_of_range_durations_are_refused_before_writing() {
        let harness = Harness::new();
        for duration_seconds in [0, -5, AssessmentDefinition::MAX_DURATION_SECONDS + 1, i64::MAX] {
            let definition = AssessmentDefinition {
                id: format!("a-{duration_seconds}"),
                title: "Broken".to_string(),
                duration_seconds,
                closes_at: None,
            };
            let err = harness.lifecycle.define_assessment(&definition).await.unwrap_err();
            assert!(matches!(err, LifecycleError::InvalidAssessment(_)), "{err:?}");
        }
        assert_eq!(harness.store.mutation_count(), 0);
    }

    #[tokio::test]
    async fn start_refuses_unrepresentable_deadline() {
        let harness = Harness::new();
        harness.assessment("a-1", i64::MAX, None);
        let scheduled = harness.lifecycle.schedule("a-1", "cand-1", None).await.unwrap();

        let err = harness.lifecycle.start(&scheduled.key()).await.unwrap_err();
        assert!(matches!(err, LifecycleError::InvalidAssessment(_)), "{err:?}");
        assert_eq!(
            harness.store.snapshot(&scheduled.key()).unwrap().status,
            SubmissionStatus::Scheduled
        );
    }

    #[tokio::test]
    async fn manual_submit_completes_in_progress_session() {
        let harness = Harness::new();
        let seeded =
            harness.seed("a-1", "s-1", SubmissionStatus::InProgress, Some(harness.now() + Duration::minutes(5)));

        let outcome = harness.lifecycle.manual_submit(&seeded.key()).await.unwrap();
        let SubmitOutcome::Submitted(submitted) = outcome else {
            panic!("expected a manual submission");
        };
        assert_eq!(submitted.status, SubmissionStatus::CompletedManual);
        assert_eq!(submitted.submitted_at, Some(harness.now()));
    }

    #[tokio::test]
    async fn manual_submit_on_finalized_session_is_a_no_op() {
        let harness = Harness::new();
        let deadline = Some(harness.now() - Duration::hours(1));
        for (id, status) in [
            ("s-1", SubmissionStatus::CompletedAutoSubmitted),
            ("s-2", SubmissionStatus::EvaluationTriggered),
            ("s-3", SubmissionStatus::ExpiredError),
        ] {
            let seeded = harness.seed("a-1", id, status, deadline);
            let outcome = harness.lifecycle.manual_submit(&seeded.key()).await.unwrap();
            assert!(matches!(outcome, SubmitOutcome::AlreadyFinalized(Some(_))), "{status}");
        }
        assert_eq!(harness.store.mutation_count(), 0);
    }

    #[tokio::test]
    async fn manual_submit_on_unswept_expired_session_still_completes() {
        let harness = Harness::new();
        let seeded =
            harness.seed("a-1", "s-1", SubmissionStatus::InProgress, Some(harness.now() - Duration::seconds(1)));

        let outcome = harness.lifecycle.manual_submit(&seeded.key()).await.unwrap();
        let SubmitOutcome::Submitted(submitted) = outcome else {
            panic!("expected the conditional write to be accepted");
        };
        assert_eq!(submitted.status, SubmissionStatus::CompletedManual);
        assert_eq!(harness.store.mutation_count(), 1);

        let finalize = harness.lifecycle.auto_finalize(&seeded.key(), &seeded.version).await.unwrap();
        assert_eq!(finalize, FinalizeOutcome::AlreadyFinalized);
        assert_eq!(harness.store.mutation_count(), 1);
    }

    #[tokio::test]
    async fn manual_submit_after_sweep_reports_already_finalized() {
        let harness = Harness::new();
        let seeded =
            harness.seed("a-1", "s-1", SubmissionStatus::InProgress, Some(harness.now() - Duration::seconds(1)));
        harness.lifecycle.auto_finalize(&seeded.key(), &seeded.version).await.unwrap();

        let outcome = harness.lifecycle.manual_submit(&seeded.key()).await.unwrap();
        let SubmitOutcome::AlreadyFinalized(Some(current)) = outcome else {
            panic!("expected already finalized");
        };
        assert_eq!(current.status, SubmissionStatus::CompletedAutoSubmitted);
        assert_eq!(harness.store.mutation_count(), 1);
    }

    #[tokio::test]
    async fn manual_submit_before_start_is_refused() {
        let harness = Harness::new();
        let seeded = harness.seed("a-1", "s-1", SubmissionStatus::Scheduled, None);
        let err = harness.lifecycle.manual_submit(&seeded.key()).await.unwrap_err();
        assert!(matches!(err, LifecycleError::NotStarted(_)));
    }

    #[tokio::test]
    async fn auto_finalize_requires_elapsed_deadline_and_matching_version() {
        let harness = Harness::new();
        let future =
            harness.seed("a-1", "s-1", SubmissionStatus::InProgress, Some(harness.now() + Duration::hours(1)));
        let past =
            harness.seed("a-1", "s-2", SubmissionStatus::InProgress, Some(harness.now() - Duration::seconds(1)));

        let pending = harness.lifecycle.auto_finalize(&future.key(), &future.version).await.unwrap();
        assert_eq!(pending, FinalizeOutcome::NotYetExpired);

        let stale = harness.lifecycle.auto_finalize(&past.key(), &Version::from("old")).await.unwrap();
        assert_eq!(stale, FinalizeOutcome::AlreadyFinalized);

        let outcome = harness.lifecycle.auto_finalize(&past.key(), &past.version).await.unwrap();
        let FinalizeOutcome::Finalized(finalized) = outcome else {
            panic!("expected the session to be finalized");
        };
        assert_eq!(finalized.status, SubmissionStatus::CompletedAutoSubmitted);
        assert_eq!(finalized.submitted_at, Some(harness.now()));
        assert_eq!(harness.store.mutation_count(), 1);
    }

    #[tokio::test]
    async fn auto_finalize_recovers_expired_error_sessions() {
        let harness = Harness::new();
        let mut seeded =
            harness.seed("a-1", "s-1", SubmissionStatus::ExpiredError, Some(harness.now() - Duration::minutes(5)));
        seeded.finalize_error = Some("previous failure".into());
        let seeded = harness.store.insert_submission(seeded);

        let outcome = harness.lifecycle.auto_finalize(&seeded.key(), &seeded.version).await.unwrap();
        let FinalizeOutcome::Finalized(finalized) = outcome else {
            panic!("expected the session to be finalized");
        };
        assert_eq!(finalized.finalize_error, None);
    }

    #[tokio::test]
    async fn permanent_rejection_marks_expired_error() {
        let harness = Harness::new();
        let seeded =
            harness.seed("a-1", "s-1", SubmissionStatus::InProgress, Some(harness.now() - Duration::minutes(1)));
        harness.store.inject_fault(
            Operation::ReplaceSubmission,
            Some("s-1"),
            1,
            Fault::Reject("document exceeds size limit".into()),
        );

        let err = harness.lifecycle.auto_finalize(&seeded.key(), &seeded.version).await.unwrap_err();
        assert!(matches!(err, LifecycleError::Permanent(_)));

        let stored = harness.store.snapshot(&seeded.key()).unwrap();
        assert_eq!(stored.status, SubmissionStatus::ExpiredError);
        assert_eq!(stored.finalize_error.as_deref(), Some("document exceeds size limit"));
        assert_eq!(stored.submitted_at, None);
    }

    #[tokio::test]
    async fn malformed_session_is_left_untouched() {
        let harness = Harness::new();
        let seeded = harness.seed("a-1", "s-1", SubmissionStatus::InProgress, None);

        let err = harness.lifecycle.auto_finalize(&seeded.key(), &seeded.version).await.unwrap_err();
        assert!(matches!(err, LifecycleError::Permanent(_)));
        assert_eq!(harness.store.snapshot(&seeded.key()).unwrap(), seeded);
    }

    #[tokio::test]
    async fn racing_submit_and_finalize_accept_exactly_one_write() {
        let harness = Harness::new();
        let seeded =
            harness.seed("a-1", "s-1", SubmissionStatus::InProgress, Some(harness.now() - Duration::seconds(1)));
        harness.store.hold_writes(2);

        let lifecycle = Arc::new(harness.lifecycle.clone());
        let submit = {
            let lifecycle = lifecycle.clone();
            let key = seeded.key();
            tokio::spawn(async move { lifecycle.manual_submit(&key).await })
        };
        let finalize = {
            let lifecycle = lifecycle.clone();
            let key = seeded.key();
            let version = seeded.version.clone();
            tokio::spawn(async move { lifecycle.auto_finalize(&key, &version).await })
        };

        let submit = submit.await.unwrap().unwrap();
        let finalize = finalize.await.unwrap().unwrap();
        let submit_won = matches!(submit, SubmitOutcome::Submitted(_));
        let finalize_won = matches!(finalize, FinalizeOutcome::Finalized(_));
        assert!(submit_won ^ finalize_won, "submit={submit:?} finalize={finalize:?}");
        assert_eq!(harness.store.mutation_count(), 1);

        let stored = harness.store.snapshot(&seeded.key()).unwrap();
        let expected = if submit_won {
            SubmissionStatus::CompletedManual
        } else {
            SubmissionStatus::CompletedAutoSubmitted
        };
        assert_eq!(stored.status, expected);
        assert_eq!(stored.submitted_at, Some(harness.now()));
    }

    #[tokio::test]
    async fn evaluation_trigger_is_recorded_once() {
        let harness = Harness::new();
        let seeded = harness.seed(
            "a-1",
            "s-1",
            SubmissionStatus::CompletedManual,
            Some(harness.now() - Duration::minutes(1)),
        );

        let first = harness.lifecycle.mark_evaluation_triggered(&seeded.key(), "eval-1").await.unwrap();
        assert_eq!(first.status, SubmissionStatus::EvaluationTriggered);
        assert_eq!(first.evaluation_ref.as_deref(), Some("eval-1"));

        let again = harness.lifecycle.mark_evaluation_triggered(&seeded.key(), "eval-1").await.unwrap();
        assert_eq!(again.version, first.version);
        assert_eq!(harness.store.mutation_count(), 1);
    }

    #[tokio::test]
    async fn evaluation_trigger_requires_completed_session() {
        let harness = Harness::new();
        let seeded = harness.seed("a-1", "s-1", SubmissionStatus::InProgress, Some(harness.now()));
        let err = harness.lifecycle.mark_evaluation_triggered(&seeded.key(), "eval-1").await.unwrap_err();
        assert!(matches!(err, LifecycleError::Conflict(_)));
    }
}
