use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use time::OffsetDateTime;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;

use crate::core::config::{SweepMode, SweepSettings};
use crate::db::models::SubmissionProjection;
use crate::db::types::SubmissionStatus;
use crate::resilience::AccessError;
use crate::services::evaluation_handoff::{EvaluationHandoff, HandoffOutcome};
use crate::services::session_lifecycle::{FinalizeOutcome, LifecycleError, SessionLifecycle};
use crate::store::{QueryScope, SubmissionQuery};

#[derive(Debug, Clone)]
pub(crate) struct SweepOptions {
    pub(crate) mode: SweepMode,
    pub(crate) batch_size: u32,
    pub(crate) execution_budget: Duration,
    pub(crate) partition_concurrency: usize,
}

impl SweepOptions {
    pub(crate) fn from_settings(settings: &SweepSettings) -> Self {
        Self {
            mode: settings.mode,
            batch_size: settings.batch_size,
            execution_budget: settings.execution_budget(),
            partition_concurrency: settings.partition_concurrency.max(1),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub(crate) struct SweepReport {
    pub(crate) mode: &'static str,
    pub(crate) partitions: u64,
    pub(crate) discovered: u64,
    pub(crate) finalized: u64,
    pub(crate) already_finalized: u64,
    pub(crate) not_yet_expired: u64,
    pub(crate) missing: u64,
    pub(crate) transient_failures: u64,
    pub(crate) permanent_failures: u64,
    pub(crate) handoffs_triggered: u64,
    pub(crate) handoff_failures: u64,
    pub(crate) budget_exhausted: bool,
    pub(crate) duration_ms: u64,
}

impl SweepReport {
    fn merge(&mut self, other: SweepReport) {
        self.discovered += other.discovered;
        self.finalized += other.finalized;
        self.already_finalized += other.already_finalized;
        self.not_yet_expired += other.not_yet_expired;
        self.missing += other.missing;
        self.transient_failures += other.transient_failures;
        self.permanent_failures += other.permanent_failures;
        self.handoffs_triggered += other.handoffs_triggered;
        self.handoff_failures += other.handoff_failures;
        self.budget_exhausted |= other.budget_exhausted;
    }

    fn record_access_failure(&mut self, err: &AccessError) {
        if err.is_transient() {
            self.transient_failures += 1;
        } else {
            self.permanent_failures += 1;
        }
    }
}

/// Discovers in-progress sessions whose deadline has passed and drives each
/// through `auto_finalize`. Work left over when the budget runs out is
/// rediscovered on the next tick.
#[derive(Clone)]
pub(crate) struct ExpirySweep {
    lifecycle: SessionLifecycle,
    handoff: EvaluationHandoff,
    options: SweepOptions,
}

impl ExpirySweep {
    pub(crate) fn new(
        lifecycle: SessionLifecycle,
        handoff: EvaluationHandoff,
        options: SweepOptions,
    ) -> Self {
        Self { lifecycle, handoff, options }
    }

    pub(crate) async fn run(&self) -> SweepReport {
        let started = Instant::now();
        let deadline = started + self.options.execution_budget;
        let now = self.lifecycle.now();

        let mut report = match self.options.mode {
            SweepMode::Partitioned => self.sweep_partitions(now, deadline).await,
            SweepMode::CrossPartition => {
                self.sweep_scope(QueryScope::CrossPartition, now, deadline).await
            }
        };
        report.mode = self.options.mode.as_str();
        report.duration_ms = started.elapsed().as_millis() as u64;

        metrics::counter!("sweep_runs_total", "mode" => report.mode).increment(1);
        metrics::counter!("sweep_finalized_total").increment(report.finalized);
        tracing::info!(
            mode = report.mode,
            partitions = report.partitions,
            discovered = report.discovered,
            finalized = report.finalized,
            already_finalized = report.already_finalized,
            not_yet_expired = report.not_yet_expired,
            transient_failures = report.transient_failures,
            permanent_failures = report.permanent_failures,
            handoffs_triggered = report.handoffs_triggered,
            handoff_failures = report.handoff_failures,
            budget_exhausted = report.budget_exhausted,
            duration_ms = report.duration_ms,
            "Expiry sweep finished"
        );
        report
    }

    async fn sweep_partitions(&self, now: OffsetDateTime, deadline: Instant) -> SweepReport {
        let mut report = SweepReport::default();
        let listed =
            self.lifecycle.store().list_partitions(&SubmissionStatus::FINALIZABLE, now).await;
        let partitions = match listed {
            Ok(partitions) => partitions,
            Err(err) => {
                tracing::error!(error = %err, "Failed to enumerate partitions for expiry sweep");
                report.record_access_failure(&err);
                return report;
            }
        };
        report.partitions = partitions.len() as u64;

        let semaphore = Arc::new(Semaphore::new(self.options.partition_concurrency));
        let mut tasks = JoinSet::new();
        for partition in partitions {
            if Instant::now() >= deadline {
                report.budget_exhausted = true;
                break;
            }
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            let sweep = self.clone();
            tasks.spawn(async move {
                let _permit = permit;
                sweep.sweep_scope(QueryScope::Partition(partition), now, deadline).await
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(partition_report) => report.merge(partition_report),
                Err(err) => {
                    tracing::error!(error = %err, "Partition sweep task failed");
                    report.permanent_failures += 1;
                }
            }
        }
        report
    }

    async fn sweep_scope(
        &self,
        scope: QueryScope,
        now: OffsetDateTime,
        deadline: Instant,
    ) -> SweepReport {
        let mut report = SweepReport::default();
        let mut continuation = None;
        let mut seen_partitions = BTreeSet::new();

        'pages: loop {
            if Instant::now() >= deadline {
                report.budget_exhausted = true;
                break;
            }

            let query = SubmissionQuery::expired(scope.clone(), now, self.options.batch_size)
                .with_continuation(continuation.take());
            let page = match self.lifecycle.store().query_submissions(&query).await {
                Ok(page) => page,
                Err(err) => {
                    tracing::error!(scope = ?scope, error = %err, "Expiry query failed");
                    report.record_access_failure(&err);
                    break;
                }
            };

            report.discovered += page.items.len() as u64;
            for candidate in &page.items {
                if Instant::now() >= deadline {
                    report.budget_exhausted = true;
                    break 'pages;
                }
                seen_partitions.insert(candidate.assessment_id.clone());
                self.finalize_candidate(candidate, &mut report).await;
            }

            match page.continuation {
                Some(token) => continuation = Some(token),
                None => break,
            }
        }

        if scope.is_cross_partition() {
            report.partitions = seen_partitions.len() as u64;
        }
        report
    }

    async fn finalize_candidate(&self, candidate: &SubmissionProjection, report: &mut SweepReport) {
        let key = candidate.key();
        match self.lifecycle.auto_finalize(&key, &candidate.version).await {
            Ok(FinalizeOutcome::Finalized(submission)) => {
                report.finalized += 1;
                match self.handoff.dispatch(&submission).await {
                    HandoffOutcome::Triggered { .. } => report.handoffs_triggered += 1,
                    HandoffOutcome::Failed(_) => report.handoff_failures += 1,
                    HandoffOutcome::Skipped => {}
                }
            }
            Ok(FinalizeOutcome::AlreadyFinalized) => report.already_finalized += 1,
            Ok(FinalizeOutcome::NotYetExpired) => report.not_yet_expired += 1,
            Ok(FinalizeOutcome::Missing) => report.missing += 1,
            Err(LifecycleError::Unavailable(message)) => {
                tracing::warn!(
                    submission_id = %key.id,
                    assessment_id = %key.assessment_id,
                    error = %message,
                    "Skipping submission this tick after transient store failure"
                );
                report.transient_failures += 1;
            }
            Err(err) => {
                tracing::error!(
                    submission_id = %key.id,
                    assessment_id = %key.assessment_id,
                    error = %err,
                    "Failed to finalize expired submission"
                );
                report.permanent_failures += 1;
            }
        }
    }
}
