use serde::Serialize;
use time::Duration;

use crate::core::time::seconds_as_duration;
use crate::services::evaluation_handoff::{EvaluationHandoff, HandoffOutcome};
use crate::services::session_lifecycle::{LifecycleError, SessionLifecycle};
use crate::store::SubmissionQuery;

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub(crate) struct RedriveReport {
    pub(crate) discovered: u64,
    pub(crate) triggered: u64,
    pub(crate) failed: u64,
    pub(crate) skipped: u64,
}

/// Re-sends evaluation triggers for completed submissions that never got an
/// `evaluation_ref` recorded. One capped cross-partition page per run.
#[derive(Clone)]
pub(crate) struct HandoffRedrive {
    lifecycle: SessionLifecycle,
    handoff: EvaluationHandoff,
    redrive_after: Duration,
}

impl HandoffRedrive {
    pub(crate) fn new(
        lifecycle: SessionLifecycle,
        handoff: EvaluationHandoff,
        redrive_after_seconds: u64,
    ) -> Self {
        Self { lifecycle, handoff, redrive_after: seconds_as_duration(redrive_after_seconds) }
    }

    pub(crate) async fn run(&self) -> RedriveReport {
        let mut report = RedriveReport::default();
        if !self.handoff.is_enabled() {
            tracing::debug!("Evaluation handoff disabled; skipping redrive");
            return report;
        }

        let Some(cutoff) = self.lifecycle.now().checked_sub(self.redrive_after) else {
            return report;
        };
        let limit = self.lifecycle.store().cross_partition_cap();
        let query = SubmissionQuery::awaiting_evaluation(cutoff, limit);
        let page = match self.lifecycle.store().query_submissions(&query).await {
            Ok(page) => page,
            Err(err) => {
                tracing::error!(error = %err, "Redrive query failed");
                report.failed += 1;
                return report;
            }
        };

        report.discovered = page.items.len() as u64;
        for candidate in &page.items {
            let key = candidate.key();
            let submission = match self.lifecycle.get(&key).await {
                Ok(submission) => submission,
                Err(LifecycleError::NotFound(_)) => {
                    report.skipped += 1;
                    continue;
                }
                Err(err) => {
                    tracing::warn!(
                        submission_id = %key.id,
                        assessment_id = %key.assessment_id,
                        error = %err,
                        "Failed to load submission for redrive"
                    );
                    report.failed += 1;
                    continue;
                }
            };

            match self.handoff.dispatch(&submission).await {
                HandoffOutcome::Triggered { .. } => report.triggered += 1,
                HandoffOutcome::Failed(_) => report.failed += 1,
                HandoffOutcome::Skipped => report.skipped += 1,
            }
        }

        if page.continuation.is_some() {
            tracing::info!(limit, "Redrive backlog exceeds one page; remainder left for next run");
        }
        tracing::info!(
            discovered = report.discovered,
            triggered = report.triggered,
            failed = report.failed,
            skipped = report.skipped,
            "Evaluation redrive finished"
        );
        report
    }
}
