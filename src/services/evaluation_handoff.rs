use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use time::OffsetDateTime;
use tokio::task::JoinHandle;

use crate::core::config::{HandoffMode, HandoffSettings};
use crate::core::redis::RedisHandle;
use crate::db::models::Submission;
use crate::db::types::{FinalizeMode, SubmissionStatus};
use crate::services::session_lifecycle::SessionLifecycle;
use crate::store::partition::{EntityKind, Partitioned};

const ERROR_BODY_MAX_LEN: usize = 512;

/// Payload sent to the scorer. Carries identifiers only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct EvaluationTriggerMessage {
    pub(crate) submission_id: String,
    pub(crate) assessment_id: String,
    pub(crate) evaluation_ref: String,
    pub(crate) finalized_by: FinalizeMode,
    #[serde(with = "time::serde::rfc3339")]
    pub(crate) submitted_at: OffsetDateTime,
}

impl EvaluationTriggerMessage {
    /// `None` unless the submission is in a completed state awaiting
    /// evaluation.
    pub(crate) fn for_submission(submission: &Submission) -> Option<Self> {
        let finalized_by = match submission.status {
            SubmissionStatus::CompletedManual => FinalizeMode::ManualSubmit,
            SubmissionStatus::CompletedAutoSubmitted => FinalizeMode::AutoDeadline,
            _ => return None,
        };
        Some(Self {
            submission_id: submission.id.clone(),
            assessment_id: submission.assessment_id.clone(),
            evaluation_ref: evaluation_ref_for(&submission.id),
            finalized_by,
            submitted_at: submission.submitted_at?,
        })
    }
}

impl Partitioned for EvaluationTriggerMessage {
    const KIND: EntityKind = EntityKind::Evaluation;

    fn partition_key(&self) -> &str {
        &self.submission_id
    }
}

/// Stable per submission, so a re-sent trigger carries the same key.
pub(crate) fn evaluation_ref_for(submission_id: &str) -> String {
    let digest = hex::encode(Sha256::digest(submission_id.as_bytes()));
    format!("eval-{}", &digest[..32])
}

#[derive(Debug, Error)]
pub(crate) enum HandoffError {
    #[error("scorer request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("scorer responded with {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("queue push failed: {0}")]
    Queue(#[from] redis::RedisError),
    #[error("failed to encode trigger: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("submission {0} is not awaiting evaluation")]
    NotCompleted(String),
}

#[async_trait]
pub(crate) trait EvaluationTrigger: Send + Sync {
    fn transport(&self) -> &'static str;

    async fn trigger(&self, message: &EvaluationTriggerMessage) -> Result<(), HandoffError>;
}

#[derive(Debug, Clone)]
pub(crate) struct HttpScorerTrigger {
    client: Client,
    endpoint: String,
    api_token: Option<String>,
}

impl HttpScorerTrigger {
    pub(crate) fn from_settings(settings: &HandoffSettings) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(settings.scorer_timeout_seconds.max(1)))
            .build()
            .context("Failed to build scorer HTTP client")?;

        let api_token = Some(settings.scorer_api_token.trim().to_string())
            .filter(|token| !token.is_empty());
        Ok(Self {
            client,
            endpoint: format!("{}/evaluations/trigger", settings.scorer_url.trim_end_matches('/')),
            api_token,
        })
    }
}

#[async_trait]
impl EvaluationTrigger for HttpScorerTrigger {
    fn transport(&self) -> &'static str {
        "http"
    }

    async fn trigger(&self, message: &EvaluationTriggerMessage) -> Result<(), HandoffError> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .header("x-partition-key", message.partition_key())
            .header("idempotency-key", &message.evaluation_ref)
            .json(message);
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(HandoffError::Rejected {
            status: status.as_u16(),
            body: body.chars().take(ERROR_BODY_MAX_LEN).collect(),
        })
    }
}

#[derive(Clone)]
pub(crate) struct RedisQueueTrigger {
    redis: RedisHandle,
    queue: String,
}

impl RedisQueueTrigger {
    pub(crate) fn new(redis: RedisHandle, queue: String) -> Self {
        Self { redis, queue }
    }
}

#[async_trait]
impl EvaluationTrigger for RedisQueueTrigger {
    fn transport(&self) -> &'static str {
        "redis"
    }

    async fn trigger(&self, message: &EvaluationTriggerMessage) -> Result<(), HandoffError> {
        let payload = serde_json::to_string(message)?;
        let depth = self.redis.push_to_queue(&self.queue, &payload).await?;
        tracing::debug!(
            submission_id = %message.submission_id,
            queue = %self.queue,
            depth,
            "Evaluation trigger enqueued"
        );
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum HandoffOutcome {
    Skipped,
    Triggered { evaluation_ref: String },
    Failed(String),
}

/// Sends the evaluation trigger after a successful finalize. Runs outside
/// the finalize write; a failure here never changes the session status.
#[derive(Clone)]
pub(crate) struct EvaluationHandoff {
    trigger: Option<Arc<dyn EvaluationTrigger>>,
    lifecycle: SessionLifecycle,
}

impl EvaluationHandoff {
    pub(crate) fn new(trigger: Option<Arc<dyn EvaluationTrigger>>, lifecycle: SessionLifecycle) -> Self {
        Self { trigger, lifecycle }
    }

    pub(crate) fn from_settings(
        settings: &HandoffSettings,
        redis: Option<RedisHandle>,
        lifecycle: SessionLifecycle,
    ) -> Result<Self> {
        let trigger: Option<Arc<dyn EvaluationTrigger>> = match settings.mode {
            HandoffMode::Disabled => None,
            HandoffMode::Http => Some(Arc::new(HttpScorerTrigger::from_settings(settings)?)),
            HandoffMode::Redis => {
                let Some(redis) = redis else {
                    bail!("HANDOFF_MODE=redis requires a Redis connection");
                };
                Some(Arc::new(RedisQueueTrigger::new(redis, settings.redis_queue.clone())))
            }
        };
        Ok(Self::new(trigger, lifecycle))
    }

    pub(crate) fn transport(&self) -> &'static str {
        self.trigger.as_ref().map_or("disabled", |trigger| trigger.transport())
    }

    pub(crate) fn is_enabled(&self) -> bool {
        self.trigger.is_some()
    }

    pub(crate) async fn dispatch(&self, submission: &Submission) -> HandoffOutcome {
        let Some(message) = EvaluationTriggerMessage::for_submission(submission) else {
            let err = HandoffError::NotCompleted(submission.key().to_string());
            tracing::warn!(
                submission_id = %submission.id,
                status = %submission.status,
                error = %err,
                "Skipping evaluation handoff"
            );
            return HandoffOutcome::Failed(err.to_string());
        };

        let Some(trigger) = &self.trigger else {
            tracing::info!(
                submission_id = %message.submission_id,
                assessment_id = %message.assessment_id,
                finalized_by = message.finalized_by.as_str(),
                "Evaluation handoff disabled; submission left awaiting evaluation"
            );
            metrics::counter!("evaluation_handoff_total", "outcome" => "skipped").increment(1);
            return HandoffOutcome::Skipped;
        };

        if let Err(err) = trigger.trigger(&message).await {
            tracing::warn!(
                submission_id = %message.submission_id,
                assessment_id = %message.assessment_id,
                transport = trigger.transport(),
                error = %err,
                "Evaluation handoff failed"
            );
            metrics::counter!("evaluation_handoff_total", "outcome" => "failed").increment(1);
            return HandoffOutcome::Failed(err.to_string());
        }
        metrics::counter!("evaluation_handoff_total", "outcome" => "triggered").increment(1);

        // The scorer has the trigger; a failed bookkeeping write only means a
        // redrive may send the same reference again.
        if let Err(err) = self
            .lifecycle
            .mark_evaluation_triggered(&submission.key(), &message.evaluation_ref)
            .await
        {
            tracing::warn!(
                submission_id = %message.submission_id,
                assessment_id = %message.assessment_id,
                evaluation_ref = %message.evaluation_ref,
                error = %err,
                "Evaluation triggered but reference not recorded"
            );
        } else {
            tracing::info!(
                submission_id = %message.submission_id,
                assessment_id = %message.assessment_id,
                evaluation_ref = %message.evaluation_ref,
                transport = trigger.transport(),
                "Evaluation triggered"
            );
        }

        HandoffOutcome::Triggered { evaluation_ref: message.evaluation_ref }
    }

    /// Fire-and-forget variant used by request handlers.
    pub(crate) fn spawn(&self, submission: Submission) -> JoinHandle<HandoffOutcome> {
        let handoff = self.clone();
        tokio::spawn(async move { handoff.dispatch(&submission).await })
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    use super::*;

    /// Captures triggers in memory; can be switched to fail.
    #[derive(Default)]
    pub(crate) struct RecordingTrigger {
        messages: Mutex<Vec<EvaluationTriggerMessage>>,
        failing: AtomicBool,
    }

    impl RecordingTrigger {
        pub(crate) fn set_failing(&self, failing: bool) {
            self.failing.store(failing, Ordering::SeqCst);
        }

        pub(crate) fn messages(&self) -> Vec<EvaluationTriggerMessage> {
            self.messages.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl EvaluationTrigger for RecordingTrigger {
        fn transport(&self) -> &'static str {
            "recording"
        }

        async fn trigger(&self, message: &EvaluationTriggerMessage) -> Result<(), HandoffError> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(HandoffError::Rejected { status: 503, body: "scorer down".into() });
            }
            self.messages.lock().unwrap().push(message.clone());
            Ok(())
        }
    }
}
