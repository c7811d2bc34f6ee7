use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::core::time::format_offset;
use crate::db::models::Submission;
use crate::db::types::SubmissionStatus;

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct ScheduleSubmissionRequest {
    #[validate(length(min = 1, max = 128))]
    pub(crate) candidate_id: String,
    #[validate(length(min = 1, max = 128))]
    pub(crate) submission_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct SubmissionResponse {
    pub(crate) id: String,
    pub(crate) assessment_id: String,
    pub(crate) candidate_id: String,
    pub(crate) status: SubmissionStatus,
    pub(crate) started_at: Option<String>,
    pub(crate) expiration_time: Option<String>,
    pub(crate) submitted_at: Option<String>,
    pub(crate) evaluation_ref: Option<String>,
    pub(crate) finalize_error: Option<String>,
    pub(crate) version: String,
    pub(crate) created_at: String,
    pub(crate) updated_at: String,
}

impl From<Submission> for SubmissionResponse {
    fn from(submission: Submission) -> Self {
        Self {
            id: submission.id,
            assessment_id: submission.assessment_id,
            candidate_id: submission.candidate_id,
            status: submission.status,
            started_at: submission.started_at.map(format_offset),
            expiration_time: submission.expiration_time.map(format_offset),
            submitted_at: submission.submitted_at.map(format_offset),
            evaluation_ref: submission.evaluation_ref,
            finalize_error: submission.finalize_error,
            version: submission.version.to_string(),
            created_at: format_offset(submission.created_at),
            updated_at: format_offset(submission.updated_at),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub(crate) enum SubmitResult {
    Submitted,
    AlreadyFinalized,
}

/// Manual submit always answers 200; `result` tells the candidate whether
/// their submit or the automatic finalize won.
#[derive(Debug, Serialize)]
pub(crate) struct SubmitResponse {
    pub(crate) result: SubmitResult,
    pub(crate) submission: Option<SubmissionResponse>,
}
