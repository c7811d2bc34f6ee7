use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use validator::Validate;

use crate::api::errors::ApiError;
use crate::core::state::AppState;
use crate::db::models::SubmissionKey;
use crate::schemas::submission::{
    ScheduleSubmissionRequest, SubmissionResponse, SubmitResponse, SubmitResult,
};
use crate::services::session_lifecycle::SubmitOutcome;

pub(crate) fn router() -> Router<AppState> {
    Router::new()
        .route("/:assessment_id/submissions", post(schedule_submission))
        .route("/:assessment_id/submissions/:submission_id", get(get_submission))
        .route("/:assessment_id/submissions/:submission_id/start", post(start_submission))
        .route("/:assessment_id/submissions/:submission_id/submit", post(submit_submission))
}

async fn schedule_submission(
    State(state): State<AppState>,
    Path(assessment_id): Path<String>,
    Json(payload): Json<ScheduleSubmissionRequest>,
) -> Result<(StatusCode, Json<SubmissionResponse>), ApiError> {
    payload.validate().map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let submission = state
        .lifecycle()
        .schedule(&assessment_id, &payload.candidate_id, payload.submission_id)
        .await?;
    Ok((StatusCode::CREATED, Json(submission.into())))
}

async fn get_submission(
    State(state): State<AppState>,
    Path((assessment_id, submission_id)): Path<(String, String)>,
) -> Result<Json<SubmissionResponse>, ApiError> {
    let key = SubmissionKey::new(assessment_id, submission_id);
    let submission = state.lifecycle().get(&key).await?;
    Ok(Json(submission.into()))
}

async fn start_submission(
    State(state): State<AppState>,
    Path((assessment_id, submission_id)): Path<(String, String)>,
) -> Result<Json<SubmissionResponse>, ApiError> {
    let key = SubmissionKey::new(assessment_id, submission_id);
    let submission = state.lifecycle().start(&key).await?;
    Ok(Json(submission.into()))
}

async fn submit_submission(
    State(state): State<AppState>,
    Path((assessment_id, submission_id)): Path<(String, String)>,
) -> Result<Json<SubmitResponse>, ApiError> {
    let key = SubmissionKey::new(assessment_id, submission_id);
    let response = match state.lifecycle().manual_submit(&key).await? {
        SubmitOutcome::Submitted(submission) => {
            state.handoff().spawn(submission.clone());
            SubmitResponse { result: SubmitResult::Submitted, submission: Some(submission.into()) }
        }
        SubmitOutcome::AlreadyFinalized(current) => SubmitResponse {
            result: SubmitResult::AlreadyFinalized,
            submission: current.map(Into::into),
        },
    };
    Ok(Json(response))
}
