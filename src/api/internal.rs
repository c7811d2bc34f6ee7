use axum::{
    extract::{Path, State},
    routing::{get, post, put},
    Json, Router,
};
use validator::Validate;

use crate::api::errors::ApiError;
use crate::api::guards::InternalCaller;
use crate::core::state::AppState;
use crate::db::models::AssessmentDefinition;
use crate::resilience::metrics::StoreMetricsSnapshot;
use crate::schemas::assessment::{AssessmentRequest, AssessmentResponse};
use crate::tasks::expiry_sweep::SweepReport;

pub(crate) fn router() -> Router<AppState> {
    Router::new()
        .route("/sweep", post(run_sweep))
        .route("/store-metrics", get(store_metrics))
        .route("/assessments/:assessment_id", put(put_assessment))
}

/// One sweep tick for an external scheduler.
async fn run_sweep(_caller: InternalCaller, State(state): State<AppState>) -> Json<SweepReport> {
    Json(state.sweep().run().await)
}

async fn store_metrics(
    _caller: InternalCaller,
    State(state): State<AppState>,
) -> Json<StoreMetricsSnapshot> {
    Json(state.store().metrics().snapshot())
}

async fn put_assessment(
    _caller: InternalCaller,
    State(state): State<AppState>,
    Path(assessment_id): Path<String>,
    Json(payload): Json<AssessmentRequest>,
) -> Result<Json<AssessmentResponse>, ApiError> {
    payload.validate().map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let assessment = AssessmentDefinition {
        id: assessment_id,
        title: payload.title,
        duration_seconds: payload.duration_seconds,
        closes_at: payload.closes_at,
    };
    state.lifecycle().define_assessment(&assessment).await?;
    Ok(Json(assessment.into()))
}

#[cfg(test)]
mod tests {
    use axum::http::{Method, StatusCode};
    use serde_json::json;
    use time::Duration;
    use tower::ServiceExt;

    use crate::db::models::SubmissionKey;
    use crate::db::types::SubmissionStatus;
    use crate::test_support::{
        json_request, read_json, setup_test_app, setup_test_app_with, TEST_INTERNAL_TOKEN,
    };

    #[tokio::test]
    async fn sweep_endpoint_finalizes_and_reports() {
        let ctx = setup_test_app().await;
        let response = ctx
            .app
            .clone()
            .oneshot(json_request(
                Method::PUT,
                "/internal/assessments/a-1",
                None,
                Some(json!({ "title": "Midterm", "duration_seconds": 60 })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let scheduled = ctx.state.lifecycle().schedule("a-1", "cand-1", Some("s-1".into())).await.unwrap();
        ctx.state.lifecycle().start(&scheduled.key()).await.unwrap();
        ctx.clock.advance(Duration::minutes(2));

        let response = ctx
            .app
            .clone()
            .oneshot(json_request(Method::POST, "/internal/sweep", None, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let report = read_json(response).await;
        assert_eq!(report["mode"], "partitioned");
        assert_eq!(report["finalized"], 1);
        assert_eq!(report["handoffs_triggered"], 1);

        let stored = ctx.store.snapshot(&SubmissionKey::new("a-1", "s-1")).unwrap();
        assert_eq!(stored.status, SubmissionStatus::EvaluationTriggered);
        assert_eq!(ctx.recorder.messages().len(), 1);
        assert_eq!(stored.submitted_at, Some(ctx.now()));
    }

    #[tokio::test]
    async fn store_metrics_reflect_completed_operations() {
        let ctx = setup_test_app().await;
        ctx.app
            .clone()
            .oneshot(json_request(Method::POST, "/internal/sweep", None, None))
            .await
            .unwrap();

        let response = ctx
            .app
            .clone()
            .oneshot(json_request(Method::GET, "/internal/store-metrics", None, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = read_json(response).await;
        assert_eq!(body["backend"], "memory");
        assert_eq!(body["operations"]["list_partitions"]["count"], 1);
        assert_eq!(body["throttled"], 0);
    }

    #[tokio::test]
    async fn invalid_assessment_is_rejected() {
        let ctx = setup_test_app().await;
        let response = ctx
            .app
            .clone()
            .oneshot(json_request(
                Method::PUT,
                "/internal/assessments/a-1",
                None,
                Some(json!({ "title": "Midterm", "duration_seconds": 0 })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn redefining_an_assessment_conflicts_and_keeps_the_original() {
        let ctx = setup_test_app().await;
        let define = |duration: i64| {
            json_request(
                Method::PUT,
                "/internal/assessments/a-1",
                None,
                Some(json!({ "title": "Midterm", "duration_seconds": duration })),
            )
        };

        let first = ctx.app.clone().oneshot(define(3_600)).await.unwrap();
        assert_eq!(first.status(), StatusCode::OK);
        let second = ctx.app.clone().oneshot(define(60)).await.unwrap();
        assert_eq!(second.status(), StatusCode::CONFLICT);

        let stored = ctx.state.store().read_assessment("a-1").await.unwrap().unwrap();
        assert_eq!(stored.duration_seconds, 3_600);
    }

    #[tokio::test]
    async fn internal_routes_require_token_when_configured() {
        let ctx = setup_test_app_with(|| {
            std::env::set_var("INTERNAL_API_TOKEN", TEST_INTERNAL_TOKEN);
        })
        .await;

        let missing = ctx
            .app
            .clone()
            .oneshot(json_request(Method::POST, "/internal/sweep", None, None))
            .await
            .unwrap();
        assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);

        let wrong = ctx
            .app
            .clone()
            .oneshot(json_request(Method::POST, "/internal/sweep", Some("nope"), None))
            .await
            .unwrap();
        assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);

        let ok = ctx
            .app
            .clone()
            .oneshot(json_request(Method::POST, "/internal/sweep", Some(TEST_INTERNAL_TOKEN), None))
            .await
            .unwrap();
        assert_eq!(ok.status(), StatusCode::OK);
    }
}
