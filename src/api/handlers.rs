use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use std::collections::HashMap;

use crate::core::metrics;
use crate::core::redis::RedisHealth;
use crate::core::state::AppState;
use crate::schemas::{HealthResponse, RootResponse};

pub(crate) async fn root(State(state): State<AppState>) -> Json<RootResponse> {
    let response = RootResponse {
        message: state.settings().api().project_name.clone(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        store_backend: state.store().backend().to_string(),
    };

    Json(response)
}

pub(crate) async fn healthz(State(state): State<AppState>) -> Json<HealthResponse> {
    let mut status = "healthy".to_string();
    let mut components = HashMap::new();

    match state.store().ping().await {
        Ok(()) => {
            components.insert("store".to_string(), "healthy".to_string());
        }
        Err(err) => {
            components.insert("store".to_string(), format!("unhealthy: {err}"));
            status = "unhealthy".to_string();
        }
    }

    if let Some(redis) = state.redis() {
        match redis.health().await {
            RedisHealth::Healthy => {
                components.insert("redis".to_string(), "healthy".to_string());
            }
            RedisHealth::Disconnected => {
                components.insert("redis".to_string(), "disconnected".to_string());
                status = "degraded".to_string();
            }
            RedisHealth::Unhealthy(error) => {
                components.insert("redis".to_string(), format!("unhealthy: {error}"));
                status = "degraded".to_string();
            }
        }
    }

    components.insert("handoff".to_string(), state.handoff().transport().to_string());

    Json(HealthResponse { service: "timed-sessions".to_string(), status, components })
}

pub(crate) async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    if !state.settings().telemetry().prometheus_enabled {
        return StatusCode::NOT_FOUND.into_response();
    }

    match metrics::render() {
        Some(body) => ([(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")], body)
            .into_response(),
        None => StatusCode::SERVICE_UNAVAILABLE.into_response(),
    }
}
