use async_trait::async_trait;
use axum::extract::{FromRequestParts, State};
use axum::http::request::Parts;

use crate::api::errors::ApiError;
use crate::core::state::AppState;

pub(crate) const INTERNAL_TOKEN_HEADER: &str = "x-internal-token";

/// Caller of an `/internal` route. When `INTERNAL_API_TOKEN` is unset the
/// routes are open; otherwise the `x-internal-token` header must match.
pub(crate) struct InternalCaller;

#[async_trait]
impl FromRequestParts<AppState> for InternalCaller {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let State(app_state) = State::<AppState>::from_request_parts(parts, state)
            .await
            .map_err(|e| ApiError::internal(e, "Failed to access application state"))?;

        let Some(expected) = app_state.settings().internal().api_token.as_deref() else {
            return Ok(InternalCaller);
        };

        let provided = parts
            .headers
            .get(INTERNAL_TOKEN_HEADER)
            .and_then(|value| value.to_str().ok())
            .ok_or(ApiError::Unauthorized("Missing internal token"))?;

        if provided != expected {
            return Err(ApiError::Unauthorized("Invalid internal token"));
        }

        Ok(InternalCaller)
    }
}
