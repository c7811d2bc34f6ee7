use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use validator::Validate;

use crate::core::time::format_offset;
use crate::db::models::AssessmentDefinition;

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct AssessmentRequest {
    #[validate(length(min = 1, max = 256))]
    pub(crate) title: String,
    #[validate(range(min = 1, max = 604800))]
    pub(crate) duration_seconds: i64,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub(crate) closes_at: Option<OffsetDateTime>,
}

#[derive(Debug, Serialize)]
pub(crate) struct AssessmentResponse {
    pub(crate) id: String,
    pub(crate) title: String,
    pub(crate) duration_seconds: i64,
    pub(crate) closes_at: Option<String>,
}

impl From<AssessmentDefinition> for AssessmentResponse {
    fn from(assessment: AssessmentDefinition) -> Self {
        Self {
            id: assessment.id,
            title: assessment.title,
            duration_seconds: assessment.duration_seconds,
            closes_at: assessment.closes_at.map(format_offset),
        }
    }
}
