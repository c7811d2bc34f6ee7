use sqlx::PgPool;
use time::OffsetDateTime;

use crate::db::models::AssessmentDefinition;

pub(crate) const COLUMNS: &str = "id, title, duration_seconds, closes_at";

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct AssessmentRow {
    pub(crate) id: String,
    pub(crate) title: String,
    pub(crate) duration_seconds: i64,
    pub(crate) closes_at: Option<OffsetDateTime>,
}

impl From<AssessmentRow> for AssessmentDefinition {
    fn from(row: AssessmentRow) -> Self {
        Self {
            id: row.id,
            title: row.title,
            duration_seconds: row.duration_seconds,
            closes_at: row.closes_at,
        }
    }
}

pub(crate) async fn find_by_id(
    pool: &PgPool,
    id: &str,
) -> Result<Option<AssessmentRow>, sqlx::Error> {
    sqlx::query_as::<_, AssessmentRow>(&format!("SELECT {COLUMNS} FROM assessments WHERE id = $1"))
        .bind(id)
        .fetch_optional(pool)
        .await
}

/// Returns `false` when the id is already defined; the stored row is left
/// untouched.
pub(crate) async fn insert(
    pool: &PgPool,
    assessment: &AssessmentDefinition,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "INSERT INTO assessments (id, title, duration_seconds, closes_at)
         VALUES ($1, $2, $3, $4)
         ON CONFLICT (id) DO NOTHING",
    )
    .bind(&assessment.id)
    .bind(&assessment.title)
    .bind(assessment.duration_seconds)
    .bind(assessment.closes_at)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}
