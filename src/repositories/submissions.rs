use sqlx::{PgPool, Postgres, QueryBuilder};
use time::OffsetDateTime;

use crate::db::models::{NewSubmission, Submission, SubmissionProjection};
use crate::db::types::SubmissionStatus;
use crate::store::partition::{rule_for, EntityKind};
use crate::store::{QueryScope, SubmissionQuery, Version};

pub(crate) const COLUMNS: &str = "\
    id, assessment_id, candidate_id, status, started_at, expiration_time, submitted_at, \
    evaluation_ref, finalize_error, version, created_at, updated_at";

const PROJECTION: &str = "id, assessment_id, status, expiration_time, version";

fn table() -> &'static str {
    rule_for(EntityKind::Submission).container
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct SubmissionRow {
    pub(crate) id: String,
    pub(crate) assessment_id: String,
    pub(crate) candidate_id: String,
    pub(crate) status: SubmissionStatus,
    pub(crate) started_at: Option<OffsetDateTime>,
    pub(crate) expiration_time: Option<OffsetDateTime>,
    pub(crate) submitted_at: Option<OffsetDateTime>,
    pub(crate) evaluation_ref: Option<String>,
    pub(crate) finalize_error: Option<String>,
    pub(crate) version: i64,
    pub(crate) created_at: OffsetDateTime,
    pub(crate) updated_at: OffsetDateTime,
}

impl From<SubmissionRow> for Submission {
    fn from(row: SubmissionRow) -> Self {
        Self {
            id: row.id,
            assessment_id: row.assessment_id,
            candidate_id: row.candidate_id,
            status: row.status,
            started_at: row.started_at,
            expiration_time: row.expiration_time,
            submitted_at: row.submitted_at,
            evaluation_ref: row.evaluation_ref,
            finalize_error: row.finalize_error,
            version: Version::from(row.version.to_string()),
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct ProjectionRow {
    pub(crate) id: String,
    pub(crate) assessment_id: String,
    pub(crate) status: SubmissionStatus,
    pub(crate) expiration_time: Option<OffsetDateTime>,
    pub(crate) version: i64,
}

impl From<ProjectionRow> for SubmissionProjection {
    fn from(row: ProjectionRow) -> Self {
        Self {
            id: row.id,
            assessment_id: row.assessment_id,
            status: row.status,
            expiration_time: row.expiration_time,
            version: Version::from(row.version.to_string()),
        }
    }
}

pub(crate) async fn find_by_key(
    pool: &PgPool,
    assessment_id: &str,
    id: &str,
) -> Result<Option<SubmissionRow>, sqlx::Error> {
    sqlx::query_as::<_, SubmissionRow>(&format!(
        "SELECT {COLUMNS} FROM {} WHERE assessment_id = $1 AND id = $2",
        table()
    ))
    .bind(assessment_id)
    .bind(id)
    .fetch_optional(pool)
    .await
}

pub(crate) async fn exists(pool: &PgPool, assessment_id: &str, id: &str) -> Result<bool, sqlx::Error> {
    sqlx::query_scalar::<_, bool>(&format!(
        "SELECT EXISTS (SELECT 1 FROM {} WHERE assessment_id = $1 AND id = $2)",
        table()
    ))
    .bind(assessment_id)
    .bind(id)
    .fetch_one(pool)
    .await
}

/// Returns `None` when the id is already taken by any assessment. The id is
/// claimed in `submission_ids` first, since the partitioned table can only
/// enforce uniqueness within one assessment.
pub(crate) async fn insert(
    pool: &PgPool,
    submission: &NewSubmission,
) -> Result<Option<SubmissionRow>, sqlx::Error> {
    sqlx::query_as::<_, SubmissionRow>(&format!(
        "WITH claimed AS (
             INSERT INTO submission_ids (id, assessment_id)
             VALUES ($1, $2)
             ON CONFLICT DO NOTHING
             RETURNING id
         )
         INSERT INTO {} (id, assessment_id, candidate_id, status, version, created_at, updated_at)
         SELECT claimed.id, $2, $3, $4, 1, $5, $5 FROM claimed
         ON CONFLICT DO NOTHING
         RETURNING {COLUMNS}",
        table()
    ))
    .bind(&submission.id)
    .bind(&submission.assessment_id)
    .bind(&submission.candidate_id)
    .bind(SubmissionStatus::Scheduled)
    .bind(submission.created_at)
    .fetch_optional(pool)
    .await
}

/// Conditional replace of the mutable fields. Returns the new version, or
/// `None` if no row matched the key and expected version.
pub(crate) async fn update_if_version(
    pool: &PgPool,
    submission: &Submission,
    expected_version: i64,
) -> Result<Option<i64>, sqlx::Error> {
    sqlx::query_scalar::<_, i64>(&format!(
        "UPDATE {}
         SET status = $1,
             started_at = $2,
             expiration_time = $3,
             submitted_at = $4,
             evaluation_ref = $5,
             finalize_error = $6,
             updated_at = $7,
             version = version + 1
         WHERE assessment_id = $8 AND id = $9 AND version = $10
         RETURNING version",
        table()
    ))
    .bind(submission.status)
    .bind(submission.started_at)
    .bind(submission.expiration_time)
    .bind(submission.submitted_at)
    .bind(&submission.evaluation_ref)
    .bind(&submission.finalize_error)
    .bind(submission.updated_at)
    .bind(&submission.assessment_id)
    .bind(&submission.id)
    .bind(expected_version)
    .fetch_optional(pool)
    .await
}

fn push_status_filter(builder: &mut QueryBuilder<'_, Postgres>, statuses: &[SubmissionStatus]) {
    if statuses.is_empty() {
        return;
    }
    builder.push(" AND status IN (");
    let mut separated = builder.separated(", ");
    for status in statuses {
        separated.push_bind(*status);
    }
    separated.push_unseparated(")");
}

pub(crate) async fn query_projected(
    pool: &PgPool,
    query: &SubmissionQuery,
    after: Option<(String, String)>,
) -> Result<Vec<ProjectionRow>, sqlx::Error> {
    let mut builder =
        QueryBuilder::<Postgres>::new(format!("SELECT {PROJECTION} FROM {} WHERE TRUE", table()));

    if let QueryScope::Partition(assessment_id) = &query.scope {
        builder.push(" AND assessment_id = ");
        builder.push_bind(assessment_id.clone());
    }
    push_status_filter(&mut builder, &query.statuses);
    if let Some(cutoff) = query.expires_before {
        builder.push(" AND expiration_time < ");
        builder.push_bind(cutoff);
    }
    if let Some(cutoff) = query.submitted_before {
        builder.push(" AND submitted_at < ");
        builder.push_bind(cutoff);
    }
    if query.missing_evaluation_ref {
        builder.push(" AND evaluation_ref IS NULL");
    }
    if let Some((assessment_id, id)) = after {
        builder.push(" AND (assessment_id, id) > (");
        builder.push_bind(assessment_id);
        builder.push(", ");
        builder.push_bind(id);
        builder.push(")");
    }

    // One extra row tells the caller whether another page exists.
    builder.push(" ORDER BY assessment_id, id LIMIT ");
    builder.push_bind(i64::from(query.limit) + 1);

    builder.build_query_as::<ProjectionRow>().fetch_all(pool).await
}

pub(crate) async fn list_partitions(
    pool: &PgPool,
    statuses: &[SubmissionStatus],
    expires_before: OffsetDateTime,
    limit: u32,
) -> Result<Vec<String>, sqlx::Error> {
    let mut builder = QueryBuilder::<Postgres>::new(format!(
        "SELECT DISTINCT assessment_id FROM {} WHERE TRUE",
        table()
    ));
    push_status_filter(&mut builder, statuses);
    builder.push(" AND expiration_time < ");
    builder.push_bind(expires_before);
    builder.push(" ORDER BY assessment_id LIMIT ");
    builder.push_bind(i64::from(limit));

    builder.build_query_scalar::<String>().fetch_all(pool).await
}
