use async_trait::async_trait;
use sqlx::PgPool;
use time::OffsetDateTime;

use crate::db::models::{
    AssessmentDefinition, NewSubmission, Submission, SubmissionKey, SubmissionProjection,
};
use crate::db::types::SubmissionStatus;
use crate::repositories::{assessments, submissions};
use crate::store::{
    decode_continuation, encode_continuation, Charged, DocumentStore, QueryPage, StoreError,
    StoreResult, SubmissionQuery, Version,
};

// Postgres reports no request units; charges are approximated from the
// shape of each statement so the metrics stay comparable across backends.
const READ_CHARGE: f64 = 1.0;
const WRITE_CHARGE: f64 = 10.0;
const QUERY_BASE_CHARGE: f64 = 2.5;
const QUERY_ROW_CHARGE: f64 = 0.1;
const CROSS_PARTITION_SURCHARGE: f64 = 8.0;

/// SQLSTATEs treated as throttling: serialization failure, deadlock, lock
/// not available, too many connections, statement timeout.
const THROTTLE_CODES: [&str; 5] = ["40001", "40P01", "55P03", "53300", "57014"];

pub(crate) struct PgDocumentStore {
    pool: PgPool,
}

impl PgDocumentStore {
    pub(crate) fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

pub(crate) fn map_sqlx_error(err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::PoolTimedOut => StoreError::Throttled { retry_after: None },
        sqlx::Error::RowNotFound => StoreError::NotFound,
        sqlx::Error::Database(db) => {
            let code = db.code().map(|code| code.into_owned()).unwrap_or_default();
            if THROTTLE_CODES.contains(&code.as_str()) {
                StoreError::Throttled { retry_after: None }
            } else if code == "23505" {
                StoreError::Conflict
            } else if code.starts_with("22") || code.starts_with("23") {
                StoreError::Rejected(db.message().to_string())
            } else {
                StoreError::Unavailable(db.message().to_string())
            }
        }
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) | sqlx::Error::ColumnNotFound(_) => {
            StoreError::Malformed(err.to_string())
        }
        other => StoreError::Unavailable(other.to_string()),
    }
}

#[async_trait]
impl DocumentStore for PgDocumentStore {
    fn backend(&self) -> &'static str {
        "postgres"
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await.map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn read_submission(&self, key: &SubmissionKey) -> StoreResult<Option<Submission>> {
        let row = submissions::find_by_key(&self.pool, &key.assessment_id, &key.id)
            .await
            .map_err(map_sqlx_error)?;
        Ok(Charged::new(row.map(Submission::from), READ_CHARGE))
    }

    async fn read_assessment(
        &self,
        assessment_id: &str,
    ) -> StoreResult<Option<AssessmentDefinition>> {
        let row =
            assessments::find_by_id(&self.pool, assessment_id).await.map_err(map_sqlx_error)?;
        Ok(Charged::new(row.map(AssessmentDefinition::from), READ_CHARGE))
    }

    async fn create_assessment(&self, assessment: &AssessmentDefinition) -> StoreResult<()> {
        let inserted = assessments::insert(&self.pool, assessment).await.map_err(map_sqlx_error)?;
        if !inserted {
            return Err(StoreError::Conflict);
        }
        Ok(Charged::new((), WRITE_CHARGE))
    }

    async fn create_submission(&self, submission: &NewSubmission) -> StoreResult<Submission> {
        let row = submissions::insert(&self.pool, submission).await.map_err(map_sqlx_error)?;
        match row {
            Some(row) => Ok(Charged::new(row.into(), WRITE_CHARGE)),
            None => Err(StoreError::Conflict),
        }
    }

    async fn replace_submission(
        &self,
        submission: &Submission,
        if_match: &Version,
    ) -> StoreResult<Version> {
        // A token this backend never issued can never match.
        let Ok(expected) = if_match.as_str().parse::<i64>() else {
            return Err(StoreError::Conflict);
        };

        let updated = submissions::update_if_version(&self.pool, submission, expected)
            .await
            .map_err(map_sqlx_error)?;
        if let Some(version) = updated {
            return Ok(Charged::new(Version::from(version.to_string()), WRITE_CHARGE));
        }

        let exists = submissions::exists(&self.pool, &submission.assessment_id, &submission.id)
            .await
            .map_err(map_sqlx_error)?;
        Err(if exists { StoreError::Conflict } else { StoreError::NotFound })
    }

    async fn query_submissions(&self, query: &SubmissionQuery) -> StoreResult<QueryPage> {
        let after = query.continuation.as_deref().map(decode_continuation).transpose()?;
        let mut rows = submissions::query_projected(&self.pool, query, after)
            .await
            .map_err(map_sqlx_error)?;

        let has_more = rows.len() > query.limit as usize;
        rows.truncate(query.limit as usize);
        let items: Vec<SubmissionProjection> = rows.into_iter().map(Into::into).collect();
        let continuation = if has_more { items.last().map(encode_continuation) } else { None };

        let mut charge = QUERY_BASE_CHARGE + QUERY_ROW_CHARGE * items.len() as f64;
        if query.scope.is_cross_partition() {
            charge += CROSS_PARTITION_SURCHARGE;
        }
        Ok(Charged::new(QueryPage { items, continuation }, charge))
    }

    async fn list_partitions(
        &self,
        statuses: &[SubmissionStatus],
        expires_before: OffsetDateTime,
        limit: u32,
    ) -> StoreResult<Vec<String>> {
        let partitions = submissions::list_partitions(&self.pool, statuses, expires_before, limit)
            .await
            .map_err(map_sqlx_error)?;
        let charge =
            QUERY_BASE_CHARGE + CROSS_PARTITION_SURCHARGE + QUERY_ROW_CHARGE * partitions.len() as f64;
        Ok(Charged::new(partitions, charge))
    }
}
