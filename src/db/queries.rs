use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::db::{JobStore, Reservation, StoreError};
use crate::models::job::{JobState, JobTransition, NewScanJob, ScanJob};

const JOB_COLUMNS: &str = "id, url, scan_type, requester, state, external_ref, result_key, \
                           result_summary, error_code, error, created_at, updated_at";

/// Postgres-backed job store. The dedup ledger is the partial unique index
/// over non-terminal (url, requester) pairs; reserve is a single INSERT
/// arbitrated by that index, and transition is an UPDATE guarded on the
/// expected state.
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn try_insert(&self, new: &NewScanJob) -> Result<Option<ScanJob>, StoreError> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO scan_jobs (id, url, scan_type, requester, state)
            VALUES ($1, $2, $3, $4, 'pending')
            ON CONFLICT (url, requester) WHERE state IN ('pending', 'running')
            DO NOTHING
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(&new.url)
        .bind(&new.scan_type)
        .bind(&new.requester)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(job_from_row).transpose()
    }

    async fn find_active(&self, new: &NewScanJob) -> Result<Option<ScanJob>, StoreError> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {JOB_COLUMNS}
            FROM scan_jobs
            WHERE url = $1 AND requester = $2 AND state IN ('pending', 'running')
            LIMIT 1
            "#
        ))
        .bind(&new.url)
        .bind(&new.requester)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(job_from_row).transpose()
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn reserve(&self, new: NewScanJob) -> Result<Reservation, StoreError> {
        // The insert can lose to a concurrent winner, and that winner can go
        // terminal before we read it back; a few rounds settle the race.
        for _ in 0..3 {
            if let Some(job) = self.try_insert(&new).await? {
                return Ok(Reservation::Fresh(job));
            }
            if let Some(job) = self.find_active(&new).await? {
                return Ok(Reservation::Existing(job));
            }
        }

        Err(StoreError::Contention {
            url: new.url,
            requester: new.requester,
        })
    }

    async fn get(&self, id: Uuid) -> Result<Option<ScanJob>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM scan_jobs WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(job_from_row).transpose()
    }

    async fn list_by_state(&self, state: JobState) -> Result<Vec<ScanJob>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {JOB_COLUMNS}
            FROM scan_jobs
            WHERE state = $1
            ORDER BY created_at ASC
            "#
        ))
        .bind(state.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(job_from_row).collect()
    }

    async fn list_for_requester(&self, requester: &str) -> Result<Vec<ScanJob>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {JOB_COLUMNS}
            FROM scan_jobs
            WHERE requester = $1
            ORDER BY created_at DESC
            LIMIT 200
            "#
        ))
        .bind(requester)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(job_from_row).collect()
    }

    async fn transition(
        &self,
        id: Uuid,
        from: JobState,
        transition: JobTransition,
    ) -> Result<ScanJob, StoreError> {
        let target = transition.target_state();
        if !from.can_transition_to(target) {
            return Err(StoreError::Stale { id, expected: from });
        }

        let (external_ref, result_key, result_summary, error_code, error) = match &transition {
            JobTransition::Started { external_ref } => {
                (Some(external_ref.clone()), None, None, None, None)
            }
            JobTransition::Completed {
                result_key,
                summary,
            } => (
                None,
                Some(result_key.clone()),
                Some(serde_json::to_value(summary).map_err(|e| {
                    StoreError::InvalidState(format!("unserializable summary: {e}"))
                })?),
                None,
                None,
            ),
            JobTransition::Failed { code, message } => (
                None,
                None,
                None,
                Some(code.to_string()),
                Some(message.clone()),
            ),
        };

        let row = sqlx::query(&format!(
            r#"
            UPDATE scan_jobs
            SET state = $3,
                external_ref = COALESCE($4, external_ref),
                result_key = COALESCE($5, result_key),
                result_summary = COALESCE($6, result_summary),
                error_code = COALESCE($7, error_code),
                error = COALESCE($8, error),
                updated_at = NOW()
            WHERE id = $1 AND state = $2
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(from.to_string())
        .bind(target.to_string())
        .bind(external_ref)
        .bind(result_key)
        .bind(result_summary)
        .bind(error_code)
        .bind(error)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => job_from_row(&row),
            // Zero rows matched: either the job moved on (stale CAS) or it
            // never existed.
            None => match self.get(id).await? {
                Some(_) => Err(StoreError::Stale { id, expected: from }),
                None => Err(StoreError::NotFound(id)),
            },
        }
    }
}

fn job_from_row(row: &PgRow) -> Result<ScanJob, StoreError> {
    let state_text: String = row.try_get("state")?;
    let state = state_text
        .parse::<JobState>()
        .map_err(|_| StoreError::InvalidState(state_text.clone()))?;

    let error_code = match row.try_get::<Option<String>, _>("error_code")? {
        Some(code) => Some(
            code.parse()
                .map_err(|_| StoreError::InvalidState(code.clone()))?,
        ),
        None => None,
    };

    let result_summary = row
        .try_get::<Option<serde_json::Value>, _>("result_summary")?
        .and_then(|v| serde_json::from_value(v).ok());

    Ok(ScanJob {
        id: row.try_get("id")?,
        url: row.try_get("url")?,
        scan_type: row.try_get("scan_type")?,
        requester: row.try_get("requester")?,
        state,
        external_ref: row.try_get("external_ref")?,
        result_key: row.try_get("result_key")?,
        result_summary,
        error_code,
        error: row.try_get("error")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}
