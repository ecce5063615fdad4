//! PostgreSQL implementations of [`Broker`] and [`StatusStore`].

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::debug;

use super::broker::Broker;
use super::status::{StatusError, StatusStore};
use super::types::{JobEnvelope, JobId, JobOutput, JobPayload, JobRecord, JobState, StatusUpdate};

const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS review_job_queue (
    id          BIGSERIAL PRIMARY KEY,
    job_id      UUID NOT NULL UNIQUE,
    queue_name  TEXT NOT NULL,
    payload     JSONB NOT NULL,
    status      TEXT NOT NULL DEFAULT 'pending',
    created_at  TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    claimed_at  TIMESTAMPTZ
);

CREATE INDEX IF NOT EXISTS review_job_queue_pending_idx
    ON review_job_queue (queue_name, id)
    WHERE status = 'pending';

CREATE TABLE IF NOT EXISTS review_jobs (
    job_id      UUID PRIMARY KEY,
    state       TEXT NOT NULL,
    result      JSONB,
    error       TEXT,
    created_at  TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at  TIMESTAMPTZ NOT NULL DEFAULT NOW()
);
";

/// キューと状態テーブルが無ければ作成する。
///
/// # Errors
/// DDL の実行に失敗した場合。
pub async fn ensure_schema(pool: &PgPool) -> Result<()> {
    sqlx::raw_sql(SCHEMA)
        .execute(pool)
        .await
        .context("failed to create job tables")?;
    Ok(())
}

/// `review_job_queue` テーブルをキューとして使うブローカー。
///
/// 取り出しは `FOR UPDATE SKIP LOCKED` で1件ずつ確保する。終了状態まで記録された
/// ジョブの行は `ack` で削除する。
#[derive(Debug, Clone)]
pub struct PgBroker {
    pool: PgPool,
}

impl PgBroker {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Broker for PgBroker {
    async fn submit(&self, queue: &str, envelope: JobEnvelope) -> Result<()> {
        let payload =
            serde_json::to_value(&envelope.payload).context("failed to serialize job payload")?;
        sqlx::query(
            r"
            INSERT INTO review_job_queue (job_id, queue_name, payload)
            VALUES ($1, $2, $3)
            ",
        )
        .bind(envelope.job_id)
        .bind(queue)
        .bind(payload)
        .execute(&self.pool)
        .await
        .context("failed to insert queued job")?;
        Ok(())
    }

    async fn next(&self, queue: &str) -> Result<Option<JobEnvelope>> {
        let row = sqlx::query(
            r"
            UPDATE review_job_queue
            SET status = 'claimed', claimed_at = NOW()
            WHERE id = (
                SELECT id FROM review_job_queue
                WHERE queue_name = $1 AND status = 'pending'
                ORDER BY id ASC
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            RETURNING job_id, payload
            ",
        )
        .bind(queue)
        .fetch_optional(&self.pool)
        .await
        .context("failed to claim next job")?;

        let Some(row) = row else {
            return Ok(None);
        };
        let job_id: JobId = row.try_get("job_id").context("failed to get job_id")?;
        let payload: serde_json::Value = row.try_get("payload").context("failed to get payload")?;
        let payload: JobPayload =
            serde_json::from_value(payload).context("failed to deserialize job payload")?;
        debug!(%job_id, queue, "claimed queued job");

        Ok(Some(JobEnvelope { job_id, payload }))
    }

    async fn release(&self, queue: &str, envelope: JobEnvelope) -> Result<()> {
        sqlx::query(
            r"
            UPDATE review_job_queue
            SET status = 'pending', claimed_at = NULL
            WHERE job_id = $1 AND queue_name = $2
            ",
        )
        .bind(envelope.job_id)
        .bind(queue)
        .execute(&self.pool)
        .await
        .context("failed to release claimed job")?;
        debug!(job_id = %envelope.job_id, queue, "released claimed job");
        Ok(())
    }

    async fn ack(&self, queue: &str, job_id: JobId) -> Result<()> {
        sqlx::query("DELETE FROM review_job_queue WHERE job_id = $1 AND queue_name = $2")
            .bind(job_id)
            .bind(queue)
            .execute(&self.pool)
            .await
            .context("failed to delete finished job")?;
        Ok(())
    }
}

/// `review_jobs` テーブルの状態ストア。
///
/// 遷移の検査は条件付きの INSERT/UPDATE で行い、0行更新なら不正な遷移とみなす。
#[derive(Debug, Clone)]
pub struct PgStatusStore {
    pool: PgPool,
}

impl PgStatusStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn current_state(&self, job_id: JobId) -> Result<Option<JobState>> {
        let state: Option<String> =
            sqlx::query_scalar("SELECT state FROM review_jobs WHERE job_id = $1")
                .bind(job_id)
                .fetch_optional(&self.pool)
                .await
                .context("failed to read job state")?;
        Ok(state.as_deref().and_then(JobState::parse))
    }
}

#[async_trait]
impl StatusStore for PgStatusStore {
    async fn set(&self, job_id: JobId, update: StatusUpdate) -> Result<(), StatusError> {
        let to = update.state();
        let predecessors: Vec<String> = to
            .predecessors()
            .iter()
            .map(|state| state.as_str().to_string())
            .collect();
        let record = JobRecord::from_update(job_id, update);
        let result = record
            .result
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .context("failed to serialize job result")?;

        let query = if to.may_open() {
            sqlx::query(
                r"
                INSERT INTO review_jobs (job_id, state, result, error, updated_at)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (job_id) DO UPDATE
                SET state = EXCLUDED.state,
                    result = EXCLUDED.result,
                    error = EXCLUDED.error,
                    updated_at = EXCLUDED.updated_at
                WHERE review_jobs.state = ANY($6)
                ",
            )
        } else {
            sqlx::query(
                r"
                UPDATE review_jobs
                SET state = $2, result = $3, error = $4, updated_at = $5
                WHERE job_id = $1 AND state = ANY($6)
                ",
            )
        };

        let outcome = query
            .bind(job_id)
            .bind(to.as_str())
            .bind(result)
            .bind(record.error.as_deref())
            .bind(record.updated_at)
            .bind(&predecessors)
            .execute(&self.pool)
            .await
            .context("failed to write job state")?;

        if outcome.rows_affected() == 0 {
            let from = self.current_state(job_id).await?;
            return Err(StatusError::InvalidTransition { job_id, from, to });
        }
        Ok(())
    }

    async fn get(&self, job_id: JobId) -> Result<Option<JobRecord>, StatusError> {
        let row = sqlx::query(
            r"
            SELECT job_id, state, result, error, updated_at
            FROM review_jobs
            WHERE job_id = $1
            ",
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await
        .context("failed to fetch job status")?;

        let Some(row) = row else {
            return Ok(None);
        };
        let state: String = row.try_get("state").context("failed to get state")?;
        let state = JobState::parse(&state)
            .with_context(|| format!("unknown job state {state:?} in review_jobs"))?;
        let result: Option<serde_json::Value> =
            row.try_get("result").context("failed to get result")?;
        let result: Option<JobOutput> = result
            .map(serde_json::from_value)
            .transpose()
            .context("failed to deserialize job result")?;
        let error: Option<String> = row.try_get("error").context("failed to get error")?;
        let updated_at: DateTime<Utc> =
            row.try_get("updated_at").context("failed to get updated_at")?;

        Ok(Some(JobRecord {
            job_id,
            state,
            result,
            error,
            updated_at,
        }))
    }
}
