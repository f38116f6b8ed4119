//! Repository for the `jobs` table.
//!
//! Every operation is a single self-contained statement (or one short
//! transaction for [`JobRepo::reset_processing`]); no long-lived
//! transactions are held. Absence is an explicit `Ok(None)`, never an
//! error; handler code paths depend on this distinction.

use chrono::{DateTime, Utc};
use promptgate_core::pagination::{clamp_limit, clamp_offset};
use promptgate_core::status::JobStatus;
use sqlx::FromRow;

use crate::models::Job;
use crate::DbPool;

/// Column list for `jobs` queries.
const COLUMNS: &str = "\
    id, prompt, system_prompt, model, status, result, error, \
    callback_url, metadata, response_format, created_at, started_at, completed_at";

/// Row shape as stored; `metadata` is raw TEXT until decoded.
#[derive(FromRow)]
struct JobRow {
    id: String,
    prompt: String,
    system_prompt: String,
    model: String,
    status: JobStatus,
    result: String,
    error: String,
    callback_url: String,
    metadata: Option<String>,
    response_format: String,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

impl From<JobRow> for Job {
    fn from(row: JobRow) -> Self {
        let metadata = row
            .metadata
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok());
        Job {
            id: row.id,
            prompt: row.prompt,
            system_prompt: row.system_prompt,
            model: row.model,
            status: row.status,
            result: row.result,
            error: row.error,
            callback_url: row.callback_url,
            metadata,
            response_format: row.response_format,
            created_at: row.created_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
        }
    }
}

/// CRUD and lifecycle operations for jobs.
pub struct JobRepo;

impl JobRepo {
    /// Insert a new job in status `queued`.
    pub async fn create(pool: &DbPool, job: &Job) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO jobs \
                 (id, prompt, system_prompt, model, status, result, error, \
                  callback_url, metadata, response_format, created_at) \
             VALUES (?, ?, ?, ?, ?, '', '', ?, ?, ?, ?)",
        )
        .bind(&job.id)
        .bind(&job.prompt)
        .bind(&job.system_prompt)
        .bind(&job.model)
        .bind(JobStatus::Queued)
        .bind(&job.callback_url)
        .bind(job.metadata.as_ref().map(|m| m.to_string()))
        .bind(&job.response_format)
        .bind(job.created_at)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Fetch a job by id. `Ok(None)` means the id does not exist.
    pub async fn find_by_id(pool: &DbPool, id: &str) -> Result<Option<Job>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM jobs WHERE id = ?");
        let row = sqlx::query_as::<_, JobRow>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await?;
        Ok(row.map(Job::from))
    }

    /// Set status, result, and error. When `status` is terminal,
    /// `completed_at` is stamped once and kept on subsequent calls, so a
    /// repeated terminal update leaves the record unchanged.
    pub async fn update_status(
        pool: &DbPool,
        id: &str,
        status: JobStatus,
        result: &str,
        error: &str,
    ) -> Result<(), sqlx::Error> {
        let completed_at = status.is_terminal().then(Utc::now);
        sqlx::query(
            "UPDATE jobs \
             SET status = ?, result = ?, error = ?, \
                 completed_at = COALESCE(completed_at, ?) \
             WHERE id = ?",
        )
        .bind(status)
        .bind(result)
        .bind(error)
        .bind(completed_at)
        .bind(id)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Transition to `processing` and stamp `started_at`. The scheduler is
    /// responsible for not calling this on a cancelled job.
    pub async fn mark_processing(pool: &DbPool, id: &str) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE jobs SET status = ?, started_at = ? WHERE id = ?")
            .bind(JobStatus::Processing)
            .bind(Utc::now())
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Remove a job unconditionally. Returns whether a row was deleted.
    pub async fn delete(pool: &DbPool, id: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM jobs WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Page through jobs newest-first. Returns the page and the total count.
    pub async fn list(
        pool: &DbPool,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> Result<(Vec<Job>, i64), sqlx::Error> {
        let limit = clamp_limit(limit);
        let offset = clamp_offset(offset);

        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM jobs")
            .fetch_one(pool)
            .await?;

        let query = format!(
            "SELECT {COLUMNS} FROM jobs ORDER BY created_at DESC LIMIT ? OFFSET ?"
        );
        let rows = sqlx::query_as::<_, JobRow>(&query)
            .bind(limit)
            .bind(offset)
            .fetch_all(pool)
            .await?;

        Ok((rows.into_iter().map(Job::from).collect(), total))
    }

    /// Revert every `processing` job to `queued` and return the affected
    /// ids. Runs in one transaction; called once at startup before any
    /// worker exists, so nothing races the reset.
    pub async fn reset_processing(pool: &DbPool) -> Result<Vec<String>, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let ids: Vec<String> = sqlx::query_scalar("SELECT id FROM jobs WHERE status = ?")
            .bind(JobStatus::Processing)
            .fetch_all(&mut *tx)
            .await?;

        if !ids.is_empty() {
            sqlx::query("UPDATE jobs SET status = ?, started_at = NULL WHERE status = ?")
                .bind(JobStatus::Queued)
                .bind(JobStatus::Processing)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(ids)
    }

    /// Delete terminal jobs completed before `before`. Returns the count.
    pub async fn delete_terminal_before(
        pool: &DbPool,
        before: DateTime<Utc>,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "DELETE FROM jobs \
             WHERE status IN (?, ?, ?) \
               AND completed_at IS NOT NULL \
               AND completed_at < ?",
        )
        .bind(JobStatus::Completed)
        .bind(JobStatus::Failed)
        .bind(JobStatus::Cancelled)
        .bind(before)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }
}
