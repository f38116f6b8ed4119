//! SQLite-backed job store.
//!
//! A single `jobs` table holds every submitted job. The database runs in
//! WAL mode so readers (list/get/SSE handlers) never block on the writer
//! (the worker finalizing a job). Schema creation happens at open and is
//! idempotent; stores created before the `response_format` column exist
//! are migrated additively.

use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};

pub mod models;
pub mod repositories;

pub type DbPool = sqlx::SqlitePool;

/// SQLite busy timeout. Store operations are short; anything waiting this
/// long on the write lock indicates a stuck writer.
const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

/// Open (or create) the SQLite database at `path` and build a pool.
pub async fn create_pool(path: &str) -> Result<DbPool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(path)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(BUSY_TIMEOUT);

    SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
}

/// Create the schema. Safe to call on every startup.
pub async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS jobs (
            id              TEXT PRIMARY KEY,
            prompt          TEXT NOT NULL,
            system_prompt   TEXT NOT NULL DEFAULT '',
            model           TEXT NOT NULL,
            status          TEXT NOT NULL DEFAULT 'queued',
            result          TEXT NOT NULL DEFAULT '',
            error           TEXT NOT NULL DEFAULT '',
            callback_url    TEXT NOT NULL DEFAULT '',
            metadata        TEXT,
            response_format TEXT NOT NULL DEFAULT '',
            created_at      DATETIME NOT NULL,
            started_at      DATETIME,
            completed_at    DATETIME
        )",
    )
    .execute(pool)
    .await?;

    for index in [
        "CREATE INDEX IF NOT EXISTS idx_jobs_status       ON jobs(status)",
        "CREATE INDEX IF NOT EXISTS idx_jobs_created_at   ON jobs(created_at)",
        "CREATE INDEX IF NOT EXISTS idx_jobs_completed_at ON jobs(completed_at)",
    ] {
        sqlx::query(index).execute(pool).await?;
    }

    // Databases created before the response_format column was introduced
    // get it added here; the error on an already-present column is expected.
    let _ = sqlx::query("ALTER TABLE jobs ADD COLUMN response_format TEXT NOT NULL DEFAULT ''")
        .execute(pool)
        .await;

    Ok(())
}

/// Cheap connectivity probe used by the health endpoint.
pub async fn health_check(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await.map(|_| ())
}

/// Build an in-memory pool with the schema applied. Test helper; a single
/// connection is used so every handle sees the same in-memory database.
pub async fn memory_pool() -> Result<DbPool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;
    run_migrations(&pool).await?;
    Ok(pool)
}
