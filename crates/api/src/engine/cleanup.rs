//! Periodic deletion of old terminal jobs.
//!
//! A single background task on a fixed interval. Disabled entirely when
//! the TTL is zero. Runs until the shutdown token fires.

use std::time::Duration;

use chrono::Utc;
use promptgate_db::repositories::JobRepo;
use promptgate_db::DbPool;
use tokio_util::sync::CancellationToken;

/// Run the TTL cleanup loop. Returns immediately when `ttl_hours` is 0.
pub async fn run(pool: DbPool, ttl_hours: u64, interval_minutes: u64, shutdown: CancellationToken) {
    if ttl_hours == 0 {
        return;
    }

    tracing::info!(ttl_hours, interval_minutes, "job cleanup task started");
    let mut ticker = tokio::time::interval(Duration::from_secs(interval_minutes * 60));
    // The first tick fires immediately; skip it so a restart loop does not
    // hammer the store.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                tracing::info!("job cleanup task stopping");
                break;
            }
            _ = ticker.tick() => {
                let cutoff = Utc::now() - chrono::Duration::hours(ttl_hours as i64);
                match JobRepo::delete_terminal_before(&pool, cutoff).await {
                    Ok(deleted) if deleted > 0 => {
                        tracing::info!(deleted, "cleanup: deleted old terminal jobs");
                    }
                    Ok(_) => {}
                    Err(err) => {
                        tracing::error!(error = %err, "cleanup: deletion failed");
                    }
                }
            }
        }
    }
}
