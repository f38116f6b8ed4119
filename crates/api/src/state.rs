use std::sync::Arc;

use promptgate_db::DbPool;

use crate::config::ServerConfig;
use crate::engine::Scheduler;
use crate::middleware::rate_limit::RateLimiter;

/// Shared application state available to all Axum handlers via
/// `State<AppState>`. Cheaply cloneable; everything is behind `Arc` or is
/// already a handle.
#[derive(Clone)]
pub struct AppState {
    /// SQLite connection pool.
    pub pool: DbPool,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Job queue, worker pool, and event fan-out.
    pub scheduler: Arc<Scheduler>,
    /// Per-IP submission limiter; `None` when rate limiting is disabled.
    pub rate_limiter: Option<Arc<RateLimiter>>,
}
