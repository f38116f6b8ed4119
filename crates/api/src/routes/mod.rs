pub mod health;
pub mod jobs;

use axum::routing::get;
use axum::Router;

use crate::handlers::frontend;
use crate::state::AppState;

/// Routes mounted under `/api/v1`.
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health::health_check))
        .nest("/jobs", jobs::router())
}

/// Root-level routes (the embedded frontend).
pub fn root_routes() -> Router<AppState> {
    Router::new().route("/", get(frontend::serve_frontend))
}
