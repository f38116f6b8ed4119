//! Shared application router builder.
//!
//! Both the production binary (`main.rs`) and the integration tests build
//! the app through [`build_app_router`] so they exercise the exact same
//! middleware stack.

use std::time::Duration;

use axum::extract::DefaultBodyLimit;
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderName, Method};
use axum::Router;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

use crate::middleware::auth::require_api_key;
use crate::middleware::rate_limit::limit_job_submissions;
use crate::routes;
use crate::state::AppState;

/// Request body cap: 1 MiB.
pub const MAX_BODY_BYTES: usize = 1 << 20;

/// Build the full application [`Router`] with all middleware layers.
///
/// The middleware stack, outermost first:
///
/// 1. Panic recovery (catch panics, return 500)
/// 2. Set request ID on incoming requests
/// 3. Structured request/response tracing
/// 4. Propagate request ID to the response
/// 5. CORS (only when origins are configured)
/// 6. API-key authentication
/// 7. Per-IP rate limiting on job submission
/// 8. Body size limit
pub fn build_app_router(state: AppState) -> Router {
    let request_id_header = HeaderName::from_static("x-request-id");

    let mut router = Router::new()
        .merge(routes::root_routes())
        .nest("/api/v1", routes::api_routes())
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            limit_job_submissions,
        ))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            require_api_key,
        ));

    if !state.config.cors_origins.is_empty() {
        router = router.layer(build_cors_layer(&state.config.cors_origins));
    }

    router
        .layer(PropagateRequestIdLayer::new(request_id_header.clone()))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(SetRequestIdLayer::new(request_id_header, MakeRequestUuid))
        .layer(CatchPanicLayer::new())
        .with_state(state)
}

/// Build the CORS layer from the configured origin list.
///
/// Panics on an invalid origin, which is the desired behaviour: a
/// misconfigured deployment should fail at startup, not at request time.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<_> = origins
        .iter()
        .map(|origin| {
            origin
                .parse()
                .unwrap_or_else(|e| panic!("Invalid CORS origin '{origin}': {e}"))
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([CONTENT_TYPE, HeaderName::from_static("x-api-key")])
        .max_age(Duration::from_secs(3600))
}
