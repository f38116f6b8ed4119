//! Integration tests for the health endpoint and general HTTP behaviour.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::{body_json, spawn_app, TestOptions};
use tower::ServiceExt;

// ---------------------------------------------------------------------------
// Test: GET /api/v1/health is reachable without a key
// ---------------------------------------------------------------------------

#[tokio::test]
async fn health_requires_no_api_key() {
    let app = spawn_app(TestOptions::default()).await;

    let response = app
        .app()
        .oneshot(
            Request::builder()
                .uri("/api/v1/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert!(json["claude_auth"].is_string());
}

// ---------------------------------------------------------------------------
// Test: the frontend is served at / without a key
// ---------------------------------------------------------------------------

#[tokio::test]
async fn frontend_is_served_at_root() {
    let app = spawn_app(TestOptions::default()).await;

    let response = app
        .app()
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(content_type.starts_with("text/html"));
}

// ---------------------------------------------------------------------------
// Test: unknown routes return 404
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unknown_route_returns_404() {
    let app = spawn_app(TestOptions::default()).await;
    let response = common::get(app.app(), "/this-route-does-not-exist").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// ---------------------------------------------------------------------------
// Test: every response carries an x-request-id header
// ---------------------------------------------------------------------------

#[tokio::test]
async fn responses_carry_a_request_id() {
    let app = spawn_app(TestOptions::default()).await;
    let response = common::get(app.app(), "/api/v1/health").await;

    let request_id = response
        .headers()
        .get("x-request-id")
        .expect("x-request-id header must be present");
    assert_eq!(request_id.to_str().unwrap().len(), 36, "expected a UUID");
}
