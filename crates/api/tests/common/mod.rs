// All functions in this module are shared test helpers. Not every test
// binary uses every helper, so dead_code warnings are suppressed here.
#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use promptgate_api::config::ServerConfig;
use promptgate_api::engine::{Scheduler, SchedulerConfig};
use promptgate_api::middleware::rate_limit::RateLimiter;
use promptgate_api::router::build_app_router;
use promptgate_api::state::AppState;
use promptgate_core::status::JobStatus;
use promptgate_db::models::Job;
use promptgate_db::repositories::JobRepo;
use promptgate_db::DbPool;
use promptgate_events::WebhookDispatcher;
use promptgate_runner::ClaudeRunner;

/// The API key every test request authenticates with.
pub const API_KEY: &str = "test-key";

/// Shim script body: one assistant chunk, then the final result.
pub const SHIM_HI: &str = r#"printf '%s\n' '{"type":"assistant","content":[{"type":"text","text":"Hi"}]}'
printf '%s\n' '{"type":"result","result":"Hi"}'"#;

/// Options for building a test application.
pub struct TestOptions {
    /// Claude shim script body.
    pub shim_body: String,
    /// Whether the worker pool starts immediately.
    pub start_workers: bool,
    pub workers: usize,
    pub queue_size: usize,
    pub rate_limit: u32,
}

impl Default for TestOptions {
    fn default() -> Self {
        Self {
            shim_body: SHIM_HI.to_string(),
            start_workers: true,
            workers: 2,
            queue_size: 100,
            rate_limit: 0,
        }
    }
}

/// A fully wired application over an in-memory store and a shim CLI.
pub struct TestApp {
    pub router: Router,
    pub pool: DbPool,
    pub scheduler: Arc<Scheduler>,
    pub shutdown: CancellationToken,
    pub dir: PathBuf,
}

impl TestApp {
    pub fn app(&self) -> Router {
        self.router.clone()
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self.shutdown.cancel();
        let _ = std::fs::remove_dir_all(&self.dir);
    }
}

/// Build a test `ServerConfig` with safe defaults.
pub fn test_config(claude_path: &str, opts: &TestOptions) -> ServerConfig {
    ServerConfig {
        listen_addr: "127.0.0.1:0".to_string(),
        api_keys: vec![API_KEY.to_string()],
        claude_path: claude_path.to_string(),
        default_model: "haiku".to_string(),
        concurrency: opts.workers,
        db_path: ":memory:".to_string(),
        queue_size: opts.queue_size,
        security_prompt: String::new(),
        job_timeout_minutes: 0,
        cors_origins: Vec::new(),
        job_ttl_hours: 0,
        cleanup_interval_minutes: 60,
        rate_limit: opts.rate_limit,
        disable_keepalive: true,
    }
}

pub async fn spawn_app(opts: TestOptions) -> TestApp {
    let dir = temp_dir("promptgate_api_test");
    let shim = write_shim(&dir, &opts.shim_body);

    let pool = promptgate_db::memory_pool().await.unwrap();
    let config = test_config(&shim.to_string_lossy(), &opts);

    let runner = Arc::new(ClaudeRunner::new(config.claude_path.clone()));
    let webhooks = Arc::new(WebhookDispatcher::new());
    let scheduler = Arc::new(Scheduler::new(
        pool.clone(),
        runner,
        webhooks,
        SchedulerConfig {
            workers: config.concurrency,
            queue_capacity: config.queue_size,
            job_timeout: None,
            security_prompt: config.security_prompt.clone(),
        },
    ));

    let shutdown = CancellationToken::new();
    if opts.start_workers {
        scheduler.start(shutdown.clone());
    }

    let rate_limiter = (config.rate_limit > 0).then(|| Arc::new(RateLimiter::new(config.rate_limit)));
    let state = AppState {
        pool: pool.clone(),
        config: Arc::new(config),
        scheduler: Arc::clone(&scheduler),
        rate_limiter,
    };

    TestApp {
        router: build_app_router(state),
        pool,
        scheduler,
        shutdown,
        dir,
    }
}

/// Write an executable shell script standing in for the Claude CLI.
pub fn write_shim(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("claude_shim.sh");
    std::fs::write(&path, format!("#!/usr/bin/env bash\nset -u\n{body}\n")).unwrap();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
    }
    path
}

pub fn temp_dir(prefix: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "{prefix}_{}_{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos()
    ));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

// ---------------------------------------------------------------------------
// Shared HTTP test helpers
// ---------------------------------------------------------------------------

/// Collect the response body into a `serde_json::Value`.
pub async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

/// Collect the response body into a string (used for SSE frames).
pub async fn body_string(response: axum::response::Response) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

/// Send an authenticated request with an optional JSON body.
pub async fn send(
    app: Router,
    method: Method,
    uri: &str,
    body: Option<serde_json::Value>,
) -> axum::response::Response {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("x-api-key", API_KEY);
    let body = match body {
        Some(json) => {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).unwrap())
        }
        None => Body::empty(),
    };
    app.oneshot(builder.body(body).unwrap()).await.unwrap()
}

pub async fn get(app: Router, uri: &str) -> axum::response::Response {
    send(app, Method::GET, uri, None).await
}

pub async fn post_json(
    app: Router,
    uri: &str,
    body: serde_json::Value,
) -> axum::response::Response {
    send(app, Method::POST, uri, Some(body)).await
}

pub async fn delete(app: Router, uri: &str) -> axum::response::Response {
    send(app, Method::DELETE, uri, None).await
}

/// Submit a job and return its decoded body, asserting the 202.
pub async fn create_job(app: &TestApp, body: serde_json::Value) -> serde_json::Value {
    let response = post_json(app.app(), "/api/v1/jobs", body).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    body_json(response).await
}

/// Poll the store until the job reaches `expected`, or panic after ~2s.
pub async fn wait_for_status(pool: &DbPool, id: &str, expected: JobStatus) -> Job {
    for _ in 0..200 {
        let job = JobRepo::find_by_id(pool, id).await.unwrap().unwrap();
        if job.status == expected {
            return job;
        }
        assert!(
            !job.status.is_terminal(),
            "job {id} settled on {} while waiting for {expected}",
            job.status
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {id} never reached {expected}");
}
