//! Per-IP rate limiting for job submission.
//!
//! A continuous-refill token bucket per client IP, applied only to
//! `POST /api/v1/jobs`. Burst equals the per-second rate. Buckets idle for
//! five minutes are evicted opportunistically on the next check, so there
//! is no dedicated sweeper task to manage.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{Method, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::state::AppState;

/// Buckets unseen for this long are dropped.
const IDLE_EVICTION: Duration = Duration::from_secs(300);

struct Bucket {
    tokens: f64,
    last_refill: Instant,
    last_seen: Instant,
}

/// Token-bucket limiter keyed by client IP.
pub struct RateLimiter {
    buckets: Mutex<HashMap<String, Bucket>>,
    rate_per_sec: f64,
    burst: f64,
    last_eviction: Mutex<Instant>,
}

impl RateLimiter {
    pub fn new(rate_per_sec: u32) -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
            rate_per_sec: f64::from(rate_per_sec),
            burst: f64::from(rate_per_sec),
            last_eviction: Mutex::new(Instant::now()),
        }
    }

    /// Whether a request from `ip` may proceed right now.
    pub fn allow(&self, ip: &str) -> bool {
        self.maybe_evict_idle();

        let now = Instant::now();
        let mut buckets = self.buckets.lock().expect("rate limiter lock poisoned");
        let bucket = buckets.entry(ip.to_string()).or_insert(Bucket {
            tokens: self.burst,
            last_refill: now,
            last_seen: now,
        });

        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.rate_per_sec).min(self.burst);
        bucket.last_refill = now;
        bucket.last_seen = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    fn maybe_evict_idle(&self) {
        let mut last = self.last_eviction.lock().expect("rate limiter lock poisoned");
        if last.elapsed() < IDLE_EVICTION {
            return;
        }
        *last = Instant::now();
        drop(last);

        let cutoff = Instant::now() - IDLE_EVICTION;
        self.buckets
            .lock()
            .expect("rate limiter lock poisoned")
            .retain(|_, bucket| bucket.last_seen > cutoff);
    }
}

pub async fn limit_job_submissions(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let Some(limiter) = &state.rate_limiter else {
        return next.run(request).await;
    };

    if request.method() == Method::POST && request.uri().path() == "/api/v1/jobs" {
        let ip = client_ip(&request);
        if !limiter.allow(&ip) {
            return (
                StatusCode::TOO_MANY_REQUESTS,
                axum::Json(json!({
                    "error": "rate limit exceeded, slow down",
                    "code": "RATE_LIMITED",
                })),
            )
                .into_response();
        }
    }

    next.run(request).await
}

/// Client IP for limiter keying: first `X-Forwarded-For` hop when behind a
/// proxy, otherwise the socket peer address.
fn client_ip(request: &Request) -> String {
    if let Some(forwarded) = request
        .headers()
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
    {
        if let Some(first) = forwarded.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}
