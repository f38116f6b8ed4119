//! Fire-and-forget webhook delivery.
//!
//! Validation happens before the background task is spawned: the URL must
//! be http(s) and every address its host resolves to must be public.
//! Connection-time re-validation against DNS rebinding is a documented
//! hardening opportunity, not implemented here.
//!
//! Delivery retries with full-jitter exponential backoff so simultaneous
//! failures do not produce synchronized retry storms. After the final
//! attempt the failure is logged and dropped; there is no dead-letter
//! queue.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::time::Duration;

use rand::Rng;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

/// Maximum delivery attempts per webhook.
const RETRY_ATTEMPTS: u32 = 8;

/// Backoff base.
const RETRY_BASE: Duration = Duration::from_secs(1);

/// Backoff cap.
const RETRY_CAP: Duration = Duration::from_secs(300);

/// HTTP timeout for a single delivery attempt.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Terminal-state notification body.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookPayload {
    pub job_id: String,
    pub status: String,
    pub result: String,
    pub error: String,
}

#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("unsupported scheme: {0}")]
    Scheme(String),

    #[error("DNS lookup failed: {0}")]
    Resolve(#[from] std::io::Error),

    #[error("private/internal address blocked: {0}")]
    BlockedAddress(IpAddr),

    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("non-2xx status: {0}")]
    Status(u16),
}

/// Delivers job-completion payloads to caller-supplied URLs.
pub struct WebhookDispatcher {
    client: reqwest::Client,
}

impl WebhookDispatcher {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("failed to build webhook HTTP client");
        Self { client }
    }

    /// Validate `url`, then deliver `payload` in a background task and
    /// return immediately. `shutdown` should be the process shutdown
    /// token, NOT the job's cancellation token: an in-flight retry ladder
    /// survives a user cancel but stops when the server exits.
    pub async fn send(&self, shutdown: CancellationToken, url: &str, payload: WebhookPayload) {
        if let Err(err) = validate_url(url).await {
            tracing::warn!(url, error = %err, "webhook: rejected callback URL");
            return;
        }

        let client = self.client.clone();
        let url = url.to_string();
        tokio::spawn(deliver(client, shutdown, url, payload));
    }
}

impl Default for WebhookDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

async fn deliver(
    client: reqwest::Client,
    shutdown: CancellationToken,
    url: String,
    payload: WebhookPayload,
) {
    for attempt in 1..=RETRY_ATTEMPTS {
        if shutdown.is_cancelled() {
            return;
        }

        match post(&client, &url, &payload).await {
            Ok(()) => return,
            Err(err) => {
                tracing::warn!(attempt, url = %url, error = %err, "webhook attempt failed");
            }
        }

        if attempt < RETRY_ATTEMPTS {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = tokio::time::sleep(jitter(attempt)) => {}
            }
        }
    }
    tracing::error!(url = %url, job_id = %payload.job_id, "webhook: all retries exhausted");
}

async fn post(
    client: &reqwest::Client,
    url: &str,
    payload: &WebhookPayload,
) -> Result<(), WebhookError> {
    let response = client.post(url).json(payload).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(WebhookError::Status(status.as_u16()));
    }
    Ok(())
}

/// Full-jitter backoff: uniform in `[0, min(RETRY_CAP, RETRY_BASE * 2^attempt))`.
fn jitter(attempt: u32) -> Duration {
    let exp = RETRY_BASE
        .saturating_mul(1u32.checked_shl(attempt).unwrap_or(u32::MAX))
        .min(RETRY_CAP);
    let millis = rand::thread_rng().gen_range(0..exp.as_millis().max(1) as u64);
    Duration::from_millis(millis)
}

/// Reject non-http(s) schemes and hosts resolving to any reserved address.
async fn validate_url(raw: &str) -> Result<(), WebhookError> {
    let url = reqwest::Url::parse(raw).map_err(|e| WebhookError::InvalidUrl(e.to_string()))?;

    match url.scheme() {
        "http" | "https" => {}
        other => return Err(WebhookError::Scheme(other.to_string())),
    }

    let host = url
        .host_str()
        .ok_or_else(|| WebhookError::InvalidUrl("missing host".into()))?;
    let port = url.port_or_known_default().unwrap_or(443);

    // IP literals need no lookup; hostnames are resolved and every
    // returned address must be public.
    if let Ok(ip) = host.trim_matches(&['[', ']'][..]).parse::<IpAddr>() {
        return check_addr(ip);
    }

    let addrs = tokio::net::lookup_host((host, port)).await?;
    for addr in addrs {
        check_addr(addr.ip())?;
    }
    Ok(())
}

fn check_addr(ip: IpAddr) -> Result<(), WebhookError> {
    if is_reserved(ip) {
        return Err(WebhookError::BlockedAddress(ip));
    }
    Ok(())
}

/// Loopback, RFC1918 private, link-local (unicast and multicast), and
/// unspecified ranges, for both address families. IPv4-mapped IPv6
/// addresses are checked as their IPv4 form.
fn is_reserved(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_reserved_v4(v4),
        IpAddr::V6(v6) => {
            if let Some(mapped) = v6.to_ipv4_mapped() {
                return is_reserved_v4(mapped);
            }
            is_reserved_v6(v6)
        }
    }
}

fn is_reserved_v4(ip: Ipv4Addr) -> bool {
    ip.is_loopback()
        || ip.is_private()
        || ip.is_link_local()
        || ip.is_unspecified()
        || ip.is_broadcast()
        // Link-local multicast: 224.0.0.0/24.
        || (ip.octets()[0] == 224 && ip.octets()[1] == 0 && ip.octets()[2] == 0)
}

fn is_reserved_v6(ip: Ipv6Addr) -> bool {
    let seg = ip.segments();
    ip.is_loopback()
        || ip.is_unspecified()
        // Unique local: fc00::/7.
        || (seg[0] & 0xfe00) == 0xfc00
        // Link-local unicast: fe80::/10.
        || (seg[0] & 0xffc0) == 0xfe80
        // Link-local multicast: ff02::/16.
        || seg[0] == 0xff02
}
