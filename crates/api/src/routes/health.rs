//! Health endpoint, exempt from authentication.
//!
//! Besides liveness, it reports whether the shared Claude OAuth token is
//! still valid so operators can catch an expiring subscription before
//! workers start failing. The token state is read from the CLI's own
//! credentials file on each request.

use axum::Json;
use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;

/// GET /api/v1/health response payload.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub claude_auth: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_expires_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_expires_in: Option<String>,
}

pub async fn health_check() -> Json<HealthResponse> {
    let mut response = HealthResponse {
        status: "ok",
        claude_auth: "unknown",
        token_expires_at: None,
        token_expires_in: None,
    };

    if let Some(expires_at) = read_token_expiry().await {
        let now = Utc::now();
        response.token_expires_at = Some(expires_at.to_rfc3339());
        if expires_at > now {
            response.claude_auth = "valid";
            response.token_expires_in = Some(format_duration((expires_at - now).num_seconds()));
        } else {
            response.claude_auth = "expired";
            response.token_expires_in = Some(format_duration((now - expires_at).num_seconds()));
        }
    }

    Json(response)
}

/// Expiry timestamp from `~/.claude/.credentials.json`, if readable.
async fn read_token_expiry() -> Option<DateTime<Utc>> {
    let home = std::env::var_os("HOME")?;
    let path = std::path::Path::new(&home)
        .join(".claude")
        .join(".credentials.json");
    let data = tokio::fs::read(path).await.ok()?;

    #[derive(serde::Deserialize)]
    struct Credentials {
        #[serde(rename = "claudeAiOauth")]
        oauth: Oauth,
    }
    #[derive(serde::Deserialize)]
    struct Oauth {
        #[serde(rename = "expiresAt")]
        expires_at_ms: i64,
    }

    let creds: Credentials = serde_json::from_slice(&data).ok()?;
    if creds.oauth.expires_at_ms <= 0 {
        return None;
    }
    Utc.timestamp_millis_opt(creds.oauth.expires_at_ms).single()
}

/// `"1h23m45s"`-style rendering of a second count.
fn format_duration(total_secs: i64) -> String {
    let total_secs = total_secs.max(0);
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    if hours > 0 {
        format!("{hours}h{minutes}m{seconds}s")
    } else if minutes > 0 {
        format!("{minutes}m{seconds}s")
    } else {
        format!("{seconds}s")
    }
}
