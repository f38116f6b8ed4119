//! OAuth token keepalive.
//!
//! The Claude CLI refreshes its OAuth token (~8h expiry) only while an
//! interactive session is running, so the gateway keeps one alive in a
//! detached tmux session. Everything here fails soft: a missing tmux or an
//! already-running session is logged and ignored.

use tokio::process::Command;

const KEEPALIVE_SESSION: &str = "claude-keepalive";

/// Start the keepalive tmux session if tmux is available and no session
/// with our name exists yet.
pub async fn start(claude_path: &str) {
    let tmux_present = Command::new("tmux")
        .arg("-V")
        .output()
        .await
        .map(|out| out.status.success())
        .unwrap_or(false);
    if !tmux_present {
        tracing::warn!("keepalive: tmux not found, token auto-refresh disabled");
        return;
    }

    // Session already exists (e.g. service restart), nothing to do.
    let exists = Command::new("tmux")
        .args(["has-session", "-t", KEEPALIVE_SESSION])
        .output()
        .await
        .map(|out| out.status.success())
        .unwrap_or(false);
    if exists {
        tracing::info!(session = KEEPALIVE_SESSION, "keepalive: session already running");
        return;
    }

    match Command::new("tmux")
        .args(["new-session", "-d", "-s", KEEPALIVE_SESSION, claude_path])
        .output()
        .await
    {
        Ok(out) if out.status.success() => {
            tracing::info!(session = KEEPALIVE_SESSION, "keepalive: started tmux session");
        }
        Ok(out) => {
            tracing::warn!(
                status = %out.status,
                "keepalive: failed to start session"
            );
        }
        Err(err) => {
            tracing::warn!(error = %err, "keepalive: failed to start session");
        }
    }
}
