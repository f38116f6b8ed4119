use std::sync::Arc;
use std::time::Duration;

use promptgate_events::WebhookDispatcher;
use promptgate_runner::ClaudeRunner;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use promptgate_api::config::ServerConfig;
use promptgate_api::engine::{cleanup, Scheduler, SchedulerConfig};
use promptgate_api::middleware::rate_limit::RateLimiter;
use promptgate_api::router::build_app_router;
use promptgate_api::state::AppState;
use promptgate_api::keepalive;

/// Window for in-flight HTTP connections to drain after shutdown begins.
const SHUTDOWN_DRAIN: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "promptgate=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = match ServerConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            tracing::error!(error = %err, "invalid configuration");
            std::process::exit(1);
        }
    };
    tracing::info!(
        listen_addr = %config.listen_addr,
        workers = config.concurrency,
        default_model = %config.default_model,
        "loaded server configuration"
    );

    // --- Store ---
    let pool = match promptgate_db::create_pool(&config.db_path).await {
        Ok(pool) => pool,
        Err(err) => {
            tracing::error!(error = %err, db_path = %config.db_path, "failed to open database");
            std::process::exit(1);
        }
    };
    if let Err(err) = promptgate_db::run_migrations(&pool).await {
        tracing::error!(error = %err, "failed to run migrations");
        std::process::exit(1);
    }
    tracing::info!(db_path = %config.db_path, "database ready");

    // --- Scheduler ---
    let runner = Arc::new(ClaudeRunner::new(config.claude_path.clone()));
    let webhooks = Arc::new(WebhookDispatcher::new());
    let scheduler = Arc::new(Scheduler::new(
        pool.clone(),
        runner,
        webhooks,
        SchedulerConfig {
            workers: config.concurrency,
            queue_capacity: config.queue_size,
            job_timeout: (config.job_timeout_minutes > 0)
                .then(|| Duration::from_secs(config.job_timeout_minutes * 60)),
            security_prompt: config.security_prompt.clone(),
        },
    ));

    // Recovery MUST finish before any worker exists; a live worker would
    // race the reset with its own status writes.
    if let Err(err) = scheduler.recover().await {
        tracing::error!(error = %err, "crash recovery failed");
        std::process::exit(1);
    }

    let shutdown = CancellationToken::new();
    scheduler.start(shutdown.clone());
    tokio::spawn(cleanup::run(
        pool.clone(),
        config.job_ttl_hours,
        config.cleanup_interval_minutes,
        shutdown.clone(),
    ));

    // --- Keepalive ---
    if config.disable_keepalive {
        tracing::info!("keepalive disabled by configuration");
    } else {
        let claude_path = config.claude_path.clone();
        tokio::spawn(async move { keepalive::start(&claude_path).await });
    }

    // --- HTTP server ---
    let rate_limiter = (config.rate_limit > 0).then(|| Arc::new(RateLimiter::new(config.rate_limit)));
    let state = AppState {
        pool: pool.clone(),
        config: Arc::new(config.clone()),
        scheduler,
        rate_limiter,
    };
    let app = build_app_router(state);

    let listener = match tokio::net::TcpListener::bind(&config.listen_addr).await {
        Ok(listener) => listener,
        Err(err) => {
            tracing::error!(error = %err, addr = %config.listen_addr, "failed to bind");
            std::process::exit(1);
        }
    };
    tracing::info!(addr = %config.listen_addr, "promptgate listening");

    let server = {
        let shutdown = shutdown.clone();
        async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
            )
            .with_graceful_shutdown(async move {
                shutdown_signal().await;
                // Stops workers, cleanup, and webhook retries; in-flight
                // child processes receive a kill.
                shutdown.cancel();
            })
            .await
        }
    };

    // Serve until the drain completes, capped at SHUTDOWN_DRAIN after the
    // signal arrives.
    tokio::select! {
        result = server => {
            if let Err(err) = result {
                tracing::error!(error = %err, "server error");
                std::process::exit(1);
            }
        }
        _ = async {
            shutdown.cancelled().await;
            tokio::time::sleep(SHUTDOWN_DRAIN).await;
        } => {
            tracing::warn!("drain window elapsed, closing remaining connections");
        }
    }

    // The store is closed last.
    pool.close().await;
    tracing::info!("graceful shutdown complete");
}

/// Wait for SIGINT (Ctrl-C) or SIGTERM so the server shuts down cleanly
/// whether stopped interactively or by a process manager.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}
