//! Server configuration loaded from `PROMPTGATE_*` environment variables.

use promptgate_core::model::validate_model;
use promptgate_core::prompt::DEFAULT_SECURITY_PROMPT;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var} must not be empty")]
    Missing { var: &'static str },

    #[error("{var}: {reason}")]
    Invalid { var: &'static str, reason: String },
}

/// Runtime configuration. All fields have defaults except the API keys.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default `0.0.0.0:8080`).
    pub listen_addr: String,
    /// Accepted `X-API-Key` values. At least one is required.
    pub api_keys: Vec<String>,
    /// Path to the Claude CLI executable.
    pub claude_path: String,
    /// Model used when a submission does not name one.
    pub default_model: String,
    /// Number of parallel workers (>= 1).
    pub concurrency: usize,
    /// SQLite database file path.
    pub db_path: String,
    /// Pending queue capacity.
    pub queue_size: usize,
    /// Guardrail prompt prepended to every job; empty when disabled.
    pub security_prompt: String,
    /// Per-job deadline in minutes, 0 = unlimited.
    pub job_timeout_minutes: u64,
    /// Allowed CORS origins; empty disables cross-origin access.
    pub cors_origins: Vec<String>,
    /// Terminal jobs older than this are deleted, 0 = keep forever.
    pub job_ttl_hours: u64,
    /// Cleanup tick interval in minutes.
    pub cleanup_interval_minutes: u64,
    /// Job submissions per second per client IP, 0 = unlimited.
    pub rate_limit: u32,
    /// Skip the tmux keepalive session at startup.
    pub disable_keepalive: bool,
}

impl ServerConfig {
    /// Load configuration from the environment.
    ///
    /// | Env var | Default |
    /// |---------|---------|
    /// | `PROMPTGATE_LISTEN_ADDR` | `0.0.0.0:8080` |
    /// | `PROMPTGATE_API_KEYS` | (required) |
    /// | `PROMPTGATE_CLAUDE_PATH` | `/usr/local/bin/claude` |
    /// | `PROMPTGATE_DEFAULT_MODEL` | `haiku` |
    /// | `PROMPTGATE_CONCURRENCY` | `1` |
    /// | `PROMPTGATE_DB_PATH` | `promptgate.db` |
    /// | `PROMPTGATE_QUEUE_SIZE` | `1000` |
    /// | `PROMPTGATE_JOB_TIMEOUT_MINUTES` | `0` (disabled) |
    /// | `PROMPTGATE_CORS_ORIGINS` | empty |
    /// | `PROMPTGATE_JOB_TTL_HOURS` | `0` (disabled) |
    /// | `PROMPTGATE_CLEANUP_INTERVAL_MINUTES` | `60` |
    /// | `PROMPTGATE_RATE_LIMIT` | `0` (disabled) |
    /// | `PROMPTGATE_UNSAFE_NO_SECURITY_PROMPT` | `false` |
    /// | `PROMPTGATE_DISABLE_KEEPALIVE` | `false` |
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_keys = split_csv(&get_env("PROMPTGATE_API_KEYS", ""));
        if api_keys.is_empty() {
            return Err(ConfigError::Missing {
                var: "PROMPTGATE_API_KEYS",
            });
        }

        let default_model = get_env("PROMPTGATE_DEFAULT_MODEL", "haiku");
        validate_model(&default_model).map_err(|e| ConfigError::Invalid {
            var: "PROMPTGATE_DEFAULT_MODEL",
            reason: e.to_string(),
        })?;

        let concurrency: usize = get_env_parse("PROMPTGATE_CONCURRENCY", 1)?;
        if concurrency < 1 {
            return Err(ConfigError::Invalid {
                var: "PROMPTGATE_CONCURRENCY",
                reason: "must be > 0".into(),
            });
        }

        let queue_size: usize = get_env_parse("PROMPTGATE_QUEUE_SIZE", 1000)?;
        if queue_size < 1 {
            return Err(ConfigError::Invalid {
                var: "PROMPTGATE_QUEUE_SIZE",
                reason: "must be > 0".into(),
            });
        }

        let job_ttl_hours: u64 = get_env_parse("PROMPTGATE_JOB_TTL_HOURS", 0)?;
        let cleanup_interval_minutes: u64 =
            get_env_parse("PROMPTGATE_CLEANUP_INTERVAL_MINUTES", 60)?;
        if job_ttl_hours > 0 && cleanup_interval_minutes < 1 {
            return Err(ConfigError::Invalid {
                var: "PROMPTGATE_CLEANUP_INTERVAL_MINUTES",
                reason: "must be >= 1 when the job TTL is enabled".into(),
            });
        }

        // WARNING: opting out hands the assistant whatever access the
        // service account has.
        let security_prompt = if get_env("PROMPTGATE_UNSAFE_NO_SECURITY_PROMPT", "false") == "true"
        {
            String::new()
        } else {
            DEFAULT_SECURITY_PROMPT.to_string()
        };

        Ok(Self {
            listen_addr: get_env("PROMPTGATE_LISTEN_ADDR", "0.0.0.0:8080"),
            api_keys,
            claude_path: get_env("PROMPTGATE_CLAUDE_PATH", "/usr/local/bin/claude"),
            default_model,
            concurrency,
            db_path: get_env("PROMPTGATE_DB_PATH", "promptgate.db"),
            queue_size,
            security_prompt,
            job_timeout_minutes: get_env_parse("PROMPTGATE_JOB_TIMEOUT_MINUTES", 0)?,
            cors_origins: split_csv(&get_env("PROMPTGATE_CORS_ORIGINS", "")),
            job_ttl_hours,
            cleanup_interval_minutes,
            rate_limit: get_env_parse("PROMPTGATE_RATE_LIMIT", 0)?,
            disable_keepalive: get_env("PROMPTGATE_DISABLE_KEEPALIVE", "false") == "true",
        })
    }
}

fn get_env(key: &str, fallback: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| fallback.to_string())
}

fn get_env_parse<T: std::str::FromStr>(
    key: &'static str,
    fallback: T,
) -> Result<T, ConfigError> {
    match std::env::var(key) {
        Err(_) => Ok(fallback),
        Ok(raw) => raw.parse().map_err(|_| ConfigError::Invalid {
            var: key,
            reason: format!("invalid value {raw:?}"),
        }),
    }
}

fn split_csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
