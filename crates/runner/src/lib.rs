//! Claude CLI process runner.
//!
//! Spawns the assistant CLI in non-interactive streaming mode, forwards
//! each assistant message to a [`ChunkSink`], and returns the final result
//! text. The child's environment is scrubbed of every `CLAUDE*` variable so
//! the CLI cannot detect a parent session and refuse to start; this filter
//! is a hard contract, not an optimization.

use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

pub mod stream;

use stream::{parse_line, StreamLine};

/// Receives partial output as the assistant produces it.
///
/// The runner stays free of scheduling concerns by writing through this
/// single-method seam; tests substitute a recording sink.
pub trait ChunkSink: Send + Sync {
    fn write_chunk(&self, text: &str);
}

/// A sink that discards everything.
pub struct NullSink;

impl ChunkSink for NullSink {
    fn write_chunk(&self, _text: &str) {}
}

#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    /// The run was cancelled externally (user cancel or shutdown).
    #[error("run cancelled")]
    Cancelled,

    /// The configured per-job deadline elapsed. Synthesized by the
    /// scheduler, never returned by the runner itself.
    #[error("run deadline exceeded")]
    TimedOut,

    #[error("failed to spawn {path}: {source}")]
    Spawn {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("read output stream: {0}")]
    Stream(#[from] std::io::Error),

    #[error("claude exited with {status}: {detail}")]
    Exit {
        status: std::process::ExitStatus,
        detail: String,
    },
}

/// Executes a single job against the assistant CLI.
#[async_trait::async_trait]
pub trait JobRunner: Send + Sync {
    async fn run(
        &self,
        cancel: &CancellationToken,
        model: &str,
        prompt: &str,
        system_prompt: &str,
        sink: &(dyn ChunkSink),
    ) -> Result<String, RunnerError>;
}

/// Production [`JobRunner`] backed by the real Claude CLI executable.
pub struct ClaudeRunner {
    claude_path: String,
}

impl ClaudeRunner {
    pub fn new(claude_path: impl Into<String>) -> Self {
        Self {
            claude_path: claude_path.into(),
        }
    }

    fn build_command(&self, model: &str, prompt: &str, system_prompt: &str) -> Command {
        let mut cmd = Command::new(&self.claude_path);
        cmd.arg("--print")
            // --verbose is required by the CLI to enable stream-json.
            .arg("--verbose")
            .arg("--model")
            .arg(model)
            .arg("--output-format")
            .arg("stream-json")
            .arg("--dangerously-skip-permissions");
        if !system_prompt.is_empty() {
            cmd.arg("--system-prompt").arg(system_prompt);
        }
        cmd.arg(prompt);

        cmd.env_clear()
            .envs(filtered_env())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // Backstop: if this future is dropped (deadline elapsed), the
            // child must not outlive it.
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait::async_trait]
impl JobRunner for ClaudeRunner {
    async fn run(
        &self,
        cancel: &CancellationToken,
        model: &str,
        prompt: &str,
        system_prompt: &str,
        sink: &(dyn ChunkSink),
    ) -> Result<String, RunnerError> {
        let mut child = self
            .build_command(model, prompt, system_prompt)
            .spawn()
            .map_err(|source| RunnerError::Spawn {
                path: self.claude_path.clone(),
                source,
            })?;

        let stdout = child.stdout.take().expect("stdout is piped");
        let mut stderr = child.stderr.take().expect("stderr is piped");

        // Drain stderr concurrently so the child never blocks on a full pipe.
        let stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            let _ = stderr.read_to_string(&mut buf).await;
            buf
        });

        let mut lines = BufReader::new(stdout).lines();
        let mut final_result = String::new();

        loop {
            let line = tokio::select! {
                _ = cancel.cancelled() => {
                    let _ = child.start_kill();
                    let _ = child.wait().await;
                    return Err(RunnerError::Cancelled);
                }
                line = lines.next_line() => line?,
            };
            let Some(line) = line else { break };
            if line.is_empty() {
                continue;
            }

            match parse_line(&line) {
                Some(StreamLine::Assistant(text)) if !text.is_empty() => {
                    sink.write_chunk(&text);
                }
                Some(StreamLine::FinalResult(result)) => final_result = result,
                _ => {}
            }
        }

        let status = tokio::select! {
            _ = cancel.cancelled() => {
                let _ = child.start_kill();
                let _ = child.wait().await;
                return Err(RunnerError::Cancelled);
            }
            status = child.wait() => status?,
        };

        if !status.success() {
            // The CLI often reports errors in the stdout JSON stream rather
            // than stderr; prefer stderr, fall back to the last result
            // payload (authentication failures land there).
            let mut detail = stderr_task.await.unwrap_or_default().trim().to_string();
            if detail.is_empty() {
                detail = final_result;
            }
            return Err(RunnerError::Exit { status, detail });
        }

        Ok(final_result)
    }
}

/// Current environment minus every variable whose name starts with
/// `CLAUDE`. The assistant refuses nested sessions when it sees its own
/// configuration namespace.
fn filtered_env() -> Vec<(String, String)> {
    std::env::vars()
        .filter(|(name, _)| !name.starts_with("CLAUDE"))
        .collect()
}
