//! Bounded job queue and worker pool.
//!
//! Submissions are persisted first and enqueued second, so a full queue
//! only loses the in-memory send: the durably `queued` record is picked up
//! by [`Scheduler::recover`] on the next startup. Workers re-check the
//! stored status on dequeue, which is how a cancel issued while a job sat
//! in the queue is honoured without ever spawning the assistant.
//!
//! Cancellation composes as a tree: the process shutdown token parents
//! every per-job token, and an optional deadline wraps the run without
//! affecting either parent.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use promptgate_core::model::RESPONSE_FORMAT_JSON;
use promptgate_core::prompt::compose_system_prompt;
use promptgate_core::status::JobStatus;
use promptgate_core::text::strip_code_fences;
use promptgate_db::repositories::JobRepo;
use promptgate_db::DbPool;
use promptgate_events::{EventKind, Fanout, JobEvent, Subscription, WebhookDispatcher, WebhookPayload};
use promptgate_runner::{ChunkSink, JobRunner, RunnerError};
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Returned by [`Scheduler::enqueue`] when the pending queue cannot accept
/// the job. Callers translate this into HTTP 503 and must not retry
/// synchronously.
#[derive(Debug, thiserror::Error)]
pub enum EnqueueError {
    #[error("queue full")]
    Full,

    #[error("scheduler stopped")]
    Closed,
}

/// Tunables for the scheduler, taken from server configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Number of parallel workers.
    pub workers: usize,
    /// Pending queue capacity.
    pub queue_capacity: usize,
    /// Per-job deadline; `None` disables the timeout.
    pub job_timeout: Option<Duration>,
    /// Guardrail prompt prepended to every job (may be empty).
    pub security_prompt: String,
}

/// The dispatch queue, worker pool, and live-event plumbing for jobs.
pub struct Scheduler {
    pool: DbPool,
    config: SchedulerConfig,
    runner: Arc<dyn JobRunner>,
    webhooks: Arc<WebhookDispatcher>,
    fanout: Arc<Fanout>,
    tx: mpsc::Sender<String>,
    rx: Mutex<Option<mpsc::Receiver<String>>>,
    cancels: Mutex<HashMap<String, CancellationToken>>,
}

impl Scheduler {
    pub fn new(
        pool: DbPool,
        runner: Arc<dyn JobRunner>,
        webhooks: Arc<WebhookDispatcher>,
        config: SchedulerConfig,
    ) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_capacity);
        Self {
            pool,
            config,
            runner,
            webhooks,
            fanout: Arc::new(Fanout::new()),
            tx,
            rx: Mutex::new(Some(rx)),
            cancels: Mutex::new(HashMap::new()),
        }
    }

    /// Hand a persisted job id to the worker pool. Non-blocking.
    pub fn enqueue(&self, job_id: &str) -> Result<(), EnqueueError> {
        self.tx
            .try_send(job_id.to_string())
            .map_err(|err| match err {
                mpsc::error::TrySendError::Full(_) => EnqueueError::Full,
                mpsc::error::TrySendError::Closed(_) => EnqueueError::Closed,
            })
    }

    /// Cancel a job currently held by a worker. Returns whether a running
    /// job was found; the caller has already written the cancelled status
    /// for queued jobs, which workers honour on dequeue.
    pub fn cancel(&self, job_id: &str) -> bool {
        let cancels = self.cancels.lock().expect("cancel map lock poisoned");
        match cancels.get(job_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Open a live event stream for a job.
    pub fn subscribe(&self, job_id: &str) -> Subscription {
        self.fanout.subscribe(job_id)
    }

    /// Re-enqueue jobs a previous process left in `processing`.
    ///
    /// MUST complete before [`Scheduler::start`]: while the reset runs, no
    /// worker may be alive to race it with its own status writes. A
    /// re-enqueue that fails on a full queue is logged and dropped; the job
    /// stays durably `queued` for the next boot.
    pub async fn recover(&self) -> Result<usize, sqlx::Error> {
        let ids = JobRepo::reset_processing(&self.pool).await?;
        let mut requeued = 0;
        for id in &ids {
            match self.enqueue(id) {
                Ok(()) => requeued += 1,
                Err(err) => {
                    tracing::error!(job_id = %id, error = %err, "recovery: failed to re-enqueue job");
                }
            }
        }
        if requeued > 0 {
            tracing::info!(count = requeued, "recovery: re-enqueued interrupted jobs");
        }
        Ok(requeued)
    }

    /// Spawn the worker pool. Workers run until `shutdown` fires.
    pub fn start(self: &Arc<Self>, shutdown: CancellationToken) {
        let rx = self
            .rx
            .lock()
            .expect("queue receiver lock poisoned")
            .take()
            .expect("scheduler started twice");
        let rx = Arc::new(tokio::sync::Mutex::new(rx));

        for worker_id in 0..self.config.workers {
            let scheduler = Arc::clone(self);
            let rx = Arc::clone(&rx);
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                tracing::debug!(worker_id, "worker started");
                loop {
                    let job_id = {
                        let mut rx = rx.lock().await;
                        tokio::select! {
                            _ = shutdown.cancelled() => None,
                            id = rx.recv() => id,
                        }
                    };
                    let Some(job_id) = job_id else { break };
                    scheduler.process_job(&shutdown, &job_id).await;
                }
                tracing::debug!(worker_id, "worker stopped");
            });
        }
    }

    /// Execute one dequeued job end to end.
    async fn process_job(&self, shutdown: &CancellationToken, job_id: &str) {
        let job = match JobRepo::find_by_id(&self.pool, job_id).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                tracing::warn!(job_id, "worker: job not found");
                return;
            }
            Err(err) => {
                tracing::error!(job_id, error = %err, "worker: failed to load job");
                return;
            }
        };

        // Cancelled while queued: skip without touching the record.
        if job.status == JobStatus::Cancelled {
            tracing::info!(job_id, "worker: job already cancelled, skipping");
            return;
        }

        if let Err(err) = JobRepo::mark_processing(&self.pool, job_id).await {
            tracing::error!(job_id, error = %err, "worker: failed to mark processing");
            return;
        }
        self.fanout.notify(
            job_id,
            JobEvent::new(EventKind::Status, json!({ "status": JobStatus::Processing })),
        );

        let job_token = shutdown.child_token();
        self.cancels
            .lock()
            .expect("cancel map lock poisoned")
            .insert(job_id.to_string(), job_token.clone());

        let system_prompt = compose_system_prompt(
            &self.config.security_prompt,
            &job.response_format,
            &job.system_prompt,
        );
        let sink = FanoutSink {
            fanout: Arc::clone(&self.fanout),
            job_id: job_id.to_string(),
        };

        let run = self
            .runner
            .run(&job_token, &job.model, &job.prompt, &system_prompt, &sink);
        let outcome = match self.config.job_timeout {
            // On an elapsed deadline the run future is dropped, which
            // reaps the child process.
            Some(deadline) => match tokio::time::timeout(deadline, run).await {
                Ok(result) => result,
                Err(_) => Err(RunnerError::TimedOut),
            },
            None => run.await,
        };

        self.cancels
            .lock()
            .expect("cancel map lock poisoned")
            .remove(job_id);

        let (status, result, error_msg) = match outcome {
            Ok(text) => {
                let text = if job.response_format == RESPONSE_FORMAT_JSON {
                    strip_code_fences(&text)
                } else {
                    text
                };
                (JobStatus::Completed, text, String::new())
            }
            Err(RunnerError::Cancelled) => (
                JobStatus::Cancelled,
                String::new(),
                "job cancelled by user".to_string(),
            ),
            Err(RunnerError::TimedOut) => (
                JobStatus::Failed,
                String::new(),
                format!("job timed out after {}m", self.timeout_minutes()),
            ),
            Err(err) => (JobStatus::Failed, String::new(), err.to_string()),
        };

        self.finalize(shutdown, job_id, status, result, error_msg, &job.callback_url)
            .await;
    }

    /// Persist the terminal state, close the event stream, and kick off
    /// webhook delivery.
    async fn finalize(
        &self,
        shutdown: &CancellationToken,
        job_id: &str,
        status: JobStatus,
        result: String,
        error_msg: String,
        callback_url: &str,
    ) {
        if let Err(err) =
            JobRepo::update_status(&self.pool, job_id, status, &result, &error_msg).await
        {
            tracing::error!(job_id, error = %err, "worker: failed to store terminal status");
        }

        self.fanout.notify_and_close(
            job_id,
            JobEvent::new(
                EventKind::Result,
                json!({ "status": status, "result": result, "error": error_msg }),
            ),
        );

        if !callback_url.is_empty() {
            // The shutdown token, not the job token: delivery survives a
            // user cancel but stops when the process exits.
            self.webhooks
                .send(
                    shutdown.clone(),
                    callback_url,
                    WebhookPayload {
                        job_id: job_id.to_string(),
                        status: status.to_string(),
                        result,
                        error: error_msg,
                    },
                )
                .await;
        }

        tracing::info!(job_id, status = %status, "worker: job finished");
    }

    fn timeout_minutes(&self) -> u64 {
        self.config
            .job_timeout
            .map_or(0, |d| d.as_secs() / 60)
    }
}

/// Forwards runner chunks to SSE subscribers as `chunk` events.
struct FanoutSink {
    fanout: Arc<Fanout>,
    job_id: String,
}

impl ChunkSink for FanoutSink {
    fn write_chunk(&self, text: &str) {
        self.fanout.notify(
            &self.job_id,
            JobEvent::new(EventKind::Chunk, json!({ "text": text })),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use promptgate_db::models::{CreateJobRequest, Job};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Configurable stand-in for the Claude CLI.
    struct FakeRunner {
        runs: AtomicUsize,
        behaviour: Behaviour,
    }

    enum Behaviour {
        /// Emit one chunk, then succeed with the given text.
        Succeed(String),
        /// Block until cancelled.
        BlockUntilCancelled,
        /// Fail with an exit-style error message.
        Fail(String),
    }

    impl FakeRunner {
        fn new(behaviour: Behaviour) -> Arc<Self> {
            Arc::new(Self {
                runs: AtomicUsize::new(0),
                behaviour,
            })
        }

        fn run_count(&self) -> usize {
            self.runs.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl JobRunner for FakeRunner {
        async fn run(
            &self,
            cancel: &CancellationToken,
            _model: &str,
            _prompt: &str,
            _system_prompt: &str,
            sink: &(dyn ChunkSink),
        ) -> Result<String, RunnerError> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            match &self.behaviour {
                Behaviour::Succeed(text) => {
                    sink.write_chunk(text);
                    Ok(text.clone())
                }
                Behaviour::BlockUntilCancelled => {
                    cancel.cancelled().await;
                    Err(RunnerError::Cancelled)
                }
                Behaviour::Fail(msg) => {
                    use std::os::unix::process::ExitStatusExt;
                    Err(RunnerError::Exit {
                        status: std::process::ExitStatus::from_raw(1 << 8),
                        detail: msg.clone(),
                    })
                }
            }
        }
    }

    fn test_config() -> SchedulerConfig {
        SchedulerConfig {
            workers: 2,
            queue_capacity: 16,
            job_timeout: None,
            security_prompt: String::new(),
        }
    }

    async fn scheduler_with(
        runner: Arc<FakeRunner>,
        config: SchedulerConfig,
    ) -> (Arc<Scheduler>, DbPool) {
        let pool = promptgate_db::memory_pool().await.unwrap();
        let scheduler = Arc::new(Scheduler::new(
            pool.clone(),
            runner,
            Arc::new(WebhookDispatcher::new()),
            config,
        ));
        (scheduler, pool)
    }

    async fn insert_job(pool: &DbPool, response_format: &str) -> Job {
        let job = Job::from_request(CreateJobRequest {
            prompt: "hello".into(),
            model: "haiku".into(),
            response_format: response_format.into(),
            ..Default::default()
        });
        JobRepo::create(pool, &job).await.unwrap();
        job
    }

    async fn wait_for_terminal(pool: &DbPool, id: &str) -> Job {
        for _ in 0..200 {
            let job = JobRepo::find_by_id(pool, id).await.unwrap().unwrap();
            if job.status.is_terminal() {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {id} never reached a terminal status");
    }

    #[tokio::test]
    async fn job_completes_and_subscribers_see_the_full_event_sequence() {
        let runner = FakeRunner::new(Behaviour::Succeed("Hi".into()));
        let (scheduler, pool) = scheduler_with(Arc::clone(&runner), test_config()).await;
        let job = insert_job(&pool, "").await;

        let mut sub = scheduler.subscribe(&job.id);
        scheduler.enqueue(&job.id).unwrap();

        let shutdown = CancellationToken::new();
        scheduler.start(shutdown.clone());

        let stored = wait_for_terminal(&pool, &job.id).await;
        assert_eq!(stored.status, JobStatus::Completed);
        assert_eq!(stored.result, "Hi");
        assert!(stored.started_at.is_some());
        assert!(stored.completed_at.is_some());
        assert_eq!(runner.run_count(), 1);

        // status(processing) -> chunk -> result, then end-of-stream.
        let first = sub.recv().await.unwrap();
        assert_eq!(first.kind, EventKind::Status);
        assert_eq!(first.data["status"], "processing");
        let second = sub.recv().await.unwrap();
        assert_eq!(second.kind, EventKind::Chunk);
        assert_eq!(second.data["text"], "Hi");
        let third = sub.recv().await.unwrap();
        assert_eq!(third.kind, EventKind::Result);
        assert_eq!(third.data["status"], "completed");
        assert_eq!(third.data["result"], "Hi");
        assert!(sub.recv().await.is_none());

        shutdown.cancel();
    }

    #[tokio::test]
    async fn cancelled_while_queued_is_skipped_without_running() {
        let runner = FakeRunner::new(Behaviour::Succeed("never".into()));
        let (scheduler, pool) = scheduler_with(Arc::clone(&runner), test_config()).await;
        let job = insert_job(&pool, "").await;

        scheduler.enqueue(&job.id).unwrap();
        // The cancel handler writes the status before workers exist.
        JobRepo::update_status(&pool, &job.id, JobStatus::Cancelled, "", "job cancelled by user")
            .await
            .unwrap();

        let shutdown = CancellationToken::new();
        scheduler.start(shutdown.clone());
        tokio::time::sleep(Duration::from_millis(100)).await;

        let stored = JobRepo::find_by_id(&pool, &job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Cancelled);
        assert!(stored.started_at.is_none(), "mark_processing must not run");
        assert_eq!(runner.run_count(), 0, "the assistant must never be spawned");

        shutdown.cancel();
    }

    #[tokio::test]
    async fn cancel_during_execution_yields_cancelled_status() {
        let runner = FakeRunner::new(Behaviour::BlockUntilCancelled);
        let (scheduler, pool) = scheduler_with(Arc::clone(&runner), test_config()).await;
        let job = insert_job(&pool, "").await;

        scheduler.enqueue(&job.id).unwrap();
        let shutdown = CancellationToken::new();
        scheduler.start(shutdown.clone());

        // Wait for the worker to pick the job up, then cancel it.
        for _ in 0..100 {
            if scheduler.cancel(&job.id) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let stored = wait_for_terminal(&pool, &job.id).await;
        assert_eq!(stored.status, JobStatus::Cancelled);
        assert_eq!(stored.error, "job cancelled by user");

        shutdown.cancel();
    }

    #[tokio::test]
    async fn deadline_elapse_fails_the_job() {
        let runner = FakeRunner::new(Behaviour::BlockUntilCancelled);
        let mut config = test_config();
        config.job_timeout = Some(Duration::from_millis(50));
        let (scheduler, pool) = scheduler_with(Arc::clone(&runner), config).await;
        let job = insert_job(&pool, "").await;

        scheduler.enqueue(&job.id).unwrap();
        let shutdown = CancellationToken::new();
        scheduler.start(shutdown.clone());

        let stored = wait_for_terminal(&pool, &job.id).await;
        assert_eq!(stored.status, JobStatus::Failed);
        assert!(stored.error.contains("timed out"));

        shutdown.cancel();
    }

    #[tokio::test]
    async fn runner_failure_is_recorded_on_the_job() {
        let runner = FakeRunner::new(Behaviour::Fail("claude exploded".into()));
        let (scheduler, pool) = scheduler_with(Arc::clone(&runner), test_config()).await;
        let job = insert_job(&pool, "").await;

        scheduler.enqueue(&job.id).unwrap();
        let shutdown = CancellationToken::new();
        scheduler.start(shutdown.clone());

        let stored = wait_for_terminal(&pool, &job.id).await;
        assert_eq!(stored.status, JobStatus::Failed);
        assert!(stored.error.contains("claude exploded"));

        shutdown.cancel();
    }

    #[tokio::test]
    async fn json_mode_strips_code_fences_from_the_result() {
        let runner = FakeRunner::new(Behaviour::Succeed("```json\n{\"a\":1}\n```".into()));
        let (scheduler, pool) = scheduler_with(Arc::clone(&runner), test_config()).await;
        let job = insert_job(&pool, "json").await;

        scheduler.enqueue(&job.id).unwrap();
        let shutdown = CancellationToken::new();
        scheduler.start(shutdown.clone());

        let stored = wait_for_terminal(&pool, &job.id).await;
        assert_eq!(stored.status, JobStatus::Completed);
        assert_eq!(stored.result, "{\"a\":1}");

        shutdown.cancel();
    }

    #[tokio::test]
    async fn queue_overflow_returns_the_full_sentinel() {
        let runner = FakeRunner::new(Behaviour::Succeed("x".into()));
        let mut config = test_config();
        config.queue_capacity = 2;
        let (scheduler, _pool) = scheduler_with(runner, config).await;

        scheduler.enqueue("a").unwrap();
        scheduler.enqueue("b").unwrap();
        assert!(matches!(scheduler.enqueue("c"), Err(EnqueueError::Full)));
    }

    #[tokio::test]
    async fn recovery_requeues_interrupted_jobs_before_workers_start() {
        let runner = FakeRunner::new(Behaviour::Succeed("done".into()));
        let (scheduler, pool) = scheduler_with(Arc::clone(&runner), test_config()).await;

        // Simulate a crash: the job was marked processing and the process
        // died before finishing.
        let job = insert_job(&pool, "").await;
        JobRepo::mark_processing(&pool, &job.id).await.unwrap();

        let requeued = scheduler.recover().await.unwrap();
        assert_eq!(requeued, 1);

        let shutdown = CancellationToken::new();
        scheduler.start(shutdown.clone());

        let stored = wait_for_terminal(&pool, &job.id).await;
        assert_eq!(stored.status, JobStatus::Completed);
        assert_eq!(stored.result, "done");
        assert_eq!(runner.run_count(), 1);

        shutdown.cancel();
    }

    #[tokio::test]
    async fn cancel_on_an_unknown_job_reports_not_found() {
        let runner = FakeRunner::new(Behaviour::Succeed("x".into()));
        let (scheduler, _pool) = scheduler_with(runner, test_config()).await;
        assert!(!scheduler.cancel("missing"));
    }
}
