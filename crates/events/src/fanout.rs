//! Per-job multicast of progress events.
//!
//! A registry from job id to a set of bounded sinks. Sends never block:
//! a full sink (slow consumer) drops the event for that consumer only.
//!
//! Locking discipline: `notify` holds the read lock for the entire
//! iteration, and `notify_and_close` removes the job's entry under the
//! write lock before touching any sink. A sink can therefore never be
//! reached through the registry after its job has been closed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use tokio::sync::mpsc;

/// Sink capacity per subscriber. Events beyond this backlog are dropped
/// for that subscriber.
const SINK_CAPACITY: usize = 64;

/// Kind tag of a job event, also used as the SSE event name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Status,
    Chunk,
    Result,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Status => "status",
            Self::Chunk => "chunk",
            Self::Result => "result",
        }
    }
}

/// One progress event with its JSON payload.
#[derive(Debug, Clone)]
pub struct JobEvent {
    pub kind: EventKind,
    pub data: serde_json::Value,
}

impl JobEvent {
    pub fn new(kind: EventKind, data: serde_json::Value) -> Self {
        Self { kind, data }
    }
}

struct Slot {
    id: u64,
    tx: mpsc::Sender<JobEvent>,
}

/// Registry from job id to live subscriber sinks.
#[derive(Default)]
pub struct Fanout {
    subscribers: RwLock<HashMap<String, Vec<Slot>>>,
    next_id: AtomicU64,
}

impl Fanout {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscriber for `job_id`. The returned subscription
    /// unregisters itself on drop.
    pub fn subscribe(self: &Arc<Self>, job_id: &str) -> Subscription {
        let (tx, rx) = mpsc::channel(SINK_CAPACITY);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let mut subs = self.subscribers.write().expect("fanout lock poisoned");
        subs.entry(job_id.to_string())
            .or_default()
            .push(Slot { id, tx });

        Subscription {
            fanout: Arc::clone(self),
            job_id: job_id.to_string(),
            id,
            rx,
        }
    }

    /// Send `event` to every subscriber of `job_id` without blocking.
    /// Slow consumers miss the event; others are unaffected.
    pub fn notify(&self, job_id: &str, event: JobEvent) {
        let subs = self.subscribers.read().expect("fanout lock poisoned");
        let Some(slots) = subs.get(job_id) else { return };
        for slot in slots {
            let _ = slot.tx.try_send(event.clone());
        }
    }

    /// Send one final event, then end the stream for every subscriber of
    /// `job_id`. The registry entry is removed before any sink is touched,
    /// so a concurrent [`notify`](Self::notify) can no longer reach them.
    pub fn notify_and_close(&self, job_id: &str, event: JobEvent) {
        let slots = {
            let mut subs = self.subscribers.write().expect("fanout lock poisoned");
            subs.remove(job_id).unwrap_or_default()
        };
        for slot in slots {
            let _ = slot.tx.try_send(event.clone());
            // Dropping the sender closes the stream; the subscriber drains
            // any buffered events and then sees end-of-stream.
            drop(slot.tx);
        }
    }

    /// Number of live subscribers for a job.
    pub fn subscriber_count(&self, job_id: &str) -> usize {
        self.subscribers
            .read()
            .expect("fanout lock poisoned")
            .get(job_id)
            .map_or(0, Vec::len)
    }

    fn unsubscribe(&self, job_id: &str, sub_id: u64) {
        let mut subs = self.subscribers.write().expect("fanout lock poisoned");
        if let Some(slots) = subs.get_mut(job_id) {
            slots.retain(|s| s.id != sub_id);
            if slots.is_empty() {
                subs.remove(job_id);
            }
        }
    }
}

/// A live event stream for one job. Dropping it unregisters the sink.
pub struct Subscription {
    fanout: Arc<Fanout>,
    job_id: String,
    id: u64,
    rx: mpsc::Receiver<JobEvent>,
}

impl Subscription {
    /// Next event, or `None` once the job's stream has been closed.
    pub async fn recv(&mut self) -> Option<JobEvent> {
        self.rx.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.fanout.unsubscribe(&self.job_id, self.id);
    }
}
