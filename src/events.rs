//! Job lifecycle notifications.
//!
//! The dispatcher reports every transition through the [`Notifier`] trait.
//! [`EventBus`] is the in-process implementation: a `tokio::sync::broadcast`
//! channel plus a bounded ring buffer so late subscribers can catch up.
//! Delivery never blocks the caller. [`log_events`] is the subscriber the
//! `start` command runs; other sinks subscribe the same way.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use pinmonl_common::{JobId, JobState, Target};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;

/// Maximum number of events retained in the ring buffer.
const MAX_RECENT_EVENTS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobEventKind {
    Enqueued,
    Started,
    Succeeded,
    Retrying,
    Failed,
}

/// One lifecycle transition of one job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEvent {
    pub kind: JobEventKind,
    pub job_id: JobId,
    pub job_name: String,
    pub target: Target,
    pub state: JobState,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Next run time, set for `retrying` events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_at: Option<DateTime<Utc>>,
    pub timestamp: DateTime<Utc>,
}

/// Fire-and-forget sink for job lifecycle events.
pub trait Notifier: Send + Sync {
    fn notify(&self, event: JobEvent);
}

/// Broadcast channel with a bounded ring buffer of recent events.
pub struct EventBus {
    tx: broadcast::Sender<JobEvent>,
    recent: RwLock<VecDeque<JobEvent>>,
}

impl EventBus {
    /// `capacity` is the broadcast buffer size; slow subscribers that fall
    /// further behind observe a lag error rather than blocking senders.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            recent: RwLock::new(VecDeque::with_capacity(MAX_RECENT_EVENTS)),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.tx.subscribe()
    }

    /// Snapshot of the most recent events, oldest first.
    pub fn recent(&self) -> Vec<JobEvent> {
        self.recent.read().iter().cloned().collect()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl Notifier for EventBus {
    fn notify(&self, event: JobEvent) {
        {
            let mut recent = self.recent.write();
            if recent.len() >= MAX_RECENT_EVENTS {
                recent.pop_front();
            }
            recent.push_back(event.clone());
        }

        if self.tx.send(event).is_err() {
            tracing::trace!("No subscribers for job event");
        }
    }
}

/// Trace every event from `rx` until `cancel` fires or the bus goes away.
pub async fn log_events(mut rx: broadcast::Receiver<JobEvent>, cancel: CancellationToken) {
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = rx.recv() => event,
        };

        match event {
            Ok(event) => tracing::debug!(
                kind = ?event.kind,
                job_id = %event.job_id,
                name = %event.job_name,
                target = %event.target,
                attempts = event.attempts,
                error = event.error.as_deref(),
                "Job event"
            ),
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Event logger fell behind");
            }
            Err(RecvError::Closed) => break,
        }
    }
}
