//! In-process event bus backed by a `tokio::sync::broadcast` channel.
//!
//! [`EventBus`] is the publish/subscribe hub for [`QueueEvent`]s. It is
//! designed to be shared via `Arc<EventBus>` between the queue manager,
//! the poller and any UI-facing subscribers.

use chrono::Utc;
use genq_core::{JobId, JobStatus, Timestamp};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::subscription::Subscription;

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// A job state change or progress update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEvent {
    pub job_id: JobId,
    pub status: JobStatus,
    /// Event-specific data: progress, error, result assets.
    pub detail: serde_json::Value,
    pub timestamp: Timestamp,
}

/// Everything published on the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueueEvent {
    /// A job transitioned or reported progress.
    Job(JobEvent),

    /// A snapshot write failed. In-memory state is still authoritative.
    PersistenceFailed { revision: u64, error: String },

    /// Startup reconciliation finished.
    Reconciled { interrupted: usize, pruned: usize },
}

impl QueueEvent {
    /// The job this event concerns, if any.
    pub fn job_id(&self) -> Option<JobId> {
        match self {
            QueueEvent::Job(event) => Some(event.job_id),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 1024;

/// In-process fan-out event bus.
///
/// Delivery is at-most-once and best-effort: with no subscribers events
/// are dropped, and a subscriber that falls more than the channel
/// capacity behind skips the oldest events.
///
/// # Usage
///
/// ```rust
/// use genq_core::{JobId, JobStatus};
/// use genq_events::EventBus;
///
/// let bus = EventBus::default();
/// let mut rx = bus.subscribe();
///
/// bus.emit(JobId::new_v4(), JobStatus::Queued, serde_json::json!({}));
/// assert!(rx.try_recv().is_ok());
/// ```
pub struct EventBus {
    sender: broadcast::Sender<QueueEvent>,
}

impl EventBus {
    /// Create a bus with a specific channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all current subscribers.
    pub fn publish(&self, event: QueueEvent) {
        // Ignore the SendError; it only means there are zero receivers.
        let _ = self.sender.send(event);
    }

    /// Publish a job notification.
    pub fn emit(&self, job_id: JobId, status: JobStatus, detail: serde_json::Value) {
        self.publish(QueueEvent::Job(JobEvent {
            job_id,
            status,
            detail,
            timestamp: Utc::now(),
        }));
    }

    /// Subscribe to every event published on this bus.
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.sender.subscribe()
    }

    /// Invoke `callback` for every event about `job_id` until the returned
    /// [`Subscription`] is dropped or unsubscribed.
    ///
    /// Must be called from within a Tokio runtime. Events published after
    /// this call returns are never missed (modulo lag), because the
    /// receiver is registered before the forwarding task starts.
    pub fn subscribe_job<F>(&self, job_id: JobId, mut callback: F) -> Subscription
    where
        F: FnMut(JobEvent) + Send + 'static,
    {
        let mut receiver = self.sender.subscribe();
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    received = receiver.recv() => match received {
                        Ok(QueueEvent::Job(event)) if event.job_id == job_id => callback(event),
                        Ok(_) => {}
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(job_id = %job_id, skipped, "Job subscriber lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
        });

        Subscription::new(job_id, cancel, handle)
    }

    /// Number of live receivers.
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
