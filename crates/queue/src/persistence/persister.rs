use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use genq_events::QueueEvent;
use genq_providers::BackoffConfig;
use tokio_util::sync::CancellationToken;

use super::store::{PersistenceError, SnapshotStore};
use crate::manager::JobQueueManager;

/// Shortest wait before rewriting after a failed write.
const MIN_RETRY_DELAY: Duration = Duration::from_secs(1);
const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Writes queue snapshots after mutations.
///
/// Every accepted mutation bumps the manager's revision. [`run`](Self::run)
/// waits for a bump, lets further mutations coalesce for the debounce
/// window, then writes the latest snapshot. Writes are serialized, so an
/// older revision is never written after a newer one. Failures are
/// reported and retried with backoff even when no further mutation
/// arrives. In-memory state stays authoritative.
pub struct Persister {
    manager: Arc<JobQueueManager>,
    store: Arc<dyn SnapshotStore>,
    key: String,
    debounce: Duration,
    retry: BackoffConfig,
    written: AtomicU64,
    write_lock: tokio::sync::Mutex<()>,
}

impl Persister {
    pub fn new(
        manager: Arc<JobQueueManager>,
        store: Arc<dyn SnapshotStore>,
        key: impl Into<String>,
        debounce: Duration,
    ) -> Self {
        Self {
            manager,
            store,
            key: key.into(),
            debounce,
            retry: BackoffConfig {
                initial_delay: debounce.max(MIN_RETRY_DELAY),
                max_delay: MAX_RETRY_DELAY,
                multiplier: 2.0,
            },
            written: AtomicU64::new(0),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Last revision successfully written.
    pub fn written_revision(&self) -> u64 {
        self.written.load(Ordering::SeqCst)
    }

    /// Run the debounce loop until `cancel` fires, then flush once more.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut revisions = self.manager.watch_revision();
        tracing::info!(
            key = %self.key,
            debounce_ms = self.debounce.as_millis() as u64,
            "Snapshot persister started",
        );

        // Mutations made before the receiver existed.
        let mut failures = u32::from(self.flush().await.is_err());

        loop {
            // After a failed write, wake up to retry even if nothing changes.
            let retry_in = (failures > 0).then(|| self.retry.delay_for_attempt(failures));
            tokio::select! {
                _ = cancel.cancelled() => break,
                changed = revisions.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = tokio::time::sleep(retry_in.unwrap_or_default()), if retry_in.is_some() => {
                    tracing::info!(attempt = failures, "Retrying queue snapshot write");
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.debounce) => {}
            }
            revisions.borrow_and_update();
            failures = match self.flush().await {
                Ok(_) => 0,
                Err(_) => failures.saturating_add(1),
            };
        }

        let _ = self.flush().await;
        tracing::info!(key = %self.key, "Snapshot persister stopped");
    }

    /// Write the current snapshot now if it is newer than the last write.
    ///
    /// Returns the written revision, or `None` when nothing changed.
    pub async fn flush(&self) -> Result<Option<u64>, PersistenceError> {
        let _guard = self.write_lock.lock().await;

        let snapshot = self.manager.snapshot();
        if snapshot.revision <= self.written.load(Ordering::SeqCst) {
            return Ok(None);
        }

        match self.store.write(&self.key, &snapshot).await {
            Ok(()) => {
                self.written.store(snapshot.revision, Ordering::SeqCst);
                tracing::debug!(
                    revision = snapshot.revision,
                    jobs = snapshot.jobs.len(),
                    "Queue snapshot written",
                );
                Ok(Some(snapshot.revision))
            }
            Err(e) => {
                tracing::error!(revision = snapshot.revision, error = %e, "Queue snapshot write failed");
                self.manager.events().publish(QueueEvent::PersistenceFailed {
                    revision: snapshot.revision,
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }
}
