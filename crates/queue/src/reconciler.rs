//! Startup recovery of a persisted queue.

use std::time::Duration;

use genq_core::{JobError, JobId, Timestamp};
use genq_events::QueueEvent;

use crate::config::RecoveryMode;
use crate::manager::{JobQueueManager, Transition};
use crate::persistence::SnapshotStore;

/// Outcome of [`Reconciler::reconcile`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Jobs found in the snapshot.
    pub loaded: usize,
    /// In-flight jobs ended because their poll state did not survive.
    pub interrupted: Vec<JobId>,
    /// Queued jobs kept for dispatch.
    pub requeued: usize,
    /// Terminal jobs removed by the retention sweep.
    pub pruned: usize,
    /// Why the snapshot could not be loaded, if it could not.
    pub load_error: Option<String>,
}

/// Runs once per process start, before the poller.
///
/// Jobs that were `submitted` or `processing` are ended without a refund
/// and their upstream task is not resumed. Queued jobs stay queued with
/// their credits reserved again. Terminal jobs load unchanged and expired
/// ones are pruned.
#[derive(Debug, Clone)]
pub struct Reconciler {
    mode: RecoveryMode,
    retention: Duration,
}

impl Reconciler {
    pub fn new(mode: RecoveryMode, retention: Duration) -> Self {
        Self { mode, retention }
    }

    pub async fn reconcile(
        &self,
        store: &dyn SnapshotStore,
        key: &str,
        manager: &JobQueueManager,
        now: Timestamp,
    ) -> ReconcileReport {
        let mut report = ReconcileReport::default();

        let jobs = match store.read(key).await {
            Ok(Some(snapshot)) => snapshot.jobs,
            Ok(None) => Vec::new(),
            Err(e) => {
                tracing::error!(key, error = %e, "Queue snapshot unreadable, starting empty");
                manager.events().publish(QueueEvent::PersistenceFailed {
                    revision: 0,
                    error: e.to_string(),
                });
                report.load_error = Some(e.to_string());
                Vec::new()
            }
        };
        report.loaded = jobs.len();
        manager.hydrate(jobs);

        for job in manager.active_jobs() {
            let transition = match self.mode {
                RecoveryMode::Fail => Transition::Abandon(JobError::interrupted()),
                RecoveryMode::Interrupt => Transition::Interrupt,
            };
            match manager.transition(job.id, transition) {
                Ok(_) => report.interrupted.push(job.id),
                Err(e) => tracing::warn!(job_id = %job.id, error = %e, "Could not end interrupted job"),
            }
        }
        report.requeued = manager.restore_reservations();

        report.pruned = manager.prune_expired(now, self.retention);

        tracing::info!(
            loaded = report.loaded,
            interrupted = report.interrupted.len(),
            requeued = report.requeued,
            pruned = report.pruned,
            "Queue reconciled",
        );
        manager.events().publish(QueueEvent::Reconciled {
            interrupted: report.interrupted.len(),
            pruned: report.pruned,
        });
        report
    }
}
