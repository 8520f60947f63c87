//! Periodic removal of expired terminal jobs.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::manager::JobQueueManager;

/// How often the sweep runs.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Run the retention sweep until `cancel` is triggered.
///
/// Removes jobs that have been terminal for longer than `retention`. The
/// first sweep runs immediately.
pub async fn run(manager: Arc<JobQueueManager>, retention: Duration, cancel: CancellationToken) {
    tracing::info!(
        retention_secs = retention.as_secs(),
        interval_secs = SWEEP_INTERVAL.as_secs(),
        "Job retention sweep started"
    );

    let mut interval = tokio::time::interval(SWEEP_INTERVAL);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Job retention sweep stopping");
                break;
            }
            _ = interval.tick() => {
                let pruned = manager.prune_expired(Utc::now(), retention);
                if pruned == 0 {
                    tracing::debug!("Job retention: nothing to prune");
                }
            }
        }
    }
}
