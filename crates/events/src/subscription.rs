//! Per-job subscription handle.

use genq_core::JobId;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Live subscription created by [`EventBus::subscribe_job`](crate::EventBus::subscribe_job).
///
/// Dropping the handle cancels the forwarding task; no callback runs
/// after [`unsubscribe`](Self::unsubscribe) returns.
pub struct Subscription {
    job_id: JobId,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl Subscription {
    pub(crate) fn new(job_id: JobId, cancel: CancellationToken, handle: JoinHandle<()>) -> Self {
        Self {
            job_id,
            cancel,
            handle: Some(handle),
        }
    }

    /// The job this subscription watches.
    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    /// Stop delivery and wait for the forwarding task to exit.
    pub async fn unsubscribe(mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }

    pub fn is_active(&self) -> bool {
        !self.cancel.is_cancelled()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
