//! Timer-driven status poller.
//!
//! Each tick enforces timeouts, polls the in-flight jobs that are due and
//! then submits queued jobs into free concurrency slots. Ticks never
//! overlap, so a job has at most one outstanding poll.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::stream::{self, StreamExt};
use genq_core::{CoreError, GenerationJob, JobError, JobErrorKind, JobFilter, JobId, JobStatus};
use genq_providers::{BackoffConfig, Phase, PollStatus, ProviderError};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::QueueConfig;
use crate::manager::{JobQueueManager, Transition};
use crate::materializer::ResultMaterializer;

/// Poller tuning, usually taken from [`QueueConfig`].
#[derive(Debug, Clone)]
pub struct PollerConfig {
    pub poll_interval: Duration,
    /// Upper bound on poll calls outstanding at once.
    pub max_concurrent_polls: usize,
    /// Transient errors tolerated per job before it fails.
    pub max_retries: u32,
    /// Time allowed between submission and a terminal status.
    pub max_wait: Duration,
    pub backoff: BackoffConfig,
}

impl From<&QueueConfig> for PollerConfig {
    fn from(config: &QueueConfig) -> Self {
        Self {
            poll_interval: config.poll_interval,
            max_concurrent_polls: config.max_concurrent_polls.max(1),
            max_retries: config.max_poll_retries,
            max_wait: config.max_wait,
            backoff: config.backoff.clone(),
        }
    }
}

/// Counters for one [`StatusPoller::tick`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Queued jobs handed to their provider.
    pub dispatched: usize,
    /// Status polls issued.
    pub polled: usize,
    pub timed_out: usize,
}

/// Poll bookkeeping that lives only as long as the process.
#[derive(Debug, Clone, Copy)]
struct PollTracking {
    submitted_at: Instant,
    next_poll_at: Instant,
    consecutive_failures: u32,
}

impl PollTracking {
    fn starting(now: Instant) -> Self {
        Self {
            submitted_at: now,
            next_poll_at: now,
            consecutive_failures: 0,
        }
    }
}

/// Advances in-flight jobs through their providers.
pub struct StatusPoller {
    manager: Arc<JobQueueManager>,
    materializer: Arc<ResultMaterializer>,
    config: PollerConfig,
    tracking: Mutex<HashMap<JobId, PollTracking>>,
}

impl StatusPoller {
    pub fn new(
        manager: Arc<JobQueueManager>,
        materializer: Arc<ResultMaterializer>,
        config: PollerConfig,
    ) -> Self {
        Self {
            manager,
            materializer,
            config,
            tracking: Mutex::new(HashMap::new()),
        }
    }

    fn tracking(&self) -> MutexGuard<'_, HashMap<JobId, PollTracking>> {
        self.tracking.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run the poll loop until the cancellation token is triggered.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            max_concurrent_polls = self.config.max_concurrent_polls,
            "Status poller started",
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Status poller shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let report = self.tick().await;
                    if report != TickReport::default() {
                        tracing::debug!(
                            dispatched = report.dispatched,
                            polled = report.polled,
                            timed_out = report.timed_out,
                            "Poll cycle finished",
                        );
                    }
                }
            }
        }
    }

    /// One poll cycle.
    pub async fn tick(&self) -> TickReport {
        let mut report = TickReport::default();
        let now = Instant::now();

        let mut due = Vec::new();
        let mut expired = Vec::new();
        for job in self.manager.active_jobs() {
            let tracked = *self
                .tracking()
                .entry(job.id)
                .or_insert_with(|| PollTracking::starting(now));

            if now.duration_since(tracked.submitted_at) >= self.config.max_wait {
                expired.push(job);
            } else if tracked.next_poll_at <= now {
                due.push(job);
            }
        }
        for job in expired {
            self.time_out(&job).await;
            report.timed_out += 1;
        }

        report.polled = due.len();
        stream::iter(due)
            .map(|job| self.poll_one(job))
            .buffer_unordered(self.config.max_concurrent_polls.max(1))
            .collect::<Vec<()>>()
            .await;

        report.dispatched = self.dispatch().await;

        let active: Vec<JobId> = self.manager.active_jobs().iter().map(|job| job.id).collect();
        self.tracking().retain(|id, _| active.contains(id));
        report
    }

    /// Fail a job past its maximum wait and cancel the upstream task.
    async fn time_out(&self, job: &GenerationJob) {
        tracing::warn!(job_id = %job.id, provider = %job.provider, "Job exceeded maximum wait");
        let error = JobError::new(
            JobErrorKind::Timeout,
            format!("no result within {}s", self.config.max_wait.as_secs()),
        );
        let failed = self.apply(job.id, Transition::Fail(error));
        self.tracking().remove(&job.id);

        let Some(failed) = failed else {
            return;
        };
        if let (Some(task_id), Some(adapter)) = (
            failed.provider_task_id.as_deref(),
            self.manager.registry().adapter(failed.provider),
        ) {
            if let Err(e) = adapter.cancel(task_id).await {
                tracing::warn!(job_id = %job.id, error = %e, "Upstream cancel failed");
            }
        }
    }

    async fn poll_one(&self, job: GenerationJob) {
        let Some(adapter) = self.manager.registry().adapter(job.provider) else {
            self.fail(job.id, JobErrorKind::ProviderPoll, format!("provider '{}' is not available", job.provider));
            return;
        };
        let Some(task_id) = job.provider_task_id.as_deref() else {
            self.fail(job.id, JobErrorKind::ProviderPoll, "job has no provider task id");
            return;
        };

        match adapter.poll_status(task_id).await {
            Ok(status) => {
                self.reset_failures(job.id);
                self.on_status(&job, status).await;
            }
            Err(e) => self.on_error(&job, e),
        }
    }

    async fn on_status(&self, job: &GenerationJob, status: PollStatus) {
        match status.phase {
            Phase::Pending => {}
            Phase::Processing => {
                if !self.ensure_processing(job) {
                    return;
                }
                if let Some(progress) = status.progress {
                    self.apply(job.id, Transition::Progress { progress });
                }
            }
            Phase::Succeeded => {
                if !self.ensure_processing(job) {
                    return;
                }
                self.tracking().remove(&job.id);
                match self.materializer.materialize(job.id).await {
                    Ok(done) => tracing::debug!(job_id = %job.id, status = %done.status, "Job materialized"),
                    Err(e) => tracing::debug!(job_id = %job.id, error = %e, "Materialization skipped"),
                }
            }
            Phase::Failed => {
                let reason = status.failure.unwrap_or_else(|| "provider reported failure".to_string());
                self.fail(job.id, JobErrorKind::ProviderPoll, reason);
            }
        }
    }

    fn on_error(&self, job: &GenerationJob, error: ProviderError) {
        if !error.is_transient() {
            self.fail(job.id, JobErrorKind::ProviderPoll, error.to_string());
            return;
        }

        let Some(updated) = self.apply(job.id, Transition::PollRetry) else {
            return;
        };
        if updated.retry_count > self.config.max_retries {
            self.fail(
                job.id,
                JobErrorKind::ProviderPoll,
                format!("giving up after {} retries: {error}", self.config.max_retries),
            );
            return;
        }

        let now = Instant::now();
        let mut tracking = self.tracking();
        let entry = tracking
            .entry(job.id)
            .or_insert_with(|| PollTracking::starting(now));
        entry.consecutive_failures += 1;
        let delay = self.config.backoff.delay_for_attempt(entry.consecutive_failures);
        entry.next_poll_at = now + delay;
        tracing::warn!(
            job_id = %job.id,
            provider = %job.provider,
            retry_count = updated.retry_count,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "Transient poll error, backing off",
        );
    }

    fn reset_failures(&self, job_id: JobId) {
        if let Some(entry) = self.tracking().get_mut(&job_id) {
            entry.consecutive_failures = 0;
        }
    }

    /// Move a submitted job to `processing`. Returns false when the job is
    /// no longer in flight.
    fn ensure_processing(&self, job: &GenerationJob) -> bool {
        match self.manager.get_job(job.id) {
            Some(current) if current.status == JobStatus::Submitted => {
                self.apply(job.id, Transition::StartProcessing).is_some()
            }
            Some(current) => current.status == JobStatus::Processing,
            None => false,
        }
    }

    /// Submit queued jobs while the head of the queue fits.
    async fn dispatch(&self) -> usize {
        let mut dispatched = 0;
        let queued = self
            .manager
            .list_jobs(&JobFilter::all().with_status(JobStatus::Queued))
            .len();

        for _ in 0..queued {
            let Some(job) = self.manager.next_dispatchable() else {
                break;
            };
            self.submit(job).await;
            dispatched += 1;
        }
        dispatched
    }

    async fn submit(&self, job: GenerationJob) {
        let Some(adapter) = self.manager.registry().adapter(job.provider) else {
            self.fail(job.id, JobErrorKind::ProviderSubmit, format!("provider '{}' is not available", job.provider));
            return;
        };

        let receipt = match adapter.submit(job.job_type, &job.payload).await {
            Ok(receipt) => receipt,
            Err(e) => {
                self.fail(job.id, JobErrorKind::ProviderSubmit, e.to_string());
                return;
            }
        };

        let provider_task_id = receipt.provider_task_id;
        match self.manager.transition(
            job.id,
            Transition::Submit {
                provider_task_id: provider_task_id.clone(),
            },
        ) {
            Ok(_) => {
                self.tracking().insert(job.id, PollTracking::starting(Instant::now()));
            }
            Err(CoreError::InvalidTransition { from, .. }) if from.is_terminal() => {
                tracing::info!(job_id = %job.id, "Job cancelled during submission, cancelling upstream task");
                if let Err(e) = adapter.cancel(&provider_task_id).await {
                    tracing::warn!(job_id = %job.id, error = %e, "Upstream cancel failed");
                }
            }
            Err(e) => tracing::warn!(job_id = %job.id, error = %e, "Could not record submission"),
        }
    }

    fn fail(&self, job_id: JobId, kind: JobErrorKind, message: impl Into<String>) {
        self.apply(job_id, Transition::Fail(JobError::new(kind, message)));
        self.tracking().remove(&job_id);
    }

    /// Apply a transition, ignoring jobs that ended or vanished meanwhile.
    fn apply(&self, job_id: JobId, transition: Transition) -> Option<GenerationJob> {
        match self.manager.transition(job_id, transition) {
            Ok(job) => Some(job),
            Err(CoreError::InvalidTransition { from, .. }) if from.is_terminal() => {
                tracing::debug!(job_id = %job_id, status = %from, "Job already finished");
                None
            }
            Err(CoreError::NotFound { .. }) => {
                tracing::debug!(job_id = %job_id, "Job no longer exists");
                None
            }
            Err(e) => {
                tracing::warn!(job_id = %job_id, error = %e, "Poller transition rejected");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_follows_queue_settings() {
        let queue = QueueConfig {
            max_concurrent_polls: 0,
            max_poll_retries: 7,
            ..QueueConfig::default()
        };
        let config = PollerConfig::from(&queue);
        assert_eq!(config.max_concurrent_polls, 1);
        assert_eq!(config.max_retries, 7);
        assert_eq!(config.max_wait, queue.max_wait);
    }
}
