//! The job queue manager.
//!
//! [`JobQueueManager`] exclusively owns the job set. Every change goes
//! through [`JobQueueManager::transition`] (or one of the bulk removals),
//! which validates the state machine edge, applies the change, bumps the
//! revision watched by the persister and notifies subscribers.
//!
//! All state mutation is synchronous under one lock; no lock is ever held
//! across an `.await`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use genq_core::validation::validate_payload;
use genq_core::{
    CoreError, GenerationJob, JobError, JobErrorKind, JobFilter, JobId, JobStatus, JobType, Metadata,
    ProviderKind, ResultAsset, Timestamp,
};
use genq_events::{EventBus, JobEvent, Subscription};
use genq_providers::AdapterRegistry;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::watch;

use crate::credits::CreditService;
use crate::persistence::QueueSnapshot;

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// An enqueue request.
#[derive(Debug, Clone, Deserialize)]
pub struct NewJob {
    #[serde(rename = "type")]
    pub job_type: JobType,
    pub provider: ProviderKind,
    pub payload: serde_json::Value,
    #[serde(default)]
    pub metadata: Metadata,
    /// Credits reserved at admission and refunded on failure.
    #[serde(default)]
    pub credit_cost: u64,
}

impl NewJob {
    pub fn new(job_type: JobType, provider: ProviderKind, payload: serde_json::Value) -> Self {
        Self {
            job_type,
            provider,
            payload,
            metadata: Metadata::new(),
            credit_cost: 0,
        }
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_credit_cost(mut self, credit_cost: u64) -> Self {
        self.credit_cost = credit_cost;
        self
    }
}

/// A requested change to one job.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// `queued -> submitted`, recording the upstream task handle.
    Submit { provider_task_id: String },
    /// `submitted -> processing`.
    StartProcessing,
    /// Record progress on an in-flight job without changing status.
    Progress { progress: u8 },
    /// Record one transient poll failure on an in-flight job.
    PollRetry,
    /// `processing -> completed` with the stored outputs.
    Complete { assets: Vec<ResultAsset> },
    /// Fail a job and refund its reserved credits.
    Fail(JobError),
    Cancel,
    /// Fail a job recovered from a snapshot. Its reservation belonged to a
    /// previous process, so nothing is refunded.
    Abandon(JobError),
    /// Terminal recovery-only status. Like [`Transition::Abandon`], no refund.
    Interrupt,
}

impl Transition {
    /// Status this transition moves to, or `None` for in-place updates.
    pub fn target(&self) -> Option<JobStatus> {
        match self {
            Transition::Submit { .. } => Some(JobStatus::Submitted),
            Transition::StartProcessing => Some(JobStatus::Processing),
            Transition::Progress { .. } | Transition::PollRetry => None,
            Transition::Complete { .. } => Some(JobStatus::Completed),
            Transition::Fail(_) | Transition::Abandon(_) => Some(JobStatus::Failed),
            Transition::Cancel => Some(JobStatus::Cancelled),
            Transition::Interrupt => Some(JobStatus::Interrupted),
        }
    }
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

#[derive(Default)]
struct QueueState {
    jobs: HashMap<JobId, GenerationJob>,
    /// Job ids in enqueue order.
    order: Vec<JobId>,
}

impl QueueState {
    fn ordered(&self) -> impl Iterator<Item = &GenerationJob> {
        self.order.iter().filter_map(|id| self.jobs.get(id))
    }

    fn remove_where(&mut self, mut predicate: impl FnMut(&GenerationJob) -> bool) -> usize {
        let doomed: Vec<JobId> = self
            .jobs
            .values()
            .filter(|job| predicate(job))
            .map(|job| job.id)
            .collect();
        for id in &doomed {
            self.jobs.remove(id);
        }
        if !doomed.is_empty() {
            self.order.retain(|id| self.jobs.contains_key(id));
        }
        doomed.len()
    }
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

/// Single owner of the generation job set.
pub struct JobQueueManager {
    state: Mutex<QueueState>,
    registry: AdapterRegistry,
    credits: Arc<dyn CreditService>,
    events: Arc<EventBus>,
    max_concurrent: u32,
    paused: AtomicBool,
    revision: watch::Sender<u64>,
}

impl JobQueueManager {
    pub fn new(
        registry: AdapterRegistry,
        credits: Arc<dyn CreditService>,
        events: Arc<EventBus>,
        max_concurrent: u32,
    ) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            state: Mutex::new(QueueState::default()),
            registry,
            credits,
            events,
            max_concurrent: max_concurrent.max(1),
            paused: AtomicBool::new(false),
            revision,
        }
    }

    pub fn registry(&self) -> &AdapterRegistry {
        &self.registry
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn max_concurrent(&self) -> u32 {
        self.max_concurrent
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn bump_revision(&self) {
        self.revision.send_modify(|r| *r += 1);
    }

    // -- Commands ----------------------------------------------------------

    /// Validate, reserve credits and add a `queued` job.
    ///
    /// Makes no network calls. On error nothing is created and no credits
    /// are held.
    pub fn enqueue(&self, request: NewJob) -> Result<JobId, CoreError> {
        validate_payload(request.job_type, request.provider, &request.payload)?;
        if !self.registry.contains(request.provider) {
            return Err(CoreError::Validation(format!(
                "Provider '{}' is not available",
                request.provider
            )));
        }

        self.credits.reserve(request.credit_cost)?;

        let job = GenerationJob::new(
            request.job_type,
            request.provider,
            request.payload,
            request.metadata,
            request.credit_cost,
            Utc::now(),
        );
        let job_id = job.id;

        let position = {
            let mut state = self.lock();
            state.order.push(job_id);
            state.jobs.insert(job_id, job.clone());
            state
                .ordered()
                .filter(|j| j.status == JobStatus::Queued)
                .count()
        };
        self.bump_revision();

        tracing::info!(
            job_id = %job_id,
            job_type = %job.job_type,
            provider = %job.provider,
            credit_cost = job.credit_cost,
            "Job enqueued",
        );
        self.events.emit(
            job_id,
            JobStatus::Queued,
            json!({"queue_position": position, "credit_cost": job.credit_cost}),
        );
        Ok(job_id)
    }

    /// Apply `transition` to a job. The only way job state changes.
    ///
    /// Illegal edges fail with [`CoreError::InvalidTransition`] and leave
    /// the job untouched, as does completing with no assets. In-place
    /// updates that change nothing (same progress) are accepted without
    /// bumping the revision.
    pub fn transition(&self, job_id: JobId, transition: Transition) -> Result<GenerationJob, CoreError> {
        let (job, changed, refund) = {
            let mut state = self.lock();
            let job = state
                .jobs
                .get_mut(&job_id)
                .ok_or(CoreError::NotFound { entity: "job", id: job_id })?;
            let from = job.status;

            let target = transition.target();
            match target {
                Some(to) if !from.can_transition_to(to) => {
                    return Err(CoreError::InvalidTransition { job_id, from, to });
                }
                None if !from.is_active() => {
                    return Err(CoreError::InvalidTransition { job_id, from, to: from });
                }
                _ => {}
            }
            if matches!(&transition, Transition::Complete { assets } if assets.is_empty()) {
                return Err(CoreError::Validation(format!(
                    "job {job_id} cannot complete without result assets"
                )));
            }

            let changed = apply(job, &transition);
            if changed {
                job.updated_at = Utc::now();
            }
            let refund = matches!(transition, Transition::Fail(_) | Transition::Cancel);
            (job.clone(), changed, refund)
        };

        if !changed {
            return Ok(job);
        }
        self.bump_revision();

        if refund && job.credit_cost > 0 {
            self.credits.refund(job.credit_cost);
        }
        log_transition(&job, &transition);
        self.events.emit(job.id, job.status, event_detail(&job, &transition));
        Ok(job)
    }

    /// Cancel a job.
    ///
    /// Returns `Ok(false)` when the job was already terminal. The local
    /// `cancelled` transition happens before the best-effort upstream
    /// cancel, whose failure is only logged.
    pub async fn cancel(&self, job_id: JobId) -> Result<bool, CoreError> {
        let current = self
            .get_job(job_id)
            .ok_or(CoreError::NotFound { entity: "job", id: job_id })?;
        if current.is_terminal() {
            return Ok(false);
        }

        let job = match self.transition(job_id, Transition::Cancel) {
            Ok(job) => job,
            // Finished between the read and the transition.
            Err(CoreError::InvalidTransition { from, .. }) if from.is_terminal() => return Ok(false),
            Err(e) => return Err(e),
        };

        if let (Some(task_id), Some(adapter)) =
            (job.provider_task_id.as_deref(), self.registry.adapter(job.provider))
        {
            if let Err(e) = adapter.cancel(task_id).await {
                tracing::warn!(
                    job_id = %job_id,
                    provider = %job.provider,
                    error = %e,
                    "Upstream cancel failed",
                );
            }
        }
        Ok(true)
    }

    /// Stop submitting queued jobs. In-flight jobs keep being polled.
    pub fn pause(&self) {
        if !self.paused.swap(true, Ordering::SeqCst) {
            tracing::info!("Queue dispatch paused");
        }
    }

    pub fn resume(&self) {
        if self.paused.swap(false, Ordering::SeqCst) {
            tracing::info!("Queue dispatch resumed");
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Remove every `completed` job. Returns how many were removed.
    pub fn clear_completed(&self) -> usize {
        let removed = self.lock().remove_where(|job| job.status == JobStatus::Completed);
        if removed > 0 {
            self.bump_revision();
            tracing::info!(removed, "Cleared completed jobs");
        }
        removed
    }

    /// Remove terminal jobs last updated more than `retention` before `now`.
    pub fn prune_expired(&self, now: Timestamp, retention: Duration) -> usize {
        let Ok(retention) = chrono::Duration::from_std(retention) else {
            return 0;
        };
        let cutoff = now - retention;
        let pruned = self.lock().remove_where(|job| job.is_expired(cutoff));
        if pruned > 0 {
            self.bump_revision();
            tracing::info!(pruned, "Pruned expired jobs");
        }
        pruned
    }

    /// Replace the job set with previously persisted jobs.
    ///
    /// Used once at startup before any other operation. Duplicate ids keep
    /// the first occurrence. Does not bump the revision.
    pub fn hydrate(&self, mut jobs: Vec<GenerationJob>) {
        jobs.sort_by_key(|job| job.created_at);

        let mut state = self.lock();
        *state = QueueState::default();
        for job in jobs {
            if state.jobs.contains_key(&job.id) {
                tracing::warn!(job_id = %job.id, "Skipping duplicate job in snapshot");
                continue;
            }
            state.order.push(job.id);
            state.jobs.insert(job.id, job);
        }
    }

    /// Reserve credits again for queued jobs loaded by [`Self::hydrate`].
    ///
    /// The ledger starts fresh in every process, so a recovered queued job
    /// holds no reservation until this runs. Jobs the balance no longer
    /// covers are abandoned. Returns how many jobs kept their place.
    pub fn restore_reservations(&self) -> usize {
        let mut restored = 0;
        for job in self.list_jobs(&JobFilter::all().with_status(JobStatus::Queued)) {
            match self.credits.reserve(job.credit_cost) {
                Ok(()) => restored += 1,
                Err(e) => {
                    tracing::warn!(job_id = %job.id, error = %e, "Recovered job no longer affordable");
                    let error = JobError::new(JobErrorKind::ProviderSubmit, e.to_string());
                    if let Err(e) = self.transition(job.id, Transition::Abandon(error)) {
                        tracing::warn!(job_id = %job.id, error = %e, "Could not abandon recovered job");
                    }
                }
            }
        }
        restored
    }

    // -- Queries -----------------------------------------------------------

    pub fn get_job(&self, job_id: JobId) -> Option<GenerationJob> {
        self.lock().jobs.get(&job_id).cloned()
    }

    /// Jobs matching `filter`, in enqueue order.
    pub fn list_jobs(&self, filter: &JobFilter) -> Vec<GenerationJob> {
        self.lock().ordered().filter(|job| filter.matches(job)).cloned().collect()
    }

    /// Jobs in `submitted` or `processing`, in enqueue order.
    pub fn active_jobs(&self) -> Vec<GenerationJob> {
        self.lock().ordered().filter(|job| job.status.is_active()).cloned().collect()
    }

    /// 1-based position among `queued` jobs.
    pub fn queue_position(&self, job_id: JobId) -> Option<usize> {
        self.lock()
            .ordered()
            .filter(|job| job.status == JobStatus::Queued)
            .position(|job| job.id == job_id)
            .map(|index| index + 1)
    }

    /// Concurrency slots currently occupied by in-flight jobs.
    pub fn occupied_slots(&self) -> u32 {
        self.lock()
            .ordered()
            .filter(|job| job.status.is_active())
            .map(|job| self.slot_weight(job.provider))
            .sum()
    }

    /// The oldest queued job, if it fits in the free slots.
    ///
    /// Strict FIFO: when the head of the queue does not fit, nothing is
    /// dispatchable. Always `None` while paused.
    pub fn next_dispatchable(&self) -> Option<GenerationJob> {
        if self.is_paused() {
            return None;
        }
        let state = self.lock();
        let occupied: u32 = state
            .ordered()
            .filter(|job| job.status.is_active())
            .map(|job| self.slot_weight(job.provider))
            .sum();
        let head = state.ordered().find(|job| job.status == JobStatus::Queued)?;
        (occupied + self.slot_weight(head.provider) <= self.max_concurrent).then(|| head.clone())
    }

    fn slot_weight(&self, provider: ProviderKind) -> u32 {
        self.registry.weight(provider).min(self.max_concurrent)
    }

    /// Consistent copy of the whole queue for persistence.
    pub fn snapshot(&self) -> QueueSnapshot {
        let state = self.lock();
        let revision = *self.revision.borrow();
        QueueSnapshot::new(revision, Utc::now(), state.ordered().cloned().collect())
    }

    /// Monotonic counter bumped by every accepted mutation.
    pub fn revision(&self) -> u64 {
        *self.revision.borrow()
    }

    pub fn watch_revision(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    /// Invoke `callback` for each event about `job_id`.
    pub fn subscribe<F>(&self, job_id: JobId, callback: F) -> Subscription
    where
        F: FnMut(JobEvent) + Send + 'static,
    {
        self.events.subscribe_job(job_id, callback)
    }
}

/// Mutate `job` for `transition`. Returns whether anything changed.
fn apply(job: &mut GenerationJob, transition: &Transition) -> bool {
    match transition {
        Transition::Submit { provider_task_id } => {
            job.status = JobStatus::Submitted;
            job.provider_task_id = Some(provider_task_id.clone());
            job.submitted_at = Some(Utc::now());
        }
        Transition::StartProcessing => {
            job.status = JobStatus::Processing;
        }
        Transition::Progress { progress } => {
            let progress = (*progress).min(100);
            if job.progress == Some(progress) {
                return false;
            }
            job.progress = Some(progress);
        }
        Transition::PollRetry => {
            job.retry_count += 1;
        }
        Transition::Complete { assets } => {
            job.status = JobStatus::Completed;
            job.result_assets = assets.clone();
            job.progress = Some(100);
            job.error = None;
        }
        Transition::Fail(error) | Transition::Abandon(error) => {
            job.status = JobStatus::Failed;
            job.error = Some(error.clone());
        }
        Transition::Cancel => {
            job.status = JobStatus::Cancelled;
        }
        Transition::Interrupt => {
            job.status = JobStatus::Interrupted;
            job.error = Some(JobError::interrupted());
        }
    }
    true
}

fn event_detail(job: &GenerationJob, transition: &Transition) -> serde_json::Value {
    match transition {
        Transition::Submit { provider_task_id } => json!({"provider_task_id": provider_task_id}),
        Transition::StartProcessing | Transition::Progress { .. } => json!({"progress": job.progress}),
        Transition::PollRetry => json!({"retry_count": job.retry_count}),
        Transition::Complete { assets } => json!({"result_assets": assets}),
        Transition::Fail(error) | Transition::Abandon(error) => json!({"error": error}),
        Transition::Cancel => json!({}),
        Transition::Interrupt => json!({"error": job.error}),
    }
}

fn log_transition(job: &GenerationJob, transition: &Transition) {
    match transition {
        Transition::Progress { .. } | Transition::PollRetry => {
            tracing::debug!(job_id = %job.id, progress = ?job.progress, retry_count = job.retry_count, "Job updated");
        }
        Transition::Fail(error) | Transition::Abandon(error) => {
            tracing::error!(job_id = %job.id, provider = %job.provider, error = %error, "Job failed");
        }
        _ => {
            tracing::info!(job_id = %job.id, provider = %job.provider, status = %job.status, "Job transitioned");
        }
    }
}
