//! Deterministic stand-in for upstream providers.
//!
//! A [`Simulator`] tracks fake upstream tasks and decides, per poll, how
//! far each one has progressed. Adapters running in simulated mode turn
//! that progress into the raw response body their real provider would
//! send and feed it through the same mapping code used for live traffic.
//!
//! Time is measured with [`tokio::time::Instant`], so tests driven by a
//! paused clock (`tokio::time::advance`) are fully deterministic.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

use crate::adapter::fraction_to_percent;
use crate::error::ProviderError;

/// When a simulated task finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimulationProfile {
    /// Finish on the n-th status poll (1-based). Earlier polls report
    /// processing.
    AfterPolls(u32),
    /// Finish once this much time has elapsed since submission.
    AfterElapsed(Duration),
}

/// What the simulator reports for a task on one poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimulatedProgress {
    Running { percent: u8 },
    Finished,
    Failed(String),
}

#[derive(Debug)]
struct SimulatedTask {
    started: Instant,
    polls: u32,
    cancelled: bool,
}

/// Shared state of fake upstream tasks for one provider.
#[derive(Debug)]
pub struct Simulator {
    profile: SimulationProfile,
    failure: Option<String>,
    rejection: Option<String>,
    transient_errors: AtomicU32,
    submissions: AtomicU32,
    total_polls: AtomicU32,
    file_retrievals: AtomicU32,
    tasks: Mutex<HashMap<String, SimulatedTask>>,
}

impl Simulator {
    pub fn new(profile: SimulationProfile) -> Self {
        Self {
            profile,
            failure: None,
            rejection: None,
            transient_errors: AtomicU32::new(0),
            submissions: AtomicU32::new(0),
            total_polls: AtomicU32::new(0),
            file_retrievals: AtomicU32::new(0),
            tasks: Mutex::new(HashMap::new()),
        }
    }

    /// Tasks end with an upstream failure instead of succeeding.
    pub fn failing_with(mut self, reason: impl Into<String>) -> Self {
        self.failure = Some(reason.into());
        self
    }

    /// Submissions are refused by the provider.
    pub fn rejecting_with(mut self, reason: impl Into<String>) -> Self {
        self.rejection = Some(reason.into());
        self
    }

    /// The next `count` polls fail with a transient error.
    pub fn with_transient_errors(self, count: u32) -> Self {
        self.transient_errors.store(count, Ordering::SeqCst);
        self
    }

    pub fn profile(&self) -> SimulationProfile {
        self.profile
    }

    /// Register a new fake upstream task and return its id.
    pub(crate) fn create_task(&self) -> Result<String, ProviderError> {
        self.submissions.fetch_add(1, Ordering::SeqCst);
        if let Some(reason) = &self.rejection {
            return Err(ProviderError::Rejected(reason.clone()));
        }
        let task_id = uuid::Uuid::new_v4().simple().to_string();
        self.lock_tasks().insert(
            task_id.clone(),
            SimulatedTask {
                started: Instant::now(),
                polls: 0,
                cancelled: false,
            },
        );
        Ok(task_id)
    }

    /// Record one status poll for `task_id` and report its progress.
    pub(crate) fn advance(&self, task_id: &str) -> Result<SimulatedProgress, ProviderError> {
        self.total_polls.fetch_add(1, Ordering::SeqCst);
        if self
            .transient_errors
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(ProviderError::Transient(format!(
                "simulated upstream hiccup for {task_id}"
            )));
        }

        let mut tasks = self.lock_tasks();
        let task = tasks.get_mut(task_id).ok_or_else(|| ProviderError::Api {
            status: 404,
            body: format!("task {task_id} not found"),
        })?;
        if task.cancelled {
            return Ok(SimulatedProgress::Failed("cancelled".to_string()));
        }
        task.polls += 1;

        let fraction = match self.profile {
            SimulationProfile::AfterPolls(n) => task.polls as f64 / n.max(1) as f64,
            SimulationProfile::AfterElapsed(d) if d.is_zero() => 1.0,
            SimulationProfile::AfterElapsed(d) => {
                task.started.elapsed().as_secs_f64() / d.as_secs_f64()
            }
        };

        if fraction < 1.0 {
            return Ok(SimulatedProgress::Running {
                percent: fraction_to_percent(fraction).min(99),
            });
        }
        Ok(match &self.failure {
            Some(reason) => SimulatedProgress::Failed(reason.clone()),
            None => SimulatedProgress::Finished,
        })
    }

    /// Whether `task_id` exists and has reached its finish condition
    /// without consuming a poll.
    pub(crate) fn is_finished(&self, task_id: &str) -> bool {
        let tasks = self.lock_tasks();
        let Some(task) = tasks.get(task_id) else {
            return false;
        };
        if task.cancelled || self.failure.is_some() {
            return false;
        }
        match self.profile {
            SimulationProfile::AfterPolls(n) => task.polls >= n.max(1),
            SimulationProfile::AfterElapsed(d) => task.started.elapsed() >= d,
        }
    }

    pub(crate) fn record_file_retrieval(&self) {
        self.file_retrievals.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn cancel(&self, task_id: &str) {
        if let Some(task) = self.lock_tasks().get_mut(task_id) {
            task.cancelled = true;
        }
    }

    /// Number of submissions attempted, including rejected ones.
    pub fn submissions(&self) -> u32 {
        self.submissions.load(Ordering::SeqCst)
    }

    /// Number of file-id to URL resolutions performed.
    pub fn file_retrievals(&self) -> u32 {
        self.file_retrievals.load(Ordering::SeqCst)
    }

    /// Status polls received for any task, including failed ones.
    pub fn total_polls(&self) -> u32 {
        self.total_polls.load(Ordering::SeqCst)
    }

    /// Number of polls recorded for `task_id`.
    pub fn polls(&self, task_id: &str) -> u32 {
        self.lock_tasks().get(task_id).map_or(0, |t| t.polls)
    }

    pub fn was_cancelled(&self, task_id: &str) -> bool {
        self.lock_tasks().get(task_id).is_some_and(|t| t.cancelled)
    }

    fn lock_tasks(&self) -> std::sync::MutexGuard<'_, HashMap<String, SimulatedTask>> {
        self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Stable fake download URL for a simulated output.
pub(crate) fn simulated_url(provider: &str, task_id: &str, ext: &str) -> String {
    format!("https://simulated.invalid/{provider}/{task_id}.{ext}")
}
