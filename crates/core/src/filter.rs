//! Read-side filter for listing jobs.

use serde::Deserialize;

use crate::job::{GenerationJob, JobType, ProviderKind};
use crate::status::JobStatus;

/// Criteria for `list_jobs`. An empty filter matches every job.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JobFilter {
    /// Match any of these statuses. Empty means all statuses.
    #[serde(default)]
    pub statuses: Vec<JobStatus>,
    pub job_type: Option<JobType>,
    pub provider: Option<ProviderKind>,
}

impl JobFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.statuses.push(status);
        self
    }

    pub fn with_job_type(mut self, job_type: JobType) -> Self {
        self.job_type = Some(job_type);
        self
    }

    pub fn with_provider(mut self, provider: ProviderKind) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn matches(&self, job: &GenerationJob) -> bool {
        (self.statuses.is_empty() || self.statuses.contains(&job.status))
            && self.job_type.is_none_or(|t| t == job.job_type)
            && self.provider.is_none_or(|p| p == job.provider)
    }
}
