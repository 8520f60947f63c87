//! Turns a provider success into stored result assets.

use std::sync::Arc;

use genq_core::{CoreError, GenerationJob, JobError, JobErrorKind, JobId, JobStatus, ResultAsset};
use genq_providers::ProviderAsset;

use crate::assets::AssetStore;
use crate::manager::{JobQueueManager, Transition};

/// Fetches a succeeded job's outputs, uploads them to the [`AssetStore`]
/// and completes the job.
///
/// Any failure after upstream success ends the job as `failed` with a
/// [`JobErrorKind::ProviderResult`] error instead of leaving it in
/// `processing`.
pub struct ResultMaterializer {
    manager: Arc<JobQueueManager>,
    store: Arc<dyn AssetStore>,
}

impl ResultMaterializer {
    pub fn new(manager: Arc<JobQueueManager>, store: Arc<dyn AssetStore>) -> Self {
        Self { manager, store }
    }

    /// Materialize the results of a job in `processing`.
    pub async fn materialize(&self, job_id: JobId) -> Result<GenerationJob, CoreError> {
        let job = self
            .manager
            .get_job(job_id)
            .ok_or(CoreError::NotFound { entity: "job", id: job_id })?;
        if job.status != JobStatus::Processing {
            return Err(CoreError::InvalidTransition {
                job_id,
                from: job.status,
                to: JobStatus::Completed,
            });
        }

        let transition = match self.collect(&job).await {
            Ok(assets) => Transition::Complete { assets },
            Err(message) => {
                tracing::warn!(job_id = %job_id, provider = %job.provider, error = %message, "Result materialization failed");
                Transition::Fail(JobError::new(JobErrorKind::ProviderResult, message))
            }
        };
        self.manager.transition(job_id, transition)
    }

    async fn collect(&self, job: &GenerationJob) -> Result<Vec<ResultAsset>, String> {
        let adapter = self
            .manager
            .registry()
            .adapter(job.provider)
            .ok_or_else(|| format!("provider '{}' is not available", job.provider))?;
        let task_id = job
            .provider_task_id
            .as_deref()
            .ok_or_else(|| "job has no provider task id".to_string())?;

        let provided = adapter
            .fetch_result(task_id)
            .await
            .map_err(|e| format!("fetching result failed: {e}"))?;
        if provided.is_empty() {
            return Err("provider returned no assets".to_string());
        }

        let mut stored = Vec::with_capacity(provided.len());
        for asset in provided {
            stored.push(self.store_one(job, asset).await?);
        }
        Ok(stored)
    }

    /// Upload one asset, falling back to its backup URL.
    async fn store_one(&self, job: &GenerationJob, asset: ProviderAsset) -> Result<ResultAsset, String> {
        let primary = self.store.upload(&asset.url, job.job_type).await;
        let (url, source_url) = match (primary, asset.backup_url) {
            (Ok(url), _) => (url, asset.url),
            (Err(e), Some(backup)) => {
                tracing::warn!(job_id = %job.id, error = %e, "Primary asset upload failed, trying backup URL");
                let url = self
                    .store
                    .upload(&backup, job.job_type)
                    .await
                    .map_err(|e| format!("asset upload failed: {e}"))?;
                (url, backup)
            }
            (Err(e), None) => return Err(format!("asset upload failed: {e}")),
        };

        Ok(ResultAsset {
            url,
            source_url: Some(source_url),
            mime_type: asset.mime_type,
        })
    }
}
