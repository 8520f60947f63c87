//! The normalized provider contract.

use async_trait::async_trait;
use genq_core::{JobType, ProviderKind};
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;

/// A provider's status normalized across protocols.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Pending,
    Processing,
    Succeeded,
    Failed,
}

/// Result of one status poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollStatus {
    pub phase: Phase,
    /// Completion percentage (0-100), when the provider reports one.
    pub progress: Option<u8>,
    /// Upstream failure description for [`Phase::Failed`].
    pub failure: Option<String>,
}

impl PollStatus {
    pub fn pending() -> Self {
        Self {
            phase: Phase::Pending,
            progress: None,
            failure: None,
        }
    }

    pub fn processing(progress: Option<u8>) -> Self {
        Self {
            phase: Phase::Processing,
            progress,
            failure: None,
        }
    }

    pub fn succeeded() -> Self {
        Self {
            phase: Phase::Succeeded,
            progress: Some(100),
            failure: None,
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            phase: Phase::Failed,
            progress: None,
            failure: Some(reason.into()),
        }
    }
}

/// Returned by a successful submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitReceipt {
    /// Opaque handle used for every later call about this task.
    pub provider_task_id: String,
}

/// A downloadable output reported by a provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderAsset {
    pub url: String,
    #[serde(default)]
    pub backup_url: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
}

impl ProviderAsset {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            backup_url: None,
            mime_type: None,
        }
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }
}

/// Uniform contract over one third-party generation backend.
///
/// `fetch_result` is only valid after `poll_status` reported
/// [`Phase::Succeeded`]; adapters return [`ProviderError::NotReady`]
/// otherwise.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn kind(&self) -> ProviderKind;

    async fn submit(
        &self,
        job_type: JobType,
        payload: &serde_json::Value,
    ) -> Result<SubmitReceipt, ProviderError>;

    async fn poll_status(&self, provider_task_id: &str) -> Result<PollStatus, ProviderError>;

    async fn fetch_result(&self, provider_task_id: &str) -> Result<Vec<ProviderAsset>, ProviderError>;

    /// Best-effort upstream cancellation. Providers without a cancel
    /// endpoint keep the default no-op.
    async fn cancel(&self, _provider_task_id: &str) -> Result<(), ProviderError> {
        Ok(())
    }
}

/// Scale a `0.0..=1.0` fraction to a clamped percentage.
pub(crate) fn fraction_to_percent(fraction: f64) -> u8 {
    (fraction * 100.0).round().clamp(0.0, 100.0) as u8
}
