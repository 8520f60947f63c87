//! The generation job record and its value types.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::status::JobStatus;
use crate::types::{JobId, Timestamp};

/// Error message recorded on jobs that were in flight when the previous
/// process ended.
pub const INTERRUPTED_MESSAGE: &str = "interrupted by reload";

/// Free-form key/value metadata attached by the caller.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

// ---------------------------------------------------------------------------
// Job type
// ---------------------------------------------------------------------------

/// Kind of media a job generates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    Image,
    Video,
    Music,
}

impl JobType {
    pub fn as_str(self) -> &'static str {
        match self {
            JobType::Image => "image",
            JobType::Video => "video",
            JobType::Music => "music",
        }
    }

    /// Parse from the wire name.
    pub fn from_name(name: &str) -> Result<Self, CoreError> {
        match name {
            "image" => Ok(Self::Image),
            "video" => Ok(Self::Video),
            "music" => Ok(Self::Music),
            other => Err(CoreError::Validation(format!(
                "Unknown job type '{other}'. Must be one of: image, video, music"
            ))),
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

/// Third-party generation backends known to the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// Queue-based image/video provider keyed by request id.
    Fal,
    /// Task/file-split video and music provider.
    Minimax,
    /// Bearer-token task-polling video provider.
    Runway,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 3] = [ProviderKind::Fal, ProviderKind::Minimax, ProviderKind::Runway];

    pub fn as_str(self) -> &'static str {
        match self {
            ProviderKind::Fal => "fal",
            ProviderKind::Minimax => "minimax",
            ProviderKind::Runway => "runway",
        }
    }

    /// Parse from the wire name.
    pub fn from_name(name: &str) -> Result<Self, CoreError> {
        match name {
            "fal" => Ok(Self::Fal),
            "minimax" => Ok(Self::Minimax),
            "runway" => Ok(Self::Runway),
            other => Err(CoreError::Validation(format!(
                "Unknown provider '{other}'. Must be one of: fal, minimax, runway"
            ))),
        }
    }

    /// Job types this provider can generate.
    pub fn supported_types(self) -> &'static [JobType] {
        match self {
            ProviderKind::Fal => &[JobType::Image, JobType::Video],
            ProviderKind::Minimax => &[JobType::Video, JobType::Music],
            ProviderKind::Runway => &[JobType::Video],
        }
    }

    pub fn supports(self, job_type: JobType) -> bool {
        self.supported_types().contains(&job_type)
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Assets and errors
// ---------------------------------------------------------------------------

/// A durable reference to one generated output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultAsset {
    /// URL in durable asset storage.
    pub url: String,
    /// URL the provider originally served the asset from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// Classification of a lifecycle failure recorded on a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobErrorKind {
    /// Upstream rejected the submission.
    ProviderSubmit,
    /// Status polling kept failing past the retry limit.
    ProviderPoll,
    /// Assets could not be retrieved or stored after upstream success.
    ProviderResult,
    /// No terminal phase within the maximum wait.
    Timeout,
    /// The job was in flight when the previous process ended.
    Interrupted,
}

impl JobErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            JobErrorKind::ProviderSubmit => "provider_submit",
            JobErrorKind::ProviderPoll => "provider_poll",
            JobErrorKind::ProviderResult => "provider_result",
            JobErrorKind::Timeout => "timeout",
            JobErrorKind::Interrupted => "interrupted",
        }
    }
}

/// Structured error stored on a failed job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobError {
    pub kind: JobErrorKind,
    pub message: String,
}

impl JobError {
    pub fn new(kind: JobErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn interrupted() -> Self {
        Self::new(JobErrorKind::Interrupted, INTERRUPTED_MESSAGE)
    }
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.as_str(), self.message)
    }
}

// ---------------------------------------------------------------------------
// GenerationJob
// ---------------------------------------------------------------------------

/// One user-submitted generation request and its tracked lifecycle.
///
/// Status fields are only ever changed by the queue manager's transition
/// function; this type exposes no mutators of its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationJob {
    pub id: JobId,
    #[serde(rename = "type")]
    pub job_type: JobType,
    pub provider: ProviderKind,
    /// Opaque request body forwarded to the provider adapter.
    pub payload: serde_json::Value,
    /// Upstream task handle, set once the job has been submitted.
    pub provider_task_id: Option<String>,
    pub status: JobStatus,
    /// Last progress percentage reported by the provider (0-100).
    #[serde(default)]
    pub progress: Option<u8>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    /// When the job entered `submitted`. Used for wait accounting.
    #[serde(default)]
    pub submitted_at: Option<Timestamp>,
    pub result_assets: Vec<ResultAsset>,
    pub error: Option<JobError>,
    pub credit_cost: u64,
    pub retry_count: u32,
    #[serde(default)]
    pub metadata: Metadata,
}

impl GenerationJob {
    /// Build a fresh `queued` job.
    pub fn new(
        job_type: JobType,
        provider: ProviderKind,
        payload: serde_json::Value,
        metadata: Metadata,
        credit_cost: u64,
        now: Timestamp,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            job_type,
            provider,
            payload,
            provider_task_id: None,
            status: JobStatus::Queued,
            progress: None,
            created_at: now,
            updated_at: now,
            submitted_at: None,
            result_assets: Vec::new(),
            error: None,
            credit_cost,
            retry_count: 0,
            metadata,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Terminal and last touched before `cutoff`.
    pub fn is_expired(&self, cutoff: Timestamp) -> bool {
        self.is_terminal() && self.updated_at < cutoff
    }
}
