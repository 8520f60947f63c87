//! Task/file-split video and music provider.
//!
//! Video generation is asynchronous: a submission yields a `task_id`,
//! the status query eventually reports `Success` together with a
//! `file_id`, and a separate files API turns that id into download URLs.
//! The adapter resolves the file before reporting success, so a job only
//! completes once a usable URL exists, and caches the resolution so each
//! task costs exactly one file lookup.
//!
//! Music generation answers synchronously with the audio URL; the adapter
//! caches it and reports success on the first poll.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use genq_core::{JobType, ProviderKind};
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::adapter::{PollStatus, ProviderAdapter, ProviderAsset, SubmitReceipt};
use crate::error::ProviderError;
use crate::http::parse_response;
use crate::simulation::{simulated_url, SimulatedProgress, Simulator};

pub const DEFAULT_BASE_URL: &str = "https://api.minimax.io/v1";

/// Upstream status codes that indicate a temporary condition
/// (unknown error, timeout, rate limit, service busy).
const TRANSIENT_CODES: &[i64] = &[1000, 1001, 1002, 1039];

const VIDEO_PREFIX: &str = "video:";
const MUSIC_PREFIX: &str = "music:";

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BaseResp {
    pub status_code: i64,
    #[serde(default)]
    pub status_msg: String,
}

impl BaseResp {
    /// Turn a non-zero status code into an error.
    pub fn check(&self) -> Result<(), ProviderError> {
        match self.status_code {
            0 => Ok(()),
            code if TRANSIENT_CODES.contains(&code) => Err(ProviderError::Transient(format!(
                "minimax {code}: {}",
                self.status_msg
            ))),
            code => Err(ProviderError::Rejected(format!(
                "minimax {code}: {}",
                self.status_msg
            ))),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CreateTaskResponse {
    #[serde(default)]
    task_id: String,
    #[serde(default)]
    base_resp: BaseResp,
}

/// Body of `GET /query/video_generation`.
#[derive(Debug, Clone, Deserialize)]
pub struct QueryStatusResponse {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub file_id: Option<String>,
    #[serde(default)]
    pub base_resp: BaseResp,
}

#[derive(Debug, Deserialize)]
struct RetrieveFileResponse {
    file: Option<RetrievedFile>,
    #[serde(default)]
    base_resp: BaseResp,
}

#[derive(Debug, Deserialize)]
struct RetrievedFile {
    #[serde(default)]
    download_url: String,
    #[serde(default)]
    backup_download_url: Option<String>,
    #[serde(default)]
    filename: String,
}

#[derive(Debug, Deserialize)]
struct MusicResponse {
    data: Option<MusicData>,
    #[serde(default)]
    trace_id: Option<String>,
    #[serde(default)]
    base_resp: BaseResp,
}

#[derive(Debug, Deserialize)]
struct MusicData {
    #[serde(default)]
    audio: Option<String>,
}

// ---------------------------------------------------------------------------
// Status mapping
// ---------------------------------------------------------------------------

/// Upstream video task state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Processing,
    /// Finished; the output still has to be resolved via the files API.
    Success { file_id: String },
    Failed(String),
}

pub fn classify(response: &QueryStatusResponse) -> Result<TaskState, ProviderError> {
    response.base_resp.check()?;
    match response.status.as_str() {
        "Queueing" | "Preparing" => Ok(TaskState::Pending),
        "Processing" => Ok(TaskState::Processing),
        "Success" => response
            .file_id
            .clone()
            .filter(|id| !id.is_empty())
            .map(|file_id| TaskState::Success { file_id })
            .ok_or_else(|| ProviderError::Malformed("success status without file_id".into())),
        "Fail" => {
            let msg = &response.base_resp.status_msg;
            Ok(TaskState::Failed(if msg.is_empty() || msg == "success" {
                "video generation failed".to_string()
            } else {
                msg.clone()
            }))
        }
        other => Err(ProviderError::Malformed(format!("unknown minimax status: {other}"))),
    }
}

fn mime_from_filename(filename: &str) -> Option<&'static str> {
    let ext = filename.rsplit_once('.')?.1.to_ascii_lowercase();
    match ext.as_str() {
        "mp4" => Some("video/mp4"),
        "mov" => Some("video/quicktime"),
        "mp3" => Some("audio/mpeg"),
        "wav" => Some("audio/wav"),
        _ => None,
    }
}

/// Build the upstream body for a music request. URL output is always
/// requested so the result can be materialized like any other asset.
fn music_body(payload: &Value) -> Value {
    let mut body = payload.as_object().cloned().unwrap_or_default();
    body.insert("output_format".into(), json!("url"));
    Value::Object(body)
}

fn video_body(payload: &Value) -> Value {
    let body: Map<String, Value> = payload
        .as_object()
        .into_iter()
        .flatten()
        .filter(|(k, _)| k.as_str() != "historyId")
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    Value::Object(body)
}

// ---------------------------------------------------------------------------
// Adapter
// ---------------------------------------------------------------------------

enum Mode {
    Live {
        client: reqwest::Client,
        base_url: String,
        api_key: Option<String>,
        group_id: Option<String>,
    },
    Simulated(Arc<Simulator>),
}

/// Adapter for MiniMax video and music generation.
pub struct MinimaxAdapter {
    mode: Mode,
    /// Resolved outputs keyed by provider task id, held until fetched.
    resolved: Mutex<HashMap<String, Vec<ProviderAsset>>>,
}

impl MinimaxAdapter {
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        api_key: Option<String>,
        group_id: Option<String>,
    ) -> Self {
        Self::with_mode(Mode::Live {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            group_id,
        })
    }

    pub fn simulated(simulator: Arc<Simulator>) -> Self {
        Self::with_mode(Mode::Simulated(simulator))
    }

    fn with_mode(mode: Mode) -> Self {
        Self {
            mode,
            resolved: Mutex::new(HashMap::new()),
        }
    }

    fn cache(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<ProviderAsset>>> {
        self.resolved.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn bearer(api_key: &Option<String>) -> Result<String, ProviderError> {
        api_key
            .as_deref()
            .map(|k| format!("Bearer {k}"))
            .ok_or(ProviderError::NotConfigured("MINIMAX_API_KEY"))
    }

    async fn post_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &Value,
        simulated: impl FnOnce(&Simulator) -> Result<Value, ProviderError>,
    ) -> Result<T, ProviderError> {
        match &self.mode {
            Mode::Simulated(sim) => from_value(simulated(sim)?),
            Mode::Live {
                client,
                base_url,
                api_key,
                ..
            } => {
                let response = client
                    .post(format!("{base_url}/{path}"))
                    .header(reqwest::header::AUTHORIZATION, Self::bearer(api_key)?)
                    .json(body)
                    .send()
                    .await?;
                parse_response(response).await
            }
        }
    }

    async fn query_video(&self, task_id: &str) -> Result<QueryStatusResponse, ProviderError> {
        match &self.mode {
            Mode::Simulated(sim) => from_value(match sim.advance(task_id)? {
                SimulatedProgress::Running { .. } => json!({
                    "task_id": task_id,
                    "status": "Processing",
                    "base_resp": {"status_code": 0, "status_msg": "success"},
                }),
                SimulatedProgress::Finished => json!({
                    "task_id": task_id,
                    "status": "Success",
                    "file_id": format!("file-{task_id}"),
                    "base_resp": {"status_code": 0, "status_msg": "success"},
                }),
                SimulatedProgress::Failed(reason) => json!({
                    "task_id": task_id,
                    "status": "Fail",
                    "base_resp": {"status_code": 0, "status_msg": reason},
                }),
            }),
            Mode::Live {
                client,
                base_url,
                api_key,
                ..
            } => {
                let response = client
                    .get(format!("{base_url}/query/video_generation"))
                    .query(&[("task_id", task_id)])
                    .header(reqwest::header::AUTHORIZATION, Self::bearer(api_key)?)
                    .send()
                    .await?;
                parse_response(response).await
            }
        }
    }

    async fn retrieve_file(&self, file_id: &str) -> Result<ProviderAsset, ProviderError> {
        let raw: RetrieveFileResponse = match &self.mode {
            Mode::Simulated(sim) => {
                sim.record_file_retrieval();
                from_value(json!({
                    "file": {
                        "file_id": file_id,
                        "filename": "output.mp4",
                        "download_url": simulated_url("minimax", file_id, "mp4"),
                        "backup_download_url": simulated_url("minimax-backup", file_id, "mp4"),
                    },
                    "base_resp": {"status_code": 0, "status_msg": "success"},
                }))?
            }
            Mode::Live {
                client,
                base_url,
                api_key,
                group_id,
            } => {
                let group_id = group_id
                    .as_deref()
                    .ok_or(ProviderError::NotConfigured("MINIMAX_GROUP_ID"))?;
                let response = client
                    .get(format!("{base_url}/files/retrieve"))
                    .query(&[("GroupId", group_id), ("file_id", file_id)])
                    .header(reqwest::header::AUTHORIZATION, Self::bearer(api_key)?)
                    .send()
                    .await?;
                parse_response(response).await?
            }
        };

        raw.base_resp.check()?;
        let file = raw
            .file
            .filter(|f| !f.download_url.is_empty())
            .ok_or_else(|| ProviderError::Malformed(format!("file {file_id} has no download_url")))?;

        Ok(ProviderAsset {
            mime_type: mime_from_filename(&file.filename).map(str::to_string),
            url: file.download_url,
            backup_url: file.backup_download_url.filter(|u| !u.is_empty()),
        })
    }

    /// Query a video task and, on success, resolve and cache its output.
    async fn refresh_video(&self, provider_task_id: &str, task_id: &str) -> Result<PollStatus, ProviderError> {
        match classify(&self.query_video(task_id).await?)? {
            TaskState::Pending => Ok(PollStatus::pending()),
            TaskState::Processing => Ok(PollStatus::processing(None)),
            TaskState::Failed(reason) => Ok(PollStatus::failed(reason)),
            TaskState::Success { file_id } => {
                let asset = self.retrieve_file(&file_id).await?;
                tracing::debug!(task_id, file_id = %file_id, "Resolved minimax output file");
                self.cache().insert(provider_task_id.to_string(), vec![asset]);
                Ok(PollStatus::succeeded())
            }
        }
    }
}

fn from_value<T: serde::de::DeserializeOwned>(value: Value) -> Result<T, ProviderError> {
    serde_json::from_value(value).map_err(|e| ProviderError::Malformed(e.to_string()))
}

#[async_trait]
impl ProviderAdapter for MinimaxAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Minimax
    }

    async fn submit(&self, job_type: JobType, payload: &Value) -> Result<SubmitReceipt, ProviderError> {
        match job_type {
            JobType::Video => {
                let raw: CreateTaskResponse = self
                    .post_json("video_generation", &video_body(payload), |sim| {
                        Ok(json!({
                            "task_id": sim.create_task()?,
                            "base_resp": {"status_code": 0, "status_msg": "success"},
                        }))
                    })
                    .await?;
                raw.base_resp.check()?;
                if raw.task_id.is_empty() {
                    return Err(ProviderError::Malformed("response has no task_id".into()));
                }
                Ok(SubmitReceipt {
                    provider_task_id: format!("{VIDEO_PREFIX}{}", raw.task_id),
                })
            }
            JobType::Music => {
                let raw: MusicResponse = self
                    .post_json("music_generation", &music_body(payload), |sim| {
                        let trace_id = sim.create_task()?;
                        Ok(json!({
                            "data": {"audio": simulated_url("minimax", &trace_id, "mp3"), "status": 2},
                            "trace_id": trace_id,
                            "base_resp": {"status_code": 0, "status_msg": "success"},
                        }))
                    })
                    .await?;
                raw.base_resp.check()?;
                let audio = raw
                    .data
                    .and_then(|d| d.audio)
                    .filter(|a| !a.is_empty())
                    .ok_or_else(|| ProviderError::Malformed("music response has no audio".into()))?;

                let trace_id = raw
                    .trace_id
                    .unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string());
                let provider_task_id = format!("{MUSIC_PREFIX}{trace_id}");
                self.cache().insert(
                    provider_task_id.clone(),
                    vec![ProviderAsset::new(audio).with_mime_type("audio/mpeg")],
                );
                Ok(SubmitReceipt { provider_task_id })
            }
            JobType::Image => Err(ProviderError::Rejected(
                "minimax does not support image generation".into(),
            )),
        }
    }

    async fn poll_status(&self, provider_task_id: &str) -> Result<PollStatus, ProviderError> {
        let resolved = self.cache().contains_key(provider_task_id);
        if resolved {
            return Ok(PollStatus::succeeded());
        }
        if let Some(task_id) = provider_task_id.strip_prefix(VIDEO_PREFIX) {
            return self.refresh_video(provider_task_id, task_id).await;
        }
        if provider_task_id.starts_with(MUSIC_PREFIX) {
            return Ok(PollStatus::failed("music output is no longer available"));
        }
        Err(ProviderError::Malformed(format!(
            "invalid minimax task id: {provider_task_id}"
        )))
    }

    async fn fetch_result(&self, provider_task_id: &str) -> Result<Vec<ProviderAsset>, ProviderError> {
        let cached = self.cache().remove(provider_task_id);
        if let Some(assets) = cached {
            return Ok(assets);
        }
        // Not resolved by a poll in this process: query once more.
        if let Some(task_id) = provider_task_id.strip_prefix(VIDEO_PREFIX) {
            let status = self.refresh_video(provider_task_id, task_id).await?;
            let cached = self.cache().remove(provider_task_id);
            if let Some(assets) = cached {
                return Ok(assets);
            }
            tracing::debug!(provider_task_id, phase = ?status.phase, "Minimax result requested early");
        }
        Err(ProviderError::NotReady(provider_task_id.to_string()))
    }

    /// MiniMax has no cancel endpoint. Drops any output held for the task.
    async fn cancel(&self, provider_task_id: &str) -> Result<(), ProviderError> {
        let evicted = self.cache().remove(provider_task_id).is_some();
        tracing::debug!(provider_task_id, evicted, "Minimax task abandoned locally");
        if let Mode::Simulated(sim) = &self.mode {
            let raw = provider_task_id
                .strip_prefix(VIDEO_PREFIX)
                .or_else(|| provider_task_id.strip_prefix(MUSIC_PREFIX))
                .unwrap_or(provider_task_id);
            sim.cancel(raw);
        }
        Ok(())
    }
}
