//! Task-polling video provider.

use std::sync::Arc;

use async_trait::async_trait;
use genq_core::{JobType, ProviderKind};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::adapter::{fraction_to_percent, PollStatus, ProviderAdapter, ProviderAsset, SubmitReceipt};
use crate::error::ProviderError;
use crate::http::{check_status, parse_response};
use crate::simulation::{simulated_url, SimulatedProgress, Simulator};

pub const DEFAULT_BASE_URL: &str = "https://api.dev.runwayml.com";
pub const API_VERSION: &str = "2024-11-06";

/// Pick the generation endpoint from the payload shape.
pub fn endpoint_for(payload: &Value) -> &'static str {
    if payload.get("videoUri").is_some() {
        "/v1/video_to_video"
    } else if payload.get("promptImage").is_some() {
        "/v1/image_to_video"
    } else {
        "/v1/text_to_video"
    }
}

#[derive(Debug, Deserialize)]
struct CreateTaskResponse {
    id: String,
}

/// Body of `GET /v1/tasks/{id}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunwayTask {
    pub status: String,
    /// Fraction in `0.0..=1.0`.
    #[serde(default)]
    pub progress: Option<f64>,
    #[serde(default)]
    pub output: Vec<String>,
    #[serde(default)]
    pub failure: Option<String>,
    #[serde(default)]
    pub failure_code: Option<String>,
}

pub fn map_status(task: &RunwayTask) -> Result<PollStatus, ProviderError> {
    match task.status.as_str() {
        "PENDING" | "THROTTLED" => Ok(PollStatus::pending()),
        "RUNNING" => Ok(PollStatus::processing(task.progress.map(fraction_to_percent))),
        "SUCCEEDED" => Ok(PollStatus::succeeded()),
        "FAILED" => Ok(PollStatus::failed(match (&task.failure, &task.failure_code) {
            (Some(failure), Some(code)) => format!("{failure} ({code})"),
            (Some(failure), None) => failure.clone(),
            (None, Some(code)) => code.clone(),
            (None, None) => "Unknown error".to_string(),
        })),
        "CANCELLED" => Ok(PollStatus::failed("task was cancelled upstream")),
        other => Err(ProviderError::Malformed(format!("unknown runway status: {other}"))),
    }
}

pub fn extract_assets(task: &RunwayTask) -> Result<Vec<ProviderAsset>, ProviderError> {
    if task.status != "SUCCEEDED" {
        return Err(ProviderError::NotReady(format!("task status is {}", task.status)));
    }
    if task.output.is_empty() {
        return Err(ProviderError::Malformed("succeeded task has no output".into()));
    }
    Ok(task
        .output
        .iter()
        .map(|url| ProviderAsset::new(url.clone()).with_mime_type("video/mp4"))
        .collect())
}

enum Mode {
    Live {
        client: reqwest::Client,
        base_url: String,
        api_key: Option<String>,
    },
    Simulated(Arc<Simulator>),
}

/// Adapter for Runway's task API.
pub struct RunwayAdapter {
    mode: Mode,
}

impl RunwayAdapter {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            mode: Mode::Live {
                client,
                base_url: base_url.into().trim_end_matches('/').to_string(),
                api_key,
            },
        }
    }

    pub fn simulated(simulator: Arc<Simulator>) -> Self {
        Self {
            mode: Mode::Simulated(simulator),
        }
    }

    fn request(
        client: &reqwest::Client,
        method: reqwest::Method,
        url: String,
        api_key: &Option<String>,
    ) -> Result<reqwest::RequestBuilder, ProviderError> {
        let key = api_key
            .as_deref()
            .ok_or(ProviderError::NotConfigured("RUNWAY_API_KEY"))?;
        Ok(client
            .request(method, url)
            .bearer_auth(key)
            .header("X-Runway-Version", API_VERSION))
    }

    async fn get_task(&self, task_id: &str, consume_poll: bool) -> Result<RunwayTask, ProviderError> {
        match &self.mode {
            Mode::Simulated(sim) => {
                let raw = if consume_poll {
                    match sim.advance(task_id)? {
                        SimulatedProgress::Running { percent } => json!({
                            "id": task_id,
                            "status": "RUNNING",
                            "progress": percent as f64 / 100.0,
                        }),
                        SimulatedProgress::Finished => Self::simulated_success(task_id),
                        SimulatedProgress::Failed(reason) => json!({
                            "id": task_id,
                            "status": "FAILED",
                            "failure": reason,
                        }),
                    }
                } else if sim.is_finished(task_id) {
                    Self::simulated_success(task_id)
                } else {
                    json!({"id": task_id, "status": "RUNNING"})
                };
                serde_json::from_value(raw).map_err(|e| ProviderError::Malformed(e.to_string()))
            }
            Mode::Live {
                client,
                base_url,
                api_key,
            } => {
                let response = Self::request(
                    client,
                    reqwest::Method::GET,
                    format!("{base_url}/v1/tasks/{task_id}"),
                    api_key,
                )?
                .send()
                .await?;
                parse_response(response).await
            }
        }
    }

    fn simulated_success(task_id: &str) -> Value {
        json!({
            "id": task_id,
            "status": "SUCCEEDED",
            "progress": 1.0,
            "output": [simulated_url("runway", task_id, "mp4")],
        })
    }
}

#[async_trait]
impl ProviderAdapter for RunwayAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Runway
    }

    async fn submit(&self, job_type: JobType, payload: &Value) -> Result<SubmitReceipt, ProviderError> {
        if job_type != JobType::Video {
            return Err(ProviderError::Rejected(format!(
                "runway does not support {job_type} generation"
            )));
        }

        let id = match &self.mode {
            Mode::Simulated(sim) => sim.create_task()?,
            Mode::Live {
                client,
                base_url,
                api_key,
            } => {
                let endpoint = endpoint_for(payload);
                let response = Self::request(
                    client,
                    reqwest::Method::POST,
                    format!("{base_url}{endpoint}"),
                    api_key,
                )?
                .json(payload)
                .send()
                .await?;
                let created: CreateTaskResponse = parse_response(response).await?;
                tracing::debug!(endpoint, task_id = %created.id, "Created runway task");
                created.id
            }
        };

        Ok(SubmitReceipt { provider_task_id: id })
    }

    async fn poll_status(&self, provider_task_id: &str) -> Result<PollStatus, ProviderError> {
        map_status(&self.get_task(provider_task_id, true).await?)
    }

    async fn fetch_result(&self, provider_task_id: &str) -> Result<Vec<ProviderAsset>, ProviderError> {
        extract_assets(&self.get_task(provider_task_id, false).await?)
    }

    async fn cancel(&self, provider_task_id: &str) -> Result<(), ProviderError> {
        match &self.mode {
            Mode::Simulated(sim) => {
                sim.cancel(provider_task_id);
                Ok(())
            }
            Mode::Live {
                client,
                base_url,
                api_key,
            } => {
                let response = Self::request(
                    client,
                    reqwest::Method::DELETE,
                    format!("{base_url}/v1/tasks/{provider_task_id}"),
                    api_key,
                )?
                .send()
                .await?;
                check_status(response).await
            }
        }
    }
}
