//! Queue-based image/video provider.
//!
//! Requests are submitted to a model endpoint and tracked by the request
//! id the queue hands back. Because status and result URLs are scoped by
//! endpoint, the provider task id stores both as `"{endpoint}#{request_id}"`.
//!
//! Image jobs pick one of three variants from the payload:
//!
//! | Variant  | Trigger                                   | Endpoint                          |
//! |----------|-------------------------------------------|-----------------------------------|
//! | Upscale  | `image_url` + numeric `upscale_factor`    | [`UPSCALE_ENDPOINT`]              |
//! | Edit     | non-empty `uploadedImages`/`image_urls`   | [`EDIT_ENDPOINT`]                 |
//! | Generate | otherwise                                 | [`IMAGE_ENDPOINT`]                |

use std::sync::Arc;

use async_trait::async_trait;
use genq_core::validation::is_upscale_request;
use genq_core::{JobType, ProviderKind};
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::adapter::{PollStatus, ProviderAdapter, ProviderAsset, SubmitReceipt};
use crate::error::ProviderError;
use crate::http::{check_status, parse_response};
use crate::simulation::{simulated_url, SimulatedProgress, Simulator};

pub const DEFAULT_QUEUE_URL: &str = "https://queue.fal.run";
pub const IMAGE_ENDPOINT: &str = "fal-ai/gemini-25-flash-image";
pub const EDIT_ENDPOINT: &str = "fal-ai/gemini-25-flash-image/edit";
pub const UPSCALE_ENDPOINT: &str = "fal-ai/topaz/upscale/image";
pub const VIDEO_ENDPOINT: &str = "fal-ai/veo3/fast";

/// Reference images beyond this count are dropped on edit requests.
const MAX_EDIT_IMAGES: usize = 4;

/// Payload keys that steer routing and are never forwarded upstream.
const CONTROL_KEYS: &[&str] = &["model", "n", "uploadedImages", "historyId"];

// ---------------------------------------------------------------------------
// Request building
// ---------------------------------------------------------------------------

/// The upstream call derived from a job payload.
#[derive(Debug, Clone, PartialEq)]
pub struct FalRequest {
    pub endpoint: String,
    pub input: Value,
}

/// Choose the endpoint and build the upstream input for a job.
pub fn build_request(job_type: JobType, payload: &Value) -> Result<FalRequest, ProviderError> {
    let map = payload
        .as_object()
        .ok_or_else(|| ProviderError::Rejected("payload must be a JSON object".into()))?;

    match job_type {
        JobType::Image if is_upscale_request(map) => Ok(FalRequest {
            endpoint: UPSCALE_ENDPOINT.to_string(),
            input: upscale_input(map),
        }),
        JobType::Image => image_request(map),
        JobType::Video => Ok(video_request(map)),
        JobType::Music => Err(ProviderError::Rejected(
            "fal does not support music generation".into(),
        )),
    }
}

fn upscale_input(map: &Map<String, Value>) -> Value {
    let get = |key: &str, default: Value| map.get(key).cloned().unwrap_or(default);
    json!({
        "image_url": get("image_url", Value::Null),
        "model": get("model", json!("Standard V2")),
        "upscale_factor": get("upscale_factor", json!(2)),
        "output_format": get("output_format", json!("jpeg")),
        "subject_detection": get("subject_detection", json!("All")),
        "face_enhancement": get("face_enhancement", json!(true)),
        "face_enhancement_creativity": get("face_enhancement_creativity", json!(0)),
        "face_enhancement_strength": get("face_enhancement_strength", json!(0.8)),
    })
}

fn image_request(map: &Map<String, Value>) -> Result<FalRequest, ProviderError> {
    let prompt = map
        .get("prompt")
        .and_then(Value::as_str)
        .filter(|p| !p.trim().is_empty())
        .ok_or_else(|| ProviderError::Rejected("prompt is required".into()))?;

    let references: Vec<Value> = ["uploadedImages", "image_urls"]
        .iter()
        .filter_map(|key| map.get(*key).and_then(Value::as_array))
        .flatten()
        .take(MAX_EDIT_IMAGES)
        .cloned()
        .collect();

    let mut input = json!({
        "prompt": prompt,
        "output_format": map.get("output_format").cloned().unwrap_or(json!("jpeg")),
        "num_images": 1,
    });

    let endpoint = if references.is_empty() {
        IMAGE_ENDPOINT
    } else {
        input["image_urls"] = Value::Array(references);
        EDIT_ENDPOINT
    };

    Ok(FalRequest {
        endpoint: endpoint.to_string(),
        input,
    })
}

fn video_request(map: &Map<String, Value>) -> FalRequest {
    let endpoint = map
        .get("model")
        .and_then(Value::as_str)
        .filter(|m| m.starts_with("fal-ai/"))
        .unwrap_or(VIDEO_ENDPOINT);

    let input: Map<String, Value> = map
        .iter()
        .filter(|(k, _)| !CONTROL_KEYS.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    FalRequest {
        endpoint: endpoint.to_string(),
        input: Value::Object(input),
    }
}

// ---------------------------------------------------------------------------
// Task ids
// ---------------------------------------------------------------------------

pub fn encode_task_id(endpoint: &str, request_id: &str) -> String {
    format!("{endpoint}#{request_id}")
}

/// Split a provider task id into `(endpoint, request_id)`.
pub fn decode_task_id(task_id: &str) -> Result<(&str, &str), ProviderError> {
    task_id
        .rsplit_once('#')
        .filter(|(endpoint, id)| !endpoint.is_empty() && !id.is_empty())
        .ok_or_else(|| ProviderError::Malformed(format!("invalid fal task id: {task_id}")))
}

/// The `owner/app` prefix of an endpoint such as `fal-ai/topaz/upscale/image`.
///
/// Submission goes to the full endpoint, but status, result and cancel
/// URLs are scoped by app id.
pub fn app_id(endpoint: &str) -> &str {
    let mut slashes = endpoint.match_indices('/').map(|(i, _)| i);
    match (slashes.next(), slashes.next()) {
        (Some(_), Some(end)) => &endpoint[..end],
        _ => endpoint,
    }
}

// ---------------------------------------------------------------------------
// Response mapping
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    request_id: String,
}

/// Body of `GET .../requests/{id}/status`.
#[derive(Debug, Clone, Deserialize)]
pub struct FalStatusResponse {
    pub status: String,
    #[serde(default)]
    pub queue_position: Option<u32>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Normalize a queue status. The queue reports no percentage.
pub fn map_status(response: &FalStatusResponse) -> Result<PollStatus, ProviderError> {
    match response.status.as_str() {
        "IN_QUEUE" => Ok(PollStatus::pending()),
        "IN_PROGRESS" => Ok(PollStatus::processing(None)),
        "COMPLETED" => Ok(match &response.error {
            Some(error) => PollStatus::failed(error.clone()),
            None => PollStatus::succeeded(),
        }),
        "ERROR" | "FAILED" => Ok(PollStatus::failed(
            response
                .error
                .clone()
                .unwrap_or_else(|| "request failed".to_string()),
        )),
        other => Err(ProviderError::Malformed(format!("unknown fal status: {other}"))),
    }
}

/// Collect output files from a result body.
///
/// Generation endpoints return an `images` array; upscale returns a
/// single `image`; video endpoints return `video`.
pub fn extract_assets(body: &Value) -> Result<Vec<ProviderAsset>, ProviderError> {
    let mut files: Vec<&Value> = body
        .get("images")
        .and_then(Value::as_array)
        .map(|a| a.iter().collect())
        .unwrap_or_default();
    for key in ["image", "video", "audio_file"] {
        if let Some(file) = body.get(key).filter(|v| v.is_object()) {
            files.push(file);
        }
    }

    let assets: Vec<ProviderAsset> = files
        .into_iter()
        .filter_map(|file| {
            let url = file.get("url")?.as_str()?;
            let mut asset = ProviderAsset::new(url);
            asset.mime_type = file
                .get("content_type")
                .and_then(Value::as_str)
                .map(str::to_string);
            Some(asset)
        })
        .collect();

    if assets.is_empty() {
        return Err(ProviderError::Malformed("fal result contains no files".into()));
    }
    Ok(assets)
}

// ---------------------------------------------------------------------------
// Adapter
// ---------------------------------------------------------------------------

enum Mode {
    Live {
        client: reqwest::Client,
        queue_url: String,
        key: Option<String>,
    },
    Simulated(Arc<Simulator>),
}

/// Adapter for the fal request queue.
pub struct FalQueueAdapter {
    mode: Mode,
}

impl FalQueueAdapter {
    pub fn new(client: reqwest::Client, queue_url: impl Into<String>, key: Option<String>) -> Self {
        Self {
            mode: Mode::Live {
                client,
                queue_url: queue_url.into().trim_end_matches('/').to_string(),
                key,
            },
        }
    }

    pub fn simulated(simulator: Arc<Simulator>) -> Self {
        Self {
            mode: Mode::Simulated(simulator),
        }
    }

    fn authorization(key: &Option<String>) -> Result<String, ProviderError> {
        key.as_deref()
            .map(|k| format!("Key {k}"))
            .ok_or(ProviderError::NotConfigured("FAL_KEY"))
    }

    fn simulated_status(sim: &Simulator, request_id: &str) -> Result<Value, ProviderError> {
        Ok(match sim.advance(request_id)? {
            SimulatedProgress::Running { .. } => json!({"status": "IN_PROGRESS", "logs": []}),
            SimulatedProgress::Finished => json!({"status": "COMPLETED"}),
            SimulatedProgress::Failed(error) => json!({"status": "COMPLETED", "error": error}),
        })
    }

    fn simulated_result(endpoint: &str, request_id: &str) -> Value {
        if endpoint == UPSCALE_ENDPOINT {
            json!({"image": {"url": simulated_url("fal", request_id, "jpeg"), "content_type": "image/jpeg"}})
        } else if endpoint.contains("video") || endpoint.contains("veo") {
            json!({"video": {"url": simulated_url("fal", request_id, "mp4"), "content_type": "video/mp4"}})
        } else {
            json!({"images": [{"url": simulated_url("fal", request_id, "jpeg"), "content_type": "image/jpeg"}]})
        }
    }
}

#[async_trait]
impl ProviderAdapter for FalQueueAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Fal
    }

    async fn submit(&self, job_type: JobType, payload: &Value) -> Result<SubmitReceipt, ProviderError> {
        let request = build_request(job_type, payload)?;

        let request_id = match &self.mode {
            Mode::Simulated(sim) => sim.create_task()?,
            Mode::Live {
                client,
                queue_url,
                key,
            } => {
                let response = client
                    .post(format!("{queue_url}/{}", request.endpoint))
                    .header(reqwest::header::AUTHORIZATION, Self::authorization(key)?)
                    .json(&request.input)
                    .send()
                    .await?;
                parse_response::<SubmitResponse>(response).await?.request_id
            }
        };

        tracing::debug!(endpoint = %request.endpoint, request_id = %request_id, "Submitted fal request");
        Ok(SubmitReceipt {
            provider_task_id: encode_task_id(&request.endpoint, &request_id),
        })
    }

    async fn poll_status(&self, provider_task_id: &str) -> Result<PollStatus, ProviderError> {
        let (endpoint, request_id) = decode_task_id(provider_task_id)?;

        let raw: FalStatusResponse = match &self.mode {
            Mode::Simulated(sim) => serde_json::from_value(Self::simulated_status(sim, request_id)?)
                .map_err(|e| ProviderError::Malformed(e.to_string()))?,
            Mode::Live {
                client,
                queue_url,
                key,
            } => {
                let response = client
                    .get(format!("{queue_url}/{}/requests/{request_id}/status", app_id(endpoint)))
                    .header(reqwest::header::AUTHORIZATION, Self::authorization(key)?)
                    .send()
                    .await?;
                parse_response(response).await?
            }
        };

        map_status(&raw)
    }

    async fn fetch_result(&self, provider_task_id: &str) -> Result<Vec<ProviderAsset>, ProviderError> {
        let (endpoint, request_id) = decode_task_id(provider_task_id)?;

        let body: Value = match &self.mode {
            Mode::Simulated(sim) => {
                if !sim.is_finished(request_id) {
                    return Err(ProviderError::NotReady(provider_task_id.to_string()));
                }
                Self::simulated_result(endpoint, request_id)
            }
            Mode::Live {
                client,
                queue_url,
                key,
            } => {
                let response = client
                    .get(format!("{queue_url}/{}/requests/{request_id}", app_id(endpoint)))
                    .header(reqwest::header::AUTHORIZATION, Self::authorization(key)?)
                    .send()
                    .await?;
                parse_response(response).await?
            }
        };

        extract_assets(&body)
    }

    async fn cancel(&self, provider_task_id: &str) -> Result<(), ProviderError> {
        let (endpoint, request_id) = decode_task_id(provider_task_id)?;
        match &self.mode {
            Mode::Simulated(sim) => {
                sim.cancel(request_id);
                Ok(())
            }
            Mode::Live {
                client,
                queue_url,
                key,
            } => {
                let response = client
                    .put(format!("{queue_url}/{}/requests/{request_id}/cancel", app_id(endpoint)))
                    .header(reqwest::header::AUTHORIZATION, Self::authorization(key)?)
                    .send()
                    .await?;
                check_status(response).await
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
