//! Enqueue payload validation.
//!
//! Payloads are opaque to the queue, but each provider family needs a
//! minimal shape before a job can be accepted. Anything failing these
//! checks is rejected synchronously and no job is created.

use serde_json::{Map, Value};

use crate::error::CoreError;
use crate::job::{JobType, ProviderKind};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Music prompt length bounds (characters, trimmed).
pub const MUSIC_PROMPT_MIN: usize = 10;
pub const MUSIC_PROMPT_MAX: usize = 300;

/// Music lyrics length bounds (characters, trimmed).
pub const MUSIC_LYRICS_MIN: usize = 10;
pub const MUSIC_LYRICS_MAX: usize = 600;

/// Maximum serialized payload size accepted for a job (1 MiB).
pub const MAX_PAYLOAD_BYTES: usize = 1024 * 1024;

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Validate an enqueue request for `provider` generating `job_type`.
pub fn validate_payload(
    job_type: JobType,
    provider: ProviderKind,
    payload: &Value,
) -> Result<(), CoreError> {
    if !provider.supports(job_type) {
        return Err(CoreError::Validation(format!(
            "Provider '{provider}' cannot generate {job_type} jobs"
        )));
    }

    let obj = payload
        .as_object()
        .ok_or_else(|| CoreError::Validation("Payload must be a JSON object".into()))?;
    if obj.is_empty() {
        return Err(CoreError::Validation("Payload must not be empty".into()));
    }
    let size = payload.to_string().len();
    if size > MAX_PAYLOAD_BYTES {
        return Err(CoreError::Validation(format!(
            "Payload too large: {size} bytes (max {MAX_PAYLOAD_BYTES})"
        )));
    }

    match provider {
        ProviderKind::Fal => validate_queue_request(obj),
        ProviderKind::Minimax => validate_task_file_request(job_type, obj),
        ProviderKind::Runway => validate_task_request(obj),
    }
}

/// An upscale request carries a source image and a numeric factor.
pub fn is_upscale_request(obj: &Map<String, Value>) -> bool {
    obj.get("image_url").is_some_and(Value::is_string)
        && obj.get("upscale_factor").is_some_and(Value::is_number)
}

// ---------------------------------------------------------------------------
// Per-provider shapes
// ---------------------------------------------------------------------------

fn validate_queue_request(obj: &Map<String, Value>) -> Result<(), CoreError> {
    if is_upscale_request(obj) {
        return require_string_field(obj, "image_url");
    }
    require_string_field(obj, "prompt")?;
    for key in ["image_urls", "uploadedImages"] {
        if let Some(value) = obj.get(key) {
            require_string_array(value, key)?;
        }
    }
    Ok(())
}

fn validate_task_file_request(job_type: JobType, obj: &Map<String, Value>) -> Result<(), CoreError> {
    require_string_field(obj, "model")?;
    if job_type == JobType::Music {
        require_trimmed_len(obj, "prompt", MUSIC_PROMPT_MIN, MUSIC_PROMPT_MAX)?;
        require_trimmed_len(obj, "lyrics", MUSIC_LYRICS_MIN, MUSIC_LYRICS_MAX)?;
    }
    Ok(())
}

fn validate_task_request(obj: &Map<String, Value>) -> Result<(), CoreError> {
    require_string_field(obj, "model")?;
    let has_text = obj
        .get("promptText")
        .and_then(Value::as_str)
        .is_some_and(|s| !s.trim().is_empty());
    let has_image = obj
        .get("promptImage")
        .and_then(Value::as_str)
        .is_some_and(|s| !s.trim().is_empty());
    if !has_text && !has_image {
        return Err(CoreError::Validation(
            "Request requires 'promptText' or 'promptImage'".into(),
        ));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Helper: ensure an object has a non-empty string field.
fn require_string_field(obj: &Map<String, Value>, field: &str) -> Result<(), CoreError> {
    match obj.get(field) {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(()),
        _ => Err(CoreError::Validation(format!(
            "Payload requires a non-empty string field '{field}'"
        ))),
    }
}

fn require_string_array(value: &Value, field: &str) -> Result<(), CoreError> {
    let ok = value
        .as_array()
        .is_some_and(|items| items.iter().all(Value::is_string));
    if ok {
        Ok(())
    } else {
        Err(CoreError::Validation(format!(
            "Field '{field}' must be an array of strings"
        )))
    }
}

fn require_trimmed_len(
    obj: &Map<String, Value>,
    field: &str,
    min: usize,
    max: usize,
) -> Result<(), CoreError> {
    let len = obj
        .get(field)
        .and_then(Value::as_str)
        .map(|s| s.trim().chars().count())
        .unwrap_or(0);
    if (min..=max).contains(&len) {
        Ok(())
    } else {
        Err(CoreError::Validation(format!(
            "Field '{field}' must be {min}-{max} characters, got {len}"
        )))
    }
}
