//! Durable storage for generated outputs.

use async_trait::async_trait;
use genq_core::JobType;
use serde::{Deserialize, Serialize};

/// Errors from an [`AssetStore`].
#[derive(Debug, thiserror::Error)]
pub enum AssetStoreError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Asset store error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("Asset rejected: {0}")]
    Rejected(String),
}

/// Copies a provider-hosted output into storage the caller controls.
#[async_trait]
pub trait AssetStore: Send + Sync {
    /// Store the file at `source_url` and return its durable URL.
    async fn upload(&self, source_url: &str, job_type: JobType) -> Result<String, AssetStoreError>;
}

/// Keeps provider URLs as the durable location.
#[derive(Debug, Default, Clone)]
pub struct PassthroughAssetStore;

#[async_trait]
impl AssetStore for PassthroughAssetStore {
    async fn upload(&self, source_url: &str, _job_type: JobType) -> Result<String, AssetStoreError> {
        if source_url.trim().is_empty() {
            return Err(AssetStoreError::Rejected("empty source url".into()));
        }
        Ok(source_url.to_string())
    }
}

#[derive(Serialize)]
struct UploadRequest<'a> {
    url: &'a str,
    kind: JobType,
}

#[derive(Deserialize)]
struct UploadResponse {
    url: String,
}

/// Uploads by asking an HTTP service to fetch and store the source URL.
///
/// `POST {endpoint}` with `{"url": ..., "kind": "image|video|music"}`,
/// expecting `{"url": ...}` back.
#[derive(Debug, Clone)]
pub struct HttpAssetStore {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpAssetStore {
    pub fn new(client: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl AssetStore for HttpAssetStore {
    async fn upload(&self, source_url: &str, job_type: JobType) -> Result<String, AssetStoreError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&UploadRequest {
                url: source_url,
                kind: job_type,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(AssetStoreError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let stored: UploadResponse = response.json().await?;
        if stored.url.is_empty() {
            return Err(AssetStoreError::Rejected("store returned an empty url".into()));
        }
        Ok(stored.url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[tokio::test]
    async fn passthrough_returns_source() {
        let store = PassthroughAssetStore;
        let url = store.upload("https://cdn/x.png", JobType::Image).await.unwrap();
        assert_eq!(url, "https://cdn/x.png");
        assert_matches!(
            store.upload(" ", JobType::Image).await,
            Err(AssetStoreError::Rejected(_))
        );
    }

    #[test]
    fn upload_request_shape() {
        let body = serde_json::to_value(UploadRequest {
            url: "https://cdn/a.mp4",
            kind: JobType::Video,
        })
        .unwrap();
        assert_eq!(body, serde_json::json!({"url": "https://cdn/a.mp4", "kind": "video"}));
    }
}
