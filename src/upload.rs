use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::assets::data_uri::DataUri;
use crate::assets::is_remote_reference;
use crate::error::UploadError;

/// Opaque object storage: takes an inline payload, returns a stable remote URL.
/// Each call is a single attempt.
#[async_trait]
pub trait AssetUploader: Send + Sync {
    async fn upload(&self, data_uri: &str, destination_hint: &str) -> Result<String, UploadError>;
}

/// Content-addressed destination for an inline payload, e.g.
/// `projects/12/annotations/3f2a...c1.png`.
pub fn destination_hint(project_id: &str, data_uri: &str) -> String {
    let digest = blake3::hash(data_uri.as_bytes()).to_hex();
    let ext = DataUri::parse(data_uri)
        .map(|u| u.extension())
        .unwrap_or("bin");
    format!(
        "projects/{}/annotations/{}.{}",
        project_id,
        &digest.as_str()[..32],
        ext
    )
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    url: String,
}

/// Uploads by `PUT`ting the decoded bytes to `<endpoint>/<hint>`.
pub struct HttpUploader {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpUploader {
    pub fn from_env() -> Result<Self> {
        let endpoint = dotenv::var("SYNC_UPLOAD_URL")
            .unwrap_or_else(|_| "http://localhost:3000/api/uploads".to_string());
        let api_key = dotenv::var("SYNC_UPLOAD_TOKEN")
            .or_else(|_| dotenv::var("SYNC_API_TOKEN"))
            .ok()
            .filter(|k| !k.is_empty());

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .context("Failed to create upload HTTP client")?;

        Ok(Self {
            client,
            endpoint,
            api_key,
        })
    }
}

#[async_trait]
impl AssetUploader for HttpUploader {
    async fn upload(&self, data_uri: &str, destination_hint: &str) -> Result<String, UploadError> {
        let uri = DataUri::parse(data_uri)
            .ok_or_else(|| UploadError::InvalidPayload("not a data URI".to_string()))?;
        let bytes = uri.decode()?;
        let size = bytes.len();

        let url = format!(
            "{}/{}",
            self.endpoint.trim_end_matches('/'),
            destination_hint.trim_start_matches('/')
        );
        let mut req = self
            .client
            .put(&url)
            .header("Content-Type", uri.media_type)
            .body(bytes);
        if let Some(key) = &self.api_key {
            req = req.header("Authorization", format!("Bearer {}", key));
        }

        let resp = req
            .send()
            .await
            .map_err(|e| UploadError::Transport(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(UploadError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        let body: UploadResponse = resp
            .json()
            .await
            .map_err(|e| UploadError::InvalidResponse(e.to_string()))?;
        if !is_remote_reference(&body.url) {
            return Err(UploadError::InvalidResponse(body.url));
        }
        debug!(hint = destination_hint, size, url = %body.url, "asset uploaded");
        Ok(body.url)
    }
}
