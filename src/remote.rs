use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::error::RemoteError;

/// The authoritative REST-shaped resource API.
#[async_trait]
pub trait RemoteApi: Send + Sync {
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, RemoteError>;
}

/// Typed convenience layer over a [`RemoteApi`].
#[derive(Clone)]
pub struct RemoteClient {
    api: Arc<dyn RemoteApi>,
}

impl RemoteClient {
    pub fn new(api: Arc<dyn RemoteApi>) -> Self {
        Self { api }
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, RemoteError> {
        let value = self.api.request(Method::GET, path, None).await?;
        decode(path, value)
    }

    pub async fn post<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, RemoteError> {
        let value = self.api.request(Method::POST, path, Some(encode(body)?)).await?;
        decode(path, value)
    }

    pub async fn put<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, RemoteError> {
        let value = self.api.request(Method::PUT, path, Some(encode(body)?)).await?;
        decode(path, value)
    }

    pub async fn delete(&self, path: &str) -> Result<(), RemoteError> {
        self.api.request(Method::DELETE, path, None).await?;
        Ok(())
    }
}

fn encode<B: Serialize>(body: &B) -> Result<Value, RemoteError> {
    serde_json::to_value(body).map_err(|e| RemoteError::Encode(e.to_string()))
}

// A body we cannot read is no better than no answer.
fn decode<T: DeserializeOwned>(path: &str, value: Value) -> Result<T, RemoteError> {
    serde_json::from_value(value)
        .map_err(|e| RemoteError::Unavailable(format!("malformed response from {}: {}", path, e)))
}

/// HTTP implementation on reqwest.
pub struct HttpRemote {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpRemote {
    pub fn from_env() -> Result<Self> {
        let base_url = dotenv::var("SYNC_API_BASE_URL")
            .unwrap_or_else(|_| "http://localhost:3000/api".to_string());
        let api_key = dotenv::var("SYNC_API_TOKEN").ok().filter(|k| !k.is_empty());
        let timeout_secs = dotenv::var("SYNC_API_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(15);

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url,
            api_key,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

#[async_trait]
impl RemoteApi for HttpRemote {
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, RemoteError> {
        let mut req = self.client.request(method.clone(), self.endpoint(path));
        if let Some(key) = &self.api_key {
            req = req.header("Authorization", format!("Bearer {}", key));
        }
        if let Some(body) = &body {
            req = req.json(body);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| RemoteError::Unavailable(e.to_string()))?;
        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| RemoteError::Unavailable(format!("failed to read response: {}", e)))?;
        debug!(%method, path, status = status.as_u16(), len = text.len(), "remote response");

        if !status.is_success() {
            return Err(RemoteError::from_status(status.as_u16(), text));
        }
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text)
            .map_err(|e| RemoteError::Unavailable(format!("malformed JSON from {}: {}", path, e)))
    }
}
