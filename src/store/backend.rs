use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cnidarium::{StateDelta, StateRead, StateWrite, Storage};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// One stored value as seen by [`LocalStore::entries`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEntry {
    pub key: String,
    /// Byte length of the value.
    pub size: usize,
    /// `None` for entries written before write times were recorded.
    pub written_at: Option<DateTime<Utc>>,
}

/// The local persistent key/value store the cache sits on.
/// Values are serialized JSON strings, like browser local storage.
#[async_trait]
pub trait LocalStore: Send + Sync {
    async fn get_item(&self, key: &str) -> Result<Option<String>>;
    async fn set_item(&self, key: &str, value: String, written_at: DateTime<Utc>) -> Result<()>;
    async fn remove_item(&self, key: &str) -> Result<()>;
    async fn entries(&self) -> Result<Vec<StoredEntry>>;
}

/// Non-durable backend. State is lost when the process exits.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<HashMap<String, (String, DateTime<Utc>)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LocalStore for MemoryStore {
    async fn get_item(&self, key: &str) -> Result<Option<String>> {
        Ok(self.inner.read().await.get(key).map(|(v, _)| v.clone()))
    }

    async fn set_item(&self, key: &str, value: String, written_at: DateTime<Utc>) -> Result<()> {
        self.inner
            .write()
            .await
            .insert(key.to_string(), (value, written_at));
        Ok(())
    }

    async fn remove_item(&self, key: &str) -> Result<()> {
        self.inner.write().await.remove(key);
        Ok(())
    }

    async fn entries(&self) -> Result<Vec<StoredEntry>> {
        Ok(self
            .inner
            .read()
            .await
            .iter()
            .map(|(k, (v, at))| StoredEntry {
                key: k.clone(),
                size: v.len(),
                written_at: Some(*at),
            })
            .collect())
    }
}

// Key prefixes, no trailing slash. Values live under `cache/`, write times
// under `meta/` so the cache namespace holds nothing but values.
const CACHE_PREFIX: &str = "cache";
const META_PREFIX: &str = "meta";

fn cache_key(key: &str) -> String {
    format!("{}/{}", CACHE_PREFIX, key)
}

fn meta_key(key: &str) -> String {
    format!("{}/{}", META_PREFIX, key)
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EntryMeta {
    written_at: DateTime<Utc>,
}

/// Durable backend on a cnidarium store in a data directory.
pub struct CnidariumStore {
    storage: Storage,
}

impl CnidariumStore {
    pub async fn open(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        let storage = Storage::load(data_dir.to_path_buf(), vec![CACHE_PREFIX.to_string()])
            .await
            .context("Failed to init cnidarium storage")?;
        Ok(Self { storage })
    }

    async fn written_times(&self) -> HashMap<String, DateTime<Utc>> {
        let snapshot = self.storage.latest_snapshot();
        let prefix = format!("{}/", META_PREFIX);
        let mut stream = snapshot.prefix_raw(&prefix);
        let mut times = HashMap::new();

        while let Some(entry) = stream.next().await {
            let (key, value) = match entry {
                Ok(kv) => kv,
                Err(e) => {
                    warn!("Error reading cache metadata stream: {}", e);
                    continue;
                }
            };
            let Some(name) = key.strip_prefix(&prefix) else {
                continue;
            };
            match serde_json::from_slice::<EntryMeta>(&value) {
                Ok(meta) => {
                    times.insert(name.to_string(), meta.written_at);
                }
                Err(e) => warn!(key = name, error = %e, "unreadable cache metadata"),
            }
        }

        times
    }
}

#[async_trait]
impl LocalStore for CnidariumStore {
    async fn get_item(&self, key: &str) -> Result<Option<String>> {
        let snapshot = self.storage.latest_snapshot();
        let Some(bytes) = snapshot.get_raw(&cache_key(key)).await? else {
            return Ok(None);
        };
        let value = String::from_utf8(bytes).context("cache value is not UTF-8")?;
        Ok(Some(value))
    }

    async fn set_item(&self, key: &str, value: String, written_at: DateTime<Utc>) -> Result<()> {
        let meta = serde_json::to_vec(&EntryMeta { written_at })?;
        let snapshot = self.storage.latest_snapshot();
        let mut delta = StateDelta::new(snapshot);
        let size = value.len();
        delta.put_raw(cache_key(key), value.into_bytes());
        delta.put_raw(meta_key(key), meta);
        self.storage.commit(delta).await?;
        debug!(key, size, "cache item committed");
        Ok(())
    }

    async fn remove_item(&self, key: &str) -> Result<()> {
        let snapshot = self.storage.latest_snapshot();
        let mut delta = StateDelta::new(snapshot);
        delta.delete(cache_key(key));
        delta.delete(meta_key(key));
        self.storage.commit(delta).await?;
        debug!(key, "cache item removed");
        Ok(())
    }

    async fn entries(&self) -> Result<Vec<StoredEntry>> {
        let mut times = self.written_times().await;
        let snapshot = self.storage.latest_snapshot();
        let prefix = format!("{}/", CACHE_PREFIX);
        let mut stream = snapshot.prefix_raw(&prefix);
        let mut results = Vec::new();

        while let Some(entry) = stream.next().await {
            match entry {
                Ok((key, value)) => {
                    if let Some(name) = key.strip_prefix(&prefix) {
                        results.push(StoredEntry {
                            key: name.to_string(),
                            size: value.len(),
                            written_at: times.remove(name),
                        });
                    }
                }
                Err(e) => {
                    warn!("Error reading cache entry stream: {}", e);
                }
            }
        }

        Ok(results)
    }
}
