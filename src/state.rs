use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use sitesync::fallback::FallbackClient;
use sitesync::migration::MigrationPipeline;
use sitesync::remote::{HttpRemote, RemoteClient};
use sitesync::store::backend::CnidariumStore;
use sitesync::store::trim::TrimPolicy;
use sitesync::store::{QuotaStore, DEFAULT_CEILING};
use sitesync::upload::HttpUploader;

/// Runtime settings. Environment overrides the defaults.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub data_dir: PathBuf,
    pub ceiling_bytes: usize,
    pub upload_concurrency: usize,
    pub description_limit: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data/cache"),
            ceiling_bytes: DEFAULT_CEILING,
            upload_concurrency: 4,
            description_limit: 100,
        }
    }
}

impl SyncConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            data_dir: dotenv::var("SYNC_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            ceiling_bytes: env_number("SYNC_QUOTA_BYTES").unwrap_or(defaults.ceiling_bytes),
            upload_concurrency: env_number("SYNC_UPLOAD_CONCURRENCY")
                .filter(|n| *n > 0)
                .unwrap_or(defaults.upload_concurrency),
            description_limit: env_number("SYNC_DESCRIPTION_LIMIT")
                .unwrap_or(defaults.description_limit),
        }
    }

    pub fn trim_policy(&self) -> TrimPolicy {
        TrimPolicy {
            description_limit: self.description_limit,
            ..TrimPolicy::default()
        }
    }
}

fn env_number(name: &str) -> Option<usize> {
    dotenv::var(name).ok().and_then(|s| s.trim().parse::<usize>().ok())
}

pub struct AppState {
    pub store: Arc<QuotaStore>,
    pub remote: RemoteClient,
    pub fallback: Arc<FallbackClient>,
    pub pipeline: Arc<MigrationPipeline>,
    pub config: SyncConfig,
}

impl AppState {
    /// Open the durable cache and wire the HTTP clients from the environment.
    pub async fn init(config: SyncConfig) -> Result<Self> {
        let backend = CnidariumStore::open(&config.data_dir).await?;
        let store = Arc::new(
            QuotaStore::open(Arc::new(backend), config.ceiling_bytes, config.trim_policy())
                .await
                .context("Failed to open local cache")?,
        );
        info!(
            data_dir = ?config.data_dir,
            ceiling = config.ceiling_bytes,
            "Local cache initialized"
        );

        let remote = RemoteClient::new(Arc::new(HttpRemote::from_env()?));
        let uploader = Arc::new(HttpUploader::from_env()?);
        let fallback = Arc::new(FallbackClient::new(store.clone()));
        let pipeline = Arc::new(MigrationPipeline::new(
            store.clone(),
            uploader,
            config.upload_concurrency,
        ));

        Ok(Self {
            store,
            remote,
            fallback,
            pipeline,
            config,
        })
    }
}
