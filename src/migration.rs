use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use crate::assets::{self, is_remote_reference, AssetPath, Document};
use crate::error::{SyncError, UploadError};
use crate::resources::ResourceKind;
use crate::store::QuotaStore;
use crate::upload::{destination_hint, AssetUploader};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationState {
    NotStarted,
    Scanning,
    Uploading,
    Rewriting,
    NoChanges,
    Cancelled,
    Done,
}

impl fmt::Display for MigrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MigrationState::NotStarted => "not-started",
            MigrationState::Scanning => "scanning",
            MigrationState::Uploading => "uploading",
            MigrationState::Rewriting => "rewriting",
            MigrationState::NoChanges => "no-changes",
            MigrationState::Cancelled => "cancelled",
            MigrationState::Done => "done",
        };
        f.write_str(name)
    }
}

/// Result of migrating one asset reference during one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationRecord {
    pub document_id: String,
    pub path: AssetPath,
    pub source_ref: String,
    pub dest_ref: Option<String>,
    pub succeeded: bool,
    /// Why it did not migrate; `None` on success.
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationOutcome {
    /// At least one reference was rewritten and persisted.
    Migrated,
    /// Nothing to migrate, or nothing could be migrated. Nothing was written.
    NoChanges,
    /// Stopped before rewriting. Nothing was written.
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct MigrationSummary {
    pub project_id: String,
    pub outcome: MigrationOutcome,
    pub migrated_count: usize,
    pub failed_count: usize,
    pub records: Vec<MigrationRecord>,
    /// Every state the run went through, in order.
    pub states: Vec<MigrationState>,
}

impl MigrationSummary {
    pub fn nothing_to_migrate(&self) -> bool {
        self.outcome == MigrationOutcome::NoChanges && self.records.is_empty()
    }
}

/// Cooperative cancellation, checked before each upload starts.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

struct Run {
    project_id: String,
    states: Vec<MigrationState>,
}

impl Run {
    fn new(project_id: &str) -> Self {
        Self {
            project_id: project_id.to_string(),
            states: vec![MigrationState::NotStarted],
        }
    }

    fn enter(&mut self, state: MigrationState) {
        debug!(project_id = %self.project_id, %state, "migration state");
        self.states.push(state);
    }

    fn finish(mut self, outcome: MigrationOutcome, records: Vec<MigrationRecord>) -> MigrationSummary {
        if outcome != MigrationOutcome::Cancelled {
            self.enter(MigrationState::Done);
        }
        let migrated_count = records.iter().filter(|r| r.succeeded).count();
        let failed_count = records
            .iter()
            .filter(|r| !r.succeeded && r.error.is_some())
            .count();
        MigrationSummary {
            project_id: self.project_id,
            outcome,
            migrated_count,
            failed_count,
            records,
            states: self.states,
        }
    }
}

/// Uploads a project's inline annotation assets and rewrites their references.
pub struct MigrationPipeline {
    store: Arc<QuotaStore>,
    uploader: Arc<dyn AssetUploader>,
    concurrency: usize,
}

impl MigrationPipeline {
    pub fn new(store: Arc<QuotaStore>, uploader: Arc<dyn AssetUploader>, concurrency: usize) -> Self {
        Self {
            store,
            uploader,
            concurrency: concurrency.max(1),
        }
    }

    pub async fn run(&self, project_id: &str) -> Result<MigrationSummary, SyncError> {
        self.run_with_cancel(project_id, &CancelFlag::new()).await
    }

    /// Migrate several projects concurrently. Each result is independent.
    pub async fn run_many(
        &self,
        project_ids: &[String],
        cancel: &CancelFlag,
    ) -> Vec<(String, Result<MigrationSummary, SyncError>)> {
        let runs = project_ids
            .iter()
            .map(|id| async move { (id.clone(), self.run_with_cancel(id, cancel).await) });
        futures::future::join_all(runs).await
    }

    pub async fn run_with_cancel(
        &self,
        project_id: &str,
        cancel: &CancelFlag,
    ) -> Result<MigrationSummary, SyncError> {
        let mut run = Run::new(project_id);
        let key = ResourceKind::Annotations(project_id.to_string()).cache_key();

        run.enter(MigrationState::Scanning);
        let documents: Vec<Document> = self.store.get(&key).await?.unwrap_or_default();
        let found: Vec<(String, assets::InlineAsset)> = documents
            .iter()
            .flat_map(|doc| {
                assets::find_inline_assets(doc)
                    .into_iter()
                    .map(move |asset| (doc.id.clone(), asset))
            })
            .collect();

        if found.is_empty() {
            run.enter(MigrationState::NoChanges);
            debug!(project_id, "nothing to migrate");
            return Ok(run.finish(MigrationOutcome::NoChanges, Vec::new()));
        }

        // Identical payloads are uploaded once and share the result.
        let mut payloads: Vec<String> = Vec::new();
        let mut payload_index: HashMap<&str, usize> = HashMap::new();
        for (_, asset) in &found {
            if !payload_index.contains_key(asset.value.as_str()) {
                payload_index.insert(asset.value.as_str(), payloads.len());
                payloads.push(asset.value.clone());
            }
        }

        run.enter(MigrationState::Uploading);
        info!(
            project_id,
            references = found.len(),
            uploads = payloads.len(),
            "migrating inline assets"
        );
        let mut uploaded: Vec<Option<Result<String, UploadError>>> = vec![None; payloads.len()];
        let results: Vec<(usize, Option<Result<String, UploadError>>)> =
            stream::iter(payloads.iter().enumerate())
                .map(|(i, payload)| async move {
                    if cancel.is_cancelled() {
                        return (i, None);
                    }
                    (i, Some(self.upload_one(project_id, payload).await))
                })
                .buffer_unordered(self.concurrency)
                .collect()
                .await;
        for (i, result) in results {
            uploaded[i] = result;
        }

        let records: Vec<MigrationRecord> = found
            .iter()
            .map(|(document_id, asset)| {
                let outcome = &uploaded[payload_index[asset.value.as_str()]];
                let (dest_ref, error) = match outcome {
                    Some(Ok(url)) => (Some(url.clone()), None),
                    Some(Err(e)) => (None, Some(e.to_string())),
                    None => (None, None),
                };
                MigrationRecord {
                    document_id: document_id.clone(),
                    path: asset.path,
                    source_ref: asset.value.clone(),
                    succeeded: dest_ref.is_some(),
                    dest_ref,
                    error,
                }
            })
            .collect();
        for record in records.iter().filter(|r| r.error.is_some()) {
            warn!(
                project_id,
                document_id = %record.document_id,
                path = %record.path,
                error = record.error.as_deref().unwrap_or_default(),
                "asset upload failed"
            );
        }

        if cancel.is_cancelled() {
            run.enter(MigrationState::Cancelled);
            info!(project_id, "migration cancelled before rewriting");
            return Ok(run.finish(MigrationOutcome::Cancelled, records));
        }

        let resolved: HashMap<&str, &str> = payloads
            .iter()
            .zip(&uploaded)
            .filter_map(|(payload, outcome)| match outcome {
                Some(Ok(url)) => Some((payload.as_str(), url.as_str())),
                _ => None,
            })
            .collect();
        if resolved.is_empty() {
            run.enter(MigrationState::NoChanges);
            warn!(project_id, failed = records.len(), "no asset could be migrated");
            return Ok(run.finish(MigrationOutcome::NoChanges, records));
        }

        run.enter(MigrationState::Rewriting);
        // Re-read so edits made while uploading are not lost; only fields that
        // still hold an uploaded payload are rewritten.
        let current: Vec<Document> = self.store.get(&key).await?.unwrap_or_default();
        let mut changed = false;
        let rewritten: Vec<Document> = current
            .iter()
            .map(|doc| {
                let replacements: HashMap<AssetPath, String> = assets::find_inline_assets(doc)
                    .into_iter()
                    .filter_map(|asset| {
                        resolved
                            .get(asset.value.as_str())
                            .map(|url| (asset.path, url.to_string()))
                    })
                    .collect();
                let (updated, doc_changed) = assets::rewrite(doc, &replacements);
                changed |= doc_changed;
                updated
            })
            .collect();

        if !changed {
            run.enter(MigrationState::NoChanges);
            return Ok(run.finish(MigrationOutcome::NoChanges, records));
        }

        self.store.set(&key, &rewritten).await?;
        let summary = run.finish(MigrationOutcome::Migrated, records);
        info!(
            project_id,
            migrated = summary.migrated_count,
            failed = summary.failed_count,
            "migration persisted"
        );
        Ok(summary)
    }

    async fn upload_one(&self, project_id: &str, payload: &str) -> Result<String, UploadError> {
        let hint = destination_hint(project_id, payload);
        let url = self.uploader.upload(payload, &hint).await?;
        if !is_remote_reference(&url) {
            return Err(UploadError::InvalidResponse(url));
        }
        Ok(url)
    }
}
