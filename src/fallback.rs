use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{RemoteError, SyncError};
use crate::resources::ResourceKind;
use crate::store::trim::TrimScope;
use crate::store::{QuotaStore, WriteOutcome};

/// Prefix marking identifiers synthesized while the remote was unreachable.
pub const LOCAL_ID_PREFIX: &str = "local-";

static LOCAL_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// A fresh identifier carrying the local-provenance prefix.
pub fn local_id() -> String {
    let seq = LOCAL_ID_COUNTER.fetch_add(1, Ordering::Relaxed);
    let now = chrono::Utc::now();
    let mut hasher = blake3::Hasher::new();
    hasher.update(&now.timestamp_nanos_opt().unwrap_or_default().to_le_bytes());
    hasher.update(&seq.to_le_bytes());
    hasher.update(&std::process::id().to_le_bytes());
    let digest = hasher.finalize().to_hex();
    format!(
        "{}{}-{}",
        LOCAL_ID_PREFIX,
        now.timestamp_millis(),
        &digest.as_str()[..8]
    )
}

pub fn is_local_id(id: &str) -> bool {
    id.starts_with(LOCAL_ID_PREFIX)
}

/// Remote-first access with the quota store as read-through fallback and write-through cache.
///
/// Within one call the remote is always tried before the cache is touched.
pub struct FallbackClient {
    store: Arc<QuotaStore>,
}

impl FallbackClient {
    pub fn new(store: Arc<QuotaStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<QuotaStore> {
        &self.store
    }

    /// Read `remote_call`, warming `cache_key` on success and serving it when the remote is unavailable.
    pub async fn fetch<T, F, Fut>(&self, cache_key: &str, remote_call: F) -> Result<T, SyncError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, RemoteError>>,
    {
        match remote_call().await {
            Ok(value) => {
                self.warm(cache_key, &value).await;
                Ok(value)
            }
            Err(cause @ RemoteError::Unavailable(_)) => match self.store.get::<T>(cache_key).await {
                Ok(Some(cached)) => {
                    warn!(key = cache_key, error = %cause, "remote unavailable, serving cached copy");
                    Ok(cached)
                }
                Ok(None) => Err(SyncError::CacheMiss {
                    key: cache_key.to_string(),
                    cause,
                }),
                Err(e) => {
                    warn!(key = cache_key, error = %e, "cache read failed during fallback");
                    Err(SyncError::CacheMiss {
                        key: cache_key.to_string(),
                        cause,
                    })
                }
            },
            Err(other) => Err(other.into()),
        }
    }

    /// Write through `remote_call`; when unreachable, persist `fallback()` locally and return it.
    pub async fn write<T, F, Fut, G>(
        &self,
        cache_key: &str,
        remote_call: F,
        fallback: G,
    ) -> Result<T, SyncError>
    where
        T: Serialize + DeserializeOwned + Clone,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, RemoteError>>,
        G: FnOnce() -> T,
    {
        self.write_merged(cache_key, remote_call, fallback, |_: Option<T>, saved: &T| {
            saved.clone()
        })
        .await
    }

    /// Like [`write`](Self::write), but what lands in the cache is `merge(cached, result)`.
    /// Collections use this to upsert one element into the cached list.
    pub async fn write_merged<T, C, F, Fut, G, M>(
        &self,
        cache_key: &str,
        remote_call: F,
        fallback: G,
        merge: M,
    ) -> Result<T, SyncError>
    where
        T: Serialize,
        C: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, RemoteError>>,
        G: FnOnce() -> T,
        M: FnOnce(Option<C>, &T) -> C,
    {
        match remote_call().await {
            Ok(saved) => {
                let cached = self.cached_or_none::<C>(cache_key).await;
                self.warm(cache_key, &merge(cached, &saved)).await;
                Ok(saved)
            }
            Err(cause @ RemoteError::Unavailable(_)) => {
                let local = fallback();
                let cached = self.cached_or_none::<C>(cache_key).await;
                // The cache holds the only copy now, so nothing may be elided.
                self.store
                    .set_with_trim(cache_key, &merge(cached, &local), trim_scope(cache_key, true))
                    .await?;
                info!(key = cache_key, error = %cause, "remote unavailable, write kept locally");
                Ok(local)
            }
            Err(other) => Err(other.into()),
        }
    }

    /// Delete remotely and always drop `cache_key`, so stale data cannot resurrect it.
    pub async fn delete<F, Fut>(&self, cache_key: &str, remote_call: F) -> Result<(), SyncError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), RemoteError>>,
    {
        let result = remote_call().await;
        self.store.remove(cache_key).await?;
        settle_delete(cache_key, result)
    }

    /// Delete one element remotely and always prune it from the cached collection at `cache_key`.
    pub async fn delete_from<C, F, Fut, P>(
        &self,
        cache_key: &str,
        remote_call: F,
        prune: P,
    ) -> Result<(), SyncError>
    where
        C: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), RemoteError>>,
        P: FnOnce(C) -> C,
    {
        let result = remote_call().await;
        if let Some(cached) = self.cached_or_none::<C>(cache_key).await {
            self.store.set(cache_key, &prune(cached)).await?;
        }
        settle_delete(cache_key, result)
    }

    async fn cached_or_none<C: DeserializeOwned>(&self, cache_key: &str) -> Option<C> {
        match self.store.get::<C>(cache_key).await {
            Ok(cached) => cached,
            Err(e) => {
                warn!(key = cache_key, error = %e, "cache read failed");
                None
            }
        }
    }

    // Cache warming never fails a successful remote call.
    async fn warm<C: Serialize + ?Sized>(&self, cache_key: &str, value: &C) {
        let scope = trim_scope(cache_key, false);
        match self.store.set_with_trim(cache_key, value, scope).await {
            Ok(WriteOutcome::Stored) => debug!(key = cache_key, "cache warmed"),
            Ok(WriteOutcome::Trimmed { saved }) => {
                debug!(key = cache_key, saved, "cache warmed with trimmed copy")
            }
            Err(e) => warn!(key = cache_key, error = %e, "cache warm failed"),
        }
    }
}

/// What a cache write for `cache_key` may strip to fit. Only bulk collections
/// are trimmed, and a write held only locally keeps its inline payloads.
fn trim_scope(cache_key: &str, local_only: bool) -> TrimScope {
    let bulk = ResourceKind::from_cache_key(cache_key).is_some_and(|k| k.is_bulk());
    match (bulk, local_only) {
        (false, _) => TrimScope::Exact,
        (true, true) => TrimScope::TextOnly,
        (true, false) => TrimScope::Full,
    }
}

fn settle_delete(cache_key: &str, result: Result<(), RemoteError>) -> Result<(), SyncError> {
    match result {
        Ok(()) => Ok(()),
        Err(RemoteError::Unavailable(reason)) => {
            info!(key = cache_key, reason = %reason, "remote unavailable, deletion applied locally");
            Ok(())
        }
        Err(other) => Err(other.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::backend::MemoryStore;
    use crate::store::trim::TrimPolicy;
    use crate::store::DEFAULT_CEILING;
    use serde::Deserialize;
    use serde_json::{json, Value};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Client {
        id: String,
        name: String,
    }

    async fn client() -> FallbackClient {
        let store = QuotaStore::open(
            Arc::new(MemoryStore::new()),
            DEFAULT_CEILING,
            TrimPolicy::default(),
        )
        .await
        .unwrap();
        FallbackClient::new(Arc::new(store))
    }

    fn server_error() -> RemoteError {
        RemoteError::from_status(500, "internal error")
    }

    fn acme() -> Vec<Client> {
        vec![Client {
            id: "1".into(),
            name: "Acme".into(),
        }]
    }

    #[test]
    fn test_local_ids_are_distinct_and_marked() {
        let a = local_id();
        let b = local_id();
        assert_ne!(a, b);
        assert!(is_local_id(&a));
        assert!(!is_local_id("6512bd43d9caa6e02c990b0a"));
    }

    #[tokio::test]
    async fn test_fetch_warms_cache() {
        let fbc = client().await;
        let got = fbc
            .fetch("clientsData", || async { Ok(acme()) })
            .await
            .unwrap();
        assert_eq!(got, acme());

        let cached: Value = fbc.store().get("clientsData").await.unwrap().unwrap();
        assert_eq!(cached, json!([{"id": "1", "name": "Acme"}]));
    }

    #[tokio::test]
    async fn test_fetch_with_cold_cache_fabricates_nothing() {
        let fbc = client().await;
        let err = fbc
            .fetch::<Vec<Client>, _, _>("clientsData", || async { Err(server_error()) })
            .await
            .unwrap_err();
        match err {
            SyncError::CacheMiss { key, cause } => {
                assert_eq!(key, "clientsData");
                assert!(cause.is_unavailable());
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_fetch_with_warm_cache_serves_stale_copy() {
        let fbc = client().await;
        fbc.store().set("clientsData", &acme()).await.unwrap();

        let got = fbc
            .fetch::<Vec<Client>, _, _>("clientsData", || async { Err(server_error()) })
            .await
            .unwrap();
        assert_eq!(got, acme());
    }

    #[tokio::test]
    async fn test_fetch_rejection_is_not_masked_by_cache() {
        let fbc = client().await;
        fbc.store().set("clientsData", &acme()).await.unwrap();

        let err = fbc
            .fetch::<Vec<Client>, _, _>("clientsData", || async {
                Err(RemoteError::from_status(403, "forbidden"))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::RemoteRejected { status: 403, .. }));
    }

    #[tokio::test]
    async fn test_fetch_survives_cache_quota() {
        let store = QuotaStore::open(Arc::new(MemoryStore::new()), 8, TrimPolicy::default())
            .await
            .unwrap();
        let fbc = FallbackClient::new(Arc::new(store));
        let got = fbc
            .fetch("clientsData", || async { Ok(acme()) })
            .await
            .unwrap();
        assert_eq!(got, acme());
        assert!(fbc.store().get_raw("clientsData").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_write_offline_synthesizes_local_record() {
        let fbc = client().await;
        let saved = fbc
            .write(
                "companySettingsData",
                || async { Err(server_error()) },
                || Client {
                    id: local_id(),
                    name: "Offline Co".into(),
                },
            )
            .await
            .unwrap();
        assert!(is_local_id(&saved.id));

        let cached: Client = fbc
            .store()
            .get("companySettingsData")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(cached, saved);
    }

    #[tokio::test]
    async fn test_write_online_keeps_server_id() {
        let fbc = client().await;
        let saved = fbc
            .write(
                "companySettingsData",
                || async {
                    Ok(Client {
                        id: "srv-42".into(),
                        name: "Online Co".into(),
                    })
                },
                || Client {
                    id: local_id(),
                    name: "unused".into(),
                },
            )
            .await
            .unwrap();
        assert_eq!(saved.id, "srv-42");
        assert!(!is_local_id(&saved.id));
    }

    #[tokio::test]
    async fn test_write_merged_upserts_into_collection() {
        let fbc = client().await;
        fbc.store().set("clientsData", &acme()).await.unwrap();

        let created = fbc
            .write_merged(
                "clientsData",
                || async { Err(server_error()) },
                || Client {
                    id: local_id(),
                    name: "Beta".into(),
                },
                |cached: Option<Vec<Client>>, c: &Client| {
                    let mut list = cached.unwrap_or_default();
                    list.push(c.clone());
                    list
                },
            )
            .await
            .unwrap();

        let cached: Vec<Client> = fbc.store().get("clientsData").await.unwrap().unwrap();
        assert_eq!(cached.len(), 2);
        assert_eq!(cached[1], created);
    }

    #[tokio::test]
    async fn test_delete_offline_still_drops_cache() {
        let fbc = client().await;
        fbc.store().set("project_3_planning", &json!({"tasks": []})).await.unwrap();

        fbc.delete("project_3_planning", || async { Err(server_error()) })
            .await
            .unwrap();
        assert!(fbc.store().get_raw("project_3_planning").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_rejection_is_reported() {
        let fbc = client().await;
        let err = fbc
            .delete("project_3_planning", || async {
                Err(RemoteError::from_status(404, "gone"))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::RemoteRejected { status: 404, .. }));
    }

    #[tokio::test]
    async fn test_delete_from_prunes_collection() {
        let fbc = client().await;
        let mut list = acme();
        list.push(Client {
            id: "2".into(),
            name: "Beta".into(),
        });
        fbc.store().set("clientsData", &list).await.unwrap();

        fbc.delete_from(
            "clientsData",
            || async { Err(server_error()) },
            |mut cached: Vec<Client>| {
                cached.retain(|c| c.id != "2");
                cached
            },
        )
        .await
        .unwrap();

        let cached: Vec<Client> = fbc.store().get("clientsData").await.unwrap().unwrap();
        assert_eq!(cached, acme());
    }

    #[test]
    fn test_trim_scope_per_key() {
        assert_eq!(trim_scope("clientsData", false), TrimScope::Full);
        assert_eq!(trim_scope("clientsData", true), TrimScope::TextOnly);
        assert_eq!(trim_scope("annotations-data-4", false), TrimScope::Exact);
        assert_eq!(trim_scope("companySettingsData", true), TrimScope::Exact);
        assert_eq!(trim_scope("tempThumb", false), TrimScope::Exact);
    }

    #[tokio::test]
    async fn test_offline_write_that_does_not_fit_is_reported() {
        let store = QuotaStore::open(Arc::new(MemoryStore::new()), 64, TrimPolicy::default())
            .await
            .unwrap();
        let fbc = FallbackClient::new(Arc::new(store));
        let logo = format!("data:image/png;base64,{}", "B".repeat(80));

        let err = fbc
            .write(
                "companySettingsData",
                || async { Err(server_error()) },
                || json!({"name": "Offline Co", "logo": logo}),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Store(ref e) if e.is_quota_exceeded()));
        assert!(fbc
            .store()
            .get_raw("companySettingsData")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_warm_trims_bulk_collections_only() {
        let store = QuotaStore::open(Arc::new(MemoryStore::new()), 200, TrimPolicy::default())
            .await
            .unwrap();
        let fbc = FallbackClient::new(Arc::new(store));
        let description = "long ".repeat(40);

        let text = description.clone();
        let listed = fbc
            .fetch("projectsData", || async move {
                Ok(json!([{"id": "1", "name": "Villa", "description": text}]))
            })
            .await
            .unwrap();
        assert_eq!(listed[0]["description"], description.as_str());
        let cached: Value = fbc.store().get("projectsData").await.unwrap().unwrap();
        assert!(cached[0]["description"]
            .as_str()
            .unwrap()
            .ends_with("[truncated]"));

        let text = description.clone();
        fbc.fetch("project_1_descriptif", || async move {
            Ok(json!({"lots": [], "description": text}))
        })
        .await
        .unwrap();
        assert!(fbc
            .store()
            .get_raw("project_1_descriptif")
            .await
            .unwrap()
            .is_none());
    }
}
