pub mod backend;
pub mod trim;

use std::collections::HashMap;
use std::io;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::StoreError;
use backend::LocalStore;
use trim::{TrimPolicy, TrimScope};

/// Ceiling matching the smallest common browser local-storage budget.
pub const DEFAULT_CEILING: usize = 4 * 1024 * 1024;

/// Key fragments marking regenerable entries that may be evicted.
pub const VOLATILE_MARKERS: &[&str] = &["temp", "cache", "draft"];

pub fn is_volatile_key(key: &str) -> bool {
    let key = key.to_lowercase();
    VOLATILE_MARKERS.iter().any(|m| key.contains(m))
}

struct ByteCount(usize);

impl io::Write for ByteCount {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0 += buf.len();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Byte length of the value's canonical serialized form (UTF-8 JSON).
/// This is what the ledger charges for an entry.
pub fn estimate_size<T: Serialize + ?Sized>(value: &T) -> Result<usize, serde_json::Error> {
    let mut count = ByteCount(0);
    serde_json::to_writer(&mut count, value)?;
    Ok(count.0)
}

#[derive(Debug, Clone, Copy)]
struct LedgerEntry {
    size: usize,
    written_at: Option<DateTime<Utc>>,
    // Write order; ties on `written_at` are common.
    seq: u64,
}

#[derive(Debug, Default)]
struct Ledger {
    entries: HashMap<String, LedgerEntry>,
    next_seq: u64,
}

impl Ledger {
    fn used(&self) -> usize {
        self.entries.values().map(|e| e.size).sum()
    }

    fn record(&mut self, key: &str, size: usize, written_at: Option<DateTime<Utc>>) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.insert(
            key.to_string(),
            LedgerEntry {
                size,
                written_at,
                seq,
            },
        );
    }

    /// Usage if `key` were replaced by a value of `size` bytes.
    fn prospective(&self, key: &str, size: usize) -> usize {
        let previous = self.entries.get(key).map(|e| e.size).unwrap_or(0);
        self.used() - previous + size
    }
}

/// Size and age of one cached entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryInfo {
    pub size: usize,
    /// `None` when the backend predates recorded write times.
    pub written_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Stored,
    /// Stored after `trim`; `saved` bytes were dropped from the original.
    Trimmed { saved: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageUsage {
    pub used_bytes: usize,
    pub ceiling: usize,
    pub entries: usize,
    pub volatile_bytes: usize,
}

impl StorageUsage {
    pub fn percent_used(&self) -> f64 {
        if self.ceiling == 0 {
            return 100.0;
        }
        self.used_bytes as f64 * 100.0 / self.ceiling as f64
    }
}

/// Key/value cache with a hard byte ceiling over a [`LocalStore`].
///
/// All writes go through one ledger lock, so two `set`s on the same key are
/// applied one after the other and the later one wins.
pub struct QuotaStore {
    backend: Arc<dyn LocalStore>,
    ceiling: usize,
    trim_policy: TrimPolicy,
    ledger: Mutex<Ledger>,
}

impl QuotaStore {
    /// Open over `backend`, sizing every entry it already holds. Write order is
    /// restored from the recorded write times; entries without one count as oldest.
    pub async fn open(
        backend: Arc<dyn LocalStore>,
        ceiling: usize,
        trim_policy: TrimPolicy,
    ) -> Result<Self, StoreError> {
        let mut ledger = Ledger::default();
        let mut existing = backend.entries().await?;
        existing.sort_by(|a, b| (a.written_at, &a.key).cmp(&(b.written_at, &b.key)));
        for entry in existing {
            ledger.record(&entry.key, entry.size, entry.written_at);
        }

        let used = ledger.used();
        if used > ceiling {
            warn!(used, ceiling, "local cache already over its ceiling");
        }
        debug!(entries = ledger.entries.len(), used, ceiling, "quota store opened");

        Ok(Self {
            backend,
            ceiling,
            trim_policy,
            ledger: Mutex::new(ledger),
        })
    }

    /// Raw cached string, if any.
    pub async fn get_raw(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.backend.get_item(key).await?)
    }

    /// Cached value for `key`. A corrupt entry reads as missing.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        let Some(raw) = self.get_raw(key).await? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                warn!(key, error = %e, "cache entry is corrupt, treating as missing");
                Ok(None)
            }
        }
    }

    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        let size = estimate_size(value).map_err(|source| StoreError::Serialize {
            key: key.to_string(),
            source,
        })?;
        if size > self.ceiling {
            return Err(self.too_large(key, size));
        }
        let raw = serde_json::to_string(value).map_err(|source| StoreError::Serialize {
            key: key.to_string(),
            source,
        })?;
        self.set_raw(key, raw).await
    }

    /// Write `raw` under `key`, evicting volatile entries if needed to stay under the ceiling.
    /// On `QuotaExceeded` the previous value for `key` is left untouched.
    pub async fn set_raw(&self, key: &str, raw: String) -> Result<(), StoreError> {
        let size = raw.len();
        if size > self.ceiling {
            return Err(self.too_large(key, size));
        }
        let mut ledger = self.ledger.lock().await;

        let mut prospective = ledger.prospective(key, size);
        if prospective > self.ceiling {
            let needed = prospective - self.ceiling;
            let freed = self.evict_volatile(&mut ledger, key, needed).await?;
            prospective -= freed.min(prospective);
            if prospective > self.ceiling {
                warn!(
                    key,
                    size,
                    prospective,
                    ceiling = self.ceiling,
                    "quota exceeded after eviction"
                );
                return Err(StoreError::QuotaExceeded {
                    key: key.to_string(),
                    size,
                    prospective,
                    ceiling: self.ceiling,
                });
            }
        }

        let written_at = Utc::now();
        self.backend.set_item(key, raw, written_at).await?;
        ledger.record(key, size, Some(written_at));
        debug!(key, size, used = prospective, "cache entry written");
        Ok(())
    }

    fn too_large(&self, key: &str, size: usize) -> StoreError {
        warn!(key, size, ceiling = self.ceiling, "value larger than the whole cache");
        StoreError::QuotaExceeded {
            key: key.to_string(),
            size,
            prospective: size,
            ceiling: self.ceiling,
        }
    }

    /// `set`, retrying once with a copy trimmed within `scope` if the full one does not fit.
    pub async fn set_with_trim<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        scope: TrimScope,
    ) -> Result<WriteOutcome, StoreError> {
        let json = serde_json::to_value(value).map_err(|source| StoreError::Serialize {
            key: key.to_string(),
            source,
        })?;
        let full = json.to_string();
        let full_size = full.len();

        match self.set_raw(key, full).await {
            Ok(()) => return Ok(WriteOutcome::Stored),
            Err(e) if e.is_quota_exceeded() => {}
            Err(e) => return Err(e),
        }

        let trimmed = self.trim_policy.trim(&json, scope);
        if trimmed == json {
            return Err(StoreError::QuotaExceeded {
                key: key.to_string(),
                size: full_size,
                prospective: full_size,
                ceiling: self.ceiling,
            });
        }
        let trimmed = trimmed.to_string();
        let saved = full_size.saturating_sub(trimmed.len());
        self.set_raw(key, trimmed).await?;
        warn!(key, saved, ?scope, "cache write only fit after trimming");
        Ok(WriteOutcome::Trimmed { saved })
    }

    pub async fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut ledger = self.ledger.lock().await;
        self.backend.remove_item(key).await?;
        ledger.entries.remove(key);
        debug!(key, "cache entry removed");
        Ok(())
    }

    pub async fn entry_info(&self, key: &str) -> Option<EntryInfo> {
        self.ledger.lock().await.entries.get(key).map(|e| EntryInfo {
            size: e.size,
            written_at: e.written_at,
        })
    }

    pub async fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.ledger.lock().await.entries.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub async fn usage(&self) -> StorageUsage {
        let ledger = self.ledger.lock().await;
        StorageUsage {
            used_bytes: ledger.used(),
            ceiling: self.ceiling,
            entries: ledger.entries.len(),
            volatile_bytes: ledger
                .entries
                .iter()
                .filter(|(k, _)| is_volatile_key(k))
                .map(|(_, e)| e.size)
                .sum(),
        }
    }

    /// Drop every volatile entry. Returns the removed keys.
    pub async fn sweep_volatile(&self) -> Result<Vec<String>, StoreError> {
        let mut ledger = self.ledger.lock().await;
        let mut victims: Vec<String> = ledger
            .entries
            .keys()
            .filter(|k| is_volatile_key(k))
            .cloned()
            .collect();
        victims.sort();
        for key in &victims {
            self.backend.remove_item(key).await?;
            ledger.entries.remove(key);
        }
        if !victims.is_empty() {
            info!(count = victims.len(), "volatile cache entries swept");
        }
        Ok(victims)
    }

    /// Remove volatile entries other than `keep`, oldest first, until `needed`
    /// bytes are freed or none are left.
    async fn evict_volatile(
        &self,
        ledger: &mut Ledger,
        keep: &str,
        needed: usize,
    ) -> Result<usize, StoreError> {
        let mut candidates: Vec<(String, LedgerEntry)> = ledger
            .entries
            .iter()
            .filter(|(k, _)| k.as_str() != keep && is_volatile_key(k))
            .map(|(k, e)| (k.clone(), *e))
            .collect();
        candidates.sort_by_key(|(_, e)| e.seq);

        let mut freed = 0;
        for (key, entry) in candidates {
            if freed >= needed {
                break;
            }
            self.backend.remove_item(&key).await?;
            ledger.entries.remove(&key);
            freed += entry.size;
            info!(key = %key, size = entry.size, "evicted volatile cache entry");
        }
        Ok(freed)
    }
}

#[cfg(test)]
mod tests {
    use super::backend::MemoryStore;
    use super::*;
    use chrono::Duration;
    use serde_json::{json, Value};

    async fn store_with_ceiling(ceiling: usize) -> QuotaStore {
        QuotaStore::open(Arc::new(MemoryStore::new()), ceiling, TrimPolicy::default())
            .await
            .unwrap()
    }

    #[test]
    fn test_estimate_size_is_json_length() {
        assert_eq!(estimate_size(&json!({"a": 1})).unwrap(), 7);
        assert_eq!(estimate_size("é").unwrap(), 4);
    }

    #[test]
    fn test_volatile_key_detection() {
        assert!(is_volatile_key("tempUpload"));
        assert!(is_volatile_key("imageCache_12"));
        assert!(is_volatile_key("report-Draft-3"));
        assert!(!is_volatile_key("projectsData"));
        assert!(!is_volatile_key("project_4_planning"));
    }

    #[tokio::test]
    async fn test_set_then_get_round_trips() {
        let store = store_with_ceiling(DEFAULT_CEILING).await;
        let value = json!([{"id": "1", "name": "Acme", "tags": ["a", "b"]}]);
        store.set("clientsData", &value).await.unwrap();
        let back: Value = store.get("clientsData").await.unwrap().unwrap();
        assert_eq!(back, value);
    }

    #[tokio::test]
    async fn test_ledger_charges_estimated_size() {
        let store = store_with_ceiling(DEFAULT_CEILING).await;
        let value = json!({"name": "Résidence Les Pins", "lots": [1, 2, 3]});
        store.set("project_2_descriptif", &value).await.unwrap();
        let info = store.entry_info("project_2_descriptif").await.unwrap();
        assert_eq!(info.size, estimate_size(&value).unwrap());
        assert!(info.written_at.is_some());
    }

    #[tokio::test]
    async fn test_tiny_ceiling_scenario() {
        let store = store_with_ceiling(10).await;

        // 20 bytes of JSON
        let big = "a".repeat(18);
        assert_eq!(estimate_size(&big).unwrap(), 20);
        let err = store.set("k", &big).await.unwrap_err();
        assert!(err.is_quota_exceeded());

        // 5 bytes of JSON
        let small = "abc";
        assert_eq!(estimate_size(small).unwrap(), 5);
        store.set("k", small).await.unwrap();
        let back: String = store.get("k").await.unwrap().unwrap();
        assert_eq!(back, "abc");
    }

    #[tokio::test]
    async fn test_oversized_write_keeps_prior_value() {
        let store = store_with_ceiling(16).await;
        store.set("projectsData", &json!([1, 2])).await.unwrap();

        let err = store.set("projectsData", &json!([1, 2, 3, 4, 5, 6, 7, 8, 9])).await;
        assert!(err.unwrap_err().is_quota_exceeded());

        let back: Value = store.get("projectsData").await.unwrap().unwrap();
        assert_eq!(back, json!([1, 2]));
    }

    #[tokio::test]
    async fn test_overwrite_counts_only_new_size() {
        let store = store_with_ceiling(10).await;
        store.set_raw("k", "12345678".to_string()).await.unwrap();
        // Replacing an 8-byte value with a 9-byte one fits a 10-byte ceiling.
        store.set_raw("k", "123456789".to_string()).await.unwrap();
        assert_eq!(store.usage().await.used_bytes, 9);
    }

    #[tokio::test]
    async fn test_eviction_frees_volatile_entries() {
        let store = store_with_ceiling(20).await;
        store.set_raw("tempA", "1234567".to_string()).await.unwrap();
        store.set_raw("draftB", "1234567".to_string()).await.unwrap();
        store.set_raw("projectsData", "12345".to_string()).await.unwrap();

        // Needs 6 more bytes: the oldest volatile entry is enough.
        store.set_raw("clientsData", "123456".to_string()).await.unwrap();

        let keys = store.keys().await;
        assert!(!keys.contains(&"tempA".to_string()));
        assert!(keys.contains(&"draftB".to_string()));
        assert!(keys.contains(&"projectsData".to_string()));
        assert!(keys.contains(&"clientsData".to_string()));
    }

    #[tokio::test]
    async fn test_eviction_never_touches_durable_entries() {
        let store = store_with_ceiling(20).await;
        store.set_raw("projectsData", "1234567890".to_string()).await.unwrap();
        store.set_raw("cacheX", "12345".to_string()).await.unwrap();

        let err = store
            .set_raw("clientsData", "12345678901".to_string())
            .await
            .unwrap_err();
        assert!(err.is_quota_exceeded());
        // The volatile entry was swept as a best effort; durable data is intact.
        assert_eq!(store.keys().await, vec!["projectsData".to_string()]);
        assert!(store.get_raw("clientsData").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_corrupt_entry_reads_as_missing() {
        let backend = Arc::new(MemoryStore::new());
        backend
            .set_item("teamMembersData", "[{not json".to_string(), Utc::now())
            .await
            .unwrap();
        let store = QuotaStore::open(backend, DEFAULT_CEILING, TrimPolicy::default())
            .await
            .unwrap();

        let value: Option<Value> = store.get("teamMembersData").await.unwrap();
        assert!(value.is_none());
        assert_eq!(store.usage().await.entries, 1);
    }

    #[tokio::test]
    async fn test_set_with_trim_falls_back_to_trimmed_value() {
        let store = store_with_ceiling(200).await;
        let value = json!([{"id": "1", "description": "z".repeat(400)}]);

        let outcome = store
            .set_with_trim("projectsData", &value, TrimScope::Full)
            .await
            .unwrap();
        assert!(matches!(outcome, WriteOutcome::Trimmed { saved } if saved > 200));

        let back: Value = store.get("projectsData").await.unwrap().unwrap();
        assert_eq!(back[0]["id"], "1");
        assert!(back[0]["description"].as_str().unwrap().len() < 200);
    }

    #[tokio::test]
    async fn test_set_with_trim_reports_untrimmable_payload() {
        let store = store_with_ceiling(10).await;
        let err = store
            .set_with_trim("projectsData", &json!(["aaaaaaaaaaaa"]), TrimScope::Full)
            .await
            .unwrap_err();
        assert!(err.is_quota_exceeded());
    }

    #[tokio::test]
    async fn test_usage_and_sweep() {
        let store = store_with_ceiling(100).await;
        store.set_raw("projectsData", "[]".to_string()).await.unwrap();
        store.set_raw("tempThumb", "1234".to_string()).await.unwrap();
        store.set_raw("draft_report", "123456".to_string()).await.unwrap();

        let usage = store.usage().await;
        assert_eq!(usage.used_bytes, 12);
        assert_eq!(usage.volatile_bytes, 10);
        assert_eq!(usage.entries, 3);
        assert!((usage.percent_used() - 12.0).abs() < f64::EPSILON);

        let swept = store.sweep_volatile().await.unwrap();
        assert_eq!(swept, vec!["draft_report".to_string(), "tempThumb".to_string()]);
        assert_eq!(store.keys().await, vec!["projectsData".to_string()]);
    }

    #[tokio::test]
    async fn test_open_sizes_existing_entries() {
        let backend = Arc::new(MemoryStore::new());
        backend
            .set_item("clientsData", "[1,2,3]".to_string(), Utc::now())
            .await
            .unwrap();
        let store = QuotaStore::open(backend, 10, TrimPolicy::default())
            .await
            .unwrap();
        assert_eq!(store.usage().await.used_bytes, 7);
        assert!(store.set_raw("other", "1234".to_string()).await.is_err());
    }

    #[tokio::test]
    async fn test_text_only_trim_never_drops_inline_payloads() {
        let store = store_with_ceiling(120).await;
        let photo = format!("data:image/jpeg;base64,{}", "A".repeat(150));
        let value = json!([{"id": "1", "description": "d", "photo": photo}]);

        let err = store
            .set_with_trim("projectsData", &value, TrimScope::TextOnly)
            .await
            .unwrap_err();
        assert!(err.is_quota_exceeded());
        assert!(store.get_raw("projectsData").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reopen_keeps_write_order_for_eviction() {
        let backend = Arc::new(MemoryStore::new());
        let now = Utc::now();
        // Alphabetical order is the reverse of write order.
        backend
            .set_item("tempZ_old", "12345".to_string(), now - Duration::minutes(10))
            .await
            .unwrap();
        backend
            .set_item("tempA_new", "12345".to_string(), now - Duration::minutes(1))
            .await
            .unwrap();
        backend
            .set_item("projectsData", "12345".to_string(), now - Duration::minutes(5))
            .await
            .unwrap();

        let store = QuotaStore::open(backend.clone(), 20, TrimPolicy::default())
            .await
            .unwrap();
        let info = store.entry_info("tempZ_old").await.unwrap();
        assert_eq!(info.written_at, Some(now - Duration::minutes(10)));

        store.set_raw("clientsData", "123456".to_string()).await.unwrap();
        let keys = store.keys().await;
        assert!(!keys.contains(&"tempZ_old".to_string()));
        assert!(keys.contains(&"tempA_new".to_string()));
    }

    #[tokio::test]
    async fn test_reopened_store_sees_times_of_its_own_writes() {
        let backend = Arc::new(MemoryStore::new());
        let first = QuotaStore::open(backend.clone(), 20, TrimPolicy::default())
            .await
            .unwrap();
        first.set_raw("tempZ_old", "12345".to_string()).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        first.set_raw("tempA_new", "12345".to_string()).await.unwrap();
        first.set_raw("projectsData", "12345".to_string()).await.unwrap();
        let before = first.entry_info("tempZ_old").await.unwrap();
        drop(first);

        let second = QuotaStore::open(backend, 20, TrimPolicy::default())
            .await
            .unwrap();
        assert_eq!(second.entry_info("tempZ_old").await.unwrap(), before);

        second.set_raw("clientsData", "123456".to_string()).await.unwrap();
        assert_eq!(
            second.keys().await,
            vec![
                "clientsData".to_string(),
                "projectsData".to_string(),
                "tempA_new".to_string(),
            ]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_sets_on_one_key_keep_ledger_consistent() {
        let store = Arc::new(store_with_ceiling(DEFAULT_CEILING).await);
        let writers: Vec<_> = (1..=16)
            .map(|n| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .set("clientsData", &"x".repeat(n * 10))
                        .await
                        .unwrap();
                })
            })
            .collect();
        for writer in writers {
            writer.await.unwrap();
        }

        let raw = store.get_raw("clientsData").await.unwrap().unwrap();
        let info = store.entry_info("clientsData").await.unwrap();
        assert_eq!(info.size, raw.len());
        assert_eq!(store.usage().await.used_bytes, raw.len());
        assert_eq!(store.usage().await.entries, 1);

        // Sequential writes: the later one wins.
        store.set("clientsData", "first").await.unwrap();
        store.set("clientsData", "second").await.unwrap();
        let back: String = store.get("clientsData").await.unwrap().unwrap();
        assert_eq!(back, "second");
        assert_eq!(store.usage().await.used_bytes, 8);
    }
}
