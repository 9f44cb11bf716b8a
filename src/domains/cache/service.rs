use crate::domains::cache::repository::CacheStore;
use crate::domains::cache::types::{CacheEntry, CacheError, CacheResult};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::time::Duration;

/// Typed look-aside cache over a pluggable store.
///
/// Expired entries are never returned; they are removed when read or by
/// `purge_expired`.
#[derive(Debug, Clone)]
pub struct CacheService<S: CacheStore> {
    store: S,
    default_ttl: Option<Duration>,
}

impl<S: CacheStore> CacheService<S> {
    pub fn new(store: S, default_ttl: Option<Duration>) -> Self {
        Self { store, default_ttl }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn default_ttl(&self) -> Option<Duration> {
        self.default_ttl
    }

    fn expiry(ttl: Option<Duration>, now: DateTime<Utc>) -> CacheResult<Option<DateTime<Utc>>> {
        match ttl {
            None => Ok(None),
            Some(ttl) => {
                let ttl = chrono::Duration::from_std(ttl)
                    .map_err(|e| CacheError::InvalidTtl(e.to_string()))?;
                now.checked_add_signed(ttl)
                    .map(Some)
                    .ok_or_else(|| CacheError::InvalidTtl(format!("{:?} overflows", ttl)))
            }
        }
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> CacheResult<Option<T>> {
        let entry = match self.store.get(key).await? {
            Some(entry) => entry,
            None => return Ok(None),
        };

        if entry.is_expired(Utc::now()) {
            log::debug!("Cache entry '{}' expired", key);
            self.store.remove(key).await?;
            return Ok(None);
        }

        serde_json::from_value(entry.value)
            .map(Some)
            .map_err(|e| CacheError::Serialization {
                key: key.to_string(),
                message: e.to_string(),
            })
    }

    /// Store `value` under `key`. `ttl == None` keeps it until invalidated.
    pub async fn set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> CacheResult<()> {
        let value = serde_json::to_value(value).map_err(|e| CacheError::Serialization {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        let expires_at = Self::expiry(ttl, Utc::now())?;
        self.store.put(key, CacheEntry::new(value, expires_at)).await
    }

    /// `set` with the service's default TTL.
    pub async fn set_default<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> CacheResult<()> {
        self.set(key, value, self.default_ttl).await
    }

    /// Return the cached value, or run `loader` and cache its result.
    ///
    /// Cache failures are logged and never fail the call; loader errors are
    /// returned unchanged and nothing is cached.
    pub async fn get_or_load<T, E, F, Fut>(
        &self,
        key: &str,
        ttl: Option<Duration>,
        loader: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        match self.get::<T>(key).await {
            Ok(Some(hit)) => {
                log::debug!("Cache hit for '{}'", key);
                return Ok(hit);
            }
            Ok(None) => log::debug!("Cache miss for '{}'", key),
            Err(e) => log::warn!("Cache read for '{}' failed, loading: {}", key, e),
        }

        let value = loader().await?;
        if let Err(e) = self.set(key, &value, ttl).await {
            log::warn!("Cache write for '{}' failed: {}", key, e);
        }
        Ok(value)
    }

    pub async fn invalidate(&self, key: &str) -> CacheResult<bool> {
        self.store.remove(key).await
    }

    /// Invalidate every key starting with `prefix`.
    pub async fn invalidate_prefix(&self, prefix: &str) -> CacheResult<usize> {
        let mut removed = 0;
        for key in self.store.keys().await? {
            if key.starts_with(prefix) && self.store.remove(&key).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    pub async fn clear(&self) -> CacheResult<()> {
        self.store.clear().await
    }

    /// Remove every expired entry and return how many were dropped.
    pub async fn purge_expired(&self) -> CacheResult<usize> {
        let now = Utc::now();
        let mut purged = 0;
        for key in self.store.keys().await? {
            let expired = match self.store.get(&key).await? {
                Some(entry) => entry.is_expired(now),
                None => false,
            };
            if expired && self.store.remove(&key).await? {
                purged += 1;
            }
        }
        if purged > 0 {
            log::debug!("Purged {} expired cache entries", purged);
        }
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::cache::repository::InMemoryCacheStore;
    use async_trait::async_trait;
    use serde::Deserialize;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Summary {
        total: u64,
        label: String,
    }

    /// Store whose backend is unreachable.
    struct UnavailableStore;

    #[async_trait]
    impl CacheStore for UnavailableStore {
        async fn get(&self, _key: &str) -> CacheResult<Option<CacheEntry>> {
            Err(CacheError::Store("connection refused".to_string()))
        }

        async fn put(&self, _key: &str, _entry: CacheEntry) -> CacheResult<()> {
            Err(CacheError::Store("connection refused".to_string()))
        }

        async fn remove(&self, _key: &str) -> CacheResult<bool> {
            Err(CacheError::Store("connection refused".to_string()))
        }

        async fn clear(&self) -> CacheResult<()> {
            Err(CacheError::Store("connection refused".to_string()))
        }

        async fn keys(&self) -> CacheResult<Vec<String>> {
            Err(CacheError::Store("connection refused".to_string()))
        }
    }

    fn service() -> CacheService<InMemoryCacheStore> {
        CacheService::new(InMemoryCacheStore::new(), Some(Duration::from_secs(60)))
    }

    #[tokio::test]
    async fn test_typed_round_trip() {
        let cache = service();
        let summary = Summary { total: 42, label: "fonds A".into() };
        cache.set_default("summary", &summary).await.unwrap();
        assert_eq!(cache.get::<Summary>("summary").await.unwrap(), Some(summary));
        assert_eq!(cache.get::<Summary>("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_expired_entry_is_never_returned() {
        let cache = service();
        let past = Utc::now() - chrono::Duration::seconds(5);
        cache
            .store()
            .put("stale", CacheEntry::new(json!(1), Some(past)))
            .await
            .unwrap();

        assert_eq!(cache.get::<i64>("stale").await.unwrap(), None);
        assert!(cache.store().get("stale").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_entry_without_ttl_persists() {
        let cache = service();
        cache.set("pinned", &7u32, None).await.unwrap();
        let entry = cache.store().get("pinned").await.unwrap().unwrap();
        assert_eq!(entry.expires_at, None);
        assert_eq!(cache.get::<u32>("pinned").await.unwrap(), Some(7));
    }

    #[tokio::test]
    async fn test_type_mismatch_is_serialization_error() {
        let cache = service();
        cache.set_default("n", "not a number").await.unwrap();
        assert!(matches!(
            cache.get::<u64>("n").await,
            Err(CacheError::Serialization { .. })
        ));
    }

    #[tokio::test]
    async fn test_get_or_load_calls_loader_once() {
        let cache = service();
        let calls = AtomicUsize::new(0);
        for _ in 0..3 {
            let value: Result<u64, String> = cache
                .get_or_load("count", None, || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(1003)
                })
                .await;
            assert_eq!(value.unwrap(), 1003);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_loader_error_is_not_cached() {
        let cache = service();
        let result: Result<u64, String> = cache
            .get_or_load("count", None, || async { Err("db down".to_string()) })
            .await;
        assert_eq!(result.unwrap_err(), "db down");
        assert!(cache.store().get("count").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_purge_and_prefix_invalidation() {
        let cache = service();
        let past = Utc::now() - chrono::Duration::seconds(1);
        cache.store().put("old", CacheEntry::new(json!(0), Some(past))).await.unwrap();
        cache.set_default("archive:count:a", &1u64).await.unwrap();
        cache.set_default("archive:count:b", &2u64).await.unwrap();

        assert_eq!(cache.purge_expired().await.unwrap(), 1);
        assert_eq!(cache.invalidate_prefix("archive:count:").await.unwrap(), 2);
        assert!(cache.store().is_empty().await);
    }

    #[tokio::test]
    async fn test_store_failure_falls_back_to_loader() {
        let cache = CacheService::new(UnavailableStore, None);
        let value: Result<u64, String> = cache.get_or_load("count", None, || async { Ok(12) }).await;
        assert_eq!(value.unwrap(), 12);

        assert!(matches!(cache.get::<u64>("count").await, Err(CacheError::Store(_))));
        assert!(matches!(cache.invalidate_prefix("archive:").await, Err(CacheError::Store(_))));
    }
}
