use crate::domains::cache::types::{CacheEntry, CacheResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Backing store for cached entries. Stores keep expiry with each entry and
/// do not interpret it; expiry is enforced by `CacheService`.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> CacheResult<Option<CacheEntry>>;

    async fn put(&self, key: &str, entry: CacheEntry) -> CacheResult<()>;

    /// Returns whether an entry was present.
    async fn remove(&self, key: &str) -> CacheResult<bool>;

    async fn clear(&self) -> CacheResult<()>;

    async fn keys(&self) -> CacheResult<Vec<String>>;
}

/// In-process store for tests and single-node deployments.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCacheStore {
    entries: Arc<RwLock<HashMap<String, CacheEntry>>>,
}

impl InMemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl CacheStore for InMemoryCacheStore {
    async fn get(&self, key: &str) -> CacheResult<Option<CacheEntry>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn put(&self, key: &str, entry: CacheEntry) -> CacheResult<()> {
        self.entries.write().await.insert(key.to_string(), entry);
        Ok(())
    }

    async fn remove(&self, key: &str) -> CacheResult<bool> {
        Ok(self.entries.write().await.remove(key).is_some())
    }

    async fn clear(&self) -> CacheResult<()> {
        self.entries.write().await.clear();
        Ok(())
    }

    async fn keys(&self) -> CacheResult<Vec<String>> {
        Ok(self.entries.read().await.keys().cloned().collect())
    }
}

#[async_trait]
impl<T: CacheStore + ?Sized> CacheStore for Arc<T> {
    async fn get(&self, key: &str) -> CacheResult<Option<CacheEntry>> {
        (**self).get(key).await
    }

    async fn put(&self, key: &str, entry: CacheEntry) -> CacheResult<()> {
        (**self).put(key, entry).await
    }

    async fn remove(&self, key: &str) -> CacheResult<bool> {
        (**self).remove(key).await
    }

    async fn clear(&self) -> CacheResult<()> {
        (**self).clear().await
    }

    async fn keys(&self) -> CacheResult<Vec<String>> {
        (**self).keys().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_in_memory_store_crud() {
        let store = InMemoryCacheStore::new();
        store.put("a", CacheEntry::new(json!(1), None)).await.unwrap();
        store.put("b", CacheEntry::new(json!("two"), None)).await.unwrap();

        assert_eq!(store.get("a").await.unwrap().map(|e| e.value), Some(json!(1)));
        let mut keys = store.keys().await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["a", "b"]);

        assert!(store.remove("a").await.unwrap());
        assert!(!store.remove("a").await.unwrap());
        assert_eq!(store.len().await, 1);

        store.clear().await.unwrap();
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_clones_share_entries() {
        let store = InMemoryCacheStore::new();
        let other = store.clone();
        store.put("k", CacheEntry::new(json!(true), None)).await.unwrap();
        assert!(other.get("k").await.unwrap().is_some());
    }
}
