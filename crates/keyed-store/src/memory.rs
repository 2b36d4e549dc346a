//! Sharded in-memory store.
//!
//! Keys are distributed across a fixed number of shards by a simple
//! byte-sum hash; each shard holds its own `RwLock`, so writers to
//! unrelated keys proceed in parallel. Locks are only held for map
//! operations, never across an await point.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::{StoreError, StoreResult};
use crate::KeyedStore;

const DEFAULT_SHARDS: usize = 16;

/// In-memory [`KeyedStore`] implementation backed by sharded hash maps.
pub struct ShardedMemoryStore<V> {
    shards: Vec<RwLock<HashMap<String, V>>>,
}

impl<V> ShardedMemoryStore<V> {
    /// Create a store with the default shard count.
    pub fn new() -> Self {
        Self::with_shards(DEFAULT_SHARDS)
    }

    /// Create a store with an explicit shard count (minimum 1).
    pub fn with_shards(shards: usize) -> Self {
        let count = shards.max(1);
        Self {
            shards: (0..count).map(|_| RwLock::new(HashMap::new())).collect(),
        }
    }

    fn shard_for(&self, key: &str) -> &RwLock<HashMap<String, V>> {
        let sum: usize = key.bytes().map(|b| b as usize).sum();
        &self.shards[sum % self.shards.len()]
    }
}

impl<V> Default for ShardedMemoryStore<V> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<V> KeyedStore<V> for ShardedMemoryStore<V>
where
    V: Clone + Send + Sync + 'static,
{
    async fn get(&self, key: &str) -> StoreResult<Option<V>> {
        let shard = self.shard_for(key).read().map_err(|e| StoreError::Poisoned {
            detail: e.to_string(),
        })?;
        Ok(shard.get(key).cloned())
    }

    async fn put(&self, key: &str, value: V) -> StoreResult<()> {
        let mut shard = self
            .shard_for(key)
            .write()
            .map_err(|e| StoreError::Poisoned {
                detail: e.to_string(),
            })?;
        shard.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        let mut shard = self
            .shard_for(key)
            .write()
            .map_err(|e| StoreError::Poisoned {
                detail: e.to_string(),
            })?;
        Ok(shard.remove(key).is_some())
    }

    async fn list_keys(&self) -> StoreResult<Vec<String>> {
        let mut keys = Vec::new();
        for shard in &self.shards {
            let guard = shard.read().map_err(|e| StoreError::Poisoned {
                detail: e.to_string(),
            })?;
            keys.extend(guard.keys().cloned());
        }
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let store = ShardedMemoryStore::new();
        store.put("a", 1u32).await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), Some(1));
        assert_eq!(store.get("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_put_overwrites() {
        let store = ShardedMemoryStore::new();
        store.put("a", "first".to_string()).await.unwrap();
        store.put("a", "second".to_string()).await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), Some("second".to_string()));
    }

    #[tokio::test]
    async fn test_delete_reports_presence() {
        let store = ShardedMemoryStore::new();
        store.put("a", 1u32).await.unwrap();
        assert!(store.delete("a").await.unwrap());
        assert!(!store.delete("a").await.unwrap());
        assert_eq!(store.get("a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_list_keys_spans_shards() {
        let store = ShardedMemoryStore::with_shards(4);
        for i in 0..20 {
            store.put(&format!("key-{i}"), i).await.unwrap();
        }
        let mut keys = store.list_keys().await.unwrap();
        keys.sort();
        assert_eq!(keys.len(), 20);
        assert_eq!(keys[0], "key-0");
    }

    #[tokio::test]
    async fn test_concurrent_writers_on_distinct_keys() {
        let store = Arc::new(ShardedMemoryStore::with_shards(8));
        let mut handles = Vec::new();
        for i in 0..32 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store.put(&format!("k{i}"), i).await.unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(store.list_keys().await.unwrap().len(), 32);
    }
}
