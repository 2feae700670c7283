//! 分片内存缓存
//!
//! 按键哈希分到固定数量的分片，每个分片独立加锁；不同分类的请求几乎不会竞争同一把锁。

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{CacheEntry, CacheKey, CacheStore};

const DEFAULT_SHARDS: usize = 16;

pub struct MemoryCache {
    shards: Vec<RwLock<HashMap<CacheKey, CacheEntry>>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::with_shards(DEFAULT_SHARDS)
    }

    pub fn with_shards(count: usize) -> Self {
        Self {
            shards: (0..count.max(1)).map(|_| RwLock::new(HashMap::new())).collect(),
        }
    }

    fn shard(&self, key: &CacheKey) -> &RwLock<HashMap<CacheKey, CacheEntry>> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % self.shards.len()]
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.shard(key)
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    async fn set(&self, entry: CacheEntry) {
        self.shard(&entry.key)
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(entry.key.clone(), entry);
    }

    async fn expire(&self, key: &CacheKey) -> bool {
        self.shard(key)
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key)
            .is_some()
    }

    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> usize {
        self.shards
            .iter()
            .map(|shard| {
                let mut map = shard.write().unwrap_or_else(|e| e.into_inner());
                let before = map.len();
                map.retain(|_, e| e.fetched_at >= cutoff);
                before - map.len()
            })
            .sum()
    }

    async fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|s| s.read().unwrap_or_else(|e| e.into_inner()).len())
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::catalog::Category;

    fn entry(request: &str, at: DateTime<Utc>) -> CacheEntry {
        CacheEntry::new(
            CacheKey::new(Category::MarketData, request),
            serde_json::json!({"price": 1}),
            "src",
            Duration::from_secs(60),
        )
        .fetched_at(at)
    }

    #[tokio::test]
    async fn test_set_get_expire() {
        let cache = MemoryCache::new();
        let now = Utc::now();
        cache.set(entry("GET /a", now)).await;
        let key = CacheKey::new(Category::MarketData, "GET /a");
        assert_eq!(cache.get(&key).await.unwrap().source_id, "src");
        assert!(cache.get(&CacheKey::new(Category::News, "GET /a")).await.is_none());
        assert!(cache.expire(&key).await);
        assert!(!cache.expire(&key).await);
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_purge_older_than() {
        let cache = MemoryCache::with_shards(2);
        let now = Utc::now();
        cache.set(entry("GET /old", now - chrono::Duration::days(2))).await;
        cache.set(entry("GET /new", now)).await;
        assert_eq!(cache.purge_older_than(now - chrono::Duration::days(1)).await, 1);
        assert_eq!(cache.len().await, 1);
    }
}
