//! 响应缓存
//!
//! 只在成功获取后写入；所有实时尝试失败时执行器会读取它兜底（即使已过期）。
//! 后端：分片内存表（默认）、SQLite（持久化）。缓存本身的故障只记日志，不向上传播。

pub mod memory;
pub mod sqlite;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::catalog::Category;

pub use memory::MemoryCache;
pub use sqlite::SqliteCache;

/// (分类, 规范化请求) 组成的缓存键
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub category: Category,
    pub request_key: String,
}

impl CacheKey {
    pub fn new(category: Category, request_key: impl Into<String>) -> Self {
        Self {
            category,
            request_key: request_key.into(),
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.category, self.request_key)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub payload: serde_json::Value,
    /// 提供数据的资源
    pub source_id: String,
    pub fetched_at: DateTime<Utc>,
    pub ttl: Duration,
}

impl CacheEntry {
    pub fn new(
        key: CacheKey,
        payload: serde_json::Value,
        source_id: impl Into<String>,
        ttl: Duration,
    ) -> Self {
        Self {
            key,
            payload,
            source_id: source_id.into(),
            fetched_at: Utc::now(),
            ttl,
        }
    }

    pub fn fetched_at(mut self, at: DateTime<Utc>) -> Self {
        self.fetched_at = at;
        self
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        let ttl = chrono::Duration::from_std(self.ttl)
            .unwrap_or_else(|_| chrono::Duration::days(36_500));
        now - self.fetched_at > ttl
    }
}

/// get / set / expire 语义的缓存后端
///
/// 异步接口：内存实现直接完成，SQLite 实现把磁盘 I/O 放到阻塞线程池上。
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// 返回条目（不论是否过期），由调用方判断新鲜度
    async fn get(&self, key: &CacheKey) -> Option<CacheEntry>;

    async fn set(&self, entry: CacheEntry);

    /// 显式删除，返回是否存在
    async fn expire(&self, key: &CacheKey) -> bool;

    /// 删除 fetched_at 早于 cutoff 的条目，返回删除数量
    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> usize;

    async fn len(&self) -> usize;

    async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
