//! SQLite 缓存后端
//!
//! 单连接 + Mutex；表 cache_entries 以 (category, request_key) 为主键。
//! 每次读写都在 spawn_blocking 中执行，不占用异步 worker。读写失败只记 warn。

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::{CacheEntry, CacheKey, CacheStore};

pub struct SqliteCache {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteCache {
    /// 打开（或创建）数据库文件；父目录需已存在
    pub fn open(path: impl AsRef<Path>) -> Result<Self, rusqlite::Error> {
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, rusqlite::Error> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, rusqlite::Error> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS cache_entries (
                category TEXT NOT NULL,
                request_key TEXT NOT NULL,
                payload TEXT NOT NULL,
                source_id TEXT NOT NULL,
                fetched_at INTEGER NOT NULL,
                ttl_secs INTEGER NOT NULL,
                PRIMARY KEY (category, request_key)
            );
            CREATE INDEX IF NOT EXISTS idx_cache_fetched ON cache_entries(fetched_at);",
        )?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 在阻塞线程池上持锁执行一次数据库操作
    async fn with_conn<T, F>(&self, op: F) -> anyhow::Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, rusqlite::Error> + Send + 'static,
    {
        let conn = self.conn.clone();
        let result = tokio::task::spawn_blocking(move || {
            let guard = conn.lock().unwrap_or_else(|e| e.into_inner());
            op(&guard)
        })
        .await?;
        Ok(result?)
    }
}

fn read_entry(conn: &Connection, key: CacheKey) -> Result<Option<CacheEntry>, rusqlite::Error> {
    let row = conn
        .query_row(
            "SELECT payload, source_id, fetched_at, ttl_secs FROM cache_entries
             WHERE category = ?1 AND request_key = ?2",
            params![key.category.as_str(), key.request_key],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, i64>(3)?,
                ))
            },
        )
        .optional()?;

    let Some((payload, source_id, fetched_ms, ttl_secs)) = row else {
        return Ok(None);
    };
    let payload = match serde_json::from_str(&payload) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(key = %key, "corrupt cache payload, ignoring: {}", e);
            return Ok(None);
        }
    };
    let fetched_at: DateTime<Utc> = Utc
        .timestamp_millis_opt(fetched_ms)
        .single()
        .unwrap_or_else(Utc::now);

    Ok(Some(CacheEntry {
        key,
        payload,
        source_id,
        fetched_at,
        ttl: Duration::from_secs(ttl_secs.max(0) as u64),
    }))
}

#[async_trait]
impl CacheStore for SqliteCache {
    async fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        let owned = key.clone();
        self.with_conn(move |conn| read_entry(conn, owned))
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(key = %key, "sqlite cache read failed: {:#}", e);
                None
            })
    }

    async fn set(&self, entry: CacheEntry) {
        let key = entry.key.clone();
        let result = self
            .with_conn(move |conn| {
                conn.execute(
                    "INSERT OR REPLACE INTO cache_entries
                     (category, request_key, payload, source_id, fetched_at, ttl_secs)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        entry.key.category.as_str(),
                        entry.key.request_key,
                        entry.payload.to_string(),
                        entry.source_id,
                        entry.fetched_at.timestamp_millis(),
                        entry.ttl.as_secs() as i64,
                    ],
                )
            })
            .await;
        if let Err(e) = result {
            tracing::warn!(key = %key, "sqlite cache write failed: {:#}", e);
        }
    }

    async fn expire(&self, key: &CacheKey) -> bool {
        let owned = key.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "DELETE FROM cache_entries WHERE category = ?1 AND request_key = ?2",
                params![owned.category.as_str(), owned.request_key],
            )
        })
        .await
        .map(|n| n > 0)
        .unwrap_or_else(|e| {
            tracing::warn!(key = %key, "sqlite cache delete failed: {:#}", e);
            false
        })
    }

    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> usize {
        self.with_conn(move |conn| {
            conn.execute(
                "DELETE FROM cache_entries WHERE fetched_at < ?1",
                params![cutoff.timestamp_millis()],
            )
        })
        .await
        .unwrap_or_else(|e| {
            tracing::warn!("sqlite cache purge failed: {:#}", e);
            0
        })
    }

    async fn len(&self) -> usize {
        self.with_conn(|conn| {
            conn.query_row("SELECT COUNT(*) FROM cache_entries", [], |row| {
                row.get::<_, i64>(0)
            })
        })
        .await
        .map(|n| n as usize)
        .unwrap_or(0)
    }
}
