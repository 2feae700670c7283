//! 健康状态快照持久化
//!
//! 将所有 ResourceHealth 写入/从 JSON 文件加载，用于跨进程保留可靠性历史（可选使用）。

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::core::shutdown::ShutdownCleanup;
use crate::health::{HealthTracker, ResourceHealth};

/// 单文件 JSON 快照
#[derive(Debug, Clone)]
pub struct HealthSnapshotStore {
    path: PathBuf,
}

impl HealthSnapshotStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// 文件不存在时返回空 Vec
    pub fn load(&self) -> anyhow::Result<Vec<ResourceHealth>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let data = std::fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&data)?)
    }

    /// 父目录不存在时自动创建
    pub fn save(&self, records: &[ResourceHealth]) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_string_pretty(records)?)?;
        Ok(())
    }
}

/// 关闭时保存健康快照
pub struct HealthSnapshotCleanup {
    store: HealthSnapshotStore,
    tracker: Arc<HealthTracker>,
}

impl HealthSnapshotCleanup {
    pub fn new(store: HealthSnapshotStore, tracker: Arc<HealthTracker>) -> Self {
        Self { store, tracker }
    }
}

#[async_trait::async_trait]
impl ShutdownCleanup for HealthSnapshotCleanup {
    async fn cleanup(&self) -> anyhow::Result<()> {
        let records = self.tracker.snapshot();
        self.store.save(&records)?;
        tracing::info!("Saved health snapshot for {} resources", records.len());
        Ok(())
    }

    fn name(&self) -> &'static str {
        "HealthSnapshot"
    }
}
