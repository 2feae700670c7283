//! 编排器构建器：统一的初始化逻辑
//!
//! 二进制与测试共用：校验配置 → 加载目录 → 选择缓存后端 → 恢复健康快照 → 组装执行器与后台 Agent。
//! 测试通过 with_catalog / with_transport 注入内存目录与脚本化传输。

use std::path::PathBuf;
use std::sync::Arc;

use crate::agent::CollectionAgent;
use crate::cache::{CacheStore, MemoryCache, SqliteCache};
use crate::catalog::{load_catalog, Catalog};
use crate::config::{AppConfig, CacheBackend};
use crate::core::{Orchestrator, OrchestratorContext, OrchestratorError};
use crate::executor::FallbackExecutor;
use crate::health::HealthSnapshotStore;
use crate::transport::{ReqwestTransport, Transport};

pub struct OrchestratorBuilder {
    config: AppConfig,
    catalog: Option<Catalog>,
    catalog_path: Option<PathBuf>,
    transport: Option<Arc<dyn Transport>>,
    cache: Option<Arc<dyn CacheStore>>,
}

impl OrchestratorBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            catalog: None,
            catalog_path: None,
            transport: None,
            cache: None,
        }
    }

    /// 直接使用内存中的目录（不读文件）
    pub fn with_catalog(mut self, catalog: Catalog) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// 覆盖配置中的 catalog_path
    pub fn with_catalog_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.catalog_path = Some(path.into());
        self
    }

    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// 覆盖配置中的缓存后端
    pub fn with_cache(mut self, cache: Arc<dyn CacheStore>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    fn build_cache(&self) -> Result<Arc<dyn CacheStore>, OrchestratorError> {
        if let Some(cache) = &self.cache {
            return Ok(cache.clone());
        }
        match self.config.cache.backend {
            CacheBackend::Memory => Ok(Arc::new(MemoryCache::new())),
            CacheBackend::Sqlite => {
                let path = &self.config.cache.sqlite_path;
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent)?;
                }
                let cache = SqliteCache::open(path)
                    .map_err(|e| OrchestratorError::Cache(format!("{}: {}", path.display(), e)))?;
                tracing::info!("Using SQLite cache at {}", path.display());
                Ok(Arc::new(cache))
            }
        }
    }

    pub fn build(self) -> Result<Orchestrator, OrchestratorError> {
        self.config.validate().map_err(OrchestratorError::Config)?;

        let cache = self.build_cache()?;
        let catalog = match self.catalog {
            Some(catalog) => catalog,
            None => {
                let path = self.catalog_path.or_else(|| self.config.app.catalog_path.clone());
                load_catalog(path.as_deref())?
            }
        };
        warn_missing_keys(&catalog);
        let transport = self
            .transport
            .unwrap_or_else(|| Arc::new(ReqwestTransport::new(&self.config.executor.user_agent)));

        let snapshot = self
            .config
            .app
            .health_snapshot_path
            .as_ref()
            .map(HealthSnapshotStore::new);

        let ctx = OrchestratorContext::new(self.config, catalog, transport).with_cache(cache);

        if let Some(store) = &snapshot {
            match store.load() {
                Ok(records) if !records.is_empty() => {
                    tracing::info!("Restored health state for {} resources", records.len());
                    ctx.health.restore(records);
                }
                Ok(_) => {}
                Err(e) => tracing::warn!("Failed to load health snapshot: {}", e),
            }
        }

        let executor = Arc::new(FallbackExecutor::new(ctx.clone())?);
        let agent = CollectionAgent::new(ctx.clone(), executor.clone());
        Ok(Orchestrator::new(ctx, executor, agent, snapshot))
    }
}

/// 启动时提示缺少 API Key 的资源；这些资源的尝试会以 Auth 失败记录
fn warn_missing_keys(catalog: &Catalog) {
    for descriptor in catalog.iter() {
        let Some(key_env) = descriptor.auth.key_env() else {
            continue;
        };
        if std::env::var_os(key_env).is_none() {
            tracing::warn!(
                resource = descriptor.id.as_str(),
                key_env,
                "API key not set, attempts will fail with auth error"
            );
        }
    }
}

/// 便捷函数：加载配置（失败时用默认值）并创建构建器
pub fn create_orchestrator_builder(config_path: Option<PathBuf>) -> OrchestratorBuilder {
    let config = crate::config::load_config(config_path).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });
    OrchestratorBuilder::new(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Category, ResourceDescriptor};
    use crate::health::{AttemptOutcome, HealthTracker};
    use crate::transport::ScriptedTransport;

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = AppConfig::default();
        config.scoring.latency_weight = -1.0;
        let err = OrchestratorBuilder::new(config)
            .with_catalog(Catalog::new(Vec::new()).unwrap())
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, OrchestratorError::Config(_)));
    }

    #[test]
    fn test_catalog_errors_surface() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("resources.toml");
        std::fs::write(
            &path,
            "[[resources]]\nid = \"a\"\nname = \"A\"\ncategory = \"news\"\nbase_url = \"https://a\"\n\n[[resources]]\nid = \"a\"\nname = \"A2\"\ncategory = \"news\"\nbase_url = \"https://b\"\n",
        )
        .unwrap();
        let err = OrchestratorBuilder::new(AppConfig::default())
            .with_catalog_path(&path)
            .with_transport(Arc::new(ScriptedTransport::new()))
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, OrchestratorError::Catalog(_)));
    }

    #[test]
    fn test_unusable_sqlite_dir_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, "").unwrap();

        let mut config = AppConfig::default();
        config.cache.backend = CacheBackend::Sqlite;
        config.cache.sqlite_path = blocker.join("cache.db");
        let err = OrchestratorBuilder::new(config)
            .with_catalog(Catalog::new(Vec::new()).unwrap())
            .with_transport(Arc::new(ScriptedTransport::new()))
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, OrchestratorError::Io(_)));
    }

    #[test]
    fn test_snapshot_is_restored_and_sqlite_backend_selected() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot_path = dir.path().join("health.json");

        let tracker = HealthTracker::new(Default::default(), Default::default());
        tracker.record_attempt("a", AttemptOutcome::success(std::time::Duration::from_millis(80)));
        HealthSnapshotStore::new(&snapshot_path).save(&tracker.snapshot()).unwrap();

        let mut config = AppConfig::default();
        config.app.health_snapshot_path = Some(snapshot_path);
        config.cache.backend = CacheBackend::Sqlite;
        config.cache.sqlite_path = dir.path().join("cache/cache.db");

        let orchestrator = OrchestratorBuilder::new(config)
            .with_catalog(
                Catalog::new(vec![ResourceDescriptor::new("a", Category::News, "https://a")])
                    .unwrap(),
            )
            .with_transport(Arc::new(ScriptedTransport::new()))
            .build()
            .unwrap();

        let health = orchestrator.context().health.health("a").unwrap();
        assert_eq!(health.success_count, 1);
        assert!(dir.path().join("cache/cache.db").exists());
    }
}
