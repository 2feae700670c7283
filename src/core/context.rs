//! 编排上下文：显式传入各组件的共享状态
//!
//! 没有全局单例。每个编排器实例（以及每个测试）持有自己的一份 Catalog / HealthTracker / Cache / 代理池。

use std::sync::Arc;
use std::time::Duration;

use crate::cache::{CacheStore, MemoryCache};
use crate::catalog::Catalog;
use crate::config::AppConfig;
use crate::core::StatsRecorder;
use crate::health::{HealthTracker, PriorityScorer};
use crate::proxy::ProxyRotator;
use crate::transport::Transport;

#[derive(Clone)]
pub struct OrchestratorContext {
    pub config: Arc<AppConfig>,
    pub catalog: Arc<Catalog>,
    pub health: Arc<HealthTracker>,
    pub cache: Arc<dyn CacheStore>,
    pub proxies: Arc<ProxyRotator>,
    pub transport: Arc<dyn Transport>,
    pub stats: Arc<StatsRecorder>,
}

impl OrchestratorContext {
    /// 内存缓存 + 由配置构建的追踪器与代理池
    pub fn new(config: AppConfig, catalog: Catalog, transport: Arc<dyn Transport>) -> Self {
        let health = HealthTracker::new(config.health.clone(), config.scoring.clone());
        let proxies = ProxyRotator::new(
            config.proxy.clone(),
            Duration::from_millis(config.executor.attempt_timeout_ms),
        );
        Self {
            config: Arc::new(config),
            catalog: Arc::new(catalog),
            health: Arc::new(health),
            cache: Arc::new(MemoryCache::new()),
            proxies: Arc::new(proxies),
            transport,
            stats: Arc::new(StatsRecorder::new()),
        }
    }

    pub fn with_cache(mut self, cache: Arc<dyn CacheStore>) -> Self {
        self.cache = cache;
        self
    }

    pub fn scorer(&self) -> PriorityScorer {
        PriorityScorer::new(self.catalog.clone(), self.health.clone())
    }
}
