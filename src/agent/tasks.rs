//! 后台任务：按分类的采集任务与健康巡检任务

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use crate::agent::{PeriodicTask, HEALTH_SWEEP_TASK};
use crate::catalog::Category;
use crate::core::OrchestratorContext;
use crate::executor::{FallbackExecutor, RequestSpec};
use crate::health::HealthReport;

/// 用分类的默认请求周期性调用执行器；成功结果已由执行器写入缓存
pub struct CollectionTask {
    category: Category,
    interval: Duration,
    request: RequestSpec,
    executor: Arc<FallbackExecutor>,
}

impl CollectionTask {
    pub fn new(
        category: Category,
        interval: Duration,
        request: RequestSpec,
        executor: Arc<FallbackExecutor>,
    ) -> Self {
        Self {
            category,
            interval,
            request,
            executor,
        }
    }
}

#[async_trait]
impl PeriodicTask for CollectionTask {
    fn name(&self) -> String {
        format!("collect:{}", self.category)
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn tick(&self) -> anyhow::Result<()> {
        let outcome = self.executor.execute(self.category, &self.request, None).await;
        if !outcome.success {
            anyhow::bail!(
                "no data for {} after {} attempts ({:?})",
                self.category,
                outcome.attempts.len(),
                outcome.failure
            );
        }
        tracing::info!(
            category = self.category.as_str(),
            source = outcome.source_id.as_deref().unwrap_or("-"),
            stale = outcome.stale,
            attempts = outcome.attempts.len(),
            "collected"
        );
        Ok(())
    }
}

/// 健康巡检：排除长期 BLOCKED 的资源、探测代理、清理超龄缓存，并输出健康摘要
pub struct HealthSweepTask {
    ctx: OrchestratorContext,
    interval: Duration,
}

impl HealthSweepTask {
    pub fn new(ctx: OrchestratorContext, interval: Duration) -> Self {
        Self { ctx, interval }
    }
}

#[async_trait]
impl PeriodicTask for HealthSweepTask {
    fn name(&self) -> String {
        HEALTH_SWEEP_TASK.to_string()
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn tick(&self) -> anyhow::Result<()> {
        let excluded = self.ctx.health.cleanup_pass();
        let probe = self.ctx.proxies.probe_all(self.ctx.transport.as_ref()).await;

        let max_stale = chrono::Duration::seconds(self.ctx.config.cache.max_stale_secs as i64);
        let purged = self.ctx.cache.purge_older_than(Utc::now() - max_stale).await;

        let report = HealthReport::build(&self.ctx.catalog, &self.ctx.health, Utc::now());
        for c in &report.categories {
            tracing::info!(
                category = c.category.map(|cat| cat.as_str()).unwrap_or("all"),
                resources = c.resources,
                active = c.active,
                degraded = c.degraded,
                failed = c.failed,
                blocked = c.blocked,
                proxy_needed = c.proxy_needed,
                "health summary"
            );
        }
        tracing::info!(
            excluded = excluded.len(),
            proxies_probed = probe.probed,
            proxies_recovered = probe.recovered,
            cache_purged = purged,
            "health sweep finished"
        );
        Ok(())
    }
}
