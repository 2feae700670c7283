//! 编排器门面
//!
//! 对外暴露 execute / get_health_report / get_stats / cleanup_failed，
//! 以及后台 Agent 的启停与代理池报告。所有共享状态都在 OrchestratorContext 中。

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::agent::{CollectionAgent, TaskStatus};
use crate::catalog::{Category, ResourceId};
use crate::core::shutdown::ShutdownCoordinator;
use crate::core::{CategoryStats, OrchestratorContext};
use crate::executor::{FallbackExecutor, FetchOutcome, RequestSpec};
use crate::health::{HealthReport, HealthSnapshotCleanup, HealthSnapshotStore};
use crate::proxy::{ProbeSummary, ProxyDescriptor};

pub struct Orchestrator {
    ctx: OrchestratorContext,
    executor: Arc<FallbackExecutor>,
    agent: CollectionAgent,
    snapshot: Option<HealthSnapshotStore>,
}

impl Orchestrator {
    pub fn new(
        ctx: OrchestratorContext,
        executor: Arc<FallbackExecutor>,
        agent: CollectionAgent,
        snapshot: Option<HealthSnapshotStore>,
    ) -> Self {
        Self {
            ctx,
            executor,
            agent,
            snapshot,
        }
    }

    pub fn context(&self) -> &OrchestratorContext {
        &self.ctx
    }

    /// 按降级链获取数据；max_attempts 缺省为 min(max_attempts_cap, 分类资源数)
    pub async fn execute(
        &self,
        category: Category,
        spec: &RequestSpec,
        max_attempts: Option<usize>,
    ) -> FetchOutcome {
        self.executor.execute(category, spec, max_attempts).await
    }

    pub async fn execute_with_cancel(
        &self,
        category: Category,
        spec: &RequestSpec,
        max_attempts: Option<usize>,
        cancel: &CancellationToken,
    ) -> FetchOutcome {
        self.executor
            .execute_with_cancel(category, spec, max_attempts, cancel)
            .await
    }

    /// 当前的尝试顺序
    pub fn select_order(&self, category: Category) -> Vec<ResourceId> {
        self.executor.scorer().select_order(category)
    }

    pub fn get_health_report(&self) -> HealthReport {
        HealthReport::build(&self.ctx.catalog, &self.ctx.health, Utc::now())
    }

    pub fn get_stats(&self) -> BTreeMap<Category, CategoryStats> {
        self.ctx.stats.snapshot()
    }

    /// 触发一次巡检，返回本轮新排除的资源
    pub fn cleanup_failed(&self) -> Vec<ResourceId> {
        self.ctx.health.cleanup_pass()
    }

    /// 人工恢复资源：清空其健康状态（含排除标记）
    pub fn reset_resource(&self, id: &str) -> bool {
        self.ctx.health.reset(id)
    }

    pub fn proxy_report(&self) -> Vec<ProxyDescriptor> {
        self.ctx.proxies.health_report()
    }

    pub async fn probe_proxies(&self) -> ProbeSummary {
        self.ctx.proxies.probe_all(self.ctx.transport.as_ref()).await
    }

    pub fn start_agent(&self) {
        if !self.ctx.config.agent.enabled {
            tracing::info!("Background agent disabled by config");
            return;
        }
        self.agent.start();
    }

    pub async fn stop_agent(&self) {
        self.agent.stop().await;
    }

    pub async fn restart_task(&self, name: &str) -> bool {
        self.agent.restart(name).await
    }

    pub fn task_statuses(&self) -> Vec<TaskStatus> {
        self.agent.task_statuses()
    }

    /// 关闭时的清理任务（健康快照）
    pub fn shutdown_coordinator(&self) -> ShutdownCoordinator {
        let stop_timeout = Duration::from_secs(self.ctx.config.agent.stop_timeout_secs);
        let mut coordinator = ShutdownCoordinator::new().with_timeout(stop_timeout);
        if let Some(store) = &self.snapshot {
            coordinator.register(HealthSnapshotCleanup::new(
                store.clone(),
                self.ctx.health.clone(),
            ));
        }
        coordinator
    }
}
