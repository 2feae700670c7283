//! 后台采集 Agent
//!
//! 一个 TaskSupervisor 管理：每个分类一个采集任务（间隔各不相同）+ 一个健康巡检任务。
//! 只为目录中至少有一个资源、且配置了间隔的分类创建采集任务。

pub mod supervisor;
pub mod tasks;

use std::sync::Arc;
use std::time::Duration;

use crate::core::OrchestratorContext;
use crate::executor::FallbackExecutor;

pub use supervisor::{PeriodicTask, TaskStatus, TaskSupervisor};
pub use tasks::{CollectionTask, HealthSweepTask};

/// 健康巡检任务名
pub const HEALTH_SWEEP_TASK: &str = "health_sweep";

pub struct CollectionAgent {
    supervisor: TaskSupervisor,
}

impl CollectionAgent {
    pub fn new(ctx: OrchestratorContext, executor: Arc<FallbackExecutor>) -> Self {
        let agent_cfg = &ctx.config.agent;
        let supervisor = TaskSupervisor::new(Duration::from_secs(agent_cfg.stop_timeout_secs));

        for (&category, &secs) in &agent_cfg.intervals {
            if ctx.catalog.category_len(category) == 0 {
                tracing::debug!(
                    category = category.as_str(),
                    "no resources, collection task skipped"
                );
                continue;
            }
            supervisor.register(Arc::new(CollectionTask::new(
                category,
                Duration::from_secs(secs),
                agent_cfg.request_for(category),
                executor.clone(),
            )));
        }
        supervisor.register(Arc::new(HealthSweepTask::new(
            ctx.clone(),
            Duration::from_secs(agent_cfg.sweep_interval_secs),
        )));

        Self { supervisor }
    }

    pub fn start(&self) {
        self.supervisor.start();
    }

    pub async fn stop(&self) {
        self.supervisor.stop().await;
    }

    pub async fn restart(&self, name: &str) -> bool {
        self.supervisor.restart(name).await
    }

    pub fn is_running(&self) -> bool {
        self.supervisor.is_running()
    }

    pub fn task_statuses(&self) -> Vec<TaskStatus> {
        self.supervisor.task_statuses()
    }

    pub fn task_names(&self) -> Vec<String> {
        self.supervisor.task_names()
    }
}
