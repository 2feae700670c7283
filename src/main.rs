//! DataHive 守护进程
//!
//! 入口：初始化日志、加载配置与资源目录、构建编排器并启动后台采集；
//! 收到 Ctrl+C / SIGTERM 后停止 Agent 并执行清理（保存健康快照）。

use std::path::PathBuf;

use anyhow::Context;
use datahive::core::{create_orchestrator_builder, ShutdownManager};
use datahive::observability;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    // 可选：第一个参数为额外的配置文件
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let orchestrator = create_orchestrator_builder(config_path)
        .build()
        .context("Failed to build orchestrator")?;

    let report = orchestrator.get_health_report();
    tracing::info!(
        "DataHive started: {} resources, {} categories, {} proxies",
        report.resources.len(),
        report.categories.len(),
        orchestrator.proxy_report().len()
    );

    let shutdown = ShutdownManager::new();
    shutdown.install_signal_handlers();

    orchestrator.start_agent();
    shutdown.wait_for_shutdown().await;

    tracing::info!(reason = ?shutdown.reason(), "Stopping background agent...");
    orchestrator.stop_agent().await;
    orchestrator.shutdown_coordinator().run_cleanup().await;

    if let Ok(stats) = serde_json::to_string(&orchestrator.get_stats()) {
        tracing::info!(stats = %stats, "final stats");
    }
    Ok(())
}
