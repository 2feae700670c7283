//! DataHive - 带健康追踪与多级降级的外部数据源编排器
//!
//! 模块划分：
//! - **catalog**: 资源目录（分类、资源描述、TOML 加载）
//! - **health**: 健康追踪、优先级评分、健康报告与快照
//! - **executor**: 降级执行器（请求构建、结果分类、缓存兜底）
//! - **proxy**: 代理轮换与备用 DNS 解析
//! - **transport**: 传输抽象（reqwest / 脚本化测试实现）
//! - **cache**: 响应缓存（内存 / SQLite）
//! - **agent**: 后台采集与健康巡检任务
//! - **core**: 错误、上下文、构建器、编排器门面、优雅关闭
//! - **config**: 应用配置加载（TOML + 环境变量）

pub mod agent;
pub mod cache;
pub mod catalog;
pub mod config;
pub mod core;
pub mod executor;
pub mod health;
pub mod observability;
pub mod proxy;
pub mod transport;

pub use crate::catalog::Category;
pub use crate::core::{Orchestrator, OrchestratorBuilder};
pub use crate::executor::{FetchOutcome, RequestSpec};
