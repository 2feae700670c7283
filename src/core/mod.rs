//! 核心层：错误分类、编排上下文、构建器、编排器门面、优雅关闭、统计

pub mod builder;
pub mod context;
pub mod error;
pub mod orchestrator;
pub mod shutdown;
pub mod stats;

pub use builder::{create_orchestrator_builder, OrchestratorBuilder};
pub use context::OrchestratorContext;
pub use error::{AttemptError, ErrorClass, FetchFailure, OrchestratorError};
pub use orchestrator::Orchestrator;
pub use shutdown::{ShutdownCleanup, ShutdownCoordinator, ShutdownManager, ShutdownReason};
pub use stats::{CategoryStats, StatsRecorder};
