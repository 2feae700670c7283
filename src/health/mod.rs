//! 健康层：追踪器、优先级评分、报告、快照持久化

pub mod persistence;
pub mod report;
pub mod scorer;
pub mod tracker;

pub use persistence::{HealthSnapshotCleanup, HealthSnapshotStore};
pub use report::{CategoryReport, HealthReport, ResourceReport};
pub use scorer::{compute_score, PriorityScorer, RankedResource};
pub use tracker::{AttemptOutcome, AttemptRecord, HealthStatus, HealthTracker, ResourceHealth};
