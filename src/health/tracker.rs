//! 健康追踪器
//!
//! 每个资源一份 ResourceHealth，首次尝试时惰性创建。外层 map 只在查找/插入时短暂加锁，
//! 状态更新在每个资源自己的 Mutex 内完成，互不相关的资源可以并发推进。
//!
//! 状态机（失败侧）：
//! ```text
//! consecutive_failures < degraded_after             → ACTIVE
//! degraded_after <= consecutive_failures < failed_after → DEGRADED
//! consecutive_failures >= failed_after               → FAILED
//! FAILED 且距上次成功超过 blocked_grace             → BLOCKED（只能从 FAILED 进入）
//! error_class == GeoBlock                            → PROXY_NEEDED（无视上面的阈值）
//! ```
//!
//! 成功总是把状态重新评估为 ACTIVE（或因延迟过高为 DEGRADED）。
//! 是否经代理访问由单独的 `prefer_proxy` 记录：地域封锁时置位，直连成功时清除。

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::catalog::ResourceId;
use crate::config::{HealthSection, ScoringSection};
use crate::core::ErrorClass;
use crate::health::scorer::compute_score;

/// 资源的粗粒度可靠性分类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthStatus {
    Active,
    Degraded,
    Failed,
    Blocked,
    ProxyNeeded,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Active => "ACTIVE",
            HealthStatus::Degraded => "DEGRADED",
            HealthStatus::Failed => "FAILED",
            HealthStatus::Blocked => "BLOCKED",
            HealthStatus::ProxyNeeded => "PROXY_NEEDED",
        }
    }
}

/// 单个资源的可变健康状态
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceHealth {
    pub resource_id: ResourceId,
    pub success_count: u64,
    pub failure_count: u64,
    pub total_attempts: u64,
    /// 成功请求延迟的指数滑动平均（毫秒）
    pub avg_latency_ms: Option<f64>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_failure_at: Option<DateTime<Utc>>,
    /// 开始追踪的时间；从未成功过的资源以此计算 BLOCKED 宽限期
    pub first_seen_at: DateTime<Utc>,
    pub consecutive_failures: u32,
    pub status: HealthStatus,
    /// 处于 BLOCKED 状态时经历的巡检次数
    #[serde(default)]
    pub blocked_sweeps: u32,
    /// 已被巡检报告为排除
    #[serde(default)]
    pub excluded: bool,
    /// 曾遇到地域封锁，后续请求走代理
    #[serde(default)]
    pub prefer_proxy: bool,
}

impl ResourceHealth {
    pub fn new(resource_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            resource_id: resource_id.into(),
            success_count: 0,
            failure_count: 0,
            total_attempts: 0,
            avg_latency_ms: None,
            last_success_at: None,
            last_failure_at: None,
            first_seen_at: now,
            consecutive_failures: 0,
            status: HealthStatus::Active,
            blocked_sweeps: 0,
            excluded: false,
            prefer_proxy: false,
        }
    }

    /// 未尝试过的资源记为 1.0，保证新资源有机会被探索
    pub fn success_rate(&self) -> f64 {
        if self.total_attempts == 0 {
            1.0
        } else {
            self.success_count as f64 / self.total_attempts as f64
        }
    }

    /// 最近一次被检查（无论成败）的时间
    pub fn last_checked_at(&self) -> Option<DateTime<Utc>> {
        match (self.last_success_at, self.last_failure_at) {
            (Some(s), Some(f)) => Some(s.max(f)),
            (s, f) => s.or(f),
        }
    }

    /// 不参与选择：BLOCKED 或已被巡检排除
    pub fn is_excluded(&self) -> bool {
        self.excluded || self.status == HealthStatus::Blocked
    }

    pub fn routes_via_proxy(&self) -> bool {
        self.prefer_proxy || self.status == HealthStatus::ProxyNeeded
    }
}

/// 单次尝试的诊断记录（仅用于诊断，不是权威状态）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub resource_id: ResourceId,
    pub success: bool,
    pub error_class: Option<ErrorClass>,
    pub latency_ms: u64,
    pub at: DateTime<Utc>,
    pub via_proxy: bool,
}

/// 传给 record_attempt 的结果
#[derive(Debug, Clone, Copy)]
pub struct AttemptOutcome {
    pub success: bool,
    pub latency: Duration,
    pub error_class: Option<ErrorClass>,
    pub via_proxy: bool,
}

impl AttemptOutcome {
    pub fn success(latency: Duration) -> Self {
        Self {
            success: true,
            latency,
            error_class: None,
            via_proxy: false,
        }
    }

    pub fn failure(latency: Duration, class: ErrorClass) -> Self {
        Self {
            success: false,
            latency,
            error_class: Some(class),
            via_proxy: false,
        }
    }

    pub fn via_proxy(mut self, via_proxy: bool) -> Self {
        self.via_proxy = via_proxy;
        self
    }
}

struct Slot {
    health: ResourceHealth,
    history: VecDeque<AttemptRecord>,
}

pub struct HealthTracker {
    policy: HealthSection,
    scoring: ScoringSection,
    slots: RwLock<HashMap<ResourceId, Arc<Mutex<Slot>>>>,
}

impl HealthTracker {
    pub fn new(policy: HealthSection, scoring: ScoringSection) -> Self {
        Self {
            policy,
            scoring,
            slots: RwLock::new(HashMap::new()),
        }
    }

    pub fn policy(&self) -> &HealthSection {
        &self.policy
    }

    fn existing_slot(&self, id: &str) -> Option<Arc<Mutex<Slot>>> {
        self.slots
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned()
    }

    fn slot_or_insert(&self, id: &str, now: DateTime<Utc>) -> Arc<Mutex<Slot>> {
        if let Some(slot) = self.existing_slot(id) {
            return slot;
        }
        let mut slots = self.slots.write().unwrap_or_else(|e| e.into_inner());
        slots
            .entry(id.to_string())
            .or_insert_with(|| {
                Arc::new(Mutex::new(Slot {
                    health: ResourceHealth::new(id, now),
                    history: VecDeque::new(),
                }))
            })
            .clone()
    }

    fn all_slots(&self) -> Vec<Arc<Mutex<Slot>>> {
        self.slots
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect()
    }

    /// 记录一次尝试，返回更新后的状态
    pub fn record_attempt(&self, id: &str, outcome: AttemptOutcome) -> HealthStatus {
        self.record_attempt_at(id, outcome, Utc::now())
    }

    pub fn record_attempt_at(
        &self,
        id: &str,
        outcome: AttemptOutcome,
        now: DateTime<Utc>,
    ) -> HealthStatus {
        let slot = self.slot_or_insert(id, now);
        let mut slot = slot.lock().unwrap_or_else(|e| e.into_inner());
        let previous = slot.health.status;
        let latency_ms = outcome.latency.as_millis() as u64;

        let h = &mut slot.health;
        h.total_attempts += 1;
        if outcome.success {
            h.consecutive_failures = 0;
            h.success_count += 1;
            h.last_success_at = Some(now);
            let alpha = self.policy.ema_alpha;
            h.avg_latency_ms = Some(match h.avg_latency_ms {
                Some(avg) => alpha * latency_ms as f64 + (1.0 - alpha) * avg,
                None => latency_ms as f64,
            });
            h.blocked_sweeps = 0;
            h.excluded = false;
            if !outcome.via_proxy {
                h.prefer_proxy = false;
            }
            h.status = if latency_ms > self.policy.degraded_latency_ms {
                HealthStatus::Degraded
            } else {
                HealthStatus::Active
            };
        } else {
            h.consecutive_failures += 1;
            h.failure_count += 1;
            h.last_failure_at = Some(now);
            h.status = if outcome.error_class == Some(ErrorClass::GeoBlock) {
                h.prefer_proxy = true;
                HealthStatus::ProxyNeeded
            } else {
                self.failure_status(h, previous, now)
            };
        }

        let status = h.status;
        slot.history.push_back(AttemptRecord {
            resource_id: id.to_string(),
            success: outcome.success,
            error_class: outcome.error_class,
            latency_ms,
            at: now,
            via_proxy: outcome.via_proxy,
        });
        while slot.history.len() > self.policy.history_capacity.max(1) {
            slot.history.pop_front();
        }

        if status != previous {
            tracing::warn!(
                resource = id,
                from = previous.as_str(),
                to = status.as_str(),
                consecutive_failures = slot.health.consecutive_failures,
                "health status changed"
            );
        }
        status
    }

    /// 失败后的数值阈值状态；BLOCKED 只能从 FAILED 进入
    fn failure_status(
        &self,
        h: &ResourceHealth,
        previous: HealthStatus,
        now: DateTime<Utc>,
    ) -> HealthStatus {
        let cf = h.consecutive_failures;
        if cf >= self.policy.failed_after {
            let was_failed = matches!(previous, HealthStatus::Failed | HealthStatus::Blocked);
            if was_failed && self.grace_elapsed(h, now) {
                HealthStatus::Blocked
            } else {
                HealthStatus::Failed
            }
        } else if cf >= self.policy.degraded_after {
            HealthStatus::Degraded
        } else {
            HealthStatus::Active
        }
    }

    fn grace_elapsed(&self, h: &ResourceHealth, now: DateTime<Utc>) -> bool {
        let since = h.last_success_at.unwrap_or(h.first_seen_at);
        let grace = chrono::Duration::seconds(self.policy.blocked_grace_secs as i64);
        now - since >= grace
    }

    /// 优先级评分（见 scorer::compute_score）
    pub fn score(&self, id: &str) -> f64 {
        self.score_at(id, Utc::now())
    }

    pub fn score_at(&self, id: &str, now: DateTime<Utc>) -> f64 {
        let health = self.health(id);
        compute_score(health.as_ref(), &self.scoring, now)
    }

    pub fn health(&self, id: &str) -> Option<ResourceHealth> {
        self.existing_slot(id)
            .map(|slot| slot.lock().unwrap_or_else(|e| e.into_inner()).health.clone())
    }

    pub fn status(&self, id: &str) -> HealthStatus {
        self.health(id).map_or(HealthStatus::Active, |h| h.status)
    }

    pub fn is_excluded(&self, id: &str) -> bool {
        self.health(id).is_some_and(|h| h.is_excluded())
    }

    /// 是否应经代理访问该资源（地域封锁后保持，直到一次直连成功）
    pub fn routes_via_proxy(&self, id: &str) -> bool {
        self.health(id).is_some_and(|h| h.routes_via_proxy())
    }

    pub fn recent_attempts(&self, id: &str) -> Vec<AttemptRecord> {
        self.existing_slot(id)
            .map(|slot| {
                slot.lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .history
                    .iter()
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// 所有已追踪资源的快照（按 id 排序）
    pub fn snapshot(&self) -> Vec<ResourceHealth> {
        let mut all: Vec<ResourceHealth> = self
            .all_slots()
            .iter()
            .map(|slot| slot.lock().unwrap_or_else(|e| e.into_inner()).health.clone())
            .collect();
        all.sort_by(|a, b| a.resource_id.cmp(&b.resource_id));
        all
    }

    /// 从快照恢复（覆盖同 id 的现有状态，历史记录不恢复）
    pub fn restore(&self, records: Vec<ResourceHealth>) {
        let mut slots = self.slots.write().unwrap_or_else(|e| e.into_inner());
        for health in records {
            slots.insert(
                health.resource_id.clone(),
                Arc::new(Mutex::new(Slot {
                    health,
                    history: VecDeque::new(),
                })),
            );
        }
    }

    /// 管理操作：清除某资源的健康状态（包括排除标记），返回是否存在
    pub fn reset(&self, id: &str) -> bool {
        let removed = self
            .slots
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id)
            .is_some();
        if removed {
            tracing::info!(resource = id, "health state reset");
        }
        removed
    }

    /// 巡检：推进时间驱动的 FAILED → BLOCKED，并返回本轮新排除的资源 id（不修改目录）
    pub fn cleanup_pass(&self) -> Vec<ResourceId> {
        self.cleanup_pass_at(Utc::now())
    }

    pub fn cleanup_pass_at(&self, now: DateTime<Utc>) -> Vec<ResourceId> {
        let mut newly_excluded = Vec::new();

        for slot in self.all_slots() {
            let mut slot = slot.lock().unwrap_or_else(|e| e.into_inner());
            let h = &mut slot.health;

            if h.status == HealthStatus::Failed && self.grace_elapsed(h, now) {
                h.status = HealthStatus::Blocked;
                tracing::warn!(
                    resource = h.resource_id.as_str(),
                    from = "FAILED",
                    to = "BLOCKED",
                    "health status changed"
                );
            }

            if h.status == HealthStatus::Blocked {
                h.blocked_sweeps += 1;
                if !h.excluded && h.blocked_sweeps >= self.policy.blocked_sweeps_before_exclusion {
                    h.excluded = true;
                    newly_excluded.push(h.resource_id.clone());
                }
            }
        }

        newly_excluded.sort();
        for id in &newly_excluded {
            tracing::warn!(resource = id.as_str(), "resource excluded from selection");
        }
        newly_excluded
    }
}
