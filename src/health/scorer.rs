//! 优先级评分与排序
//!
//! 评分 = 成功率 × w1 + 归一化延迟倒数 × w2 + 新近度 × w3。
//! 排序：分数降序 → 目录优先级升序 → id 升序；同样的健康状态总是得到同样的顺序。
//! 纯内存计算，不会挂起。

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::catalog::{Catalog, Category, ResourceId};
use crate::config::ScoringSection;
use crate::health::{HealthStatus, HealthTracker, ResourceHealth};

/// 计算单个资源的评分；`health` 为 None 表示从未尝试过
pub fn compute_score(
    health: Option<&ResourceHealth>,
    weights: &ScoringSection,
    now: DateTime<Utc>,
) -> f64 {
    let (success_rate, latency_score, recency) = match health {
        None => (1.0, 1.0, 1.0),
        Some(h) => (
            h.success_rate(),
            latency_score(h.avg_latency_ms, weights.latency_reference_ms),
            recency_bonus(h.last_checked_at(), weights, now),
        ),
    };

    weights.success_weight * success_rate
        + weights.latency_weight * latency_score
        + weights.recency_weight * recency
}

/// avg == reference 时为 0.5，延迟越低越接近 1
fn latency_score(avg_latency_ms: Option<f64>, reference_ms: f64) -> f64 {
    match avg_latency_ms {
        None => 1.0,
        Some(avg) => reference_ms / (reference_ms + avg.max(0.0)),
    }
}

/// 按桶量化的半衰期衰减：距上次检查越久越小
fn recency_bonus(
    last_checked: Option<DateTime<Utc>>,
    weights: &ScoringSection,
    now: DateTime<Utc>,
) -> f64 {
    let Some(last) = last_checked else {
        return 1.0;
    };
    let elapsed = (now - last).num_seconds().max(0) as u64;
    let bucket = weights.recency_bucket_secs.max(1);
    let quantized = (elapsed / bucket) * bucket;
    let half_life = weights.recency_half_life_secs.max(1) as f64;
    0.5_f64.powf(quantized as f64 / half_life)
}

/// 排序结果中的一项（供诊断与报告）
#[derive(Debug, Clone, Serialize)]
pub struct RankedResource {
    pub id: ResourceId,
    pub score: f64,
    pub priority: u32,
    pub status: HealthStatus,
}

pub struct PriorityScorer {
    catalog: Arc<Catalog>,
    health: Arc<HealthTracker>,
}

impl PriorityScorer {
    pub fn new(catalog: Arc<Catalog>, health: Arc<HealthTracker>) -> Self {
        Self { catalog, health }
    }

    /// 某分类下可选资源的尝试顺序（BLOCKED / 已排除的资源不出现）
    pub fn select_order(&self, category: Category) -> Vec<ResourceId> {
        self.select_order_at(category, Utc::now())
    }

    pub fn select_order_at(&self, category: Category, now: DateTime<Utc>) -> Vec<ResourceId> {
        self.ranked_at(category, now).into_iter().map(|r| r.id).collect()
    }

    pub fn ranked_at(&self, category: Category, now: DateTime<Utc>) -> Vec<RankedResource> {
        let mut ranked: Vec<RankedResource> = self
            .catalog
            .by_category(category)
            .into_iter()
            .filter_map(|d| {
                let health = self.health.health(&d.id);
                if health.as_ref().is_some_and(ResourceHealth::is_excluded) {
                    return None;
                }
                Some(RankedResource {
                    id: d.id.clone(),
                    score: self.health.score_at(&d.id, now),
                    priority: d.priority,
                    status: health.map_or(HealthStatus::Active, |h| h.status),
                })
            })
            .collect();

        ranked.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.priority.cmp(&b.priority))
                .then_with(|| a.id.cmp(&b.id))
        });
        ranked
    }
}
