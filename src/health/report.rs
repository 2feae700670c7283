//! 健康报告：按资源与按分类汇总

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::catalog::{Catalog, Category, ResourceId};
use crate::health::{HealthStatus, HealthTracker};

#[derive(Debug, Clone, Serialize)]
pub struct ResourceReport {
    pub id: ResourceId,
    pub name: String,
    pub category: Category,
    pub status: HealthStatus,
    pub success_rate: f64,
    pub avg_latency_ms: Option<f64>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub total_attempts: u64,
    pub excluded: bool,
    pub score: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CategoryReport {
    pub category: Option<Category>,
    pub resources: usize,
    pub active: usize,
    pub degraded: usize,
    pub failed: usize,
    pub blocked: usize,
    pub proxy_needed: usize,
    /// 仍可被选择的资源数
    pub selectable: usize,
    pub mean_success_rate: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub generated_at: DateTime<Utc>,
    pub resources: Vec<ResourceReport>,
    pub categories: Vec<CategoryReport>,
}

impl HealthReport {
    pub fn build(catalog: &Catalog, tracker: &HealthTracker, now: DateTime<Utc>) -> Self {
        let mut resources: Vec<ResourceReport> = catalog
            .iter()
            .map(|d| {
                let health = tracker.health(&d.id);
                ResourceReport {
                    id: d.id.clone(),
                    name: d.name.clone(),
                    category: d.category,
                    status: health.as_ref().map_or(HealthStatus::Active, |h| h.status),
                    success_rate: health.as_ref().map_or(1.0, |h| h.success_rate()),
                    avg_latency_ms: health.as_ref().and_then(|h| h.avg_latency_ms),
                    last_success_at: health.as_ref().and_then(|h| h.last_success_at),
                    consecutive_failures: health.as_ref().map_or(0, |h| h.consecutive_failures),
                    total_attempts: health.as_ref().map_or(0, |h| h.total_attempts),
                    excluded: health.as_ref().is_some_and(|h| h.is_excluded()),
                    score: tracker.score_at(&d.id, now),
                }
            })
            .collect();
        resources.sort_by(|a, b| a.category.cmp(&b.category).then_with(|| a.id.cmp(&b.id)));

        let categories = catalog
            .categories()
            .into_iter()
            .map(|category| {
                let members: Vec<&ResourceReport> =
                    resources.iter().filter(|r| r.category == category).collect();
                let mut summary = CategoryReport {
                    category: Some(category),
                    resources: members.len(),
                    ..CategoryReport::default()
                };
                for r in &members {
                    match r.status {
                        HealthStatus::Active => summary.active += 1,
                        HealthStatus::Degraded => summary.degraded += 1,
                        HealthStatus::Failed => summary.failed += 1,
                        HealthStatus::Blocked => summary.blocked += 1,
                        HealthStatus::ProxyNeeded => summary.proxy_needed += 1,
                    }
                    if !r.excluded {
                        summary.selectable += 1;
                    }
                }
                if !members.is_empty() {
                    summary.mean_success_rate =
                        members.iter().map(|r| r.success_rate).sum::<f64>() / members.len() as f64;
                }
                summary
            })
            .collect();

        Self {
            generated_at: now,
            resources,
            categories,
        }
    }

    pub fn resource(&self, id: &str) -> Option<&ResourceReport> {
        self.resources.iter().find(|r| r.id == id)
    }

    pub fn category(&self, category: Category) -> Option<&CategoryReport> {
        self.categories.iter().find(|c| c.category == Some(category))
    }
}
