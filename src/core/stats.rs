//! 按分类的聚合计数器（无锁）

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::catalog::Category;

#[derive(Debug, Default)]
struct Counters {
    attempts: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    stale_served: AtomicU64,
    unavailable: AtomicU64,
}

/// 某分类计数器的快照
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CategoryStats {
    pub attempts: u64,
    pub successes: u64,
    pub failures: u64,
    /// 以过期缓存兜底的调用次数
    pub stale_served: u64,
    /// 返回 success=false 的调用次数
    pub unavailable: u64,
}

#[derive(Debug, Default)]
pub struct StatsRecorder {
    counters: [Counters; Category::ALL.len()],
}

impl StatsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, category: Category) -> &Counters {
        &self.counters[category.index()]
    }

    pub fn record_attempt(&self, category: Category, success: bool) {
        let c = self.slot(category);
        c.attempts.fetch_add(1, Ordering::Relaxed);
        if success {
            c.successes.fetch_add(1, Ordering::Relaxed);
        } else {
            c.failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_stale(&self, category: Category) {
        self.slot(category).stale_served.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unavailable(&self, category: Category) {
        self.slot(category).unavailable.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self, category: Category) -> CategoryStats {
        let c = self.slot(category);
        CategoryStats {
            attempts: c.attempts.load(Ordering::Relaxed),
            successes: c.successes.load(Ordering::Relaxed),
            failures: c.failures.load(Ordering::Relaxed),
            stale_served: c.stale_served.load(Ordering::Relaxed),
            unavailable: c.unavailable.load(Ordering::Relaxed),
        }
    }

    pub fn snapshot(&self) -> BTreeMap<Category, CategoryStats> {
        Category::ALL.into_iter().map(|c| (c, self.get(c))).collect()
    }
}
