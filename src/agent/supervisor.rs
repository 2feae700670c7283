//! 周期任务监管器
//!
//! 每个命名任务一个独立循环：按间隔 tick，tick 在单独的 tokio 任务中运行，
//! 返回 Err 或 panic 都只记日志并计数，循环照常进入下一次 tick，不影响其它任务。
//! 取消只在两次 tick 之间检查，进行中的 tick 会跑完；stop 超时后连同 tick 一起中止。

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// 可被监管的周期任务
#[async_trait]
pub trait PeriodicTask: Send + Sync + 'static {
    fn name(&self) -> String;

    fn interval(&self) -> Duration;

    async fn tick(&self) -> anyhow::Result<()>;
}

#[derive(Default)]
struct TaskCounters {
    ticks: AtomicU64,
    failures: AtomicU64,
    last_tick_at: Mutex<Option<DateTime<Utc>>>,
    last_error: Mutex<Option<String>>,
}

impl TaskCounters {
    fn record(&self, error: Option<String>) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
        *self.last_tick_at.lock().unwrap_or_else(|e| e.into_inner()) = Some(Utc::now());
        if error.is_some() {
            self.failures.fetch_add(1, Ordering::Relaxed);
        }
        *self.last_error.lock().unwrap_or_else(|e| e.into_inner()) = error;
    }
}

/// 任务状态快照
#[derive(Debug, Clone, Serialize)]
pub struct TaskStatus {
    pub name: String,
    pub interval_secs: u64,
    pub ticks: u64,
    pub failures: u64,
    pub last_tick_at: Option<DateTime<Utc>>,
    /// 最近一次 tick 的错误（成功后清空）
    pub last_error: Option<String>,
    pub running: bool,
}

struct TaskEntry {
    task: Arc<dyn PeriodicTask>,
    counters: Arc<TaskCounters>,
    running: Option<(CancellationToken, JoinHandle<()>)>,
}

pub struct TaskSupervisor {
    tasks: Mutex<BTreeMap<String, TaskEntry>>,
    stop_timeout: Duration,
}

impl TaskSupervisor {
    pub fn new(stop_timeout: Duration) -> Self {
        Self {
            tasks: Mutex::new(BTreeMap::new()),
            stop_timeout,
        }
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, TaskEntry>> {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 注册任务（同名任务会被替换；已在运行的旧任务需先 stop）
    pub fn register(&self, task: Arc<dyn PeriodicTask>) {
        let name = task.name();
        self.entries().insert(
            name,
            TaskEntry {
                task,
                counters: Arc::new(TaskCounters::default()),
                running: None,
            },
        );
    }

    pub fn task_names(&self) -> Vec<String> {
        self.entries().keys().cloned().collect()
    }

    /// 启动所有未在运行的任务
    pub fn start(&self) {
        let mut entries = self.entries();
        for (name, entry) in entries.iter_mut() {
            if entry.running.is_none() {
                entry.running = Some(spawn_loop(entry.task.clone(), entry.counters.clone()));
                tracing::info!(
                    task = name.as_str(),
                    interval = ?entry.task.interval(),
                    "task started"
                );
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.entries().values().any(|e| e.running.is_some())
    }

    /// 通知所有任务停止，并等待进行中的 tick 完成（超时则中止）
    pub async fn stop(&self) {
        let running: Vec<(String, CancellationToken, JoinHandle<()>)> = self
            .entries()
            .iter_mut()
            .filter_map(|(name, e)| e.running.take().map(|(t, h)| (name.clone(), t, h)))
            .collect();
        if running.is_empty() {
            return;
        }
        for (_, token, _) in &running {
            token.cancel();
        }

        let deadline = tokio::time::Instant::now() + self.stop_timeout;
        for (name, _, mut handle) in running {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(_) => tracing::info!(task = name.as_str(), "task stopped"),
                Err(_) => {
                    tracing::warn!(task = name.as_str(), "task did not stop in time, aborting");
                    handle.abort();
                }
            }
        }
    }

    /// 重启单个任务；不存在返回 false
    pub async fn restart(&self, name: &str) -> bool {
        let previous = {
            let mut entries = self.entries();
            let Some(entry) = entries.get_mut(name) else {
                return false;
            };
            entry.running.take()
        };

        if let Some((token, mut handle)) = previous {
            token.cancel();
            if tokio::time::timeout(self.stop_timeout, &mut handle).await.is_err() {
                tracing::warn!(task = name, "task did not stop in time, aborting");
                handle.abort();
            }
        }

        let mut entries = self.entries();
        match entries.get_mut(name) {
            Some(entry) => {
                entry.running = Some(spawn_loop(entry.task.clone(), entry.counters.clone()));
                tracing::info!(task = name, "task restarted");
                true
            }
            None => false,
        }
    }

    pub fn task_statuses(&self) -> Vec<TaskStatus> {
        self.entries()
            .iter()
            .map(|(name, e)| TaskStatus {
                name: name.clone(),
                interval_secs: e.task.interval().as_secs(),
                ticks: e.counters.ticks.load(Ordering::Relaxed),
                failures: e.counters.failures.load(Ordering::Relaxed),
                last_tick_at: *e.counters.last_tick_at.lock().unwrap_or_else(|p| p.into_inner()),
                last_error: e.counters.last_error.lock().unwrap_or_else(|p| p.into_inner()).clone(),
                running: e.running.as_ref().is_some_and(|(_, h)| !h.is_finished()),
            })
            .collect()
    }
}

/// 外层循环被中止时，正在运行的 tick 随之中止
struct TickGuard(JoinHandle<anyhow::Result<()>>);

impl Drop for TickGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

fn spawn_loop(
    task: Arc<dyn PeriodicTask>,
    counters: Arc<TaskCounters>,
) -> (CancellationToken, JoinHandle<()>) {
    let token = CancellationToken::new();
    let handle = tokio::spawn(run_loop(task, counters, token.clone()));
    (token, handle)
}

async fn run_loop(
    task: Arc<dyn PeriodicTask>,
    counters: Arc<TaskCounters>,
    token: CancellationToken,
) {
    let name = task.name();
    let mut ticker = tokio::time::interval(task.interval().max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let tick_task = task.clone();
        let mut tick = TickGuard(tokio::spawn(async move { tick_task.tick().await }));
        let error = match (&mut tick.0).await {
            Ok(Ok(())) => None,
            Ok(Err(e)) => {
                tracing::warn!(task = name.as_str(), "tick failed: {:#}", e);
                Some(e.to_string())
            }
            Err(join_err) => {
                tracing::error!(task = name.as_str(), "tick panicked: {}", join_err);
                Some(format!("panic: {}", join_err))
            }
        };
        counters.record(error);
    }
}
