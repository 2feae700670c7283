//! 降级执行器
//!
//! execute(category, spec) 按 PriorityScorer 给出的顺序逐个尝试资源（严格串行），
//! 第一个成功即写缓存并返回；全部失败时用缓存兜底（即使已过期，带 stale 标记）。
//! 单次尝试的所有错误都在这里被吞掉并记入 HealthTracker，调用方只会拿到 FetchOutcome。

pub mod classify;
pub mod request;

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::cache::{CacheEntry, CacheKey};
use crate::catalog::{Category, ResourceDescriptor, ResourceId};
use crate::core::{AttemptError, FetchFailure, OrchestratorContext, OrchestratorError};
use crate::health::{AttemptOutcome, AttemptRecord, HealthStatus, PriorityScorer};
use crate::transport::TransportError;

pub use classify::OutcomeClassifier;
pub use request::{build_request, RequestSpec};

/// execute 的结构化结果（从不以 Err 形式返回）
#[derive(Debug, Clone, Serialize)]
pub struct FetchOutcome {
    pub success: bool,
    pub payload: Option<serde_json::Value>,
    pub source_id: Option<ResourceId>,
    /// 本次调用的所有尝试，按发生顺序
    pub attempts: Vec<AttemptRecord>,
    /// 载荷来自缓存兜底而非实时获取
    pub stale: bool,
    /// 调用方取消
    pub cancelled: bool,
    pub failure: Option<FetchFailure>,
    /// 载荷的获取时间（stale 时为缓存写入时间）
    pub fetched_at: Option<DateTime<Utc>>,
}

impl FetchOutcome {
    fn fresh(
        payload: serde_json::Value,
        source_id: ResourceId,
        attempts: Vec<AttemptRecord>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            success: true,
            payload: Some(payload),
            source_id: Some(source_id),
            attempts,
            stale: false,
            cancelled: false,
            failure: None,
            fetched_at: Some(at),
        }
    }

    fn stale(entry: CacheEntry, attempts: Vec<AttemptRecord>) -> Self {
        Self {
            success: true,
            payload: Some(entry.payload),
            source_id: Some(entry.source_id),
            attempts,
            stale: true,
            cancelled: false,
            failure: None,
            fetched_at: Some(entry.fetched_at),
        }
    }

    fn failed(failure: FetchFailure, attempts: Vec<AttemptRecord>) -> Self {
        Self {
            success: false,
            payload: None,
            source_id: None,
            attempts,
            stale: false,
            cancelled: false,
            failure: Some(failure),
            fetched_at: None,
        }
    }

    fn cancelled(attempts: Vec<AttemptRecord>) -> Self {
        Self {
            success: false,
            payload: None,
            source_id: None,
            attempts,
            stale: false,
            cancelled: true,
            failure: None,
            fetched_at: None,
        }
    }

    /// 被尝试过的资源 ID，按顺序
    pub fn attempted_ids(&self) -> Vec<&str> {
        self.attempts.iter().map(|a| a.resource_id.as_str()).collect()
    }
}

/// 单次资源尝试的结果
enum Attempt {
    Done {
        result: Result<serde_json::Value, AttemptError>,
        latency: Duration,
        via_proxy: bool,
    },
    Cancelled,
}

pub struct FallbackExecutor {
    ctx: OrchestratorContext,
    scorer: PriorityScorer,
    classifier: OutcomeClassifier,
    attempt_timeout: Duration,
}

impl FallbackExecutor {
    pub fn new(ctx: OrchestratorContext) -> Result<Self, OrchestratorError> {
        let classifier = OutcomeClassifier::new(&ctx.config.executor.geo_block_patterns)
            .map_err(|e| OrchestratorError::Config(format!("invalid geo_block pattern: {}", e)))?;
        let attempt_timeout = ctx.config.executor.attempt_timeout();
        Ok(Self {
            scorer: ctx.scorer(),
            ctx,
            classifier,
            attempt_timeout,
        })
    }

    pub fn scorer(&self) -> &PriorityScorer {
        &self.scorer
    }

    /// 默认尝试上限：min(max_attempts_cap, 分类资源数)
    pub fn default_max_attempts(&self, category: Category) -> usize {
        self.ctx
            .config
            .executor
            .max_attempts_cap
            .min(self.ctx.catalog.category_len(category))
    }

    pub async fn execute(
        &self,
        category: Category,
        spec: &RequestSpec,
        max_attempts: Option<usize>,
    ) -> FetchOutcome {
        self.execute_with_cancel(category, spec, max_attempts, &CancellationToken::new())
            .await
    }

    /// 可取消的 execute：取消时中止进行中的尝试、跳过剩余尝试，返回已完成的尝试记录
    pub async fn execute_with_cancel(
        &self,
        category: Category,
        spec: &RequestSpec,
        max_attempts: Option<usize>,
        cancel: &CancellationToken,
    ) -> FetchOutcome {
        let request_key = spec.cache_key();
        let span = tracing::info_span!(
            "execute",
            category = category.as_str(),
            request_key = request_key.as_str(),
            execution_id = %uuid::Uuid::new_v4(),
        );
        self.run(category, spec, request_key, max_attempts, cancel)
            .instrument(span)
            .await
    }

    async fn run(
        &self,
        category: Category,
        spec: &RequestSpec,
        request_key: String,
        max_attempts: Option<usize>,
        cancel: &CancellationToken,
    ) -> FetchOutcome {
        let limit = max_attempts.unwrap_or_else(|| self.default_max_attempts(category));
        let order = self.scorer.select_order(category);
        let mut attempts = Vec::new();

        for id in order.iter().take(limit) {
            if cancel.is_cancelled() {
                tracing::info!(attempts = attempts.len(), "execution cancelled");
                return FetchOutcome::cancelled(attempts);
            }
            let Some(descriptor) = self.ctx.catalog.get(id) else {
                continue;
            };

            let (result, latency, via_proxy) = match self.attempt(descriptor, spec, cancel).await {
                Attempt::Done {
                    result,
                    latency,
                    via_proxy,
                } => (result, latency, via_proxy),
                Attempt::Cancelled => {
                    tracing::info!(
                        resource = id.as_str(),
                        attempts = attempts.len(),
                        "execution cancelled mid-attempt"
                    );
                    return FetchOutcome::cancelled(attempts);
                }
            };

            let at = Utc::now();
            let outcome = match &result {
                Ok(_) => AttemptOutcome::success(latency),
                Err(e) => AttemptOutcome::failure(latency, e.class()),
            }
            .via_proxy(via_proxy);
            let status = self.ctx.health.record_attempt_at(id, outcome, at);
            self.ctx.stats.record_attempt(category, result.is_ok());

            let record = AttemptRecord {
                resource_id: id.clone(),
                success: result.is_ok(),
                error_class: outcome.error_class,
                latency_ms: latency.as_millis() as u64,
                at,
                via_proxy,
            };
            audit(&record, status, result.as_ref().err());
            attempts.push(record);

            if let Ok(payload) = result {
                let entry = CacheEntry::new(
                    CacheKey::new(category, request_key.clone()),
                    payload.clone(),
                    id.clone(),
                    self.ctx.config.cache.ttl_for(category),
                )
                .fetched_at(at);
                self.ctx.cache.set(entry).await;
                return FetchOutcome::fresh(payload, id.clone(), attempts, at);
            }
        }

        let stale = self.ctx.cache.get(&CacheKey::new(category, request_key)).await;
        if let Some(entry) = stale {
            let age_secs = (Utc::now() - entry.fetched_at).num_seconds();
            tracing::warn!(
                source = entry.source_id.as_str(),
                age_secs,
                attempts = attempts.len(),
                "all live attempts failed, serving cached payload"
            );
            self.ctx.stats.record_stale(category);
            return FetchOutcome::stale(entry, attempts);
        }

        self.ctx.stats.record_unavailable(category);
        let failure = if order.is_empty() {
            FetchFailure::NoResourcesAvailable
        } else {
            FetchFailure::AllAttemptsFailed
        };
        tracing::warn!(attempts = attempts.len(), ?failure, "no data available");
        FetchOutcome::failed(failure, attempts)
    }

    /// 一次资源尝试：构建请求 →（必要时经代理）发送 → 分类；整体受单次超时约束
    async fn attempt(
        &self,
        descriptor: &ResourceDescriptor,
        spec: &RequestSpec,
        cancel: &CancellationToken,
    ) -> Attempt {
        let use_proxy =
            descriptor.requires_proxy || self.ctx.health.routes_via_proxy(&descriptor.id);
        let start = Instant::now();

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Attempt::Cancelled,
            r = tokio::time::timeout(
                self.attempt_timeout,
                self.send_once(descriptor, spec, use_proxy),
            ) => match r {
                Ok(inner) => inner,
                Err(_) => Err(AttemptError::Transport(TransportError::Timeout)),
            },
        };

        Attempt::Done {
            result,
            latency: start.elapsed(),
            via_proxy: use_proxy,
        }
    }

    async fn send_once(
        &self,
        descriptor: &ResourceDescriptor,
        spec: &RequestSpec,
        use_proxy: bool,
    ) -> Result<serde_json::Value, AttemptError> {
        let request = build_request(
            descriptor,
            spec,
            self.attempt_timeout,
            &self.ctx.config.executor.user_agent,
        )?;
        let response = if use_proxy {
            let (response, _proxy) = self
                .ctx
                .proxies
                .fetch_via_proxy(self.ctx.transport.as_ref(), request)
                .await?;
            response
        } else {
            self.ctx.transport.send(request).await?
        };
        self.classifier.classify(&response)
    }
}

/// 每次尝试一条结构化审计日志（JSON）
fn audit(record: &AttemptRecord, status: HealthStatus, error: Option<&AttemptError>) {
    let audit = serde_json::json!({
        "event": "attempt_audit",
        "resource": record.resource_id,
        "ok": record.success,
        "class": record.error_class.map(|c| c.as_str()),
        "latency_ms": record.latency_ms,
        "via_proxy": record.via_proxy,
        "status": status.as_str(),
    });
    match error {
        None => tracing::info!(audit = %audit, "attempt"),
        Some(e) => tracing::warn!(audit = %audit, error = %e, "attempt"),
    }
}
