//! 代理轮换器
//!
//! 每个代理的状态机：healthy →（首次失败）suspected →（连续 N 次失败）unhealthy →（探测成功）healthy。
//! 选择规则：当前粘滞代理仍健康且未到轮换间隔时继续使用；否则按 状态 → 健康分降序 → 最久未用 挑选。
//! 失败立即轮换到下一个候选，最多换 max_proxy_retries 个；全部失败时返回 ProxyExhausted，
//! 由执行器记为该资源的一次失败尝试，不会中断整条降级链。
//!
//! 每一跳只分到请求超时的 1/(max_proxy_retries + 1)，剩下的一份留给备用解析器。
//! 挂起的代理因此会在本跳超时内被记为失败并轮换掉，而不是拖垮整次尝试。

use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde::Serialize;

use crate::config::{ProxyEntry, ProxySection};
use crate::core::AttemptError;
use crate::proxy::AlternateResolvers;
use crate::transport::{ProxyRoute, Transport, TransportError, TransportRequest, TransportResponse};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProxyState {
    Healthy,
    Suspected,
    Unhealthy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProxyProtocol {
    Http,
    Https,
    Socks5,
}

impl ProxyProtocol {
    fn from_url(url: &str) -> Self {
        let scheme = url.split("://").next().unwrap_or("").to_ascii_lowercase();
        match scheme.as_str() {
            "https" => ProxyProtocol::Https,
            "socks5" | "socks5h" => ProxyProtocol::Socks5,
            _ => ProxyProtocol::Http,
        }
    }
}

/// 单个代理及其滚动健康状态
#[derive(Debug, Clone, Serialize)]
pub struct ProxyDescriptor {
    pub endpoint: String,
    pub protocol: ProxyProtocol,
    #[serde(skip)]
    pub username: Option<String>,
    #[serde(skip)]
    pub password: Option<String>,
    /// 成功=1、失败=0 的指数滑动平均
    pub score: f64,
    pub last_used: Option<DateTime<Utc>>,
    pub state: ProxyState,
    pub consecutive_failures: u32,
    pub successes: u64,
    pub failures: u64,
}

impl ProxyDescriptor {
    pub fn from_entry(entry: &ProxyEntry) -> Self {
        Self {
            endpoint: entry.url.clone(),
            protocol: ProxyProtocol::from_url(&entry.url),
            username: entry.username.clone(),
            password: entry.password.clone(),
            score: 1.0,
            last_used: None,
            state: ProxyState::Healthy,
            consecutive_failures: 0,
            successes: 0,
            failures: 0,
        }
    }

    fn route(&self) -> ProxyRoute {
        ProxyRoute {
            url: self.endpoint.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
        }
    }
}

/// 探测结果汇总
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProbeSummary {
    pub probed: usize,
    pub recovered: usize,
}

pub struct ProxyRotator {
    policy: ProxySection,
    proxies: Vec<Mutex<ProxyDescriptor>>,
    /// 当前粘滞代理下标与选中时间
    sticky: Mutex<Option<(usize, DateTime<Utc>)>>,
    resolvers: AlternateResolvers,
    probe_timeout: Duration,
}

impl ProxyRotator {
    pub fn new(policy: ProxySection, probe_timeout: Duration) -> Self {
        let proxies = policy
            .proxies
            .iter()
            .map(|e| Mutex::new(ProxyDescriptor::from_entry(e)))
            .collect();
        let resolvers = AlternateResolvers::new(policy.resolvers.clone(), probe_timeout);
        Self {
            policy,
            proxies,
            sticky: Mutex::new(None),
            resolvers,
            probe_timeout,
        }
    }

    pub fn len(&self) -> usize {
        self.proxies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.proxies.is_empty()
    }

    fn descriptor(&self, idx: usize) -> ProxyDescriptor {
        self.proxies[idx]
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// 本次调用的候选顺序（不含 unhealthy）
    fn candidates(&self, now: DateTime<Utc>) -> Vec<usize> {
        let mut pool: Vec<(usize, ProxyDescriptor)> = (0..self.proxies.len())
            .map(|i| (i, self.descriptor(i)))
            .filter(|(_, p)| p.state != ProxyState::Unhealthy)
            .collect();

        pool.sort_by(|(ia, a), (ib, b)| {
            a.state
                .cmp(&b.state)
                .then_with(|| b.score.total_cmp(&a.score))
                .then_with(|| a.last_used.cmp(&b.last_used))
                .then_with(|| ia.cmp(ib))
        });
        let mut order: Vec<usize> = pool.into_iter().map(|(i, _)| i).collect();

        let sticky = *self.sticky.lock().unwrap_or_else(|e| e.into_inner());
        if let Some((idx, since)) = sticky {
            let interval = chrono::Duration::seconds(self.policy.rotation_interval_secs as i64);
            let healthy = self.descriptor(idx).state == ProxyState::Healthy;
            if healthy && now - since < interval {
                order.retain(|&i| i != idx);
                order.insert(0, idx);
            } else {
                self.rotate();
            }
        }
        order
    }

    /// 放弃当前粘滞代理，下次选择时换一个
    pub fn rotate(&self) {
        if let Some((idx, _)) = self.sticky.lock().unwrap_or_else(|e| e.into_inner()).take() {
            tracing::debug!(proxy = self.descriptor(idx).endpoint.as_str(), "proxy rotated");
        }
    }

    fn record_success(&self, idx: usize, now: DateTime<Utc>) {
        {
            let mut p = self.proxies[idx].lock().unwrap_or_else(|e| e.into_inner());
            p.successes += 1;
            p.consecutive_failures = 0;
            p.score = self.policy.score_alpha + (1.0 - self.policy.score_alpha) * p.score;
            p.last_used = Some(now);
            if p.state != ProxyState::Healthy {
                tracing::info!(proxy = p.endpoint.as_str(), "proxy healthy again");
            }
            p.state = ProxyState::Healthy;
        }
    }

    /// 设为粘滞代理；已是当前粘滞代理时不重置计时
    fn stick(&self, idx: usize, now: DateTime<Utc>) {
        let mut sticky = self.sticky.lock().unwrap_or_else(|e| e.into_inner());
        if sticky.map(|(i, _)| i) != Some(idx) {
            *sticky = Some((idx, now));
        }
    }

    fn record_failure(&self, idx: usize, now: DateTime<Utc>) {
        {
            let mut p = self.proxies[idx].lock().unwrap_or_else(|e| e.into_inner());
            p.failures += 1;
            p.consecutive_failures += 1;
            p.score *= 1.0 - self.policy.score_alpha;
            p.last_used = Some(now);
            let next = if p.consecutive_failures >= self.policy.unhealthy_after {
                ProxyState::Unhealthy
            } else {
                ProxyState::Suspected
            };
            if next != p.state {
                tracing::warn!(
                    proxy = p.endpoint.as_str(),
                    consecutive_failures = p.consecutive_failures,
                    "proxy state {:?} -> {:?}",
                    p.state,
                    next
                );
            }
            p.state = next;
        }
        let mut sticky = self.sticky.lock().unwrap_or_else(|e| e.into_inner());
        if sticky.map(|(i, _)| i) == Some(idx) {
            *sticky = None;
        }
    }

    /// 经代理发送请求；返回响应与所用代理
    pub async fn fetch_via_proxy(
        &self,
        transport: &dyn Transport,
        mut request: TransportRequest,
    ) -> Result<(TransportResponse, Option<String>), AttemptError> {
        let now = Utc::now();
        let candidates = self.candidates(now);
        let limit = self.policy.max_proxy_retries.max(1);
        let hop_timeout = request.timeout / (limit as u32 + 1);
        request.timeout = hop_timeout;

        let mut tried = 0;
        let mut connectivity_failure = false;

        for idx in candidates.into_iter().take(limit) {
            let proxy = self.descriptor(idx);
            tried += 1;
            let hop = request.clone().via_proxy(proxy.route());
            let result = match tokio::time::timeout(hop_timeout, transport.send(hop)).await {
                Ok(sent) => sent.map_err(AttemptError::from),
                Err(_) => Err(AttemptError::Transport(TransportError::Timeout)),
            };

            match result {
                Ok(resp) if resp.status != 407 => {
                    let now = Utc::now();
                    self.record_success(idx, now);
                    self.stick(idx, now);
                    return Ok((resp, Some(proxy.endpoint)));
                }
                Ok(_) => {
                    tracing::warn!(
                        proxy = proxy.endpoint.as_str(),
                        target = request.url.as_str(),
                        "proxy rejected credentials, rotating"
                    );
                    self.record_failure(idx, Utc::now());
                }
                Err(e) => {
                    connectivity_failure |= e.class().is_connectivity();
                    tracing::warn!(
                        proxy = proxy.endpoint.as_str(),
                        target = request.url.as_str(),
                        error = %e,
                        "proxy attempt failed, rotating"
                    );
                    self.record_failure(idx, Utc::now());
                }
            }
        }

        if connectivity_failure && !self.resolvers.is_empty() {
            if let Some(resp) = self.resolvers.retry_resolved(transport, &request).await {
                return Ok((resp, None));
            }
        }

        Err(AttemptError::ProxyExhausted { tried })
    }

    /// 并发探测所有非 healthy 代理；探测成功即恢复 healthy
    pub async fn probe_all(&self, transport: &dyn Transport) -> ProbeSummary {
        let targets: Vec<(usize, ProxyDescriptor)> = (0..self.proxies.len())
            .map(|i| (i, self.descriptor(i)))
            .filter(|(_, p)| p.state != ProxyState::Healthy)
            .collect();
        if targets.is_empty() {
            return ProbeSummary::default();
        }

        let probes = targets.iter().map(|(idx, proxy)| async move {
            let req = TransportRequest::get(self.policy.probe_url.as_str(), self.probe_timeout)
                .via_proxy(proxy.route());
            let ok = matches!(
                transport.send(req).await,
                Ok(resp) if resp.status < 500 && resp.status != 407
            );
            (*idx, ok)
        });
        let results = join_all(probes).await;

        let mut summary = ProbeSummary {
            probed: results.len(),
            recovered: 0,
        };
        for (idx, ok) in results {
            if ok {
                self.record_success(idx, Utc::now());
                summary.recovered += 1;
            } else {
                self.record_failure(idx, Utc::now());
            }
        }
        tracing::info!(
            probed = summary.probed,
            recovered = summary.recovered,
            "proxy probe finished"
        );
        summary
    }

    pub fn health_report(&self) -> Vec<ProxyDescriptor> {
        (0..self.proxies.len()).map(|i| self.descriptor(i)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{ScriptedResponse, ScriptedTransport};

    fn rotator(urls: &[&str]) -> ProxyRotator {
        let policy = ProxySection {
            proxies: urls
                .iter()
                .map(|u| ProxyEntry {
                    url: u.to_string(),
                    username: None,
                    password: None,
                })
                .collect(),
            resolvers: Vec::new(),
            ..ProxySection::default()
        };
        ProxyRotator::new(policy, Duration::from_secs(1))
    }

    fn req() -> TransportRequest {
        TransportRequest::get("https://api.target/v1", Duration::from_secs(1))
    }

    #[tokio::test]
    async fn test_no_proxies_is_exhausted_immediately() {
        let r = rotator(&[]);
        let t = ScriptedTransport::new();
        let err = r.fetch_via_proxy(&t, req()).await.unwrap_err();
        assert!(matches!(err, AttemptError::ProxyExhausted { tried: 0 }));
        assert!(t.calls().is_empty());
    }

    #[tokio::test]
    async fn test_failure_rotates_to_next_proxy() {
        let r = rotator(&["http://p1", "http://p2"]);
        let t = ScriptedTransport::new();
        t.on_via_proxy(
            "http://p1",
            "https://api.target",
            vec![ScriptedResponse::Fail(TransportError::Connection("refused".into()))],
        );
        t.on_via_proxy("http://p2", "https://api.target", vec![ScriptedResponse::ok("{}")]);

        let (resp, used) = r.fetch_via_proxy(&t, req()).await.unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(used.as_deref(), Some("http://p2"));

        let report = r.health_report();
        assert_eq!(report[0].state, ProxyState::Suspected);
        assert_eq!(report[1].state, ProxyState::Healthy);

        // p2 成为粘滞代理，下一次直接使用
        r.fetch_via_proxy(&t, req()).await.unwrap();
        assert_eq!(t.calls().last().unwrap().proxy.as_deref(), Some("http://p2"));
    }

    #[tokio::test]
    async fn test_consecutive_failures_mark_unhealthy_then_probe_recovers() {
        let r = rotator(&["http://p1"]);
        let t = ScriptedTransport::new();
        t.on_via_proxy(
            "http://p1",
            "https://api.target",
            vec![ScriptedResponse::Fail(TransportError::Timeout)],
        );
        for _ in 0..3 {
            assert!(r.fetch_via_proxy(&t, req()).await.is_err());
        }
        assert_eq!(r.health_report()[0].state, ProxyState::Unhealthy);

        // unhealthy 代理不再被选中
        let before = t.calls().len();
        assert!(matches!(
            r.fetch_via_proxy(&t, req()).await,
            Err(AttemptError::ProxyExhausted { tried: 0 })
        ));
        assert_eq!(t.calls().len(), before);

        t.on_via_proxy(
            "http://p1",
            "https://www.gstatic.com",
            vec![ScriptedResponse::status(204, "")],
        );
        let summary = r.probe_all(&t).await;
        assert_eq!(summary, ProbeSummary { probed: 1, recovered: 1 });
        assert_eq!(r.health_report()[0].state, ProxyState::Healthy);
    }

    #[tokio::test]
    async fn test_retry_limit_bounds_proxies_tried() {
        let mut r = rotator(&["http://p1", "http://p2", "http://p3", "http://p4"]);
        r.policy.max_proxy_retries = 2;
        let t = ScriptedTransport::new();
        let err = r.fetch_via_proxy(&t, req()).await.unwrap_err();
        assert!(matches!(err, AttemptError::ProxyExhausted { tried: 2 }));
        assert_eq!(t.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_target_error_status_is_not_a_proxy_failure() {
        let r = rotator(&["http://p1"]);
        let t = ScriptedTransport::new();
        t.on_via_proxy(
            "http://p1",
            "https://api.target",
            vec![ScriptedResponse::status(503, "busy")],
        );
        let (resp, _) = r.fetch_via_proxy(&t, req()).await.unwrap();
        assert_eq!(resp.status, 503);
        assert_eq!(r.health_report()[0].state, ProxyState::Healthy);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_proxy_times_out_and_rotates() {
        let r = rotator(&["http://hung", "http://alive"]);
        let t = ScriptedTransport::new();
        t.on_via_proxy(
            "http://hung",
            "https://api.target",
            vec![ScriptedResponse::delayed(Duration::from_secs(600), ScriptedResponse::ok("{}"))],
        );
        t.on_via_proxy("http://alive", "https://api.target", vec![ScriptedResponse::ok("{}")]);

        let start = tokio::time::Instant::now();
        let (resp, used) = r.fetch_via_proxy(&t, req()).await.unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(used.as_deref(), Some("http://alive"));
        // 1s 请求超时，3 次重试 → 每跳 250ms
        assert!(start.elapsed() <= Duration::from_millis(300));

        let report = r.health_report();
        assert_eq!(report[0].state, ProxyState::Suspected);
        assert_eq!(report[0].failures, 1);
        assert_eq!(report[1].successes, 1);
    }

    #[test]
    fn test_sticky_proxy_expires_after_rotation_interval() {
        let r = rotator(&["http://p1", "http://p2"]);
        let t0 = Utc::now();
        r.record_success(0, t0);
        r.stick(0, t0);
        assert_eq!(r.candidates(t0)[0], 0);
        // 过了轮换间隔后按最久未用排序，p2 先于 p1
        let later = t0 + chrono::Duration::seconds(301);
        assert_eq!(r.candidates(later), vec![1, 0]);
    }

    #[test]
    fn test_protocol_from_url() {
        assert_eq!(ProxyProtocol::from_url("socks5://h:1080"), ProxyProtocol::Socks5);
        assert_eq!(ProxyProtocol::from_url("https://h"), ProxyProtocol::Https);
        assert_eq!(ProxyProtocol::from_url("h:3128"), ProxyProtocol::Http);
    }
}
