//! 脚本化传输（用于测试，无需网络）
//!
//! 按 URL 前缀（可选限定代理）匹配规则，依次返回预设响应；最后一条响应会一直重复。
//! 所有调用记录在 calls 中，便于断言尝试顺序与路由。

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::{Transport, TransportError, TransportRequest, TransportResponse};

/// 预设响应
#[derive(Debug, Clone)]
pub enum ScriptedResponse {
    Respond { status: u16, body: String },
    Fail(TransportError),
    /// 先等待再给出内层响应（配合 per-attempt 超时测试）
    Delay(Duration, Box<ScriptedResponse>),
}

impl ScriptedResponse {
    pub fn ok(body: impl Into<String>) -> Self {
        Self::Respond { status: 200, body: body.into() }
    }

    pub fn status(status: u16, body: impl Into<String>) -> Self {
        Self::Respond { status, body: body.into() }
    }

    pub fn geo_blocked() -> Self {
        Self::Respond {
            status: 451,
            body: "Unavailable For Legal Reasons".to_string(),
        }
    }

    pub fn delayed(delay: Duration, inner: ScriptedResponse) -> Self {
        Self::Delay(delay, Box::new(inner))
    }
}

struct Rule {
    prefix: String,
    via_proxy: Option<String>,
    responses: VecDeque<ScriptedResponse>,
}

/// 已发出的调用
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub url: String,
    pub proxy: Option<String>,
    pub resolved: bool,
    pub headers: Vec<(String, String)>,
}

#[derive(Default)]
pub struct ScriptedTransport {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// 直连或任意代理访问 prefix 开头的 URL 时依次返回 responses
    pub fn on(&self, prefix: impl Into<String>, responses: Vec<ScriptedResponse>) -> &Self {
        self.push_rule(prefix.into(), None, responses);
        self
    }

    /// 仅当经由 proxy_url 访问时生效（优先于 `on`）
    pub fn on_via_proxy(
        &self,
        proxy_url: impl Into<String>,
        prefix: impl Into<String>,
        responses: Vec<ScriptedResponse>,
    ) -> &Self {
        self.push_rule(prefix.into(), Some(proxy_url.into()), responses);
        self
    }

    fn push_rule(
        &self,
        prefix: String,
        via_proxy: Option<String>,
        responses: Vec<ScriptedResponse>,
    ) {
        self.rules
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Rule {
                prefix,
                via_proxy,
                responses: responses.into(),
            });
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// 访问过 prefix 开头 URL 的次数
    pub fn call_count(&self, prefix: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.url.starts_with(prefix))
            .count()
    }

    fn next_response(&self, request: &TransportRequest) -> Option<ScriptedResponse> {
        let proxy = request.proxy.as_ref().map(|p| p.url.as_str());
        let mut rules = self.rules.lock().unwrap_or_else(|e| e.into_inner());

        let idx = rules
            .iter()
            .position(|r| {
                r.via_proxy.is_some()
                    && r.via_proxy.as_deref() == proxy
                    && request.url.starts_with(&r.prefix)
            })
            .or_else(|| {
                rules
                    .iter()
                    .position(|r| r.via_proxy.is_none() && request.url.starts_with(&r.prefix))
            })?;

        let rule = &mut rules[idx];
        if rule.responses.len() > 1 {
            rule.responses.pop_front()
        } else {
            rule.responses.front().cloned()
        }
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(RecordedCall {
                url: request.url.clone(),
                proxy: request.proxy.as_ref().map(|p| p.url.clone()),
                resolved: request.resolve.is_some(),
                headers: request.headers.clone(),
            });

        let mut response = self
            .next_response(&request)
            .unwrap_or_else(|| ScriptedResponse::Fail(TransportError::Connection(format!(
                "no scripted route for {}",
                request.url
            ))));

        loop {
            match response {
                ScriptedResponse::Respond { status, body } => {
                    return Ok(TransportResponse { status, body })
                }
                ScriptedResponse::Fail(e) => return Err(e),
                ScriptedResponse::Delay(delay, inner) => {
                    tokio::time::sleep(delay).await;
                    response = *inner;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ProxyRoute;

    #[tokio::test]
    async fn test_responses_are_consumed_in_order_then_repeat() {
        let t = ScriptedTransport::new();
        t.on(
            "https://a",
            vec![ScriptedResponse::status(500, "boom"), ScriptedResponse::ok("{}")],
        );
        let req = || TransportRequest::get("https://a/x", Duration::from_secs(1));
        assert_eq!(t.send(req()).await.unwrap().status, 500);
        assert_eq!(t.send(req()).await.unwrap().status, 200);
        assert_eq!(t.send(req()).await.unwrap().status, 200);
        assert_eq!(t.call_count("https://a"), 3);
    }

    #[tokio::test]
    async fn test_proxy_specific_rule_takes_precedence() {
        let t = ScriptedTransport::new();
        t.on("https://a", vec![ScriptedResponse::geo_blocked()]);
        t.on_via_proxy("http://p1", "https://a", vec![ScriptedResponse::ok("{}")]);

        let direct = TransportRequest::get("https://a", Duration::from_secs(1));
        assert_eq!(t.send(direct).await.unwrap().status, 451);

        let proxied =
            TransportRequest::get("https://a", Duration::from_secs(1)).via_proxy(ProxyRoute {
                url: "http://p1".into(),
                username: None,
                password: None,
            });
        assert_eq!(t.send(proxied).await.unwrap().status, 200);
        assert_eq!(t.calls()[1].proxy.as_deref(), Some("http://p1"));
    }

    #[tokio::test]
    async fn test_unrouted_url_is_connection_error() {
        let t = ScriptedTransport::new();
        let err = t
            .send(TransportRequest::get("https://nowhere", Duration::from_secs(1)))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Connection(_)));
    }
}
