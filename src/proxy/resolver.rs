//! 备用 DNS 解析（DNS-over-HTTPS JSON 接口）
//!
//! 连接类错误时的补充手段：绕过本地 DNS，向 DoH 服务查询目标 host 的 A 记录，
//! 再把请求固定解析到该地址直连重发。尽力而为，任何一步失败都只返回 None。

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use serde::Deserialize;

use crate::transport::{Transport, TransportRequest, TransportResponse};

#[derive(Debug, Deserialize)]
struct DohAnswer {
    #[serde(rename = "type")]
    record_type: u16,
    data: String,
}

#[derive(Debug, Deserialize)]
struct DohResponse {
    #[serde(rename = "Answer", default)]
    answer: Vec<DohAnswer>,
}

/// 从 DoH JSON 响应中取第一个 A/AAAA 记录
fn parse_doh_answer(body: &str) -> Option<IpAddr> {
    let resp: DohResponse = serde_json::from_str(body).ok()?;
    resp.answer
        .iter()
        .filter(|a| a.record_type == 1 || a.record_type == 28)
        .find_map(|a| a.data.parse().ok())
}

#[derive(Debug, Clone)]
pub struct AlternateResolvers {
    endpoints: Vec<String>,
    timeout: Duration,
}

impl AlternateResolvers {
    pub fn new(endpoints: Vec<String>, timeout: Duration) -> Self {
        Self { endpoints, timeout }
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    async fn lookup(
        &self,
        transport: &dyn Transport,
        endpoint: &str,
        host: &str,
    ) -> Option<IpAddr> {
        let url = format!("{}?name={}&type=A", endpoint, host);
        let req = TransportRequest::get(url, self.timeout)
            .with_header("accept", "application/dns-json");
        match transport.send(req).await {
            Ok(resp) if resp.is_success() => parse_doh_answer(&resp.body),
            Ok(resp) => {
                tracing::debug!(
                    resolver = endpoint,
                    status = resp.status,
                    "resolver rejected lookup"
                );
                None
            }
            Err(e) => {
                tracing::debug!(resolver = endpoint, "resolver lookup failed: {}", e);
                None
            }
        }
    }

    /// 依次用每个解析器解析目标 host 并直连重发；第一个得到响应的结果返回
    pub async fn retry_resolved(
        &self,
        transport: &dyn Transport,
        request: &TransportRequest,
    ) -> Option<TransportResponse> {
        let url = reqwest::Url::parse(&request.url).ok()?;
        let host = url.host_str()?.to_string();
        let port = url.port_or_known_default()?;
        if host.parse::<IpAddr>().is_ok() {
            return None;
        }

        for endpoint in &self.endpoints {
            let Some(ip) = self.lookup(transport, endpoint, &host).await else {
                continue;
            };
            let mut retry = request.clone();
            retry.proxy = None;
            let retry = retry.resolved_to(host.clone(), SocketAddr::new(ip, port));
            match transport.send(retry).await {
                Ok(resp) => {
                    tracing::info!(
                        host = host.as_str(),
                        resolver = endpoint.as_str(),
                        %ip,
                        "alternate resolver succeeded"
                    );
                    return Some(resp);
                }
                Err(e) => {
                    tracing::debug!(
                        host = host.as_str(),
                        resolver = endpoint.as_str(),
                        "resolved retry failed: {}",
                        e
                    );
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{ScriptedResponse, ScriptedTransport};

    #[test]
    fn test_parse_doh_answer() {
        let body = r#"{"Status":0,"Answer":[{"name":"api.example.com","type":5,"data":"cdn.example.com."},{"name":"cdn.example.com","type":1,"data":"93.184.216.34"}]}"#;
        assert_eq!(parse_doh_answer(body), Some("93.184.216.34".parse().unwrap()));
        assert_eq!(parse_doh_answer(r#"{"Status":3}"#), None);
        assert_eq!(parse_doh_answer("not json"), None);
    }

    #[tokio::test]
    async fn test_retry_resolved_uses_first_working_resolver() {
        let transport = ScriptedTransport::new();
        transport.on("https://doh-broken", vec![ScriptedResponse::status(500, "")]);
        transport.on(
            "https://doh-ok",
            vec![ScriptedResponse::ok(r#"{"Answer":[{"type":1,"data":"10.0.0.7"}]}"#)],
        );
        transport.on("https://api.example.com", vec![ScriptedResponse::ok("{}")]);

        let resolvers = AlternateResolvers::new(
            vec!["https://doh-broken/dns-query".into(), "https://doh-ok/resolve".into()],
            Duration::from_secs(1),
        );
        let req = TransportRequest::get("https://api.example.com/v1/price", Duration::from_secs(1));
        let resp = resolvers.retry_resolved(&transport, &req).await.unwrap();
        assert_eq!(resp.status, 200);

        let last = transport.calls().pop().unwrap();
        assert!(last.resolved);
        assert!(last.url.starts_with("https://api.example.com"));
    }

    #[tokio::test]
    async fn test_ip_literal_hosts_are_skipped() {
        let transport = ScriptedTransport::new();
        let resolvers = AlternateResolvers::new(vec!["https://doh".into()], Duration::from_secs(1));
        let req = TransportRequest::get("http://127.0.0.1:8080/x", Duration::from_secs(1));
        assert!(resolvers.retry_resolved(&transport, &req).await.is_none());
        assert!(transport.calls().is_empty());
    }
}
