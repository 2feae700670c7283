//! reqwest 传输实现
//!
//! 直连请求复用同一个 Client；经代理或固定解析的请求按路由缓存独立 Client（reqwest 的代理与 resolve 只能在构建时设置）。

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use reqwest::Client;

use super::{HttpMethod, Transport, TransportError, TransportRequest, TransportResponse};

pub struct ReqwestTransport {
    client: Client,
    user_agent: String,
    routed: Mutex<HashMap<String, Client>>,
}

fn map_error(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout
    } else if e.is_connect() {
        TransportError::Connection(e.to_string())
    } else {
        TransportError::Request(e.to_string())
    }
}

impl ReqwestTransport {
    pub fn new(user_agent: &str) -> Self {
        let client = Client::builder()
            .user_agent(user_agent)
            .build()
            .unwrap_or_default();
        Self {
            client,
            user_agent: user_agent.to_string(),
            routed: Mutex::new(HashMap::new()),
        }
    }

    /// 直连返回共享 Client；否则按 (proxy, resolve) 组合取缓存或新建
    fn client_for(&self, request: &TransportRequest) -> Result<Client, TransportError> {
        if request.proxy.is_none() && request.resolve.is_none() {
            return Ok(self.client.clone());
        }

        let route_key = format!(
            "{}|{}",
            request.proxy.as_ref().map(|p| p.url.as_str()).unwrap_or("-"),
            request
                .resolve
                .as_ref()
                .map(|(h, a)| format!("{h}={a}"))
                .unwrap_or_default()
        );

        let mut routed = self.routed.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(client) = routed.get(&route_key) {
            return Ok(client.clone());
        }

        let mut builder = Client::builder().user_agent(self.user_agent.as_str());
        if let Some(route) = &request.proxy {
            let mut proxy = reqwest::Proxy::all(route.url.as_str()).map_err(|e| {
                TransportError::Request(format!("invalid proxy {}: {}", route.url, e))
            })?;
            if let Some(user) = &route.username {
                proxy = proxy.basic_auth(user, route.password.as_deref().unwrap_or(""));
            }
            builder = builder.proxy(proxy);
        }
        if let Some((host, addr)) = &request.resolve {
            builder = builder.resolve(host, *addr);
        }
        let client = builder.build().map_err(map_error)?;
        routed.insert(route_key, client.clone());
        Ok(client)
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
        let client = self.client_for(&request)?;
        let mut builder = match request.method {
            HttpMethod::Get => client.get(&request.url),
            HttpMethod::Post => client.post(&request.url),
        };
        builder = builder.timeout(request.timeout);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let resp = builder.send().await.map_err(map_error)?;
        let status = resp.status().as_u16();
        let body = resp.text().await.map_err(map_error)?;
        Ok(TransportResponse { status, body })
    }
}
