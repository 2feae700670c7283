//! 传输层抽象
//!
//! 编排器只依赖 Transport：「按 method/headers/body/timeout 发请求 → status/body/error」。
//! 实现：reqwest（生产）、ScriptedTransport（测试，无网络）。

pub mod http;
pub mod mock;

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use http::ReqwestTransport;
pub use mock::{ScriptedResponse, ScriptedTransport};

/// 传输层错误（协议层的拒绝状态码不算错误，由执行器根据 status 分类）
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Request timed out")]
    Timeout,

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Request failed: {0}")]
    Request(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
        }
    }
}

/// 经代理发送时使用的路由
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyRoute {
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// 一次具体请求
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
    pub timeout: Duration,
    pub proxy: Option<ProxyRoute>,
    /// 绕过系统 DNS：将 host 固定解析到给定地址
    pub resolve: Option<(String, SocketAddr)>,
}

impl TransportRequest {
    pub fn get(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            method: HttpMethod::Get,
            url: url.into(),
            headers: Vec::new(),
            body: None,
            timeout,
            proxy: None,
            resolve: None,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn via_proxy(mut self, route: ProxyRoute) -> Self {
        self.proxy = Some(route);
        self
    }

    pub fn resolved_to(mut self, host: impl Into<String>, addr: SocketAddr) -> Self {
        self.resolve = Some((host.into(), addr));
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// 传输能力：只负责把请求发出去，不做重试与分类
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError>;
}
