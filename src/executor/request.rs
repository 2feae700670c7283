//! 请求描述与具体请求构建
//!
//! RequestSpec 与资源无关（同一分类的所有资源共用），执行器按 ResourceDescriptor 把它拼成具体 URL，
//! 并按 AuthMode 注入 API Key（从环境变量读取）。

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::catalog::{AuthMode, ResourceDescriptor};
use crate::core::AttemptError;
use crate::transport::{HttpMethod, TransportError, TransportRequest};

/// 路径占位符，Path 鉴权时替换为 Key
const KEY_PLACEHOLDER: &str = "{key}";

/// 与资源无关的请求描述
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RequestSpec {
    pub method: HttpMethod,
    pub path: String,
    /// 保持插入顺序；cache_key 中会排序
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl RequestSpec {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn post(path: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Post,
            path: path.into(),
            body: Some(body.into()),
            ..Self::default()
        }
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// 规范化的缓存键：`METHOD path?k1=v1&k2=v2`（查询参数按键排序）
    ///
    /// POST 请求体参与区分，避免不同 RPC 调用共用缓存。
    pub fn cache_key(&self) -> String {
        let mut key = format!("{} {}", self.method.as_str(), self.path);
        if !self.query.is_empty() {
            let mut pairs: Vec<&(String, String)> = self.query.iter().collect();
            pairs.sort();
            let query = pairs
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>()
                .join("&");
            key.push('?');
            key.push_str(&query);
        }
        if let Some(body) = &self.body {
            key.push(' ');
            key.push_str(body);
        }
        key
    }
}

fn resolve_key(key_env: &str) -> Result<String, AttemptError> {
    std::env::var(key_env)
        .ok()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AttemptError::MissingCredentials(key_env.to_string()))
}

fn join_url(base: &str, path: &str) -> String {
    if path.is_empty() {
        return base.to_string();
    }
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

/// 由资源描述 + 请求描述构建具体请求
pub fn build_request(
    descriptor: &ResourceDescriptor,
    spec: &RequestSpec,
    timeout: Duration,
    user_agent: &str,
) -> Result<TransportRequest, AttemptError> {
    let mut base = descriptor.base_url.clone();
    let mut query = spec.query.clone();
    let mut headers = vec![("user-agent".to_string(), user_agent.to_string())];

    match &descriptor.auth {
        AuthMode::None => {}
        AuthMode::Query { param, key_env } => query.push((param.clone(), resolve_key(key_env)?)),
        AuthMode::Header { header, key_env } => {
            headers.push((header.clone(), resolve_key(key_env)?))
        }
        AuthMode::Path { key_env } => {
            base = base.replace(KEY_PLACEHOLDER, &resolve_key(key_env)?)
        }
    }
    headers.extend(spec.headers.iter().cloned());
    if spec.body.is_some() && !headers.iter().any(|(k, _)| k.eq_ignore_ascii_case("content-type")) {
        headers.push(("content-type".to_string(), "application/json".to_string()));
    }

    let raw = join_url(&base, &spec.path);
    let parsed = if query.is_empty() {
        reqwest::Url::parse(&raw)
    } else {
        reqwest::Url::parse_with_params(&raw, &query)
    };
    let url = parsed.map_err(|e| {
        AttemptError::Transport(TransportError::Request(format!("invalid url {}: {}", raw, e)))
    })?;

    Ok(TransportRequest {
        method: spec.method,
        url: url.to_string(),
        headers,
        body: spec.body.clone(),
        timeout,
        proxy: None,
        resolve: None,
    })
}
