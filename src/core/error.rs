//! 错误类型
//!
//! 单次尝试的错误（AttemptError）只在执行器内部流转：记入健康追踪器后即被吞掉，只影响后续排序。
//! 调用方能看到的只有 FetchFailure，且以 `FetchOutcome` 中的数据形式出现，而不是 Err。

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::catalog::CatalogError;
use crate::transport::TransportError;

/// 一次资源尝试失败的原因
#[derive(Error, Debug, Clone)]
pub enum AttemptError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Rejected with HTTP {status}{}", geo_suffix(.geo_block))]
    Protocol { status: u16, geo_block: bool },

    #[error("Unparseable payload: {0}")]
    Parse(String),

    #[error("All {tried} proxies failed")]
    ProxyExhausted { tried: usize },

    #[error("Missing credentials: env {0} is not set")]
    MissingCredentials(String),
}

fn geo_suffix(geo_block: &bool) -> &'static str {
    if *geo_block {
        " (geo-blocked)"
    } else {
        ""
    }
}

impl AttemptError {
    /// 归类到记录与统计使用的粗粒度类别
    pub fn class(&self) -> ErrorClass {
        match self {
            AttemptError::Transport(TransportError::Timeout) => ErrorClass::Timeout,
            AttemptError::Transport(TransportError::Connection(_)) => ErrorClass::Connection,
            AttemptError::Transport(TransportError::Request(_)) => ErrorClass::Connection,
            AttemptError::Protocol { geo_block: true, .. } => ErrorClass::GeoBlock,
            AttemptError::Protocol { status: 429, .. } => ErrorClass::RateLimited,
            AttemptError::Protocol { status: 401 | 403, .. } => ErrorClass::Auth,
            AttemptError::Protocol { .. } => ErrorClass::HttpStatus,
            AttemptError::Parse(_) => ErrorClass::Parse,
            AttemptError::ProxyExhausted { .. } => ErrorClass::ProxyExhausted,
            AttemptError::MissingCredentials(_) => ErrorClass::Auth,
        }
    }
}

/// 尝试结果的分类（用于 AttemptRecord 与健康状态机）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    Timeout,
    Connection,
    HttpStatus,
    RateLimited,
    GeoBlock,
    Auth,
    Parse,
    ProxyExhausted,
}

impl ErrorClass {
    /// 连接类错误：可尝试备用 DNS 解析
    pub fn is_connectivity(&self) -> bool {
        matches!(self, ErrorClass::Timeout | ErrorClass::Connection)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::Timeout => "timeout",
            ErrorClass::Connection => "connection",
            ErrorClass::HttpStatus => "http_status",
            ErrorClass::RateLimited => "rate_limited",
            ErrorClass::GeoBlock => "geo_block",
            ErrorClass::Auth => "auth",
            ErrorClass::Parse => "parse",
            ErrorClass::ProxyExhausted => "proxy_exhausted",
        }
    }
}

/// 调用方可见的失败（仅作为 FetchOutcome 的字段）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchFailure {
    /// 分类下没有任何可选资源
    NoResourcesAvailable,
    /// 所有尝试失败且没有可用缓存
    AllAttemptsFailed,
}

/// 构建期错误：配置、目录、缓存后端初始化
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Cache backend error: {0}")]
    Cache(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_geo_block_wins_over_status() {
        let err = AttemptError::Protocol { status: 403, geo_block: true };
        assert_eq!(err.class(), ErrorClass::GeoBlock);
        assert!(err.to_string().contains("geo-blocked"));
    }

    #[test]
    fn test_status_classes() {
        assert_eq!(
            AttemptError::Protocol { status: 429, geo_block: false }.class(),
            ErrorClass::RateLimited
        );
        assert_eq!(
            AttemptError::Protocol { status: 503, geo_block: false }.class(),
            ErrorClass::HttpStatus
        );
        assert_eq!(
            AttemptError::Protocol { status: 401, geo_block: false }.class(),
            ErrorClass::Auth
        );
    }

    #[test]
    fn test_connectivity_classes() {
        assert!(AttemptError::Transport(TransportError::Timeout).class().is_connectivity());
        assert!(AttemptError::Transport(TransportError::Connection("refused".into()))
            .class()
            .is_connectivity());
        assert!(!AttemptError::Parse("eof".into()).class().is_connectivity());
    }
}
