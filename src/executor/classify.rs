//! 响应分类：状态码 + 响应体 → 载荷或 AttemptError
//!
//! 成功 = 2xx 且响应体是可解析的 JSON。451 一律视为地域封锁；
//! 403 的响应体命中任一地域封锁特征（不区分大小写）也视为地域封锁。

use regex::{RegexSet, RegexSetBuilder};

use crate::core::AttemptError;
use crate::transport::TransportResponse;

pub struct OutcomeClassifier {
    geo_signatures: RegexSet,
}

impl OutcomeClassifier {
    pub fn new(patterns: &[String]) -> Result<Self, regex::Error> {
        let geo_signatures = RegexSetBuilder::new(patterns).case_insensitive(true).build()?;
        Ok(Self { geo_signatures })
    }

    pub fn is_geo_block(&self, status: u16, body: &str) -> bool {
        match status {
            451 => true,
            403 => self.geo_signatures.is_match(body),
            _ => false,
        }
    }

    pub fn classify(
        &self,
        response: &TransportResponse,
    ) -> Result<serde_json::Value, AttemptError> {
        if !response.is_success() {
            return Err(AttemptError::Protocol {
                status: response.status,
                geo_block: self.is_geo_block(response.status, &response.body),
            });
        }
        serde_json::from_str(&response.body).map_err(|e| AttemptError::Parse(e.to_string()))
    }
}
