//! 代理层：代理池轮换与备用 DNS 解析

pub mod resolver;
pub mod rotator;

pub use resolver::AlternateResolvers;
pub use rotator::{ProbeSummary, ProxyDescriptor, ProxyProtocol, ProxyRotator, ProxyState};
