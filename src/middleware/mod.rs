pub mod logging;
pub mod metrics;

use crate::classifier::Decision;
use crate::query::Query;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// 单个请求的最终处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// 本地合成的响应
    Synthesized(Decision),
    /// 上游响应原样转发
    Relayed,
    /// 上游失败，返回 SERVFAIL
    UpstreamFailed,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Synthesized(decision) => write!(f, "本地响应 {}", decision),
            Outcome::Relayed => write!(f, "上游响应"),
            Outcome::UpstreamFailed => write!(f, "SERVFAIL"),
        }
    }
}

/// 中间件trait - 观察每个请求及其响应
#[async_trait]
pub trait Middleware: Send + Sync {
    /// 收到可解析的查询时调用
    async fn handle_request(&self, query: &Query);

    /// 响应发出前调用
    async fn handle_response(&self, query: &Query, outcome: Outcome, response: &[u8]);

    /// 中间件名称
    fn name(&self) -> &str;
}

/// 中间件管道 - 按顺序执行所有中间件
pub struct MiddlewarePipeline {
    middlewares: Vec<Arc<dyn Middleware>>,
}

impl MiddlewarePipeline {
    pub fn new() -> Self {
        Self {
            middlewares: Vec::new(),
        }
    }

    pub fn add_middleware(&mut self, middleware: Arc<dyn Middleware>) {
        self.middlewares.push(middleware);
    }

    pub fn names(&self) -> Vec<&str> {
        self.middlewares.iter().map(|m| m.name()).collect()
    }

    pub async fn handle_request(&self, query: &Query) {
        for middleware in &self.middlewares {
            middleware.handle_request(query).await;
        }
    }

    pub async fn handle_response(&self, query: &Query, outcome: Outcome, response: &[u8]) {
        for middleware in &self.middlewares {
            middleware.handle_response(query, outcome, response).await;
        }
    }
}

impl Default for MiddlewarePipeline {
    fn default() -> Self {
        Self::new()
    }
}
