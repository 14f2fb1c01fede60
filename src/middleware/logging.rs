use super::{Middleware, Outcome};
use crate::query::Query;
use async_trait::async_trait;
use tracing::{debug, info};

/// 日志中间件 - 记录所有DNS请求和响应
pub struct LoggingMiddleware {
    enabled: bool,
}

impl LoggingMiddleware {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }
}

#[async_trait]
impl Middleware for LoggingMiddleware {
    async fn handle_request(&self, query: &Query) {
        if self.enabled {
            info!(
                "DNS请求来自: {}, id: {}, 域名: {}, 类型: {}",
                query.client, query.id, query.name, query.qtype
            );
            debug!("请求内容: {:?}", query.raw);
        }
    }

    async fn handle_response(&self, query: &Query, outcome: Outcome, response: &[u8]) {
        if self.enabled {
            info!(
                "DNS响应发送给: {}, id: {}, 结果: {}, 大小: {} bytes",
                query.client,
                query.id,
                outcome,
                response.len()
            );
            debug!("响应内容: {:?}", response);
        }
    }

    fn name(&self) -> &str {
        "LoggingMiddleware"
    }
}
