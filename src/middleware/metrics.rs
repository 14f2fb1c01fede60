use super::{Middleware, Outcome};
use crate::classifier::Decision;
use crate::query::Query;
use crate::utils::format_uptime;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// 指标收集中间件 - 按分类结果统计请求
pub struct MetricsMiddleware {
    enabled: bool,
    started_at: Instant,
    total_requests: AtomicU64,
    total_responses: AtomicU64,
    refused: AtomicU64,
    not_found: AtomicU64,
    static_answers: AtomicU64,
    empty_answers: AtomicU64,
    relayed: AtomicU64,
    upstream_failures: AtomicU64,
    dropped: AtomicU64,
}

impl MetricsMiddleware {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            started_at: Instant::now(),
            total_requests: AtomicU64::new(0),
            total_responses: AtomicU64::new(0),
            refused: AtomicU64::new(0),
            not_found: AtomicU64::new(0),
            static_answers: AtomicU64::new(0),
            empty_answers: AtomicU64::new(0),
            relayed: AtomicU64::new(0),
            upstream_failures: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// 无法解析而被丢弃的数据报
    pub fn record_dropped(&self) {
        if self.enabled {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn get_metrics(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            total_responses: self.total_responses.load(Ordering::Relaxed),
            refused: self.refused.load(Ordering::Relaxed),
            not_found: self.not_found.load(Ordering::Relaxed),
            static_answers: self.static_answers.load(Ordering::Relaxed),
            empty_answers: self.empty_answers.load(Ordering::Relaxed),
            relayed: self.relayed.load(Ordering::Relaxed),
            upstream_failures: self.upstream_failures.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }

    pub fn print_metrics(&self) {
        let metrics = self.get_metrics();
        info!("=== DNS代理指标 ===");
        info!("运行时间: {}", format_uptime(self.started_at.elapsed()));
        info!("总请求数: {}", metrics.total_requests);
        info!("总响应数: {}", metrics.total_responses);
        info!("拒绝(REFUSED): {}", metrics.refused);
        info!("屏蔽(NXDOMAIN): {}", metrics.not_found);
        info!("静态应答: {}", metrics.static_answers);
        info!("空应答(NOERROR): {}", metrics.empty_answers);
        info!("上游转发: {}", metrics.relayed);
        info!("上游失败(SERVFAIL): {}", metrics.upstream_failures);
        info!("丢弃的数据报: {}", metrics.dropped);
        info!("==================");
    }

    fn counter_for(&self, outcome: Outcome) -> &AtomicU64 {
        match outcome {
            Outcome::Synthesized(Decision::Refuse) => &self.refused,
            Outcome::Synthesized(Decision::NotFound) => &self.not_found,
            Outcome::Synthesized(Decision::AnswerA(_) | Decision::AnswerAAAA(_)) => {
                &self.static_answers
            }
            Outcome::Synthesized(Decision::EmptyNoError) => &self.empty_answers,
            Outcome::Synthesized(Decision::Forward) | Outcome::Relayed => &self.relayed,
            Outcome::UpstreamFailed => &self.upstream_failures,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub total_responses: u64,
    pub refused: u64,
    pub not_found: u64,
    pub static_answers: u64,
    pub empty_answers: u64,
    pub relayed: u64,
    pub upstream_failures: u64,
    pub dropped: u64,
}

#[async_trait]
impl Middleware for MetricsMiddleware {
    async fn handle_request(&self, _query: &Query) {
        if self.enabled {
            self.total_requests.fetch_add(1, Ordering::Relaxed);
        }
    }

    async fn handle_response(&self, _query: &Query, outcome: Outcome, _response: &[u8]) {
        if self.enabled {
            self.total_responses.fetch_add(1, Ordering::Relaxed);
            self.counter_for(outcome).fetch_add(1, Ordering::Relaxed);
        }
    }

    fn name(&self) -> &str {
        "MetricsMiddleware"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::tests::build_query;
    use hickory_proto::rr::RecordType;
    use std::net::Ipv4Addr;

    fn query() -> Query {
        let raw = build_query(42, "tutu.ru.", RecordType::A);
        Query::parse(&raw, "127.0.0.1:1000".parse().unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_counts_by_outcome() {
        let metrics = MetricsMiddleware::new(true);
        let query = query();

        let outcomes = [
            Outcome::Synthesized(Decision::Refuse),
            Outcome::Synthesized(Decision::NotFound),
            Outcome::Synthesized(Decision::AnswerA(Ipv4Addr::LOCALHOST)),
            Outcome::Synthesized(Decision::EmptyNoError),
            Outcome::Relayed,
            Outcome::UpstreamFailed,
        ];
        for outcome in outcomes {
            metrics.handle_request(&query).await;
            metrics.handle_response(&query, outcome, &[]).await;
        }
        metrics.record_dropped();

        assert_eq!(
            metrics.get_metrics(),
            MetricsSnapshot {
                total_requests: 6,
                total_responses: 6,
                refused: 1,
                not_found: 1,
                static_answers: 1,
                empty_answers: 1,
                relayed: 1,
                upstream_failures: 1,
                dropped: 1,
            }
        );
    }

    #[tokio::test]
    async fn test_disabled_metrics_stay_zero() {
        let metrics = MetricsMiddleware::new(false);
        let query = query();
        metrics.handle_request(&query).await;
        metrics.handle_response(&query, Outcome::Relayed, &[]).await;
        metrics.record_dropped();
        assert_eq!(metrics.get_metrics(), MetricsSnapshot::default());
    }
}
