use crate::classifier::{Decision, classify};
use crate::config::{ConfigError, Policy, ServerOptions};
use crate::forwarder::UpstreamForwarder;
use crate::middleware::logging::LoggingMiddleware;
use crate::middleware::metrics::MetricsMiddleware;
use crate::middleware::{MiddlewarePipeline, Outcome};
use crate::query::Query;
use crate::synthesizer;
use crate::utils::extract_query_id;

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

/// 入站数据报缓冲区大小
const MAX_DATAGRAM: usize = 4096;

/// 指标打印间隔（秒）
const METRICS_INTERVAL_SECS: u64 = 60;

/// DNS代理服务器
pub struct DnsServer {
    policy: Arc<Policy>,
    options: ServerOptions,
    listen_addr: SocketAddr,
    middleware_pipeline: Arc<MiddlewarePipeline>,
    forwarder: Arc<UpstreamForwarder>,
    metrics: Arc<MetricsMiddleware>,
    /// 仅在并发转发模式下存在
    forward_permits: Option<Arc<Semaphore>>,
}

impl DnsServer {
    /// 创建新的DNS代理实例。监听地址未配置时直接失败。
    pub fn new(policy: Policy, options: ServerOptions) -> Result<Self, DnsServerError> {
        let listen_addr = policy.listen_endpoint()?;

        let mut middleware_pipeline = MiddlewarePipeline::new();
        if options.logging_enabled {
            middleware_pipeline.add_middleware(Arc::new(LoggingMiddleware::new(true)));
        }
        let metrics = Arc::new(MetricsMiddleware::new(options.metrics_enabled));
        if options.metrics_enabled {
            middleware_pipeline.add_middleware(metrics.clone());
        }

        let upstreams = policy.upstreams();
        let forwarder = Arc::new(UpstreamForwarder::from_addresses(
            &upstreams,
            options.upstream_port,
            options.forward_timeout,
            options.failover,
        ));
        match forwarder.primary() {
            Some(primary) => info!("上游服务器: {}", primary),
            None => warn!("未配置上游服务器，所有需要转发的查询将返回 SERVFAIL"),
        }

        let forward_permits = options
            .max_concurrent_forwards
            .map(|limit| Arc::new(Semaphore::new(limit.max(1))));

        info!("DNS代理初始化完成");
        info!("监听地址: {}", listen_addr);
        info!("转发超时: {:?}", options.forward_timeout);
        info!(
            "转发模式: {}",
            match options.max_concurrent_forwards {
                Some(limit) => format!("并发 (上限 {})", limit.max(1)),
                None => "串行".to_string(),
            }
        );
        info!("故障转移: {}", options.failover);
        info!("中间件: {:?}", middleware_pipeline.names());

        Ok(Self {
            policy: Arc::new(policy),
            options,
            listen_addr,
            middleware_pipeline: Arc::new(middleware_pipeline),
            forwarder,
            metrics,
            forward_permits,
        })
    }

    /// 获取监听地址
    pub fn listen_address(&self) -> SocketAddr {
        self.listen_addr
    }

    pub async fn bind(&self) -> Result<UdpSocket, DnsServerError> {
        UdpSocket::bind(self.listen_addr)
            .await
            .map_err(|e| DnsServerError::BindError(self.listen_addr, e))
    }

    /// 启动DNS代理，直到收到 Ctrl-C
    pub async fn run(&self) -> Result<(), DnsServerError> {
        let socket = self.bind().await?;
        info!("启动UDP服务器在地址: {}", self.listen_addr);

        // 启动统计信息定时打印
        let printer = self.options.metrics_enabled.then(|| {
            let metrics = self.metrics.clone();
            tokio::spawn(async move {
                let mut interval =
                    tokio::time::interval(tokio::time::Duration::from_secs(METRICS_INTERVAL_SECS));
                interval.tick().await;
                loop {
                    interval.tick().await;
                    metrics.print_metrics();
                }
            })
        });

        let result = tokio::select! {
            _ = self.serve(socket) => Ok(()),
            signal = tokio::signal::ctrl_c() => signal.map_err(|e| {
                DnsServerError::RuntimeError(format!("等待信号失败: {}", e))
            }),
        };

        if let Some(printer) = printer {
            printer.abort();
        }
        info!("收到停止信号，正在关闭DNS代理...");
        if self.options.metrics_enabled {
            self.metrics.print_metrics();
        }
        result
    }

    /// 单工作者循环：逐个读取数据报并处理
    pub async fn serve(&self, socket: UdpSocket) {
        let socket = Arc::new(socket);
        let mut buffer = vec![0u8; MAX_DATAGRAM];

        loop {
            match socket.recv_from(&mut buffer).await {
                Ok((len, client_addr)) => {
                    debug!("收到来自 {} 的DNS查询，长度: {} bytes", client_addr, len);
                    self.handle_datagram(&socket, &buffer[..len], client_addr)
                        .await;
                }
                Err(e) => {
                    error!("UDP接收错误: {}", e);
                }
            }
        }
    }

    async fn handle_datagram(&self, socket: &Arc<UdpSocket>, datagram: &[u8], client: SocketAddr) {
        let query = match Query::parse(datagram, client) {
            Ok(query) => query,
            Err(e) => {
                warn!(
                    "丢弃来自 {} 的数据报 (id: {:?}): {}",
                    client,
                    extract_query_id(datagram),
                    e
                );
                self.metrics.record_dropped();
                return;
            }
        };
        self.middleware_pipeline.handle_request(&query).await;

        let decision = classify(&query.name, query.qtype, &self.policy);
        debug!("查询 {} {} 分类结果: {}", query.name, query.qtype, decision);

        if decision != Decision::Forward {
            match synthesizer::synthesize(&query, &decision) {
                Ok(response) => {
                    respond(
                        socket,
                        &self.middleware_pipeline,
                        &query,
                        Outcome::Synthesized(decision),
                        response,
                    )
                    .await
                }
                Err(e) => error!("构造响应失败: {}", e),
            }
            return;
        }

        let Some(permits) = &self.forward_permits else {
            forward_and_respond(&self.forwarder, &self.middleware_pipeline, socket, query).await;
            return;
        };

        // 达到并发上限时在此等待，读取循环随之暂停
        let permit = match permits.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(e) => {
                error!("获取转发许可失败: {}", e);
                return;
            }
        };
        let forwarder = self.forwarder.clone();
        let pipeline = self.middleware_pipeline.clone();
        let socket = socket.clone();
        tokio::spawn(async move {
            forward_and_respond(&forwarder, &pipeline, &socket, query).await;
            drop(permit);
        });
    }
}

/// 转发查询；上游失败时回复与原查询对应的 SERVFAIL
async fn forward_and_respond(
    forwarder: &UpstreamForwarder,
    pipeline: &MiddlewarePipeline,
    socket: &UdpSocket,
    query: Query,
) {
    match forwarder.forward(&query.raw).await {
        Ok(response) => respond(socket, pipeline, &query, Outcome::Relayed, response).await,
        Err(e) => {
            warn!("转发查询 {} (id: {}) 失败: {}", query.name, query.id, e);
            match synthesizer::failure(&query) {
                Ok(response) => {
                    respond(socket, pipeline, &query, Outcome::UpstreamFailed, response).await
                }
                Err(e) => error!("构造SERVFAIL响应失败: {}", e),
            }
        }
    }
}

async fn respond(
    socket: &UdpSocket,
    pipeline: &MiddlewarePipeline,
    query: &Query,
    outcome: Outcome,
    response: Vec<u8>,
) {
    pipeline.handle_response(query, outcome, &response).await;
    if let Err(e) = socket.send_to(&response, query.client).await {
        error!("发送响应到 {} 失败: {}", query.client, e);
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DnsServerError {
    #[error("配置错误: {0}")]
    ConfigError(#[from] ConfigError),

    #[error("绑定监听地址 {0} 失败: {1}")]
    BindError(SocketAddr, #[source] std::io::Error),

    #[error("运行时错误: {0}")]
    RuntimeError(String),
}
