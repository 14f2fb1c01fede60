use std::net::{Ipv4Addr, SocketAddr};
use tokio::net::UdpSocket;
use tokio::time::{Duration, Instant, timeout};
use tracing::{debug, warn};

/// 上游响应接收缓冲区大小
const MAX_DNS_RESPONSE: usize = 4096;
/// DNS 头部长度，短于此长度的上游响应视为格式错误
const DNS_HEADER_LEN: usize = 12;

/// 上游转发器 - 原样转发查询字节并原样返回上游响应
pub struct UpstreamForwarder {
    upstreams: Vec<SocketAddr>,
    timeout: Duration,
    failover: bool,
}

impl UpstreamForwarder {
    pub fn new(upstreams: Vec<SocketAddr>, timeout: Duration, failover: bool) -> Self {
        Self {
            upstreams,
            timeout,
            failover,
        }
    }

    /// 由策略中的上游地址构造，端口通常为 53
    pub fn from_addresses(
        addresses: &[Ipv4Addr],
        port: u16,
        timeout: Duration,
        failover: bool,
    ) -> Self {
        let upstreams = addresses
            .iter()
            .map(|ip| SocketAddr::new((*ip).into(), port))
            .collect();
        Self::new(upstreams, timeout, failover)
    }

    /// 实际使用的上游地址
    pub fn primary(&self) -> Option<SocketAddr> {
        self.upstreams.first().copied()
    }

    /// 转发查询。默认只使用第一个上游；启用故障转移时按顺序尝试其余上游，总时长不超过超时时间。
    pub async fn forward(&self, query: &[u8]) -> Result<Vec<u8>, ForwardError> {
        let primary = self.primary().ok_or(ForwardError::NoUpstream)?;
        if !self.failover {
            return self.query_udp(primary, query, self.timeout).await;
        }

        let deadline = Instant::now() + self.timeout;
        // 超时预算在第一次尝试前就已耗尽时，按首个上游超时上报
        let mut last_error = ForwardError::Timeout(primary);
        for (index, upstream) in self.upstreams.iter().enumerate() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            let candidates_left = (self.upstreams.len() - index) as u32;
            let attempt_timeout = remaining / candidates_left;

            match self.query_udp(*upstream, query, attempt_timeout).await {
                Ok(response) => return Ok(response),
                Err(e) => {
                    warn!("上游服务器 {} 查询失败: {}", upstream, e);
                    last_error = e;
                }
            }
        }

        warn!("所有上游服务器都不可用");
        Err(ForwardError::AllUpstreamsUnavailable(Box::new(last_error)))
    }

    /// 每次查询使用新的UDP套接字，只等待一个数据报
    async fn query_udp(
        &self,
        upstream: SocketAddr,
        query: &[u8],
        wait: Duration,
    ) -> Result<Vec<u8>, ForwardError> {
        let bind_addr = if upstream.is_ipv4() {
            "0.0.0.0:0"
        } else {
            "[::]:0"
        };
        let socket = UdpSocket::bind(bind_addr).await?;
        // 连接后只接收来自该上游的数据报
        socket.connect(upstream).await?;
        socket.send(query).await?;
        debug!("已转发 {} bytes 到 {}", query.len(), upstream);

        let mut buffer = vec![0u8; MAX_DNS_RESPONSE];
        let len = match timeout(wait, socket.recv(&mut buffer)).await {
            Ok(result) => result?,
            Err(_) => return Err(ForwardError::Timeout(upstream)),
        };
        if len < DNS_HEADER_LEN {
            return Err(ForwardError::MalformedResponse(len));
        }

        buffer.truncate(len);
        debug!("收到上游 {} 的响应: {} bytes", upstream, len);
        Ok(buffer)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    #[error("未配置上游服务器")]
    NoUpstream,

    #[error("网络错误: {0}")]
    NetworkError(#[from] std::io::Error),

    #[error("上游 {0} 请求超时")]
    Timeout(SocketAddr),

    #[error("上游响应过短: {0} bytes")]
    MalformedResponse(usize),

    #[error("所有上游服务器不可用，最后错误: {0}")]
    AllUpstreamsUnavailable(Box<ForwardError>),
}
