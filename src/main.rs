mod classifier;
mod config;
mod forwarder;
mod middleware;
mod query;
mod server;
mod synthesizer;
mod utils;

use clap::{ArgAction, Parser};
use config::{Policy, ServerOptions};
use server::DnsServer;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "dns-proxy", version, about = "按策略过滤、改写并转发查询的 DNS 代理", long_about = None)]
struct Cli {
    /// 配置文件路径（.conf 分节格式或 .json）
    #[arg(value_name = "CONFIG", default_value = "config/dns-proxy.conf")]
    config: PathBuf,

    /// 上游查询超时（毫秒）
    #[arg(long, value_name = "MS", default_value_t = 2000)]
    forward_timeout_ms: u64,

    /// 上游端口
    #[arg(long, value_name = "PORT", default_value_t = config::DNS_PORT)]
    upstream_port: u16,

    /// 并发转发上限；不设置时由单个工作者串行转发
    #[arg(long, value_name = "N")]
    max_concurrent_forwards: Option<usize>,

    /// 上游失败时依次尝试 dns2、dns3
    #[arg(long, action = ArgAction::SetTrue)]
    failover: bool,

    /// 关闭请求日志中间件
    #[arg(long, action = ArgAction::SetTrue)]
    no_logging: bool,

    /// 关闭指标统计
    #[arg(long, action = ArgAction::SetTrue)]
    no_metrics: bool,
}

impl Cli {
    fn server_options(&self) -> ServerOptions {
        ServerOptions {
            forward_timeout: Duration::from_millis(self.forward_timeout_ms),
            upstream_port: self.upstream_port,
            max_concurrent_forwards: self.max_concurrent_forwards,
            failover: self.failover,
            logging_enabled: !self.no_logging,
            metrics_enabled: !self.no_metrics,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // 初始化 tracing 日志系统
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_file(true)
        .with_line_number(true)
        .init();

    info!("启动DNS代理...");

    let server = build_server(&cli).await?;

    info!("DNS代理已启动");
    info!("监听地址: {}", server.listen_address());

    // 启动服务器
    if let Err(e) = server.run().await {
        error!("DNS代理运行错误: {}", e);
        return Err(e.into());
    }
    Ok(())
}

/// 加载配置并创建DNS代理，任何一步失败都是启动错误
async fn build_server(cli: &Cli) -> Result<DnsServer, Box<dyn std::error::Error>> {
    // 加载配置
    let policy = match Policy::load(&cli.config).await {
        Ok(policy) => policy,
        Err(e) => {
            error!("加载配置文件失败: {}", e);
            return Err(e.into());
        }
    };

    // 创建DNS代理
    match DnsServer::new(policy, cli.server_options()) {
        Ok(server) => Ok(server),
        Err(e) => {
            error!("创建DNS代理失败: {}", e);
            Err(e.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["dns-proxy"]);
        assert_eq!(cli.config, PathBuf::from("config/dns-proxy.conf"));

        let options = cli.server_options();
        assert_eq!(options.forward_timeout, Duration::from_secs(2));
        assert_eq!(options.upstream_port, 53);
        assert!(options.max_concurrent_forwards.is_none());
        assert!(!options.failover);
        assert!(options.logging_enabled);
        assert!(options.metrics_enabled);
    }

    #[test]
    fn test_cli_overrides() {
        let cli = Cli::parse_from([
            "dns-proxy",
            "proxy.json",
            "--forward-timeout-ms",
            "500",
            "--max-concurrent-forwards",
            "8",
            "--failover",
            "--no-metrics",
        ]);
        assert_eq!(cli.config, PathBuf::from("proxy.json"));

        let options = cli.server_options();
        assert_eq!(options.forward_timeout, Duration::from_millis(500));
        assert_eq!(options.max_concurrent_forwards, Some(8));
        assert!(options.failover);
        assert!(!options.metrics_enabled);
    }

    #[tokio::test]
    async fn test_missing_config_fails_startup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.conf");
        let cli = Cli::parse_from(["dns-proxy", path.to_str().unwrap()]);

        let err = build_server(&cli).await.err().expect("缺少监听地址时必须失败");
        assert!(err.to_string().contains("listen_address"));
    }

    #[tokio::test]
    async fn test_valid_config_builds_server() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("proxy.conf");
        std::fs::write(
            &path,
            "[server]\nlisten_address = 127.0.0.1\nlisten_port = 5300\n",
        )
        .unwrap();
        let cli = Cli::parse_from(["dns-proxy", path.to_str().unwrap()]);

        let server = build_server(&cli).await.unwrap();
        assert_eq!(server.listen_address(), "127.0.0.1:5300".parse().unwrap());
    }
}
