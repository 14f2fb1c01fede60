pub mod validate;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;
use tokio::fs;
use tracing::{debug, info, warn};

use validate::{is_valid_hostname, parse_ip_address, parse_ipv4, parse_ipv6, parse_udp_port};

/// 上游DNS服务器的标准端口
pub const DNS_PORT: u16 = 53;

/// 转发默认超时
pub const DEFAULT_FORWARD_TIMEOUT: Duration = Duration::from_secs(2);

/// 校验后的过滤策略，启动时加载一次，之后只读
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Policy {
    pub refuse: HashSet<String>,
    pub blocked: HashSet<String>,
    pub static_a: HashMap<String, Ipv4Addr>,
    pub static_aaaa: HashMap<String, Ipv6Addr>,
    pub listen_address: Option<IpAddr>,
    pub listen_port: Option<u16>,
    /// dns1, dns2, dns3
    pub upstream: [Option<Ipv4Addr>; 3],
}

/// 配置文件中的分节
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Blacklist,
    Server,
    Upstream,
}

impl Section {
    fn from_header(header: &str) -> Option<Self> {
        match header {
            "[blacklist]" => Some(Section::Blacklist),
            "[server]" => Some(Section::Server),
            "[upstream]" => Some(Section::Upstream),
            _ => None,
        }
    }
}

/// JSON 形式的配置文件，三节内容与文本格式一致
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct JsonConfig {
    server: BTreeMap<String, Value>,
    upstream: BTreeMap<String, Value>,
    blacklist: BTreeMap<String, Value>,
}

impl Policy {
    /// 从文件加载策略。文件不存在时返回空策略，由启动阶段的监听地址检查报错。
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!("加载配置文件: {}", path.display());

        let content = match fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("配置文件 {} 不存在，使用空策略", path.display());
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::FileRead(path.display().to_string(), e)),
        };

        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        let policy = if is_json {
            Self::from_json_str(&content)
        } else {
            Self::from_conf_str(&content)
        };

        let stats = policy.stats();
        info!(
            "配置文件加载成功: 拒绝 {} 个, 屏蔽 {} 个, A 覆盖 {} 个, AAAA 覆盖 {} 个, 上游 {} 个",
            stats.refuse, stats.blocked, stats.static_a, stats.static_aaaa, stats.upstreams
        );
        if let Ok(dump) = serde_json::to_string(&policy) {
            debug!("策略内容: {}", dump);
        }
        Ok(policy)
    }

    /// 解析分节文本格式。无法识别或校验失败的行直接跳过。
    pub fn from_conf_str(content: &str) -> Self {
        let mut policy = Self::default();
        let mut section = None;

        for row in content.lines() {
            let row = row.trim().to_lowercase();
            if row.is_empty() {
                continue;
            }
            if row.starts_with('[') && row.ends_with(']') {
                // 未知节名会关闭当前节
                section = Section::from_header(&row);
                continue;
            }
            let Some(current) = section else {
                debug!("忽略节外的行: {}", row);
                continue;
            };

            let pair: Vec<&str> = row.split('=').map(str::trim).collect();
            if pair.len() != 2 {
                debug!("忽略格式错误的行: {}", row);
                continue;
            }
            policy.apply(current, pair[0], pair[1]);
        }

        policy
    }

    /// 解析 JSON 格式，语法错误时返回空策略
    pub fn from_json_str(content: &str) -> Self {
        let raw: JsonConfig = match serde_json::from_str(content) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("JSON 配置解析失败: {}", e);
                return Self::default();
            }
        };

        let mut policy = Self::default();
        let sections = [
            (Section::Server, &raw.server),
            (Section::Upstream, &raw.upstream),
            (Section::Blacklist, &raw.blacklist),
        ];
        for (section, entries) in sections {
            for (key, value) in entries {
                let value = match value {
                    Value::String(s) => s.trim().to_lowercase(),
                    Value::Number(n) => n.to_string(),
                    other => {
                        debug!("忽略无法识别的值: {} = {}", key, other);
                        continue;
                    }
                };
                policy.apply(section, &key.trim().to_lowercase(), &value);
            }
        }
        policy
    }

    fn apply(&mut self, section: Section, key: &str, value: &str) {
        match section {
            Section::Blacklist => {
                if !is_valid_hostname(key) {
                    debug!("忽略无效域名: {}", key);
                    return;
                }
                let domain = key.trim_end_matches('.').to_string();
                if value == "notfind" {
                    self.blocked.insert(domain);
                } else if value == "refuse" {
                    self.refuse.insert(domain);
                } else if let Some(ip) = parse_ipv4(value) {
                    self.static_a.insert(domain, ip);
                } else if let Some(ip) = parse_ipv6(value) {
                    self.static_aaaa.insert(domain, ip);
                } else {
                    debug!("忽略无效规则: {} = {}", key, value);
                }
            }
            Section::Server => match key {
                "listen_address" => match parse_ip_address(value) {
                    Some(ip) => self.listen_address = Some(ip),
                    None => debug!("忽略无效监听地址: {}", value),
                },
                "listen_port" => match parse_udp_port(value) {
                    Some(port) => self.listen_port = Some(port),
                    None => debug!("忽略无效监听端口: {}", value),
                },
                _ => debug!("忽略未知的 server 配置项: {}", key),
            },
            Section::Upstream => {
                let slot = match key {
                    "dns1" => 0,
                    "dns2" => 1,
                    "dns3" => 2,
                    _ => {
                        debug!("忽略未知的 upstream 配置项: {}", key);
                        return;
                    }
                };
                match parse_ipv4(value) {
                    Some(ip) => self.upstream[slot] = Some(ip),
                    None => debug!("忽略无效上游地址: {} = {}", key, value),
                }
            }
        }
    }

    /// 监听地址；地址或端口未配置时是启动错误
    pub fn listen_endpoint(&self) -> Result<SocketAddr, ConfigError> {
        let address = self.listen_address.ok_or(ConfigError::MissingListenAddress)?;
        let port = self.listen_port.ok_or(ConfigError::MissingListenPort)?;
        Ok(SocketAddr::new(address, port))
    }

    /// 按 dns1, dns2, dns3 顺序列出已配置的上游地址
    pub fn upstreams(&self) -> Vec<Ipv4Addr> {
        self.upstream.iter().flatten().copied().collect()
    }

    pub fn stats(&self) -> PolicyStats {
        PolicyStats {
            refuse: self.refuse.len(),
            blocked: self.blocked.len(),
            static_a: self.static_a.len(),
            static_aaaa: self.static_aaaa.len(),
            upstreams: self.upstreams().len(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolicyStats {
    pub refuse: usize,
    pub blocked: usize,
    pub static_a: usize,
    pub static_aaaa: usize,
    pub upstreams: usize,
}

/// 运行时选项，来自命令行
#[derive(Debug, Clone)]
pub struct ServerOptions {
    pub forward_timeout: Duration,
    pub upstream_port: u16,
    /// None 表示单工作者串行转发
    pub max_concurrent_forwards: Option<usize>,
    pub failover: bool,
    pub logging_enabled: bool,
    pub metrics_enabled: bool,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            forward_timeout: DEFAULT_FORWARD_TIMEOUT,
            upstream_port: DNS_PORT,
            max_concurrent_forwards: None,
            failover: false,
            logging_enabled: true,
            metrics_enabled: true,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("读取配置文件 {0} 失败: {1}")]
    FileRead(String, #[source] std::io::Error),

    #[error("未配置有效的监听地址 [server] listen_address")]
    MissingListenAddress,

    #[error("未配置有效的监听端口 [server] listen_port")]
    MissingListenPort,
}
