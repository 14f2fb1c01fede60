use regex::Regex;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::LazyLock;

/// 域名总长度上限
const MAX_DOMAIN_LEN: usize = 253;

const LABEL_PATTERN: &str = r"^_?[A-Za-z0-9]([A-Za-z0-9-]{0,61}[A-Za-z0-9])?$";

static LABEL_RE: LazyLock<Result<Regex, regex::Error>> = LazyLock::new(|| Regex::new(LABEL_PATTERN));

/// 校验域名：总长不超过253，且每个标签都符合主机名规则（允许前导下划线）
pub fn is_valid_hostname(domain: &str) -> bool {
    if domain.len() > MAX_DOMAIN_LEN {
        return false;
    }
    let Ok(label_re) = LABEL_RE.as_ref() else {
        return false;
    };
    domain
        .trim_end_matches('.')
        .split('.')
        .all(|label| label_re.is_match(label))
}

pub fn parse_ip_address(value: &str) -> Option<IpAddr> {
    value.parse().ok()
}

pub fn parse_ipv4(value: &str) -> Option<Ipv4Addr> {
    value.parse().ok()
}

pub fn parse_ipv6(value: &str) -> Option<Ipv6Addr> {
    value.parse().ok()
}

/// 端口必须全部为数字且在 0..=65535 之间
pub fn parse_udp_port(value: &str) -> Option<u16> {
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    value.parse().ok()
}
