use crate::config::Policy;
use hickory_proto::rr::RecordType;
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

/// 分类结果，只在单个请求的处理过程中存在
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Refuse,
    NotFound,
    AnswerA(Ipv4Addr),
    AnswerAAAA(Ipv6Addr),
    /// 域名在策略中存在，但没有所查询类型的记录
    EmptyNoError,
    Forward,
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::Refuse => write!(f, "REFUSED"),
            Decision::NotFound => write!(f, "NXDOMAIN"),
            Decision::AnswerA(ip) => write!(f, "A {}", ip),
            Decision::AnswerAAAA(ip) => write!(f, "AAAA {}", ip),
            Decision::EmptyNoError => write!(f, "NOERROR(空)"),
            Decision::Forward => write!(f, "转发"),
        }
    }
}

/// 把线上格式的域名转换为策略键的形式：小写，去掉末尾的点
pub fn normalize_name(name: &str) -> String {
    name.trim_end_matches('.').to_ascii_lowercase()
}

/// 按固定优先级对查询分类：拒绝 > 屏蔽 > A 覆盖 > AAAA 覆盖 > 转发。
///
/// `name` 必须已经过 [`normalize_name`] 处理。
pub fn classify(name: &str, qtype: RecordType, policy: &Policy) -> Decision {
    if policy.refuse.contains(name) {
        return Decision::Refuse;
    }
    if policy.blocked.contains(name) {
        return Decision::NotFound;
    }

    match qtype {
        RecordType::A => {
            if let Some(ip) = policy.static_a.get(name) {
                return Decision::AnswerA(*ip);
            }
            if policy.static_aaaa.contains_key(name) {
                return Decision::EmptyNoError;
            }
        }
        RecordType::AAAA => {
            if let Some(ip) = policy.static_aaaa.get(name) {
                return Decision::AnswerAAAA(*ip);
            }
            if policy.static_a.contains_key(name) {
                return Decision::EmptyNoError;
            }
        }
        _ => {}
    }

    Decision::Forward
}
