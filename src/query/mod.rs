use crate::classifier::normalize_name;
use hickory_proto::op::{Message, MessageType};
use hickory_proto::rr::RecordType;
use std::net::SocketAddr;

/// 一个入站查询，从收到数据报开始存在，直到响应发出
#[derive(Debug, Clone)]
pub struct Query {
    pub id: u16,
    /// 已规范化的查询域名
    pub name: String,
    pub qtype: RecordType,
    pub message: Message,
    pub raw: Vec<u8>,
    pub client: SocketAddr,
}

impl Query {
    /// 解析入站数据报。无法解析、不是查询或没有问题段的数据报返回错误，调用方直接丢弃。
    pub fn parse(datagram: &[u8], client: SocketAddr) -> Result<Self, QueryError> {
        let message =
            Message::from_vec(datagram).map_err(|e| QueryError::Malformed(e.to_string()))?;
        if message.message_type() != MessageType::Query {
            return Err(QueryError::NotAQuery(message.id()));
        }

        let question = message
            .queries()
            .first()
            .ok_or(QueryError::NoQuestion(message.id()))?;
        let name = normalize_name(&question.name().to_ascii());
        let qtype = question.query_type();

        Ok(Self {
            id: message.id(),
            name,
            qtype,
            message,
            raw: datagram.to_vec(),
            client,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("DNS消息格式错误: {0}")]
    Malformed(String),

    #[error("消息 {0} 不是查询")]
    NotAQuery(u16),

    #[error("查询 {0} 没有问题段")]
    NoQuestion(u16),
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use hickory_proto::op::{OpCode, Query as Question};
    use hickory_proto::rr::Name;
    use std::str::FromStr;

    pub(crate) fn build_query(id: u16, name: &str, qtype: RecordType) -> Vec<u8> {
        let mut message = Message::new();
        message.set_id(id);
        message.set_message_type(MessageType::Query);
        message.set_op_code(OpCode::Query);
        message.set_recursion_desired(true);
        message.add_query(Question::query(Name::from_str(name).unwrap(), qtype));
        message.to_vec().unwrap()
    }

    /// 手工编码的查询，问题段域名为大小写混合的 "Ya.Ru"
    pub(crate) fn mixed_case_query(id: u16, qtype: RecordType) -> Vec<u8> {
        let mut raw = id.to_be_bytes().to_vec();
        raw.extend_from_slice(&[0x01, 0x00, 0, 1, 0, 0, 0, 0, 0, 0]);
        raw.extend_from_slice(&[2, b'Y', b'a', 2, b'R', b'u', 0]);
        raw.extend_from_slice(&u16::from(qtype).to_be_bytes());
        raw.extend_from_slice(&[0, 1]);
        raw
    }

    fn client() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    #[test]
    fn test_parse_query() {
        let raw = build_query(0x1234, "tutu.ru.", RecordType::A);
        let query = Query::parse(&raw, client()).unwrap();

        assert_eq!(query.id, 0x1234);
        assert_eq!(query.name, "tutu.ru");
        assert_eq!(query.qtype, RecordType::A);
        assert_eq!(query.raw, raw);
        assert_eq!(query.client, client());
    }

    #[test]
    fn test_parse_normalizes_case() {
        let raw = mixed_case_query(7, RecordType::AAAA);
        let query = Query::parse(&raw, client()).unwrap();
        assert_eq!(&raw[12..19], &[2, b'Y', b'a', 2, b'R', b'u', 0]);
        assert_eq!(query.name, "ya.ru");
        assert_eq!(query.qtype, RecordType::AAAA);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(
            Query::parse(&[0x12, 0x34, 0x01], client()),
            Err(QueryError::Malformed(_))
        ));
    }

    #[test]
    fn test_parse_rejects_responses() {
        let mut message = Message::new();
        message.set_id(9);
        message.set_message_type(MessageType::Response);
        let raw = message.to_vec().unwrap();
        assert!(matches!(
            Query::parse(&raw, client()),
            Err(QueryError::NotAQuery(9))
        ));
    }

    #[test]
    fn test_parse_rejects_empty_question() {
        let mut message = Message::new();
        message.set_id(10);
        let raw = message.to_vec().unwrap();
        assert!(matches!(
            Query::parse(&raw, client()),
            Err(QueryError::NoQuestion(10))
        ));
    }
}
