use crate::classifier::Decision;
use crate::query::Query;
use hickory_proto::op::{Message, MessageType, ResponseCode};
use hickory_proto::rr::rdata::{A, AAAA};
use hickory_proto::rr::{RData, Record};

/// 本地合成记录的TTL（秒）
pub const STATIC_TTL: u32 = 60;

/// 根据分类结果构造本地响应
pub fn synthesize(query: &Query, decision: &Decision) -> Result<Vec<u8>, SynthesisError> {
    let response = match decision {
        Decision::Refuse => reply_to(query, ResponseCode::Refused),
        Decision::NotFound => reply_to(query, ResponseCode::NXDomain),
        Decision::EmptyNoError => reply_to(query, ResponseCode::NoError),
        Decision::AnswerA(ip) => answer(query, RData::A(A(*ip))),
        Decision::AnswerAAAA(ip) => answer(query, RData::AAAA(AAAA(*ip))),
        Decision::Forward => return Err(SynthesisError::ForwardDecision),
    };
    encode(&response)
}

/// 上游失败时的 SERVFAIL 响应
pub fn failure(query: &Query) -> Result<Vec<u8>, SynthesisError> {
    encode(&reply_to(query, ResponseCode::ServFail))
}

fn encode(response: &Message) -> Result<Vec<u8>, SynthesisError> {
    response
        .to_vec()
        .map_err(|e| SynthesisError::Encode(e.to_string()))
}

fn answer(query: &Query, rdata: RData) -> Message {
    let mut response = reply_to(query, ResponseCode::NoError);
    // 问题段在解析时已确认非空
    if let Some(question) = query.message.queries().first() {
        response.add_answer(Record::from_rdata(
            question.name().clone(),
            STATIC_TTL,
            rdata,
        ));
    }
    response
}

/// 保留原事务ID和问题段的空响应
fn reply_to(query: &Query, code: ResponseCode) -> Message {
    let request = &query.message;
    let mut response = Message::new();
    response.set_id(request.id());
    response.set_message_type(MessageType::Response);
    response.set_op_code(request.op_code());
    response.set_authoritative(true);
    response.set_recursion_desired(request.recursion_desired());
    response.set_recursion_available(true);
    response.set_response_code(code);
    response.add_queries(request.queries().to_vec());
    response
}

#[derive(Debug, thiserror::Error)]
pub enum SynthesisError {
    #[error("转发决定不能在本地合成响应")]
    ForwardDecision,

    #[error("响应编码失败: {0}")]
    Encode(String),
}
