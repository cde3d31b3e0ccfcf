//! 事件记录与负载
//!
//! 一条记录对应一次捕获/回放的消息：时间戳、channel、负载。

use super::timestamp::Timestamp;
use crate::error::DecodeError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// 消息负载：结构化 JSON，或无法解码时的原始文本。
///
/// 在日志中 `Raw` 写为 JSON 字符串，`Structured` 写为原始 JSON 值；
/// 反序列化时字符串优先匹配 `Raw`。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Payload {
    Raw(String),
    Structured(Value),
}

impl Payload {
    /// 解码收到的字节。失败不是错误条件：回退为原始文本，并把原因一并返回。
    pub fn decode(bytes: &[u8]) -> (Payload, Option<DecodeError>) {
        match decode_structured(bytes) {
            Ok(value) => (Payload::Structured(value), None),
            Err(err) => (
                Payload::Raw(String::from_utf8_lossy(bytes).into_owned()),
                Some(err),
            ),
        }
    }

    /// 还原为发布用的字节：结构化负载重新序列化，原始文本原样发布。
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Payload::Raw(text) => text.as_bytes().to_vec(),
            Payload::Structured(value) => value.to_string().into_bytes(),
        }
    }

    pub fn is_structured(&self) -> bool {
        matches!(self, Payload::Structured(_))
    }
}

impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::Raw(text) => f.write_str(text),
            Payload::Structured(value) => write!(f, "{value}"),
        }
    }
}

/// 尝试把字节解码为结构化数据。
///
/// 裸 JSON 字符串也视为失败：日志格式里字符串表示原始文本，
/// 保留原文（含引号）才能在回放时发出相同的字节。
pub fn decode_structured(bytes: &[u8]) -> Result<Value, DecodeError> {
    let text = std::str::from_utf8(bytes).map_err(|e| DecodeError::Utf8 {
        valid_up_to: e.valid_up_to(),
    })?;
    match serde_json::from_str::<Value>(text)? {
        Value::String(_) => Err(DecodeError::BareString),
        value => Ok(value),
    }
}

/// 一条已捕获的事件。创建后不可变。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    timestamp: Timestamp,
    #[serde(rename = "topic")]
    channel: String,
    payload: Payload,
}

impl EventRecord {
    pub fn new(timestamp: Timestamp, channel: impl Into<String>, payload: Payload) -> Self {
        Self {
            timestamp,
            channel: channel.into(),
            payload,
        }
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }
}
