//! 传输层
//!
//! 捕获与回放只通过 [`Transport`] 与 broker 交互：连接、订阅、发布、接收。
//! 提供 MQTT 3.1.1 客户端实现与进程内的内存 broker。

mod memory;
pub mod mqtt;

use crate::error::TransportError;
use std::future::Future;

pub use memory::{MemoryBroker, MemoryTransport, Publication};
pub use mqtt::MqttClient;

/// 收到的一条消息（尚未解码）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub channel: String,
    pub payload: Vec<u8>,
}

impl InboundMessage {
    pub fn new(channel: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            channel: channel.into(),
            payload: payload.into(),
        }
    }
}

/// 发布/订阅传输。连接失败不在此层重试。
pub trait Transport: Send {
    fn connect(&mut self) -> impl Future<Output = Result<(), TransportError>> + Send;

    fn subscribe(&mut self, channel: &str)
    -> impl Future<Output = Result<(), TransportError>> + Send;

    fn publish(
        &mut self,
        channel: &str,
        payload: &[u8],
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// 下一条订阅到的消息；连接关闭时返回 `None`。必须是取消安全的。
    fn next_message(
        &mut self,
    ) -> impl Future<Output = Result<Option<InboundMessage>, TransportError>> + Send;

    fn disconnect(&mut self) -> impl Future<Output = Result<(), TransportError>> + Send;
}

/// MQTT topic filter 匹配，支持 `+`（单层）与 `#`（多层，必须在末尾）。
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let filter_parts: Vec<&str> = filter.split('/').collect();
    let topic_parts: Vec<&str> = topic.split('/').collect();

    let mut fi = 0;
    let mut ti = 0;
    while fi < filter_parts.len() {
        if filter_parts[fi] == "#" {
            return fi == filter_parts.len() - 1;
        }
        if ti >= topic_parts.len() {
            return false;
        }
        if filter_parts[fi] != "+" && filter_parts[fi] != topic_parts[ti] {
            return false;
        }
        fi += 1;
        ti += 1;
    }
    ti == topic_parts.len()
}
