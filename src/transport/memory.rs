//! 进程内 broker
//!
//! 按 topic filter 在客户端之间路由消息，并记录每次发布及其时刻（tokio 时钟），
//! 供测试与嵌入使用。

use super::{InboundMessage, Transport, topic_matches};
use crate::error::TransportError;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tokio::time::Instant;

/// 一次发布
#[derive(Debug, Clone)]
pub struct Publication {
    pub channel: String,
    pub payload: Vec<u8>,
    pub at: Instant,
}

struct ClientSlot {
    filters: Vec<String>,
    tx: mpsc::UnboundedSender<InboundMessage>,
}

#[derive(Default)]
struct BrokerState {
    next_client: u64,
    clients: HashMap<u64, ClientSlot>,
    published: Vec<Publication>,
    connects: usize,
    disconnects: usize,
    /// 还允许成功的发布次数；`None` 为不限
    publish_budget: Option<usize>,
    refuse_code: Option<u8>,
}

#[derive(Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn client(&self) -> MemoryTransport {
        MemoryTransport {
            broker: self.clone(),
            id: None,
            rx: None,
        }
    }

    /// 向所有匹配的订阅者投递，不计入发布记录。
    pub fn inject(&self, channel: &str, payload: impl Into<Vec<u8>>) {
        let payload = payload.into();
        self.route(channel, &payload);
    }

    fn route(&self, channel: &str, payload: &[u8]) {
        let state = self.lock();
        for slot in state.clients.values() {
            if slot.filters.iter().any(|f| topic_matches(f, channel)) {
                let _ = slot.tx.send(InboundMessage::new(channel, payload));
            }
        }
    }

    /// 断开所有客户端；之后 `next_message` 返回 `None`。
    pub fn close(&self) {
        self.lock().clients.clear();
    }

    /// 之后的第 `n + 1` 次发布起返回 `ConnectionClosed`。
    pub fn fail_publishes_after(&self, n: usize) {
        self.lock().publish_budget = Some(n);
    }

    /// 以给定 CONNACK 码拒绝之后的连接。
    pub fn refuse_connections(&self, code: u8) {
        self.lock().refuse_code = Some(code);
    }

    pub fn published(&self) -> Vec<Publication> {
        self.lock().published.clone()
    }

    pub fn connects(&self) -> usize {
        self.lock().connects
    }

    pub fn disconnects(&self) -> usize {
        self.lock().disconnects
    }

    pub fn connected_clients(&self) -> usize {
        self.lock().clients.len()
    }
}

/// 连接到 [`MemoryBroker`] 的客户端
pub struct MemoryTransport {
    broker: MemoryBroker,
    id: Option<u64>,
    rx: Option<mpsc::UnboundedReceiver<InboundMessage>>,
}

impl MemoryTransport {
    fn client_id(&self) -> Result<u64, TransportError> {
        let id = self.id.ok_or(TransportError::NotConnected)?;
        if self.broker.lock().clients.contains_key(&id) {
            Ok(id)
        } else {
            Err(TransportError::ConnectionClosed)
        }
    }
}

impl Transport for MemoryTransport {
    async fn connect(&mut self) -> Result<(), TransportError> {
        let mut state = self.broker.lock();
        if let Some(code) = state.refuse_code {
            return Err(TransportError::ConnectionRefused { code });
        }
        let id = state.next_client;
        state.next_client += 1;
        state.connects += 1;
        let (tx, rx) = mpsc::unbounded_channel();
        state.clients.insert(
            id,
            ClientSlot {
                filters: Vec::new(),
                tx,
            },
        );
        self.id = Some(id);
        self.rx = Some(rx);
        Ok(())
    }

    async fn subscribe(&mut self, channel: &str) -> Result<(), TransportError> {
        let id = self.client_id()?;
        if let Some(slot) = self.broker.lock().clients.get_mut(&id) {
            slot.filters.push(channel.to_string());
        }
        Ok(())
    }

    async fn publish(&mut self, channel: &str, payload: &[u8]) -> Result<(), TransportError> {
        self.client_id()?;
        {
            let mut state = self.broker.lock();
            if let Some(budget) = state.publish_budget.as_mut() {
                if *budget == 0 {
                    return Err(TransportError::ConnectionClosed);
                }
                *budget -= 1;
            }
            state.published.push(Publication {
                channel: channel.to_string(),
                payload: payload.to_vec(),
                at: Instant::now(),
            });
        }
        self.broker.route(channel, payload);
        Ok(())
    }

    async fn next_message(&mut self) -> Result<Option<InboundMessage>, TransportError> {
        let rx = self.rx.as_mut().ok_or(TransportError::NotConnected)?;
        Ok(rx.recv().await)
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        if let Some(id) = self.id.take() {
            let mut state = self.broker.lock();
            state.clients.remove(&id);
            state.disconnects += 1;
        }
        self.rx = None;
        Ok(())
    }
}
