//! MQTT 客户端
//!
//! 握手在 `connect` 内同步完成；之后连接拆成两个任务：
//! - 写任务：串行发送外发报文，并按 keep-alive 周期发 PINGREQ
//! - 读任务：解析入站报文，把 PUBLISH 转交给 `next_message`

use super::codec::{Packet, read_packet, write_packet};
use crate::config::BrokerConfig;
use crate::error::TransportError;
use crate::transport::{InboundMessage, Transport, topic_matches};
use std::io;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, interval_at, timeout};
use tracing::{debug, info, trace, warn};

const CONNACK_TIMEOUT: Duration = Duration::from_secs(10);
const OUTGOING_CAPACITY: usize = 64;
const INCOMING_CAPACITY: usize = 1024;
/// SUBACK 返回码：订阅失败
const SUBACK_FAILURE: u8 = 0x80;

type Incoming = Result<InboundMessage, TransportError>;

struct Connection {
    outgoing: mpsc::Sender<Packet>,
    incoming: mpsc::Receiver<Incoming>,
    writer: JoinHandle<Result<(), TransportError>>,
    reader: JoinHandle<()>,
}

/// MQTT 3.1.1 客户端（QoS 0 发布与订阅）
pub struct MqttClient {
    config: BrokerConfig,
    conn: Option<Connection>,
    subscriptions: Vec<String>,
    next_packet_id: u16,
}

impl MqttClient {
    pub fn new(config: BrokerConfig) -> Self {
        Self {
            config,
            conn: None,
            subscriptions: Vec::new(),
            next_packet_id: 0,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    fn next_packet_id(&mut self) -> u16 {
        // packet id 0 is reserved
        self.next_packet_id = self.next_packet_id.wrapping_add(1).max(1);
        self.next_packet_id
    }

    fn connection(&self) -> Result<&Connection, TransportError> {
        self.conn.as_ref().ok_or(TransportError::NotConnected)
    }

    async fn send(&self, packet: Packet) -> Result<(), TransportError> {
        self.connection()?
            .outgoing
            .send(packet)
            .await
            .map_err(|_| TransportError::ConnectionClosed)
    }
}

impl Transport for MqttClient {
    #[tracing::instrument(skip(self), fields(broker = %self.config.addr(), client_id = %self.config.client_id))]
    async fn connect(&mut self) -> Result<(), TransportError> {
        if self.conn.is_some() {
            return Ok(());
        }
        info!("🔌 连接 broker");
        let mut stream = TcpStream::connect(self.config.addr()).await?;
        stream.set_nodelay(true)?;

        let keep_alive_secs = u16::try_from(self.config.keep_alive.as_secs()).unwrap_or(u16::MAX);
        let hello = Packet::Connect {
            client_id: self.config.client_id.clone(),
            keep_alive_secs,
            clean_session: true,
        };
        write_packet(&mut stream, &hello).await?;

        let reply = timeout(CONNACK_TIMEOUT, read_packet(&mut stream))
            .await
            .map_err(|_| TransportError::Protocol("timed out waiting for CONNACK".into()))??;
        match reply {
            Some(Packet::ConnAck { code: 0, .. }) => {}
            Some(Packet::ConnAck { code, .. }) => {
                warn!(code, "broker 拒绝连接");
                return Err(TransportError::ConnectionRefused { code });
            }
            Some(other) => {
                return Err(TransportError::Protocol(format!(
                    "expected CONNACK, got {:?}",
                    other.packet_type()
                )));
            }
            None => return Err(TransportError::ConnectionClosed),
        }

        let (read_half, write_half) = stream.into_split();
        let (out_tx, out_rx) = mpsc::channel(OUTGOING_CAPACITY);
        let (in_tx, in_rx) = mpsc::channel(INCOMING_CAPACITY);
        let ping_every = (keep_alive_secs > 0).then(|| Duration::from_secs(keep_alive_secs.into()) / 2);

        let writer = tokio::spawn(write_loop(write_half, out_rx, ping_every));
        let reader = tokio::spawn(read_loop(read_half, in_tx, out_tx.clone()));
        self.conn = Some(Connection {
            outgoing: out_tx,
            incoming: in_rx,
            writer,
            reader,
        });
        info!("✅ 已连接");
        Ok(())
    }

    async fn subscribe(&mut self, channel: &str) -> Result<(), TransportError> {
        self.connection()?;
        let packet_id = self.next_packet_id();
        self.send(Packet::Subscribe {
            packet_id,
            filters: vec![(channel.to_string(), 0)],
        })
        .await?;
        self.subscriptions.push(channel.to_string());
        info!(channel, packet_id, "已订阅");
        Ok(())
    }

    async fn publish(&mut self, channel: &str, payload: &[u8]) -> Result<(), TransportError> {
        trace!(channel, bytes = payload.len(), "PUBLISH");
        self.send(Packet::Publish {
            topic: channel.to_string(),
            packet_id: None,
            qos: 0,
            retain: false,
            payload: payload.to_vec(),
        })
        .await
    }

    async fn next_message(&mut self) -> Result<Option<InboundMessage>, TransportError> {
        let conn = self.conn.as_mut().ok_or(TransportError::NotConnected)?;
        loop {
            match conn.incoming.recv().await {
                Some(Ok(msg)) => {
                    if self
                        .subscriptions
                        .iter()
                        .any(|f| topic_matches(f, &msg.channel))
                    {
                        return Ok(Some(msg));
                    }
                    debug!(channel = %msg.channel, "丢弃未订阅 channel 的消息");
                }
                Some(Err(e)) => return Err(e),
                None => return Ok(None),
            }
        }
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        let Some(conn) = self.conn.take() else {
            return Ok(());
        };
        self.subscriptions.clear();
        let Connection {
            outgoing,
            writer,
            reader,
            ..
        } = conn;

        // 写任务已退出时发送会失败，其错误由 join 结果带回
        let _ = outgoing.send(Packet::Disconnect).await;
        drop(outgoing);
        let result = match writer.await {
            Ok(r) => r,
            Err(e) => Err(TransportError::Io(io::Error::other(e))),
        };
        reader.abort();
        info!(broker = %self.config.addr(), "已断开连接");
        result
    }
}

impl Drop for MqttClient {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            conn.writer.abort();
            conn.reader.abort();
        }
    }
}

async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut outgoing: mpsc::Receiver<Packet>,
    ping_every: Option<Duration>,
) -> Result<(), TransportError> {
    let mut ping = ping_every.map(|every| interval_at(Instant::now() + every, every));
    loop {
        let next_ping = async {
            match ping.as_mut() {
                Some(p) => {
                    p.tick().await;
                }
                None => std::future::pending::<()>().await,
            }
        };
        tokio::select! {
            packet = outgoing.recv() => {
                let Some(packet) = packet else {
                    return Ok(());
                };
                write_packet(&mut writer, &packet).await?;
                if packet == Packet::Disconnect {
                    writer.shutdown().await?;
                    return Ok(());
                }
            }
            _ = next_ping => {
                trace!("PINGREQ");
                write_packet(&mut writer, &Packet::PingReq).await?;
            }
        }
    }
}

async fn read_loop(
    mut reader: OwnedReadHalf,
    incoming: mpsc::Sender<Incoming>,
    outgoing: mpsc::Sender<Packet>,
) {
    loop {
        let packet = match read_packet(&mut reader).await {
            Ok(Some(p)) => p,
            Ok(None) => {
                debug!("broker 关闭了连接");
                return;
            }
            Err(e) => {
                warn!(error = %e, "读取报文失败");
                let _ = incoming.send(Err(e)).await;
                return;
            }
        };

        match packet {
            Packet::Publish {
                topic,
                packet_id,
                qos,
                payload,
                ..
            } => {
                if let (1, Some(packet_id)) = (qos, packet_id) {
                    let _ = outgoing.send(Packet::PubAck { packet_id }).await;
                }
                if incoming
                    .send(Ok(InboundMessage::new(topic, payload)))
                    .await
                    .is_err()
                {
                    return;
                }
            }
            Packet::SubAck { packet_id, codes } => {
                if codes.contains(&SUBACK_FAILURE) {
                    warn!(packet_id, ?codes, "broker 拒绝订阅");
                    let err = TransportError::Protocol(format!(
                        "subscription {packet_id} rejected by broker"
                    ));
                    if incoming.send(Err(err)).await.is_err() {
                        return;
                    }
                } else {
                    debug!(packet_id, ?codes, "SUBACK");
                }
            }
            Packet::PingResp => trace!("PINGRESP"),
            other => debug!(packet = ?other.packet_type(), "忽略报文"),
        }
    }
}
