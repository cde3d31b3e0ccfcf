//! MQTT 3.1.1 报文编解码
//!
//! 只覆盖客户端捕获/回放所需的报文：CONNECT/CONNACK、PUBLISH/PUBACK、
//! SUBSCRIBE/SUBACK、PINGREQ/PINGRESP、DISCONNECT。

use crate::error::TransportError;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const PROTOCOL_NAME: &str = "MQTT";
const PROTOCOL_LEVEL: u8 = 4;
const CLEAN_SESSION: u8 = 0x02;
/// 剩余长度字段最多 4 字节
pub const MAX_REMAINING_LENGTH: usize = 268_435_455;

/// 控制报文类型（固定头高 4 位）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketType {
    Connect = 1,
    ConnAck = 2,
    Publish = 3,
    PubAck = 4,
    Subscribe = 8,
    SubAck = 9,
    PingReq = 12,
    PingResp = 13,
    Disconnect = 14,
}

impl PacketType {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte >> 4 {
            1 => Some(Self::Connect),
            2 => Some(Self::ConnAck),
            3 => Some(Self::Publish),
            4 => Some(Self::PubAck),
            8 => Some(Self::Subscribe),
            9 => Some(Self::SubAck),
            12 => Some(Self::PingReq),
            13 => Some(Self::PingResp),
            14 => Some(Self::Disconnect),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Connect {
        client_id: String,
        keep_alive_secs: u16,
        clean_session: bool,
    },
    ConnAck {
        session_present: bool,
        /// 0 = accepted
        code: u8,
    },
    Publish {
        topic: String,
        /// QoS > 0 时才有
        packet_id: Option<u16>,
        qos: u8,
        retain: bool,
        payload: Vec<u8>,
    },
    PubAck {
        packet_id: u16,
    },
    Subscribe {
        packet_id: u16,
        filters: Vec<(String, u8)>,
    },
    SubAck {
        packet_id: u16,
        /// 每个 filter 授予的 QoS；0x80 表示失败
        codes: Vec<u8>,
    },
    PingReq,
    PingResp,
    Disconnect,
}

impl Packet {
    pub fn packet_type(&self) -> PacketType {
        match self {
            Packet::Connect { .. } => PacketType::Connect,
            Packet::ConnAck { .. } => PacketType::ConnAck,
            Packet::Publish { .. } => PacketType::Publish,
            Packet::PubAck { .. } => PacketType::PubAck,
            Packet::Subscribe { .. } => PacketType::Subscribe,
            Packet::SubAck { .. } => PacketType::SubAck,
            Packet::PingReq => PacketType::PingReq,
            Packet::PingResp => PacketType::PingResp,
            Packet::Disconnect => PacketType::Disconnect,
        }
    }

    fn flags(&self) -> u8 {
        match self {
            Packet::Publish { qos, retain, .. } => ((qos & 0x03) << 1) | u8::from(*retain),
            Packet::Subscribe { .. } => 0x02,
            _ => 0,
        }
    }

    /// 编码为完整报文（固定头 + 可变头 + 负载）。
    pub fn encode(&self) -> Result<Vec<u8>, TransportError> {
        let mut body = Vec::new();
        match self {
            Packet::Connect {
                client_id,
                keep_alive_secs,
                clean_session,
            } => {
                put_str(&mut body, PROTOCOL_NAME)?;
                body.push(PROTOCOL_LEVEL);
                body.push(if *clean_session { CLEAN_SESSION } else { 0 });
                body.extend_from_slice(&keep_alive_secs.to_be_bytes());
                put_str(&mut body, client_id)?;
            }
            Packet::ConnAck {
                session_present,
                code,
            } => {
                body.push(u8::from(*session_present));
                body.push(*code);
            }
            Packet::Publish {
                topic,
                packet_id,
                qos,
                payload,
                ..
            } => {
                put_str(&mut body, topic)?;
                if *qos > 0 {
                    let id = packet_id.ok_or_else(|| {
                        TransportError::Protocol("QoS > 0 publish without packet id".into())
                    })?;
                    body.extend_from_slice(&id.to_be_bytes());
                }
                body.extend_from_slice(payload);
            }
            Packet::PubAck { packet_id } => body.extend_from_slice(&packet_id.to_be_bytes()),
            Packet::Subscribe { packet_id, filters } => {
                body.extend_from_slice(&packet_id.to_be_bytes());
                for (filter, qos) in filters {
                    put_str(&mut body, filter)?;
                    body.push(*qos);
                }
            }
            Packet::SubAck { packet_id, codes } => {
                body.extend_from_slice(&packet_id.to_be_bytes());
                body.extend_from_slice(codes);
            }
            Packet::PingReq | Packet::PingResp | Packet::Disconnect => {}
        }

        if body.len() > MAX_REMAINING_LENGTH {
            return Err(TransportError::Protocol(format!(
                "packet too large ({} bytes)",
                body.len()
            )));
        }
        let mut out = Vec::with_capacity(body.len() + 5);
        out.push(((self.packet_type() as u8) << 4) | self.flags());
        encode_remaining_length(body.len(), &mut out);
        out.extend_from_slice(&body);
        Ok(out)
    }

    /// 由固定头首字节与报文体解码。
    pub fn decode(header: u8, body: &[u8]) -> Result<Packet, TransportError> {
        let kind = PacketType::from_byte(header)
            .ok_or_else(|| TransportError::Protocol(format!("unknown packet type {header:#04x}")))?;
        let mut cur = Cursor::new(body);
        let packet = match kind {
            PacketType::Connect => {
                let name = cur.string()?;
                if name != PROTOCOL_NAME {
                    return Err(TransportError::Protocol(format!(
                        "unsupported protocol name '{name}'"
                    )));
                }
                let _level = cur.u8()?;
                let flags = cur.u8()?;
                let keep_alive_secs = cur.u16()?;
                let client_id = cur.string()?;
                Packet::Connect {
                    client_id,
                    keep_alive_secs,
                    clean_session: flags & CLEAN_SESSION != 0,
                }
            }
            PacketType::ConnAck => Packet::ConnAck {
                session_present: cur.u8()? & 0x01 != 0,
                code: cur.u8()?,
            },
            PacketType::Publish => {
                let qos = (header >> 1) & 0x03;
                let topic = cur.string()?;
                let packet_id = if qos > 0 { Some(cur.u16()?) } else { None };
                Packet::Publish {
                    topic,
                    packet_id,
                    qos,
                    retain: header & 0x01 != 0,
                    payload: cur.rest().to_vec(),
                }
            }
            PacketType::PubAck => Packet::PubAck {
                packet_id: cur.u16()?,
            },
            PacketType::Subscribe => {
                let packet_id = cur.u16()?;
                let mut filters = Vec::new();
                while !cur.is_empty() {
                    let filter = cur.string()?;
                    filters.push((filter, cur.u8()?));
                }
                Packet::Subscribe { packet_id, filters }
            }
            PacketType::SubAck => Packet::SubAck {
                packet_id: cur.u16()?,
                codes: cur.rest().to_vec(),
            },
            PacketType::PingReq => Packet::PingReq,
            PacketType::PingResp => Packet::PingResp,
            PacketType::Disconnect => Packet::Disconnect,
        };
        Ok(packet)
    }
}

pub fn encode_remaining_length(mut len: usize, out: &mut Vec<u8>) {
    loop {
        let mut byte = (len % 128) as u8;
        len /= 128;
        if len > 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if len == 0 {
            break;
        }
    }
}

fn put_str(out: &mut Vec<u8>, s: &str) -> Result<(), TransportError> {
    let len = u16::try_from(s.len())
        .map_err(|_| TransportError::Protocol(format!("string too long ({} bytes)", s.len())))?;
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(s.as_bytes());
    Ok(())
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], TransportError> {
        let end = self.pos + n;
        let bytes = self
            .buf
            .get(self.pos..end)
            .ok_or_else(|| TransportError::Protocol("truncated packet".into()))?;
        self.pos = end;
        Ok(bytes)
    }

    fn u8(&mut self) -> Result<u8, TransportError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, TransportError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn string(&mut self) -> Result<String, TransportError> {
        let len = self.u16()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| TransportError::Protocol("string is not UTF-8".into()))
    }

    fn rest(&mut self) -> &'a [u8] {
        let rest = &self.buf[self.pos..];
        self.pos = self.buf.len();
        rest
    }

    fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }
}

/// 读取一个完整报文。在报文边界遇到 EOF 返回 `None`。
///
/// 非取消安全：中途放弃会丢失已读取的部分字节，只应在独占读端的任务里调用。
pub async fn read_packet<R: AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<Option<Packet>, TransportError> {
    let header = match reader.read_u8().await {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let mut len = 0usize;
    let mut shift = 0u32;
    loop {
        let byte = reader.read_u8().await?;
        len |= ((byte & 0x7F) as usize) << shift;
        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
        if shift > 21 {
            return Err(TransportError::Protocol("remaining length exceeds 4 bytes".into()));
        }
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Packet::decode(header, &body).map(Some)
}

pub async fn write_packet<W: AsyncWrite + Unpin>(
    writer: &mut W,
    packet: &Packet,
) -> Result<(), TransportError> {
    let bytes = packet.encode()?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}
