//! MQTT 3.1.1 传输实现

mod client;
pub mod codec;

pub use client::MqttClient;
pub use codec::{Packet, PacketType, read_packet, write_packet};
