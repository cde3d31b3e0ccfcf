use crate::error::TransportError;
use crate::transport::mqtt::codec::encode_remaining_length;
use crate::transport::mqtt::{Packet, PacketType, read_packet};

fn remaining_length(len: usize) -> Vec<u8> {
    let mut out = Vec::new();
    encode_remaining_length(len, &mut out);
    out
}

#[test]
fn remaining_length_uses_variable_byte_encoding() {
    assert_eq!(remaining_length(0), vec![0x00]);
    assert_eq!(remaining_length(127), vec![0x7F]);
    assert_eq!(remaining_length(128), vec![0x80, 0x01]);
    assert_eq!(remaining_length(16_383), vec![0xFF, 0x7F]);
    assert_eq!(remaining_length(16_384), vec![0x80, 0x80, 0x01]);
    assert_eq!(remaining_length(268_435_455), vec![0xFF, 0xFF, 0xFF, 0x7F]);
}

#[test]
fn connect_packet_layout() {
    let bytes = Packet::Connect {
        client_id: "ab".into(),
        keep_alive_secs: 60,
        clean_session: true,
    }
    .encode()
    .expect("encode");
    assert_eq!(
        bytes,
        vec![
            0x10, 14, 0, 4, b'M', b'Q', b'T', b'T', 4, 0x02, 0, 60, 0, 2, b'a', b'b'
        ]
    );
}

#[test]
fn qos0_publish_layout_has_no_packet_id() {
    let bytes = Packet::Publish {
        topic: "a/b".into(),
        packet_id: None,
        qos: 0,
        retain: false,
        payload: b"hi".to_vec(),
    }
    .encode()
    .expect("encode");
    assert_eq!(bytes, vec![0x30, 7, 0, 3, b'a', b'/', b'b', b'h', b'i']);
}

#[test]
fn control_packets_without_body() {
    assert_eq!(Packet::PingReq.encode().expect("encode"), vec![0xC0, 0x00]);
    assert_eq!(Packet::PingResp.encode().expect("encode"), vec![0xD0, 0x00]);
    assert_eq!(Packet::Disconnect.encode().expect("encode"), vec![0xE0, 0x00]);
}

#[test]
fn subscribe_sets_reserved_flag_bits() {
    let bytes = Packet::Subscribe {
        packet_id: 1,
        filters: vec![("sensors/#".into(), 0)],
    }
    .encode()
    .expect("encode");
    assert_eq!(bytes[0], 0x82);
    assert_eq!(PacketType::from_byte(bytes[0]), Some(PacketType::Subscribe));
}

#[test]
fn qos1_publish_decodes_packet_id_and_payload() {
    let body = [0, 1, b't', 0x12, 0x34, b'x', b'y'];
    let packet = Packet::decode(0x32, &body).expect("decode");
    assert_eq!(
        packet,
        Packet::Publish {
            topic: "t".into(),
            packet_id: Some(0x1234),
            qos: 1,
            retain: false,
            payload: b"xy".to_vec(),
        }
    );
}

#[test]
fn qos1_publish_without_packet_id_is_rejected() {
    let err = Packet::Publish {
        topic: "t".into(),
        packet_id: None,
        qos: 1,
        retain: false,
        payload: Vec::new(),
    }
    .encode()
    .expect_err("missing packet id");
    assert!(matches!(err, TransportError::Protocol(_)));
}

#[test]
fn truncated_and_unknown_packets_are_protocol_errors() {
    assert!(matches!(
        Packet::decode(0x20, &[0x00]),
        Err(TransportError::Protocol(_))
    ));
    assert!(matches!(
        Packet::decode(0xF0, &[]),
        Err(TransportError::Protocol(_))
    ));
}

#[test]
fn connack_return_code_is_decoded() {
    assert_eq!(
        Packet::decode(0x20, &[0x01, 0x05]).expect("decode"),
        Packet::ConnAck {
            session_present: true,
            code: 5
        }
    );
}

#[tokio::test]
async fn read_packet_frames_consecutive_packets_then_eof() {
    let mut wire = Vec::new();
    wire.extend(Packet::ConnAck { session_present: false, code: 0 }.encode().expect("encode"));
    wire.extend(
        Packet::SubAck {
            packet_id: 7,
            codes: vec![0],
        }
        .encode()
        .expect("encode"),
    );

    let mut reader: &[u8] = &wire;
    assert_eq!(
        read_packet(&mut reader).await.expect("first"),
        Some(Packet::ConnAck { session_present: false, code: 0 })
    );
    assert_eq!(
        read_packet(&mut reader).await.expect("second"),
        Some(Packet::SubAck {
            packet_id: 7,
            codes: vec![0]
        })
    );
    assert_eq!(read_packet(&mut reader).await.expect("eof"), None);
}

#[tokio::test]
async fn read_packet_with_short_body_is_an_io_error() {
    let wire = [0x30u8, 10, 0, 1, b't'];
    let mut reader: &[u8] = &wire;
    let err = read_packet(&mut reader).await.expect_err("short body");
    assert!(matches!(err, TransportError::Io(_)));
}
