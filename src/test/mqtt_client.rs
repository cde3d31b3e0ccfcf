use super::unique_temp_dir;
use crate::capture::CaptureRecorder;
use crate::config::{BrokerConfig, CaptureConfig};
use crate::error::{CaptureError, TransportError};
use crate::transport::mqtt::{Packet, read_packet, write_packet};
use crate::transport::{InboundMessage, MqttClient, Transport};
use std::fs;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// 只服务一个连接的最小 broker：回 CONNACK，订阅后推送两条消息，记录收到的全部报文。
async fn fake_broker(listener: TcpListener, connack_code: u8) -> Vec<Packet> {
    let (mut stream, _) = listener.accept().await.expect("accept");
    let mut seen = Vec::new();
    while let Some(packet) = read_packet(&mut stream).await.expect("read packet") {
        seen.push(packet.clone());
        match packet {
            Packet::Connect { .. } => {
                let ack = Packet::ConnAck {
                    session_present: false,
                    code: connack_code,
                };
                write_packet(&mut stream, &ack).await.expect("connack");
                if connack_code != 0 {
                    break;
                }
            }
            Packet::Subscribe { packet_id, filters } => {
                let ack = Packet::SubAck {
                    packet_id,
                    codes: vec![0; filters.len()],
                };
                write_packet(&mut stream, &ack).await.expect("suback");
                for (topic, payload) in [("other/topic", "ignored"), ("sensors/readings", "hello")] {
                    let publish = Packet::Publish {
                        topic: topic.into(),
                        packet_id: None,
                        qos: 0,
                        retain: false,
                        payload: payload.as_bytes().to_vec(),
                    };
                    write_packet(&mut stream, &publish).await.expect("publish");
                }
            }
            Packet::Disconnect => break,
            _ => {}
        }
    }
    seen
}

async fn bind() -> (TcpListener, BrokerConfig) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().expect("local addr").port();
    (listener, BrokerConfig::new("127.0.0.1", port, "test-client"))
}

#[tokio::test]
async fn client_subscribes_receives_publishes_and_disconnects() {
    let (listener, config) = bind().await;
    let broker = tokio::spawn(fake_broker(listener, 0));

    let mut client = MqttClient::new(config);
    client.connect().await.expect("connect");
    assert!(client.is_connected());
    client.subscribe("sensors/+").await.expect("subscribe");

    let msg = client.next_message().await.expect("receive");
    assert_eq!(msg, Some(InboundMessage::new("sensors/readings", "hello")));

    client
        .publish("replay/out", br#"{"a":1}"#)
        .await
        .expect("publish");
    client.disconnect().await.expect("disconnect");
    assert!(!client.is_connected());

    let seen = broker.await.expect("broker task");
    assert!(matches!(
        &seen[0],
        Packet::Connect { client_id, clean_session: true, .. } if client_id == "test-client"
    ));
    assert!(matches!(
        &seen[1],
        Packet::Subscribe { filters, .. } if filters == &vec![("sensors/+".to_string(), 0)]
    ));
    assert_eq!(
        seen[2],
        Packet::Publish {
            topic: "replay/out".into(),
            packet_id: None,
            qos: 0,
            retain: false,
            payload: br#"{"a":1}"#.to_vec(),
        }
    );
    assert_eq!(seen[3], Packet::Disconnect);
}

#[tokio::test]
async fn nonzero_connack_is_reported_and_not_retried() {
    let (listener, config) = bind().await;
    let broker = tokio::spawn(fake_broker(listener, 5));

    let mut client = MqttClient::new(config);
    let err = client.connect().await.expect_err("refused");
    assert!(matches!(err, TransportError::ConnectionRefused { code: 5 }));
    assert!(!client.is_connected());

    let seen = broker.await.expect("broker task");
    assert_eq!(seen.len(), 1);
}

#[tokio::test]
async fn operations_before_connect_fail() {
    let mut client = MqttClient::new(BrokerConfig::new("127.0.0.1", 1, "idle"));
    assert!(matches!(
        client.publish("a", b"x").await,
        Err(TransportError::NotConnected)
    ));
    assert!(matches!(
        client.next_message().await,
        Err(TransportError::NotConnected)
    ));
    client.disconnect().await.expect("disconnect without connection is a no-op");
}

/// 握手后按脚本回复订阅：`replies(packet_id)` 的报文依次发出；
/// 收到 PINGREQ 回 PINGRESP。返回收到的全部报文。
async fn scripted_broker<F>(listener: TcpListener, replies: F) -> Vec<Packet>
where
    F: Fn(u16) -> Vec<Packet>,
{
    let (mut stream, _) = listener.accept().await.expect("accept");
    let mut seen = Vec::new();
    while let Ok(Some(packet)) = read_packet(&mut stream).await {
        seen.push(packet.clone());
        match packet {
            Packet::Connect { .. } => {
                let ack = Packet::ConnAck {
                    session_present: false,
                    code: 0,
                };
                write_packet(&mut stream, &ack).await.expect("connack");
            }
            Packet::Subscribe { packet_id, .. } => {
                for reply in replies(packet_id) {
                    write_packet(&mut stream, &reply).await.expect("reply");
                }
            }
            Packet::PingReq => {
                write_packet(&mut stream, &Packet::PingResp)
                    .await
                    .expect("pingresp");
            }
            Packet::Disconnect => break,
            _ => {}
        }
    }
    seen
}

#[tokio::test]
async fn qos1_publish_is_acknowledged_and_delivered() {
    let (listener, config) = bind().await;
    let broker = tokio::spawn(scripted_broker(listener, |packet_id| {
        vec![
            Packet::SubAck {
                packet_id,
                codes: vec![1],
            },
            Packet::Publish {
                topic: "sensors/readings".into(),
                packet_id: Some(42),
                qos: 1,
                retain: false,
                payload: br#"{"value":7}"#.to_vec(),
            },
        ]
    }));

    let mut client = MqttClient::new(config);
    client.connect().await.expect("connect");
    client.subscribe("sensors/readings").await.expect("subscribe");
    let msg = client.next_message().await.expect("receive");
    assert_eq!(
        msg,
        Some(InboundMessage::new("sensors/readings", br#"{"value":7}"#.to_vec()))
    );
    client.disconnect().await.expect("disconnect");

    let seen = broker.await.expect("broker task");
    assert!(
        seen.contains(&Packet::PubAck { packet_id: 42 }),
        "no PUBACK in {seen:?}"
    );
    assert_eq!(seen.last(), Some(&Packet::Disconnect));
}

#[tokio::test]
async fn idle_connection_sends_pingreq_within_keep_alive() {
    let (listener, mut config) = bind().await;
    config.keep_alive = Duration::from_secs(1);
    let broker = tokio::spawn(scripted_broker(listener, |_| Vec::new()));

    let mut client = MqttClient::new(config);
    client.connect().await.expect("connect");
    // PINGREQ 周期为 keep-alive 的一半
    tokio::time::sleep(Duration::from_millis(1200)).await;
    client.disconnect().await.expect("disconnect");

    let seen = broker.await.expect("broker task");
    assert!(
        matches!(
            &seen[0],
            Packet::Connect {
                keep_alive_secs: 1,
                ..
            }
        ),
        "unexpected first packet {:?}",
        seen[0]
    );
    assert!(seen.contains(&Packet::PingReq), "no PINGREQ in {seen:?}");
}

#[tokio::test]
async fn rejected_subscription_is_reported_by_next_message() {
    let (listener, config) = bind().await;
    let broker = tokio::spawn(scripted_broker(listener, |packet_id| {
        vec![Packet::SubAck {
            packet_id,
            codes: vec![0x80],
        }]
    }));

    let mut client = MqttClient::new(config);
    client.connect().await.expect("connect");
    client.subscribe("forbidden/#").await.expect("subscribe");
    let err = client.next_message().await.expect_err("rejected");
    assert!(matches!(err, TransportError::Protocol(_)), "{err}");
    client.disconnect().await.expect("disconnect");
    broker.await.expect("broker task");
}

#[tokio::test]
async fn rejected_subscription_ends_capture_with_error() {
    let dir = unique_temp_dir("mqtt-suback-capture");
    let output = dir.join("session.json");
    let (listener, config) = bind().await;
    let broker = tokio::spawn(scripted_broker(listener, |packet_id| {
        vec![Packet::SubAck {
            packet_id,
            codes: vec![0x80],
        }]
    }));

    let capture = CaptureConfig::new(config.clone(), vec!["forbidden/#".into()], output.clone())
        .expect("capture config");
    let mut recorder = CaptureRecorder::new(capture).expect("recorder");
    let mut client = MqttClient::new(config);
    let err = recorder
        .run(&mut client, CancellationToken::new())
        .await
        .expect_err("rejected subscription");
    assert!(matches!(
        err,
        CaptureError::Transport(TransportError::Protocol(_))
    ));
    assert!(!client.is_connected());
    assert_eq!(fs::read_to_string(&output).expect("final persist").trim(), "[]");

    broker.await.expect("broker task");
    let _ = fs::remove_dir_all(&dir);
}
