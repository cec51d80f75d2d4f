//! End-to-end tests with Zenoh pub/sub.
//!
//! Zenoh requires a multi-thread tokio runtime. Each test uses a unique key
//! prefix to avoid interference.

use std::time::Duration;

use modbus_connector_common::{
    Channel, ConnectionStatus, Format, KeyExprBuilder, LifecycleEvent, ReadEvent, TransportKind,
    decode_auto, encode,
};

fn unique_prefix() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    format!("test_{}", nanos)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_lifecycle_event_pubsub() {
    let builder = KeyExprBuilder::new(unique_prefix());

    let session = zenoh::open(zenoh::Config::default())
        .await
        .expect("Failed to open Zenoh session");

    let subscriber = session
        .declare_subscriber(builder.channel_wildcard(Channel::Connections))
        .await
        .expect("Failed to create subscriber");

    tokio::time::sleep(Duration::from_millis(100)).await;

    let event = LifecycleEvent::connected("plc01", TransportKind::Tcp);
    let payload = encode(&event, Format::Json).expect("Failed to encode");

    session
        .put(builder.connection("plc01"), payload)
        .await
        .expect("Failed to publish");

    let received = tokio::time::timeout(Duration::from_secs(5), subscriber.recv_async())
        .await
        .expect("Timeout waiting for message")
        .expect("Failed to receive message");

    let parsed = builder
        .parse(received.key_expr().as_str())
        .expect("Unexpected key");
    assert_eq!(parsed.device_id, "plc01");

    let decoded: LifecycleEvent =
        decode_auto(&received.payload().to_bytes()).expect("Failed to decode");
    assert_eq!(decoded.status, ConnectionStatus::Connected);

    drop(subscriber);
    session.close().await.expect("Failed to close session");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_read_log_preserves_order() {
    let builder = KeyExprBuilder::new(unique_prefix());

    let session = zenoh::open(zenoh::Config::default())
        .await
        .expect("Failed to open Zenoh session");

    let subscriber = session
        .declare_subscriber(builder.readings("meter01"))
        .await
        .expect("Failed to create subscriber");

    tokio::time::sleep(Duration::from_millis(100)).await;

    for i in 0..3u16 {
        let event = ReadEvent {
            device_id: "meter01".to_string(),
            address: 0,
            count: 1,
            values: vec![i],
            timestamp: chrono::Utc::now(),
        };
        let payload = encode(&event, Format::Cbor).expect("Failed to encode CBOR");
        session
            .put(builder.readings("meter01"), payload)
            .await
            .expect("Failed to publish");
    }

    for expected in 0..3u16 {
        let sample = tokio::time::timeout(Duration::from_secs(5), subscriber.recv_async())
            .await
            .expect("Timeout")
            .expect("Failed to receive");

        let decoded: ReadEvent =
            decode_auto(&sample.payload().to_bytes()).expect("Failed to decode CBOR");
        assert_eq!(decoded.values, vec![expected]);
    }

    drop(subscriber);
    session.close().await.expect("Failed to close session");
}
