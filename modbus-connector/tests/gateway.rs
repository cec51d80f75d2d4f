//! Registry and gateway against a Modbus TCP stub server.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::StubServer;
use modbus_connector::{
    ConnectionRegistry, GatewayError, MemorySink, ModbusTransportFactory, ReadRequest,
    RegisterGateway, RegistryError, TransportError,
};
use modbus_connector_common::ConnectionStatus;

const TIMEOUT: Duration = Duration::from_secs(2);

fn setup() -> (Arc<ConnectionRegistry>, RegisterGateway, Arc<MemorySink>) {
    let sink = Arc::new(MemorySink::new());
    let registry = Arc::new(ConnectionRegistry::new(
        Arc::new(ModbusTransportFactory),
        sink.clone(),
    ));
    let gateway = RegisterGateway::new(registry.clone());
    (registry, gateway, sink)
}

#[tokio::test]
async fn test_read_returns_canned_values() {
    let server = StubServer::start(vec![11, 22, 33, 44, 55]).await;
    let (registry, gateway, sink) = setup();

    registry.connect("d1", server.config(TIMEOUT)).await.unwrap();
    let result = gateway.read(&ReadRequest::new("d1", 0, 4)).await.unwrap();

    assert_eq!(result.values, vec![11, 22, 33, 44]);
    assert_eq!(result.address, 0);
    assert_eq!(result.count, 4);

    let reads = sink.reads("d1");
    assert_eq!(reads.len(), 1);
    assert_eq!(reads[0].values, vec![11, 22, 33, 44]);
    assert_eq!(
        sink.status("d1").unwrap().status,
        ConnectionStatus::Connected
    );
}

#[tokio::test]
async fn test_read_never_connected_device() {
    let (_, gateway, sink) = setup();

    let result = gateway.read(&ReadRequest::new("ghost", 0, 1)).await;

    assert!(matches!(result, Err(GatewayError::DeviceNotConnected(_))));
    assert!(sink.reads("ghost").is_empty());
}

#[tokio::test]
async fn test_read_after_disconnect() {
    let server = StubServer::start(vec![1, 2, 3]).await;
    let (registry, gateway, sink) = setup();

    registry.connect("d1", server.config(TIMEOUT)).await.unwrap();
    registry.disconnect("d1").await.unwrap();

    let result = gateway.read(&ReadRequest::new("d1", 0, 1)).await;
    assert!(matches!(result, Err(GatewayError::DeviceNotConnected(_))));
    assert!(registry.status("d1").is_none());
    assert_eq!(
        sink.status("d1").unwrap().status,
        ConnectionStatus::Disconnected
    );

    server.wait_closed(1).await;
    assert_eq!(server.closed(), 1);
}

#[tokio::test]
async fn test_reconnect_closes_old_link_once() {
    let first = StubServer::start(vec![1; 8]).await;
    let second = StubServer::start(vec![2; 8]).await;
    let (registry, gateway, _) = setup();

    registry.connect("d1", first.config(TIMEOUT)).await.unwrap();
    registry.connect("d1", second.config(TIMEOUT)).await.unwrap();

    first.wait_closed(1).await;
    assert_eq!(first.accepted(), 1);
    assert_eq!(first.closed(), 1);
    assert_eq!(second.closed(), 0);

    let result = gateway.read(&ReadRequest::new("d1", 0, 2)).await.unwrap();
    assert_eq!(result.values, vec![2, 2]);
    assert_eq!(registry.list().len(), 1);
}

#[tokio::test]
async fn test_connect_refused() {
    let (registry, gateway, sink) = setup();

    let port = {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };
    let config = modbus_connector::TransportConfig::Tcp(
        modbus_connector::TcpConfig::new("127.0.0.1", port).with_timeout(TIMEOUT),
    );

    let result = registry.connect("d1", config).await;

    assert!(matches!(
        result,
        Err(RegistryError::Connection {
            source: TransportError::Connection(_),
            ..
        })
    ));
    assert_eq!(sink.status("d1").unwrap().status, ConnectionStatus::Error);

    let read = gateway.read(&ReadRequest::new("d1", 0, 1)).await;
    assert!(matches!(read, Err(GatewayError::DeviceNotConnected(_))));
}

#[tokio::test]
async fn test_exception_response_is_read_error() {
    let server = StubServer::start(vec![0; 4]).await;
    let (registry, gateway, sink) = setup();
    registry.connect("d1", server.config(TIMEOUT)).await.unwrap();

    let err = gateway
        .read(&ReadRequest::new("d1", 100, 2))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        GatewayError::Read {
            address: 100,
            count: 2,
            source: TransportError::Protocol(_),
            ..
        }
    ));
    assert!(sink.reads("d1").is_empty());

    // The link is still usable.
    let ok = gateway.read(&ReadRequest::new("d1", 0, 1)).await;
    assert!(ok.is_ok());
}

#[tokio::test]
async fn test_timeout_keeps_connection() {
    let server = StubServer::silent().await;
    let (registry, gateway, _) = setup();
    registry
        .connect("d1", server.config(Duration::from_millis(200)))
        .await
        .unwrap();

    let err = gateway
        .read(&ReadRequest::new("d1", 0, 1))
        .await
        .unwrap_err();

    assert!(err.is_timeout());
    assert!(registry.is_connected("d1"));
    assert_eq!(
        registry.status("d1").unwrap().status,
        ConnectionStatus::Connected
    );
}

#[tokio::test]
async fn test_late_reply_does_not_answer_next_read() {
    let registers: Vec<u16> = (0..16).map(|i| 1000 + i).collect();
    let server = StubServer::with_first_delay(registers, Duration::from_millis(300)).await;
    let (registry, gateway, sink) = setup();
    registry
        .connect("d1", server.config(Duration::from_millis(200)))
        .await
        .unwrap();

    let err = gateway
        .read(&ReadRequest::new("d1", 0, 1))
        .await
        .unwrap_err();
    assert!(err.is_timeout());

    let result = gateway.read(&ReadRequest::new("d1", 5, 2)).await.unwrap();
    assert_eq!(result.values, vec![1005, 1006]);

    assert!(registry.is_connected("d1"));
    assert_eq!(
        registry.status("d1").unwrap().status,
        ConnectionStatus::Connected
    );
    assert_eq!(server.accepted(), 2);
    assert_eq!(sink.reads("d1").len(), 1);
    assert_eq!(sink.status_updates(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_distinct_devices_read_independently() {
    let slow = StubServer::silent().await;
    let fast = StubServer::start(vec![7, 8, 9]).await;
    let (registry, gateway, _) = setup();

    registry
        .connect("slow", slow.config(Duration::from_secs(5)))
        .await
        .unwrap();
    registry.connect("fast", fast.config(TIMEOUT)).await.unwrap();

    let pending = tokio::spawn({
        let gateway = gateway.clone();
        async move { gateway.read(&ReadRequest::new("slow", 0, 1)).await }
    });

    let result = tokio::time::timeout(
        Duration::from_secs(1),
        gateway.read(&ReadRequest::new("fast", 0, 3)),
    )
    .await
    .expect("fast device waited on slow device")
    .unwrap();
    assert_eq!(result.values, vec![7, 8, 9]);

    pending.abort();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_same_device_reads_are_serialized() {
    let registers: Vec<u16> = (0..64).map(|i| 1000 + i).collect();
    let server = StubServer::with_delay(registers, Duration::from_millis(20)).await;
    let (registry, gateway, sink) = setup();
    registry.connect("d1", server.config(TIMEOUT)).await.unwrap();

    let mut tasks = Vec::new();
    for address in [0u16, 8, 16, 24, 32] {
        let gateway = gateway.clone();
        tasks.push(tokio::spawn(async move {
            (
                address,
                gateway.read(&ReadRequest::new("d1", address, 4)).await,
            )
        }));
    }

    for task in tasks {
        let (address, result) = task.await.unwrap();
        let values = result.unwrap().values;
        let expected: Vec<u16> = (address..address + 4).map(|a| 1000 + a).collect();
        assert_eq!(values, expected);
    }

    assert_eq!(server.requests(), 5);
    assert_eq!(sink.reads("d1").len(), 5);
}
