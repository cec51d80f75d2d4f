//! Modbus connector service.
//!
//! Connects configured devices at startup, then serves the HTTP/WebSocket API
//! until Ctrl+C.

use std::sync::Arc;

use anyhow::{Context, Result};
use modbus_connector::config::ConnectorConfig;
use modbus_connector::http::{AppState, HttpServer};
use modbus_connector::registry::ConnectionRegistry;
use modbus_connector::sink::{MemorySink, TelemetrySink, ZenohSink};
use modbus_connector::transport::ModbusTransportFactory;
use modbus_connector_framework::{ServiceArgs, ServiceConfig, ServiceRunner};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let args = ServiceArgs::parse_with_default("modbus-connector.json5");

    let config = ConnectorConfig::load(&args.config)
        .with_context(|| format!("Failed to load config from {:?}", args.config))?;

    let listen_addr = config.connector.http.listen_addr()?;
    let format = config.connector.telemetry.format;
    let queue_depth = config.connector.queue_depth;
    let devices = config.connector.devices.clone();

    let mut runner = ServiceRunner::new_with_args("modbus-connector", config, Some(&args))
        .await?
        .with_format(format)
        .with_status_publishing();

    info!("Loaded configuration from {:?}", args.config);

    let sink: Arc<dyn TelemetrySink> = match runner.publisher() {
        Some(publisher) => Arc::new(ZenohSink::new(publisher)),
        None => Arc::new(MemorySink::new()),
    };

    let registry = Arc::new(
        ConnectionRegistry::new(Arc::new(ModbusTransportFactory), sink)
            .with_queue_depth(queue_depth),
    );

    for device in &devices {
        match registry
            .connect(&device.device_id, device.connection.clone())
            .await
        {
            Ok(info) => info!(device_id = %info.device_id, endpoint = %info.config, "Startup connection established"),
            Err(e) => warn!(device_id = %device.device_id, error = %e, "Startup connection failed"),
        }
    }

    let state = AppState::new(registry.clone());
    let server = HttpServer::new(state, listen_addr);
    let shutdown = runner.shutdown_receiver();
    runner.spawn_with_error("http".to_string(), server.run(shutdown));

    // Must finish before the runner closes the Zenoh session.
    let mut shutdown = runner.shutdown_receiver();
    runner.spawn(async move {
        let _ = shutdown.wait_for(|stop| *stop).await;
        let closed = registry.disconnect_all().await;
        info!(closed, "Closed device connections");
    });

    let metadata = serde_json::json!({
        "listen": listen_addr.to_string(),
        "devices": devices.iter().map(|d| &d.device_id).collect::<Vec<_>>(),
    });
    runner.run_with_metadata(Some(metadata)).await?;

    Ok(())
}
