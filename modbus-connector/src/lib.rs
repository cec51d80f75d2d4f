//! Modbus device connection manager and register I/O gateway.
//!
//! Keeps one live connection per device id over Modbus TCP or RTU, serves
//! holding-register reads over HTTP, and streams reads over WebSocket
//! sessions. Connection changes and reads are reported to a telemetry sink,
//! which publishes to Zenoh or keeps events in memory.
//!
//! # Key Expressions
//!
//! ```text
//! <prefix>/connections/<device_id>   latest lifecycle event
//! <prefix>/readings/<device_id>      one message per successful read
//! <prefix>/@/status                  service status
//! ```

pub mod config;
pub mod connection;
pub mod gateway;
pub mod http;
pub mod registry;
pub mod session;
pub mod sink;
pub mod transport;

#[cfg(test)]
mod testing;

pub use config::ConnectorConfig;
pub use connection::{ConnectionHandle, Transaction};
pub use gateway::{GatewayError, ReadRequest, ReadResult, RegisterGateway};
pub use http::{AppState, HttpServer, create_router};
pub use registry::{ConnectionRegistry, DeviceConnection, RegistryError};
pub use session::{
    FrameChannel, Frame, Inbound, SessionCommand, SessionError, SessionManager, SessionState,
    StreamingSession,
};
pub use sink::{MemorySink, SinkError, TelemetrySink, ZenohSink};
pub use transport::{
    ModbusTransportFactory, Parity, SerialConfig, TcpConfig, Transport, TransportConfig,
    TransportError, TransportFactory,
};
