use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Transport variant used to reach a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Modbus TCP over a network socket.
    Tcp,
    /// Modbus RTU over a serial line.
    Rtu,
}

impl TransportKind {
    /// Get the wire name used in requests and events.
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::Tcp => "tcp",
            TransportKind::Rtu => "rtu",
        }
    }
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Connection status of a device as reported to the telemetry sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Disconnected,
    Connected,
    Error,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Error => "error",
        }
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A connect/disconnect/error transition for one device.
///
/// Consumers keep only the latest event per `device_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub device_id: String,

    pub status: ConnectionStatus,

    /// Transport variant, when known.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<TransportKind>,

    pub timestamp: DateTime<Utc>,

    /// Failure reason for `ConnectionStatus::Error`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl LifecycleEvent {
    /// A device was connected over `kind`.
    pub fn connected(device_id: impl Into<String>, kind: TransportKind) -> Self {
        Self {
            device_id: device_id.into(),
            status: ConnectionStatus::Connected,
            kind: Some(kind),
            timestamp: Utc::now(),
            error: None,
        }
    }

    /// A device was disconnected on request.
    pub fn disconnected(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            status: ConnectionStatus::Disconnected,
            kind: None,
            timestamp: Utc::now(),
            error: None,
        }
    }

    /// A connection attempt failed.
    pub fn failed(
        device_id: impl Into<String>,
        kind: Option<TransportKind>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            status: ConnectionStatus::Error,
            kind,
            timestamp: Utc::now(),
            error: Some(error.into()),
        }
    }
}

/// One successful holding-register read, appended to the device's read log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadEvent {
    pub device_id: String,
    pub address: u16,
    pub count: u16,
    pub values: Vec<u16>,
    pub timestamp: DateTime<Utc>,
}
