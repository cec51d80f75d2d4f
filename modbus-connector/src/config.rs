//! Configuration for the Modbus connector.

use std::collections::HashSet;
use std::net::SocketAddr;

use modbus_connector_common::{Format, KEY_PREFIX, LoggingConfig, ZenohConfig, is_valid_device_id};
use modbus_connector_framework::{ServiceConfig, ServiceError};
use serde::{Deserialize, Serialize};

use crate::connection::DEFAULT_QUEUE_DEPTH;
use crate::transport::TransportConfig;

/// Complete connector configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectorConfig {
    /// Zenoh connection settings
    #[serde(default)]
    pub zenoh: ZenohConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Connector settings
    #[serde(default)]
    pub connector: ConnectorSettings,
}

/// Connector-specific settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectorSettings {
    /// Key expression prefix (default: "modbus-connector")
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Telemetry publishing
    #[serde(default)]
    pub telemetry: TelemetryConfig,

    /// HTTP/WebSocket listener
    #[serde(default)]
    pub http: HttpConfig,

    /// Pending commands allowed per connection before callers wait
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,

    /// Devices connected at startup
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
}

impl Default for ConnectorSettings {
    fn default() -> Self {
        Self {
            key_prefix: default_key_prefix(),
            telemetry: TelemetryConfig::default(),
            http: HttpConfig::default(),
            queue_depth: default_queue_depth(),
            devices: Vec::new(),
        }
    }
}

fn default_key_prefix() -> String {
    KEY_PREFIX.to_string()
}

fn default_queue_depth() -> usize {
    DEFAULT_QUEUE_DEPTH
}

/// Where lifecycle and read events go.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Publish to Zenoh. When false, events stay in memory.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Payload encoding: "json" or "cbor"
    #[serde(default)]
    pub format: Format,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            format: Format::default(),
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Listen address (default: "0.0.0.0:8000")
    #[serde(default = "default_listen")]
    pub listen: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

fn default_listen() -> String {
    "0.0.0.0:8000".to_string()
}

impl HttpConfig {
    pub fn listen_addr(&self) -> Result<SocketAddr, ServiceError> {
        self.listen.parse().map_err(|e| {
            ServiceError::validation(format!("invalid http.listen '{}': {}", self.listen, e))
        })
    }
}

/// A device to connect at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub device_id: String,
    pub connection: TransportConfig,
}

impl ServiceConfig for ConnectorConfig {
    fn zenoh(&self) -> &ZenohConfig {
        &self.zenoh
    }

    fn logging(&self) -> &LoggingConfig {
        &self.logging
    }

    fn key_prefix(&self) -> &str {
        &self.connector.key_prefix
    }

    fn zenoh_enabled(&self) -> bool {
        self.connector.telemetry.enabled
    }

    fn validate(&self) -> modbus_connector_framework::Result<()> {
        let connector = &self.connector;

        if connector.key_prefix.trim_matches('/').is_empty() {
            return Err(ServiceError::validation("key_prefix cannot be empty"));
        }

        connector.http.listen_addr()?;

        if connector.queue_depth == 0 {
            return Err(ServiceError::validation("queue_depth must be at least 1"));
        }

        let mut seen = HashSet::new();
        for device in &connector.devices {
            if !is_valid_device_id(&device.device_id) {
                return Err(ServiceError::validation(format!(
                    "invalid device_id '{}'",
                    device.device_id
                )));
            }

            if !seen.insert(device.device_id.as_str()) {
                return Err(ServiceError::validation(format!(
                    "duplicate device_id '{}'",
                    device.device_id
                )));
            }

            device.connection.validate().map_err(|e| {
                ServiceError::validation(format!("Device '{}': {}", device.device_id, e))
            })?;
        }

        Ok(())
    }
}
