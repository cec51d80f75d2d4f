//! Links to field devices.
//!
//! A [`Transport`] is an open Modbus link that performs one register
//! transaction at a time. Two variants exist, Modbus TCP and Modbus RTU, both
//! opened through [`ModbusTransportFactory`] and indistinguishable once
//! connected. Framing is handled by `tokio-modbus`.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use modbus_connector_common::TransportKind;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_modbus::client::Context;
use tokio_modbus::prelude::*;
use tracing::debug;

/// Largest register count a single read-holding-registers request may ask for.
pub const MAX_READ_COUNT: u16 = 125;

/// Unit id used when a request does not name one.
pub const DEFAULT_UNIT_ID: u8 = 1;

/// Highest addressable unit id on a serial line.
pub const MAX_UNIT_ID: u8 = 247;

const DEFAULT_TIMEOUT_MS: u64 = 1000;

/// Errors raised while opening or using a transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The link could not be opened.
    #[error("connection failed: {0}")]
    Connection(String),

    /// The transport configuration is incomplete or out of range.
    #[error("invalid transport configuration: {0}")]
    InvalidConfig(String),

    /// The device answered with an exception or a malformed response.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// No response arrived within the configured timeout.
    #[error("no response within {0:?}")]
    Timeout(Duration),

    /// The link was closed while the request was queued.
    #[error("connection closed")]
    Closed,
}

/// One read-holding-registers transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterRequest {
    pub unit_id: u8,
    pub address: u16,
    pub count: u16,
}

/// An open link to a device.
///
/// Implementations handle one transaction at a time; callers serialize
/// access (see [`crate::connection`]).
#[async_trait]
pub trait Transport: Send {
    /// Send one request and wait for its response.
    async fn transact(&mut self, request: &RegisterRequest) -> Result<Vec<u16>, TransportError>;

    /// Release the link.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Opens transports from their configuration.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn open(&self, config: &TransportConfig) -> Result<Box<dyn Transport>, TransportError>;
}

/// Serial parity setting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum Parity {
    #[default]
    None,
    Even,
    Odd,
}

impl FromStr for Parity {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" | "n" => Ok(Parity::None),
            "even" | "e" => Ok(Parity::Even),
            "odd" | "o" => Ok(Parity::Odd),
            _ => Err(TransportError::InvalidConfig(format!(
                "invalid parity '{}' (use none, even, or odd)",
                s
            ))),
        }
    }
}

impl TryFrom<String> for Parity {
    type Error = TransportError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Parity> for tokio_serial::Parity {
    fn from(parity: Parity) -> Self {
        match parity {
            Parity::None => tokio_serial::Parity::None,
            Parity::Even => tokio_serial::Parity::Even,
            Parity::Odd => tokio_serial::Parity::Odd,
        }
    }
}

/// Modbus TCP settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TcpConfig {
    /// Host name or IP address.
    pub host: String,

    /// TCP port (default: 502).
    #[serde(default = "default_tcp_port")]
    pub port: u16,

    /// Connect and response timeout in milliseconds (default: 1000).
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl TcpConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis() as u64;
        self
    }
}

/// Modbus RTU settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialConfig {
    /// Serial port path (e.g. "/dev/ttyUSB0" or "COM1").
    pub port_name: String,

    /// Baud rate (default: 9600).
    #[serde(default = "default_baud_rate", alias = "baudrate")]
    pub baud_rate: u32,

    /// Parity (default: none).
    #[serde(default)]
    pub parity: Parity,

    /// Stop bits: 1 or 2 (default: 1).
    #[serde(default = "default_stop_bits", alias = "stopbits")]
    pub stop_bits: u8,

    /// Data bits: 5 to 8 (default: 8).
    #[serde(default = "default_data_bits", alias = "bytesize")]
    pub data_bits: u8,

    /// Response timeout in milliseconds (default: 1000).
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl SerialConfig {
    pub fn new(port_name: impl Into<String>) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate: default_baud_rate(),
            parity: Parity::default(),
            stop_bits: default_stop_bits(),
            data_bits: default_data_bits(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }
}

fn default_tcp_port() -> u16 {
    502
}

fn default_baud_rate() -> u32 {
    9600
}

fn default_stop_bits() -> u8 {
    1
}

fn default_data_bits() -> u8 {
    8
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

/// Transport configuration, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TransportConfig {
    Tcp(TcpConfig),
    Rtu(SerialConfig),
}

impl TransportConfig {
    pub fn kind(&self) -> TransportKind {
        match self {
            TransportConfig::Tcp(_) => TransportKind::Tcp,
            TransportConfig::Rtu(_) => TransportKind::Rtu,
        }
    }

    /// Per-transaction timeout.
    pub fn timeout(&self) -> Duration {
        let ms = match self {
            TransportConfig::Tcp(c) => c.timeout_ms,
            TransportConfig::Rtu(c) => c.timeout_ms,
        };
        Duration::from_millis(ms)
    }

    /// Check ranges before any I/O happens.
    pub fn validate(&self) -> Result<(), TransportError> {
        let invalid = |msg: String| Err(TransportError::InvalidConfig(msg));

        match self {
            TransportConfig::Tcp(c) => {
                if c.host.trim().is_empty() {
                    return invalid("host is required for tcp connections".to_string());
                }
                if c.port == 0 {
                    return invalid("port must be 1-65535".to_string());
                }
            }
            TransportConfig::Rtu(c) => {
                if c.port_name.trim().is_empty() {
                    return invalid("port_name is required for rtu connections".to_string());
                }
                if c.baud_rate == 0 {
                    return invalid("baud rate must be positive".to_string());
                }
                if !matches!(c.stop_bits, 1 | 2) {
                    return invalid(format!("stop bits must be 1 or 2, got {}", c.stop_bits));
                }
                if !(5..=8).contains(&c.data_bits) {
                    return invalid(format!("byte size must be 5-8, got {}", c.data_bits));
                }
            }
        }

        if self.timeout().is_zero() {
            return invalid("timeout must be positive".to_string());
        }

        Ok(())
    }
}

impl fmt::Display for TransportConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportConfig::Tcp(c) => write!(f, "tcp://{}:{}", c.host, c.port),
            TransportConfig::Rtu(c) => write!(f, "rtu://{}@{}", c.port_name, c.baud_rate),
        }
    }
}

/// A `tokio-modbus` client context.
pub struct ModbusTransport {
    ctx: Context,
    endpoint: String,
}

#[async_trait]
impl Transport for ModbusTransport {
    async fn transact(&mut self, request: &RegisterRequest) -> Result<Vec<u16>, TransportError> {
        self.ctx.set_slave(Slave(request.unit_id));

        let values = self
            .ctx
            .read_holding_registers(request.address, request.count)
            .await
            .map_err(|e| TransportError::Protocol(e.to_string()))?
            .map_err(|e| TransportError::Protocol(format!("exception: {:?}", e)))?;

        if values.len() != request.count as usize {
            return Err(TransportError::Protocol(format!(
                "expected {} registers, got {}",
                request.count,
                values.len()
            )));
        }

        debug!(
            endpoint = %self.endpoint,
            unit = request.unit_id,
            address = request.address,
            count = request.count,
            "read holding registers"
        );

        Ok(values)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.ctx
            .disconnect()
            .await
            .map_err(|e| TransportError::Protocol(format!("close failed: {}", e)))
    }
}

/// Opens [`ModbusTransport`]s over TCP or a serial port.
#[derive(Debug, Default, Clone, Copy)]
pub struct ModbusTransportFactory;

impl ModbusTransportFactory {
    async fn open_tcp(config: &TcpConfig, timeout: Duration) -> Result<Context, TransportError> {
        let connect = async {
            let addr = tokio::net::lookup_host((config.host.as_str(), config.port))
                .await
                .map_err(|e| {
                    TransportError::Connection(format!("cannot resolve {}: {}", config.host, e))
                })?
                .next()
                .ok_or_else(|| {
                    TransportError::Connection(format!("no address found for {}", config.host))
                })?;

            tcp::connect_slave(addr, Slave(DEFAULT_UNIT_ID))
                .await
                .map_err(|e| TransportError::Connection(format!("{}: {}", addr, e)))
        };

        tokio::time::timeout(timeout, connect)
            .await
            .map_err(|_| {
                TransportError::Connection(format!(
                    "timed out connecting to {}:{}",
                    config.host, config.port
                ))
            })?
    }

    fn open_rtu(config: &SerialConfig, timeout: Duration) -> Result<Context, TransportError> {
        let stop_bits = match config.stop_bits {
            2 => tokio_serial::StopBits::Two,
            _ => tokio_serial::StopBits::One,
        };

        let data_bits = match config.data_bits {
            5 => tokio_serial::DataBits::Five,
            6 => tokio_serial::DataBits::Six,
            7 => tokio_serial::DataBits::Seven,
            _ => tokio_serial::DataBits::Eight,
        };

        let builder = tokio_serial::new(&config.port_name, config.baud_rate)
            .parity(config.parity.into())
            .stop_bits(stop_bits)
            .data_bits(data_bits)
            .timeout(timeout);

        let serial = tokio_serial::SerialStream::open(&builder).map_err(|e| {
            TransportError::Connection(format!("cannot open {}: {}", config.port_name, e))
        })?;

        Ok(rtu::attach_slave(serial, Slave(DEFAULT_UNIT_ID)))
    }
}

#[async_trait]
impl TransportFactory for ModbusTransportFactory {
    async fn open(&self, config: &TransportConfig) -> Result<Box<dyn Transport>, TransportError> {
        config.validate()?;

        let timeout = config.timeout();
        let ctx = match config {
            TransportConfig::Tcp(c) => Self::open_tcp(c, timeout).await?,
            TransportConfig::Rtu(c) => Self::open_rtu(c, timeout)?,
        };

        Ok(Box::new(ModbusTransport {
            ctx,
            endpoint: config.to_string(),
        }))
    }
}
