//! Register reads against registered connections.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::registry::ConnectionRegistry;
use crate::transport::{
    DEFAULT_UNIT_ID, MAX_READ_COUNT, MAX_UNIT_ID, RegisterRequest, TransportError,
};

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("device {0} not connected")]
    DeviceNotConnected(String),

    #[error("failed to read {count} registers at {address} from {device_id}: {source}")]
    Read {
        device_id: String,
        address: u16,
        count: u16,
        #[source]
        source: TransportError,
    },
}

impl GatewayError {
    /// Whether the device failed to answer in time.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            GatewayError::Read {
                source: TransportError::Timeout(_),
                ..
            }
        )
    }
}

fn default_unit_id() -> u8 {
    DEFAULT_UNIT_ID
}

/// Read of `count` holding registers starting at `address`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadRequest {
    pub device_id: String,
    pub address: u16,
    pub count: u16,
    #[serde(default = "default_unit_id")]
    pub unit_id: u8,
}

impl ReadRequest {
    pub fn new(device_id: impl Into<String>, address: u16, count: u16) -> Self {
        Self {
            device_id: device_id.into(),
            address,
            count,
            unit_id: DEFAULT_UNIT_ID,
        }
    }

    pub fn with_unit_id(mut self, unit_id: u8) -> Self {
        self.unit_id = unit_id;
        self
    }

    pub fn validate(&self) -> Result<(), GatewayError> {
        if self.count == 0 || self.count > MAX_READ_COUNT {
            return Err(GatewayError::InvalidRequest(format!(
                "count must be 1-{}, got {}",
                MAX_READ_COUNT, self.count
            )));
        }
        if self.unit_id == 0 || self.unit_id > MAX_UNIT_ID {
            return Err(GatewayError::InvalidRequest(format!(
                "unit_id must be 1-{}, got {}",
                MAX_UNIT_ID, self.unit_id
            )));
        }
        if u32::from(self.address) + u32::from(self.count) > 0x1_0000 {
            return Err(GatewayError::InvalidRequest(format!(
                "address {} + count {} exceeds the register space",
                self.address, self.count
            )));
        }
        Ok(())
    }
}

/// Values returned by a successful read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReadResult {
    pub device_id: String,
    pub address: u16,
    pub count: u16,
    pub values: Vec<u16>,
    pub timestamp: DateTime<Utc>,
}

/// Runs reads through the registry's connections.
///
/// Each read is queued on the device's connection worker, so reads to one
/// device are strictly sequential. Failures never change the connection
/// record and are not retried.
#[derive(Clone)]
pub struct RegisterGateway {
    registry: Arc<ConnectionRegistry>,
}

impl RegisterGateway {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub async fn read(&self, request: &ReadRequest) -> Result<ReadResult, GatewayError> {
        request.validate()?;

        let handle = self
            .registry
            .lookup(&request.device_id)
            .ok_or_else(|| GatewayError::DeviceNotConnected(request.device_id.clone()))?;

        let register_request = RegisterRequest {
            unit_id: request.unit_id,
            address: request.address,
            count: request.count,
        };

        match handle.read(register_request).await {
            Ok(tx) => Ok(ReadResult {
                device_id: request.device_id.clone(),
                address: request.address,
                count: request.count,
                values: tx.values,
                timestamp: tx.completed_at,
            }),
            // Disconnected while the read was queued.
            Err(TransportError::Closed) => {
                Err(GatewayError::DeviceNotConnected(request.device_id.clone()))
            }
            Err(source) => Err(GatewayError::Read {
                device_id: request.device_id.clone(),
                address: request.address,
                count: request.count,
                source,
            }),
        }
    }
}
