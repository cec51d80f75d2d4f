//! Connection registry.
//!
//! Maps device ids to live connections. At most one connection exists per
//! device id. Connect and disconnect for the same id are serialized by a
//! per-device lifecycle lock; the map itself is only touched through short
//! synchronous critical sections.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use modbus_connector_common::{
    ConnectionStatus, LifecycleEvent, TransportKind, is_valid_device_id,
};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::connection::{self, ConnectionHandle, DEFAULT_QUEUE_DEPTH};
use crate::sink::TelemetrySink;
use crate::transport::{TransportConfig, TransportError, TransportFactory};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("invalid device id '{0}'")]
    InvalidDeviceId(String),

    #[error("invalid configuration for device {device_id}: {source}")]
    InvalidConfig {
        device_id: String,
        #[source]
        source: TransportError,
    },

    #[error("failed to connect device {device_id}: {source}")]
    Connection {
        device_id: String,
        #[source]
        source: TransportError,
    },

    #[error("device {0} not found")]
    DeviceNotFound(String),
}

/// Snapshot of one device's connection record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceConnection {
    pub device_id: String,
    #[serde(rename = "type")]
    pub kind: TransportKind,
    pub config: TransportConfig,
    pub status: ConnectionStatus,
    pub connected_at: Option<DateTime<Utc>>,
    pub last_event_at: DateTime<Utc>,
    pub last_error: Option<String>,
}

struct Link {
    handle: ConnectionHandle,
    task: JoinHandle<()>,
}

struct Entry {
    info: DeviceConnection,
    /// `None` for records left behind by a failed connect.
    link: Option<Link>,
}

/// Registry of device connections.
pub struct ConnectionRegistry {
    factory: Arc<dyn TransportFactory>,
    sink: Arc<dyn TelemetrySink>,
    queue_depth: usize,
    entries: RwLock<HashMap<String, Entry>>,
    lifecycle: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl ConnectionRegistry {
    pub fn new(factory: Arc<dyn TransportFactory>, sink: Arc<dyn TelemetrySink>) -> Self {
        Self {
            factory,
            sink,
            queue_depth: DEFAULT_QUEUE_DEPTH,
            entries: RwLock::new(HashMap::new()),
            lifecycle: Mutex::new(HashMap::new()),
        }
    }

    /// Set the per-connection command queue depth.
    pub fn with_queue_depth(mut self, queue_depth: usize) -> Self {
        self.queue_depth = queue_depth.max(1);
        self
    }

    pub fn sink(&self) -> &Arc<dyn TelemetrySink> {
        &self.sink
    }

    /// Open a connection for `device_id`, replacing any existing one.
    ///
    /// The previous transport is closed before the new one is opened. If the
    /// configuration is rejected or the open fails, the device is left with
    /// an error record and no transport. An invalid id is rejected without
    /// touching the registry.
    pub async fn connect(
        &self,
        device_id: &str,
        config: TransportConfig,
    ) -> Result<DeviceConnection, RegistryError> {
        if !is_valid_device_id(device_id) {
            return Err(RegistryError::InvalidDeviceId(device_id.to_string()));
        }

        let lock = self.lifecycle_lock(device_id);
        let result = {
            let _guard = lock.lock().await;
            self.connect_locked(device_id, config).await
        };
        self.release_lifecycle_lock(device_id, lock);
        result
    }

    async fn connect_locked(
        &self,
        device_id: &str,
        config: TransportConfig,
    ) -> Result<DeviceConnection, RegistryError> {
        let previous = self.entries.write().get_mut(device_id).and_then(|entry| {
            let link = entry.link.take()?;
            entry.info.status = ConnectionStatus::Disconnected;
            entry.info.last_event_at = Utc::now();
            Some(link)
        });
        if let Some(link) = previous {
            info!(device_id = %device_id, "Replacing existing connection");
            if let Err(e) = shutdown(link).await {
                warn!(device_id = %device_id, error = %e, "Error closing replaced connection");
            }
        }

        let kind = config.kind();
        let opened = match config.validate() {
            Ok(()) => self.factory.open(&config).await,
            Err(e) => Err(e),
        };

        match opened {
            Ok(transport) => {
                let (handle, task) = connection::spawn(
                    device_id,
                    transport,
                    self.factory.clone(),
                    config.clone(),
                    self.sink.clone(),
                    self.queue_depth,
                );

                let event = LifecycleEvent::connected(device_id, kind);
                let info = DeviceConnection {
                    device_id: device_id.to_string(),
                    kind,
                    config,
                    status: ConnectionStatus::Connected,
                    connected_at: Some(event.timestamp),
                    last_event_at: event.timestamp,
                    last_error: None,
                };

                self.entries.write().insert(
                    device_id.to_string(),
                    Entry {
                        info: info.clone(),
                        link: Some(Link { handle, task }),
                    },
                );

                info!(device_id = %device_id, endpoint = %info.config, "Device connected");
                self.emit(event).await;
                Ok(info)
            }
            Err(source) => {
                let event = LifecycleEvent::failed(device_id, Some(kind), source.to_string());
                let info = DeviceConnection {
                    device_id: device_id.to_string(),
                    kind,
                    config,
                    status: ConnectionStatus::Error,
                    connected_at: None,
                    last_event_at: event.timestamp,
                    last_error: event.error.clone(),
                };

                self.entries
                    .write()
                    .insert(device_id.to_string(), Entry { info, link: None });

                warn!(device_id = %device_id, error = %source, "Device connection failed");
                self.emit(event).await;

                let device_id = device_id.to_string();
                Err(match source {
                    TransportError::InvalidConfig(_) => {
                        RegistryError::InvalidConfig { device_id, source }
                    }
                    source => RegistryError::Connection { device_id, source },
                })
            }
        }
    }

    /// Close and remove the connection for `device_id`.
    ///
    /// Reads already queued on the connection finish first.
    pub async fn disconnect(&self, device_id: &str) -> Result<DeviceConnection, RegistryError> {
        let lock = self.lifecycle_lock(device_id);
        let result = {
            let _guard = lock.lock().await;
            self.disconnect_locked(device_id).await
        };
        self.release_lifecycle_lock(device_id, lock);
        result
    }

    async fn disconnect_locked(&self, device_id: &str) -> Result<DeviceConnection, RegistryError> {
        let removed = {
            let mut entries = self.entries.write();
            match entries.get(device_id) {
                Some(entry) if entry.link.is_some() => entries.remove(device_id),
                _ => None,
            }
        };
        let Some(Entry {
            mut info,
            link: Some(link),
        }) = removed
        else {
            return Err(RegistryError::DeviceNotFound(device_id.to_string()));
        };

        let mut event = LifecycleEvent::disconnected(device_id);
        if let Err(e) = shutdown(link).await {
            warn!(device_id = %device_id, error = %e, "Error closing connection");
            event.error = Some(e.to_string());
        }

        info.status = ConnectionStatus::Disconnected;
        info.last_event_at = event.timestamp;
        info.last_error = event.error.clone();

        info!(device_id = %device_id, "Device disconnected");
        self.emit(event).await;
        Ok(info)
    }

    /// Disconnect every connected device. Returns how many were closed.
    pub async fn disconnect_all(&self) -> usize {
        let ids: Vec<String> = self
            .entries
            .read()
            .iter()
            .filter(|(_, entry)| entry.link.is_some())
            .map(|(id, _)| id.clone())
            .collect();

        let mut closed = 0;
        for id in ids {
            if self.disconnect(&id).await.is_ok() {
                closed += 1;
            }
        }
        closed
    }

    /// Handle to the live connection for `device_id`, if any.
    pub fn lookup(&self, device_id: &str) -> Option<ConnectionHandle> {
        self.entries
            .read()
            .get(device_id)
            .and_then(|entry| entry.link.as_ref())
            .map(|link| link.handle.clone())
    }

    pub fn is_connected(&self, device_id: &str) -> bool {
        self.lookup(device_id).is_some()
    }

    /// Current record for `device_id`, including error records.
    pub fn status(&self, device_id: &str) -> Option<DeviceConnection> {
        self.entries
            .read()
            .get(device_id)
            .map(|entry| entry.info.clone())
    }

    /// All records, sorted by device id.
    pub fn list(&self) -> Vec<DeviceConnection> {
        let mut all: Vec<DeviceConnection> = self
            .entries
            .read()
            .values()
            .map(|entry| entry.info.clone())
            .collect();
        all.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        all
    }

    fn lifecycle_lock(&self, device_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.lifecycle
            .lock()
            .entry(device_id.to_string())
            .or_default()
            .clone()
    }

    /// Drop the lifecycle lock for a device that has no record and no other
    /// waiters.
    fn release_lifecycle_lock(&self, device_id: &str, lock: Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self.lifecycle.lock();
        // One reference in the map, one held here.
        if Arc::strong_count(&lock) == 2 && !self.entries.read().contains_key(device_id) {
            locks.remove(device_id);
        }
    }

    async fn emit(&self, event: LifecycleEvent) {
        let device_id = event.device_id.clone();
        if let Err(e) = self.sink.set_status(event).await {
            warn!(device_id = %device_id, error = %e, "Failed to record status");
        }
    }
}

/// Close a link through its worker and wait for the worker to exit.
async fn shutdown(link: Link) -> Result<(), TransportError> {
    let Link { handle, task } = link;

    let result = match handle.close().await {
        // The worker already exited and released the transport.
        Err(TransportError::Closed) => Ok(()),
        other => other,
    };
    drop(handle);

    if let Err(e) = task.await {
        warn!(error = %e, "Connection worker ended abnormally");
    }
    result
}
