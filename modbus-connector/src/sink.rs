//! Telemetry sinks.
//!
//! The registry reports connection transitions through
//! [`TelemetrySink::set_status`] and every successful read through
//! [`TelemetrySink::append_read`]. Consumers keep only the latest status per
//! device, while reads form an append-only log per device.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use modbus_connector_common::{Channel, LifecycleEvent, ReadEvent};
use modbus_connector_framework::{Publisher, ServiceError};
use parking_lot::Mutex;
use thiserror::Error;

/// Reads kept per device by [`MemorySink`] before the oldest are dropped.
pub const DEFAULT_READ_LOG_CAPACITY: usize = 1024;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("publish failed: {0}")]
    Publish(#[from] ServiceError),
}

/// Destination for lifecycle and read events.
///
/// Failures are reported to the caller, which logs them; they never fail the
/// operation that produced the event.
#[async_trait]
pub trait TelemetrySink: Send + Sync {
    /// Replace the latest status record for `event.device_id`.
    async fn set_status(&self, event: LifecycleEvent) -> Result<(), SinkError>;

    /// Append one read to the device's log.
    async fn append_read(&self, event: ReadEvent) -> Result<(), SinkError>;
}

/// In-process sink, used when Zenoh publishing is disabled and in tests.
#[derive(Debug)]
pub struct MemorySink {
    capacity: usize,
    state: Mutex<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    status: HashMap<String, LifecycleEvent>,
    reads: HashMap<String, VecDeque<ReadEvent>>,
    status_updates: usize,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_READ_LOG_CAPACITY)
    }

    /// Keep at most `capacity` reads per device.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state: Mutex::new(MemoryState::default()),
        }
    }

    /// Latest status record for a device.
    pub fn status(&self, device_id: &str) -> Option<LifecycleEvent> {
        self.state.lock().status.get(device_id).cloned()
    }

    /// Read log for a device, oldest first.
    pub fn reads(&self, device_id: &str) -> Vec<ReadEvent> {
        self.state
            .lock()
            .reads
            .get(device_id)
            .map(|log| log.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Total number of status writes since creation.
    pub fn status_updates(&self) -> usize {
        self.state.lock().status_updates
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TelemetrySink for MemorySink {
    async fn set_status(&self, event: LifecycleEvent) -> Result<(), SinkError> {
        let mut state = self.state.lock();
        state.status_updates += 1;
        state.status.insert(event.device_id.clone(), event);
        Ok(())
    }

    async fn append_read(&self, event: ReadEvent) -> Result<(), SinkError> {
        let mut state = self.state.lock();
        let log = state.reads.entry(event.device_id.clone()).or_default();
        if log.len() == self.capacity {
            log.pop_front();
        }
        log.push_back(event);
        Ok(())
    }
}

/// Publishes events to Zenoh.
///
/// Status goes to `<prefix>/connections/<device_id>`, reads to
/// `<prefix>/readings/<device_id>`.
#[derive(Clone)]
pub struct ZenohSink {
    publisher: Publisher,
}

impl ZenohSink {
    pub fn new(publisher: Publisher) -> Self {
        Self { publisher }
    }

    pub fn publisher(&self) -> &Publisher {
        &self.publisher
    }
}

#[async_trait]
impl TelemetrySink for ZenohSink {
    async fn set_status(&self, event: LifecycleEvent) -> Result<(), SinkError> {
        let key = self
            .publisher
            .keys()
            .build(Channel::Connections, &event.device_id);
        self.publisher.publish(&key, &event).await?;
        Ok(())
    }

    async fn append_read(&self, event: ReadEvent) -> Result<(), SinkError> {
        let key = self
            .publisher
            .keys()
            .build(Channel::Readings, &event.device_id);
        self.publisher.publish(&key, &event).await?;
        Ok(())
    }
}
