//! Per-connection worker.
//!
//! Each open [`Transport`] is owned by one task. Callers talk to it through a
//! [`ConnectionHandle`], which queues commands on a bounded channel and waits
//! for a one-shot reply. The worker runs one command at a time, so requests
//! to the same device never interleave on the wire while different devices
//! proceed independently.
//!
//! A transaction that outlives its timeout may still be answered later, so
//! the worker drops that link and opens a fresh one from the same
//! configuration before serving the next command.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use modbus_connector_common::ReadEvent;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::sink::TelemetrySink;
use crate::transport::{
    RegisterRequest, Transport, TransportConfig, TransportError, TransportFactory,
};

/// Default capacity of a worker's command queue.
pub const DEFAULT_QUEUE_DEPTH: usize = 32;

/// Outcome of one successful transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub values: Vec<u16>,
    pub completed_at: DateTime<Utc>,
}

enum Command {
    Read {
        request: RegisterRequest,
        reply: oneshot::Sender<Result<Transaction, TransportError>>,
    },
    Close {
        reply: oneshot::Sender<Result<(), TransportError>>,
    },
}

/// Cloneable sender side of a connection worker.
#[derive(Clone)]
pub struct ConnectionHandle {
    device_id: Arc<str>,
    tx: mpsc::Sender<Command>,
}

impl ConnectionHandle {
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Queue a read and wait for its result.
    ///
    /// Fails with [`TransportError::Closed`] if the worker stopped before
    /// answering.
    pub async fn read(&self, request: RegisterRequest) -> Result<Transaction, TransportError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Read { request, reply })
            .await
            .map_err(|_| TransportError::Closed)?;
        rx.await.map_err(|_| TransportError::Closed)?
    }

    /// Queue a close behind any pending reads and wait for it.
    ///
    /// The worker exits after handling it; later commands fail with
    /// [`TransportError::Closed`].
    pub async fn close(&self) -> Result<(), TransportError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Close { reply })
            .await
            .map_err(|_| TransportError::Closed)?;
        rx.await.map_err(|_| TransportError::Closed)?
    }

    /// Whether the worker has stopped accepting commands.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

struct Worker {
    device_id: Arc<str>,
    /// `None` after a failed reopen; the next command retries.
    transport: Option<Box<dyn Transport>>,
    factory: Arc<dyn TransportFactory>,
    config: TransportConfig,
    timeout: Duration,
    sink: Arc<dyn TelemetrySink>,
    rx: mpsc::Receiver<Command>,
}

/// Start a worker that owns `transport`, opened from `config`.
///
/// Successful reads are appended to `sink` before the caller is answered, so
/// the per-device read log follows transaction order. `factory` is used to
/// reopen the link after a timed-out transaction.
pub fn spawn(
    device_id: &str,
    transport: Box<dyn Transport>,
    factory: Arc<dyn TransportFactory>,
    config: TransportConfig,
    sink: Arc<dyn TelemetrySink>,
    queue_depth: usize,
) -> (ConnectionHandle, JoinHandle<()>) {
    let device_id: Arc<str> = Arc::from(device_id);
    let (tx, rx) = mpsc::channel(queue_depth.max(1));

    let worker = Worker {
        device_id: device_id.clone(),
        transport: Some(transport),
        factory,
        timeout: config.timeout(),
        config,
        sink,
        rx,
    };
    let task = tokio::spawn(worker.run());

    (ConnectionHandle { device_id, tx }, task)
}

impl Worker {
    async fn run(mut self) {
        while let Some(command) = self.rx.recv().await {
            match command {
                Command::Read { request, reply } => {
                    let result = self.read(request).await;
                    let _ = reply.send(result);
                }
                Command::Close { reply } => {
                    let result = self.close().await;
                    let _ = reply.send(result);
                    return;
                }
            }
        }

        // Every handle was dropped without an explicit close.
        if let Err(e) = self.close().await {
            warn!(device_id = %self.device_id, error = %e, "Failed to close orphaned transport");
        }
    }

    async fn read(&mut self, request: RegisterRequest) -> Result<Transaction, TransportError> {
        let timeout = self.timeout;
        let transport = self.transport().await?;
        let outcome = tokio::time::timeout(timeout, transport.transact(&request)).await;
        let values = match outcome {
            Ok(result) => result?,
            Err(_) => {
                self.reopen().await;
                return Err(TransportError::Timeout(timeout));
            }
        };

        let completed_at = Utc::now();
        let event = ReadEvent {
            device_id: self.device_id.to_string(),
            address: request.address,
            count: request.count,
            values: values.clone(),
            timestamp: completed_at,
        };
        if let Err(e) = self.sink.append_read(event).await {
            warn!(device_id = %self.device_id, error = %e, "Failed to record read");
        }

        Ok(Transaction {
            values,
            completed_at,
        })
    }

    /// The live transport, opening a new one if the last reopen failed.
    async fn transport(&mut self) -> Result<&mut Box<dyn Transport>, TransportError> {
        if self.transport.is_none() {
            let transport = open(self.factory.as_ref(), &self.config, self.timeout).await?;
            self.transport = Some(transport);
            info!(device_id = %self.device_id, "Transport reopened");
        }
        self.transport.as_mut().ok_or(TransportError::Closed)
    }

    /// Replace the current link with a fresh one.
    ///
    /// The connection stays registered either way. If the open fails the
    /// worker is left without a transport until the next command.
    async fn reopen(&mut self) {
        if let Err(e) = self.close().await {
            debug!(device_id = %self.device_id, error = %e, "Error closing stale transport");
        }
        match open(self.factory.as_ref(), &self.config, self.timeout).await {
            Ok(transport) => {
                info!(device_id = %self.device_id, "Transport reopened after timeout");
                self.transport = Some(transport);
            }
            Err(e) => {
                warn!(device_id = %self.device_id, error = %e, "Failed to reopen transport");
            }
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        let Some(mut transport) = self.transport.take() else {
            return Ok(());
        };
        debug!(device_id = %self.device_id, "Closing transport");
        tokio::time::timeout(self.timeout, transport.close())
            .await
            .map_err(|_| TransportError::Timeout(self.timeout))?
    }
}

async fn open(
    factory: &dyn TransportFactory,
    config: &TransportConfig,
    timeout: Duration,
) -> Result<Box<dyn Transport>, TransportError> {
    tokio::time::timeout(timeout, factory.open(config))
        .await
        .map_err(|_| TransportError::Timeout(timeout))?
}
