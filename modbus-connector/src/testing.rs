//! In-process transports for unit tests.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::transport::{
    RegisterRequest, Transport, TransportConfig, TransportError, TransportFactory,
};

/// How a [`StubTransport`] answers.
#[derive(Debug, Clone)]
pub enum StubBehavior {
    /// Return `address, address + 1, ...`.
    Echo,
    /// Echo after sleeping.
    Delay(Duration),
    /// Never answer.
    Hang,
    /// Fail every transaction with a protocol error.
    Exception(String),
}

#[derive(Debug, Default)]
struct StubState {
    transactions: AtomicUsize,
    closes: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

/// A transport whose clones share counters with the instance handed to the
/// code under test.
#[derive(Debug, Clone)]
pub struct StubTransport {
    behavior: StubBehavior,
    state: Arc<StubState>,
}

impl StubTransport {
    pub fn new(behavior: StubBehavior) -> Self {
        Self {
            behavior,
            state: Arc::new(StubState::default()),
        }
    }

    pub fn close_count(&self) -> usize {
        self.state.closes.load(Ordering::SeqCst)
    }

    pub fn transaction_count(&self) -> usize {
        self.state.transactions.load(Ordering::SeqCst)
    }

    /// Highest number of transactions that were ever in progress at once.
    pub fn max_in_flight(&self) -> usize {
        self.state.max_in_flight.load(Ordering::SeqCst)
    }
}

fn echo(request: &RegisterRequest) -> Vec<u16> {
    (0..request.count)
        .map(|i| request.address.wrapping_add(i))
        .collect()
}

#[async_trait]
impl Transport for StubTransport {
    async fn transact(&mut self, request: &RegisterRequest) -> Result<Vec<u16>, TransportError> {
        let current = self.state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.max_in_flight.fetch_max(current, Ordering::SeqCst);

        let result = match &self.behavior {
            StubBehavior::Echo => Ok(echo(request)),
            StubBehavior::Delay(delay) => {
                tokio::time::sleep(*delay).await;
                Ok(echo(request))
            }
            StubBehavior::Hang => std::future::pending().await,
            StubBehavior::Exception(message) => Err(TransportError::Protocol(message.clone())),
        };

        self.state.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.state.transactions.fetch_add(1, Ordering::SeqCst);
        result
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.state.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Opens [`StubTransport`]s and keeps them for inspection.
///
/// TCP hosts named `unreachable` fail to open.
#[derive(Debug)]
pub struct StubFactory {
    behavior: StubBehavior,
    by_host: HashMap<String, StubBehavior>,
    opened: Mutex<Vec<StubTransport>>,
}

impl StubFactory {
    pub fn new(behavior: StubBehavior) -> Self {
        Self {
            behavior,
            by_host: HashMap::new(),
            opened: Mutex::new(Vec::new()),
        }
    }

    /// Use `behavior` for TCP connections to `host`.
    pub fn with_host(mut self, host: &str, behavior: StubBehavior) -> Self {
        self.by_host.insert(host.to_string(), behavior);
        self
    }

    /// Transports opened so far, oldest first.
    pub fn opened(&self) -> Vec<StubTransport> {
        self.opened.lock().clone()
    }
}

#[async_trait]
impl TransportFactory for StubFactory {
    async fn open(&self, config: &TransportConfig) -> Result<Box<dyn Transport>, TransportError> {
        config.validate()?;

        let mut behavior = self.behavior.clone();
        if let TransportConfig::Tcp(tcp) = config {
            if tcp.host == "unreachable" {
                return Err(TransportError::Connection(format!(
                    "{}:{}: connection refused",
                    tcp.host, tcp.port
                )));
            }
            if let Some(b) = self.by_host.get(&tcp.host) {
                behavior = b.clone();
            }
        }

        let transport = StubTransport::new(behavior);
        self.opened.lock().push(transport.clone());
        Ok(Box::new(transport))
    }
}
