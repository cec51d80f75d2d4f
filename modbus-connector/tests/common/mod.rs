//! Modbus TCP stub server for integration tests.
//!
//! Answers read-holding-registers (function 0x03) from a fixed register
//! table. Addresses past the table get an illegal-data-address exception.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use modbus_connector::{TcpConfig, TransportConfig};

const READ_HOLDING_REGISTERS: u8 = 0x03;
const ILLEGAL_DATA_ADDRESS: u8 = 0x02;

#[derive(Debug, Default)]
struct Counters {
    accepted: AtomicUsize,
    closed: AtomicUsize,
    requests: AtomicUsize,
}

pub struct StubServer {
    addr: SocketAddr,
    counters: Arc<Counters>,
    task: JoinHandle<()>,
}

#[derive(Clone)]
enum Mode {
    Answer {
        registers: Arc<Vec<u16>>,
        delay: Duration,
        /// Replaces `delay` for the first request the server sees.
        first_delay: Duration,
    },
    Silent,
}

impl StubServer {
    /// Serve `registers` starting at address 0.
    pub async fn start(registers: Vec<u16>) -> Self {
        Self::spawn(Mode::Answer {
            registers: Arc::new(registers),
            delay: Duration::ZERO,
            first_delay: Duration::ZERO,
        })
        .await
    }

    /// Serve `registers`, sleeping `delay` before each response.
    pub async fn with_delay(registers: Vec<u16>, delay: Duration) -> Self {
        Self::spawn(Mode::Answer {
            registers: Arc::new(registers),
            delay,
            first_delay: delay,
        })
        .await
    }

    /// Serve `registers`, answering only the first request late.
    pub async fn with_first_delay(registers: Vec<u16>, first_delay: Duration) -> Self {
        Self::spawn(Mode::Answer {
            registers: Arc::new(registers),
            delay: Duration::ZERO,
            first_delay,
        })
        .await
    }

    /// Accept connections and read requests but never answer.
    pub async fn silent() -> Self {
        Self::spawn(Mode::Silent).await
    }

    async fn spawn(mode: Mode) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let counters = Arc::new(Counters::default());

        let task = tokio::spawn({
            let counters = counters.clone();
            async move {
                loop {
                    let Ok((stream, _)) = listener.accept().await else {
                        break;
                    };
                    counters.accepted.fetch_add(1, Ordering::SeqCst);
                    tokio::spawn(serve(stream, mode.clone(), counters.clone()));
                }
            }
        });

        Self {
            addr,
            counters,
            task,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Transport configuration pointing at this server.
    pub fn config(&self, timeout: Duration) -> TransportConfig {
        TransportConfig::Tcp(
            TcpConfig::new("127.0.0.1", self.addr.port()).with_timeout(timeout),
        )
    }

    pub fn accepted(&self) -> usize {
        self.counters.accepted.load(Ordering::SeqCst)
    }

    /// Connections the client has closed.
    pub fn closed(&self) -> usize {
        self.counters.closed.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> usize {
        self.counters.requests.load(Ordering::SeqCst)
    }

    /// Wait until the server has seen `n` client closes.
    pub async fn wait_closed(&self, n: usize) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while self.closed() < n && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

impl Drop for StubServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(mut stream: TcpStream, mode: Mode, counters: Arc<Counters>) {
    loop {
        let mut header = [0u8; 7];
        if stream.read_exact(&mut header).await.is_err() {
            counters.closed.fetch_add(1, Ordering::SeqCst);
            return;
        }

        let length = u16::from_be_bytes([header[4], header[5]]) as usize;
        let mut pdu = vec![0u8; length.saturating_sub(1)];
        if stream.read_exact(&mut pdu).await.is_err() {
            counters.closed.fetch_add(1, Ordering::SeqCst);
            return;
        }
        let seen = counters.requests.fetch_add(1, Ordering::SeqCst);

        let Mode::Answer {
            registers,
            delay,
            first_delay,
        } = &mode
        else {
            continue;
        };
        let wait = if seen == 0 { first_delay } else { delay };
        if !wait.is_zero() {
            tokio::time::sleep(*wait).await;
        }

        let response_pdu = respond(&pdu, registers);
        let mut frame = Vec::with_capacity(7 + response_pdu.len());
        frame.extend_from_slice(&header[0..4]);
        frame.extend_from_slice(&((response_pdu.len() + 1) as u16).to_be_bytes());
        frame.push(header[6]);
        frame.extend_from_slice(&response_pdu);

        if stream.write_all(&frame).await.is_err() {
            counters.closed.fetch_add(1, Ordering::SeqCst);
            return;
        }
    }
}

fn respond(pdu: &[u8], registers: &[u16]) -> Vec<u8> {
    let function = pdu.first().copied().unwrap_or_default();
    if function != READ_HOLDING_REGISTERS || pdu.len() < 5 {
        return vec![function | 0x80, 0x01];
    }

    let address = u16::from_be_bytes([pdu[1], pdu[2]]) as usize;
    let count = u16::from_be_bytes([pdu[3], pdu[4]]) as usize;
    let Some(values) = registers.get(address..address + count) else {
        return vec![function | 0x80, ILLEGAL_DATA_ADDRESS];
    };

    let mut out = vec![function, (count * 2) as u8];
    for value in values {
        out.extend_from_slice(&value.to_be_bytes());
    }
    out
}
