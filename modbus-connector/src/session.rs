//! Streaming sessions.
//!
//! A session is bound to one device id for its whole life. It receives
//! `{"type": "read", "address": .., "count": .., "unit_id": ..}` commands,
//! runs them through the [`RegisterGateway`] and answers each with a data or
//! error frame. Failures never end the session; only the peer closing or the
//! channel failing does.
//!
//! ```text
//! Open ──run()──> Active ──peer close / channel error──> Closed
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::gateway::{GatewayError, ReadRequest, RegisterGateway};
use crate::transport::DEFAULT_UNIT_ID;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("invalid command: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("binary frames are not supported")]
    Binary,

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error("channel error: {0}")]
    Channel(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Open,
    Active,
    Closed,
}

fn default_unit_id() -> u8 {
    DEFAULT_UNIT_ID
}

/// Inbound command. The device id is implied by the session.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SessionCommand {
    Read {
        address: u16,
        count: u16,
        #[serde(default = "default_unit_id")]
        unit_id: u8,
    },
}

/// Outbound frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Frame {
    Data {
        values: Vec<u16>,
        timestamp: DateTime<Utc>,
    },
    Error {
        message: String,
    },
}

impl Frame {
    pub fn error(message: impl Into<String>) -> Self {
        Frame::Error {
            message: message.into(),
        }
    }

    /// Encode as JSON text.
    pub fn to_text(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            serde_json::json!({ "type": "error", "message": e.to_string() }).to_string()
        })
    }
}

/// One message received from the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Text(String),
    Binary(Vec<u8>),
}

/// Bidirectional message channel a session runs over.
///
/// `recv` returns `None` once the peer has closed.
#[async_trait]
pub trait FrameChannel: Send {
    async fn recv(&mut self) -> Option<Result<Inbound, SessionError>>;

    async fn send(&mut self, text: String) -> Result<(), SessionError>;
}

/// Counters reported when a session ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSummary {
    pub session_id: u64,
    pub commands: u64,
    pub errors: u64,
}

/// Tracks active sessions.
#[derive(Debug, Default)]
pub struct SessionManager {
    next_id: AtomicU64,
    active: Mutex<HashMap<u64, String>>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new session for `device_id`.
    ///
    /// The device does not need to be connected; commands then fail with an
    /// error frame until it is.
    pub fn open(self: &Arc<Self>, device_id: &str, gateway: RegisterGateway) -> StreamingSession {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.active.lock().insert(id, device_id.to_string());
        debug!(session_id = id, device_id = %device_id, "Session opened");

        StreamingSession {
            id,
            device_id: device_id.to_string(),
            gateway,
            manager: self.clone(),
            state: SessionState::Open,
        }
    }

    pub fn active_count(&self) -> usize {
        self.active.lock().len()
    }

    /// Number of active sessions bound to `device_id`.
    pub fn sessions_for(&self, device_id: &str) -> usize {
        self.active
            .lock()
            .values()
            .filter(|id| id.as_str() == device_id)
            .count()
    }

    fn remove(&self, session_id: u64) {
        self.active.lock().remove(&session_id);
    }
}

/// A session bound to one device.
///
/// Dropping the session removes it from its manager.
pub struct StreamingSession {
    id: u64,
    device_id: String,
    gateway: RegisterGateway,
    manager: Arc<SessionManager>,
    state: SessionState,
}

impl StreamingSession {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Serve commands from `channel` until the peer goes away.
    pub async fn run<C: FrameChannel>(mut self, channel: &mut C) -> SessionSummary {
        self.state = SessionState::Active;
        let mut summary = SessionSummary {
            session_id: self.id,
            commands: 0,
            errors: 0,
        };

        while let Some(inbound) = channel.recv().await {
            let inbound = match inbound {
                Ok(inbound) => inbound,
                Err(e) => {
                    debug!(session_id = self.id, error = %e, "Session channel failed");
                    break;
                }
            };

            summary.commands += 1;
            let frame = match self.handle(inbound).await {
                Ok(frame) => frame,
                Err(e) => {
                    summary.errors += 1;
                    debug!(session_id = self.id, device_id = %self.device_id, error = %e, "Command failed");
                    Frame::error(e.to_string())
                }
            };

            if let Err(e) = channel.send(frame.to_text()).await {
                debug!(session_id = self.id, error = %e, "Failed to send frame");
                break;
            }
        }

        self.state = SessionState::Closed;
        info!(
            session_id = self.id,
            device_id = %self.device_id,
            commands = summary.commands,
            errors = summary.errors,
            "Session closed"
        );
        summary
    }

    async fn handle(&self, inbound: Inbound) -> Result<Frame, SessionError> {
        let text = match inbound {
            Inbound::Text(text) => text,
            Inbound::Binary(_) => return Err(SessionError::Binary),
        };

        match serde_json::from_str::<SessionCommand>(&text)? {
            SessionCommand::Read {
                address,
                count,
                unit_id,
            } => {
                let request = ReadRequest::new(&self.device_id, address, count).with_unit_id(unit_id);
                let result = self.gateway.read(&request).await?;
                Ok(Frame::Data {
                    values: result.values,
                    timestamp: result.timestamp,
                })
            }
        }
    }
}

impl Drop for StreamingSession {
    fn drop(&mut self) {
        self.manager.remove(self.id);
    }
}
