//! HTTP and WebSocket surface.
//!
//! | Method | Path                  | Purpose                              |
//! |--------|-----------------------|--------------------------------------|
//! | POST   | `/connect`            | Open (or replace) a device connection|
//! | POST   | `/disconnect/:id`     | Close a device connection            |
//! | POST   | `/read`               | Read holding registers               |
//! | GET    | `/ws/:id`             | Streaming session for a device       |
//! | GET    | `/devices`            | All connection records               |
//! | GET    | `/devices/:id`        | One connection record                |
//! | GET    | `/health`             | Liveness probe                       |

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::rejection::JsonRejection;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use modbus_connector_common::TransportKind;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::gateway::{GatewayError, ReadRequest, RegisterGateway};
use crate::registry::{ConnectionRegistry, RegistryError};
use crate::session::{FrameChannel, Inbound, SessionError, SessionManager};
use crate::transport::{Parity, SerialConfig, TcpConfig, TransportConfig, TransportError};

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ConnectionRegistry>,
    pub gateway: RegisterGateway,
    pub sessions: Arc<SessionManager>,
}

impl AppState {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            gateway: RegisterGateway::new(registry.clone()),
            registry,
            sessions: Arc::new(SessionManager::new()),
        }
    }
}

/// Error response: `{"status": "error", "message": ...}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({ "status": "error", "message": self.message }));
        (self.status, body).into_response()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        let status = match &err {
            RegistryError::InvalidDeviceId(_) | RegistryError::InvalidConfig { .. } => {
                StatusCode::BAD_REQUEST
            }
            RegistryError::DeviceNotFound(_) => StatusCode::NOT_FOUND,
            RegistryError::Connection { .. } => StatusCode::BAD_GATEWAY,
        };
        Self::new(status, err.to_string())
    }
}

impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        let status = match &err {
            GatewayError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::DeviceNotConnected(_) => StatusCode::NOT_FOUND,
            GatewayError::Read {
                source: TransportError::Timeout(_),
                ..
            } => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::Read { .. } => StatusCode::BAD_GATEWAY,
        };
        Self::new(status, err.to_string())
    }
}

/// Body of `POST /connect`.
///
/// Flat form: the transport fields that apply depend on `connection_type`.
/// `timeout` is in seconds.
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectRequest {
    pub connection_type: TransportKind,
    pub device_id: String,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub port_name: Option<String>,
    pub baudrate: Option<u32>,
    pub parity: Option<Parity>,
    pub stopbits: Option<u8>,
    pub bytesize: Option<u8>,
    pub timeout: Option<f64>,
}

impl ConnectRequest {
    /// Build the transport configuration, filling in defaults.
    ///
    /// Missing or out-of-range fields are carried through as-is so the
    /// registry rejects them and records the failure.
    pub fn transport_config(&self) -> TransportConfig {
        let timeout_ms = self.timeout.map(|secs| {
            if secs.is_finite() && secs > 0.0 {
                (secs * 1000.0).round() as u64
            } else {
                0
            }
        });

        match self.connection_type {
            TransportKind::Tcp => {
                let host = self.host.clone().unwrap_or_default();
                let mut tcp = TcpConfig::new(host, self.port.unwrap_or(502));
                if let Some(ms) = timeout_ms {
                    tcp.timeout_ms = ms;
                }
                TransportConfig::Tcp(tcp)
            }
            TransportKind::Rtu => {
                let mut serial = SerialConfig::new(self.port_name.clone().unwrap_or_default());
                if let Some(baud_rate) = self.baudrate {
                    serial.baud_rate = baud_rate;
                }
                if let Some(parity) = self.parity {
                    serial.parity = parity;
                }
                if let Some(stop_bits) = self.stopbits {
                    serial.stop_bits = stop_bits;
                }
                if let Some(data_bits) = self.bytesize {
                    serial.data_bits = data_bits;
                }
                if let Some(ms) = timeout_ms {
                    serial.timeout_ms = ms;
                }
                TransportConfig::Rtu(serial)
            }
        }
    }
}

#[derive(Debug, Serialize)]
struct StatusBody {
    status: &'static str,
    message: String,
}

impl StatusBody {
    fn success(message: String) -> Json<Self> {
        Json(Self {
            status: "success",
            message,
        })
    }
}

#[derive(Debug, Serialize)]
struct ReadBody {
    status: &'static str,
    values: Vec<u16>,
    timestamp: DateTime<Utc>,
}

/// Create the HTTP router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/connect", post(connect_handler))
        .route("/disconnect/:device_id", post(disconnect_handler))
        .route("/read", post(read_handler))
        .route("/ws/:device_id", get(ws_handler))
        .route("/devices", get(list_handler))
        .route("/devices/:device_id", get(device_handler))
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn connect_handler(
    State(state): State<AppState>,
    payload: Result<Json<ConnectRequest>, JsonRejection>,
) -> Result<Json<StatusBody>, ApiError> {
    let Json(request) = payload?;
    let config = request.transport_config();

    state.registry.connect(&request.device_id, config).await?;

    Ok(StatusBody::success(format!(
        "Connected to {} device {}",
        request.connection_type, request.device_id
    )))
}

async fn disconnect_handler(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> Result<Json<StatusBody>, ApiError> {
    let info = state.registry.disconnect(&device_id).await?;

    let message = match info.last_error {
        Some(e) => format!("Disconnected from {} (close reported: {})", device_id, e),
        None => format!("Disconnected from {}", device_id),
    };
    Ok(StatusBody::success(message))
}

async fn read_handler(
    State(state): State<AppState>,
    payload: Result<Json<ReadRequest>, JsonRejection>,
) -> Result<Json<ReadBody>, ApiError> {
    let Json(request) = payload?;
    let result = state.gateway.read(&request).await?;

    Ok(Json(ReadBody {
        status: "success",
        values: result.values,
        timestamp: result.timestamp,
    }))
}

async fn list_handler(State(state): State<AppState>) -> Response {
    Json(state.registry.list()).into_response()
}

async fn device_handler(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> Result<Response, ApiError> {
    state
        .registry
        .status(&device_id)
        .map(|info| Json(info).into_response())
        .ok_or_else(|| {
            ApiError::new(
                StatusCode::NOT_FOUND,
                format!("device {} not found", device_id),
            )
        })
}

async fn health_handler() -> Response {
    (StatusCode::OK, "healthy\n").into_response()
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> Response {
    ws.on_upgrade(move |socket| async move {
        let session = state.sessions.open(&device_id, state.gateway.clone());
        let mut channel = WsChannel { socket };
        session.run(&mut channel).await;
    })
}

/// [`FrameChannel`] over an axum WebSocket.
///
/// Ping/pong is answered by the WebSocket layer itself.
struct WsChannel {
    socket: WebSocket,
}

#[async_trait]
impl FrameChannel for WsChannel {
    async fn recv(&mut self) -> Option<Result<Inbound, SessionError>> {
        loop {
            match self.socket.recv().await? {
                Ok(Message::Text(text)) => return Some(Ok(Inbound::Text(text))),
                Ok(Message::Binary(data)) => return Some(Ok(Inbound::Binary(data))),
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => continue,
                Ok(Message::Close(_)) => return None,
                Err(e) => return Some(Err(SessionError::Channel(e.to_string()))),
            }
        }
    }

    async fn send(&mut self, text: String) -> Result<(), SessionError> {
        self.socket
            .send(Message::Text(text))
            .await
            .map_err(|e| SessionError::Channel(e.to_string()))
    }
}

/// HTTP server configuration.
pub struct HttpServer {
    state: AppState,
    listen_addr: SocketAddr,
}

impl HttpServer {
    pub fn new(state: AppState, listen_addr: SocketAddr) -> Self {
        Self { state, listen_addr }
    }

    /// Run the HTTP server until the shutdown signal is received.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        let router = create_router(self.state);

        let listener = tokio::net::TcpListener::bind(self.listen_addr)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind to {}: {}", self.listen_addr, e))?;

        info!(addr = %self.listen_addr, "HTTP server listening");

        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.wait_for(|stop| *stop).await;
                info!("HTTP server shutting down");
            })
            .await
            .map_err(|e| anyhow::anyhow!("HTTP server error: {}", e))?;

        info!("HTTP server stopped");
        Ok(())
    }
}
