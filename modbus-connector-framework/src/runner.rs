//! Service runner for lifecycle management.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::signal;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use modbus_connector_common::{Format, connect, init_tracing};

use crate::ServiceArgs;
use crate::config::ServiceConfig;
use crate::error::{Result, ServiceError};
use crate::publisher::Publisher;
use crate::status::StatusPublisher;

/// How long spawned tasks get to observe the shutdown signal before being aborted.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Manages the lifecycle of the connector service.
///
/// Handles:
/// - Logging initialization (with CLI override)
/// - Zenoh session (skipped when the config disables it)
/// - Task spawning and shutdown signalling
/// - Graceful shutdown on Ctrl+C
/// - Status publishing (optional)
///
/// # Example
///
/// ```ignore
/// let args = ServiceArgs::parse_with_default("modbus-connector.json5");
/// let config = ConnectorConfig::load(&args.config)?;
///
/// let mut runner = ServiceRunner::new_with_args("modbus-connector", config, Some(&args)).await?;
/// let shutdown = runner.shutdown_receiver();
/// runner.spawn(async move { serve(shutdown).await });
///
/// runner.run().await?;
/// ```
pub struct ServiceRunner<C: ServiceConfig> {
    name: String,
    version: String,
    config: C,
    session: Option<Arc<zenoh::Session>>,
    publisher: Option<Publisher>,
    status_publisher: Option<StatusPublisher>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl<C: ServiceConfig> ServiceRunner<C> {
    /// Create a new runner: initialize logging, then open Zenoh if enabled.
    pub async fn new(name: impl Into<String>, config: C) -> Result<Self> {
        Self::new_with_args(name, config, None).await
    }

    /// Create a new runner with CLI args for log level override.
    pub async fn new_with_args(
        name: impl Into<String>,
        config: C,
        args: Option<&ServiceArgs>,
    ) -> Result<Self> {
        let level_override = args.and_then(|a| a.log_level.as_deref());
        let log_config = config.logging().with_level_override(level_override);
        init_tracing(&log_config).map_err(|e| ServiceError::config(e.to_string()))?;

        let name = name.into();
        let version = env!("CARGO_PKG_VERSION").to_string();
        tracing::info!(service = %name, version = %version, "Starting service");

        let (session, publisher) = if config.zenoh_enabled() {
            let session = Arc::new(
                connect(config.zenoh())
                    .await
                    .map_err(|e| ServiceError::ZenohConnection(e.to_string()))?,
            );
            let publisher = Publisher::new(session.clone(), config.key_prefix(), Format::Json);
            (Some(session), Some(publisher))
        } else {
            tracing::info!("Zenoh publishing disabled");
            (None, None)
        };

        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            name,
            version,
            config,
            session,
            publisher,
            status_publisher: None,
            shutdown_tx,
            tasks: Vec::new(),
        })
    }

    /// Publish "running"/"offline" status on startup and shutdown.
    ///
    /// No-op when Zenoh is disabled.
    pub fn with_status_publishing(mut self) -> Self {
        self.status_publisher = self
            .publisher
            .as_ref()
            .map(|p| StatusPublisher::new(p.clone(), &self.name, &self.version));
        self
    }

    /// Set the serialization format for published events.
    pub fn with_format(mut self, format: Format) -> Self {
        self.publisher = self.publisher.map(|p| p.with_format(format));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn config(&self) -> &C {
        &self.config
    }

    /// Zenoh session, if publishing is enabled.
    pub fn session(&self) -> Option<&Arc<zenoh::Session>> {
        self.session.as_ref()
    }

    /// Clone of the publisher, if publishing is enabled.
    pub fn publisher(&self) -> Option<Publisher> {
        self.publisher.clone()
    }

    /// Receiver that flips to `true` when shutdown starts.
    pub fn shutdown_receiver(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Spawn a worker task. It is awaited (then aborted) on shutdown.
    pub fn spawn<F>(&mut self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tasks.push(tokio::spawn(future));
    }

    /// Spawn a worker task that returns a Result. Errors are logged.
    pub fn spawn_with_error<F, E>(&mut self, name: String, future: F)
    where
        F: Future<Output = std::result::Result<(), E>> + Send + 'static,
        E: std::fmt::Display + Send + 'static,
    {
        let status = self.publisher.clone().map(|p| {
            StatusPublisher::new(p, self.name.clone(), self.version.clone())
        });

        self.tasks.push(tokio::spawn(async move {
            if let Err(e) = future.await {
                tracing::error!(worker = %name, error = %e, "Worker failed");
                if let Some(status) = status {
                    let message = format!("{}: {}", name, e);
                    if let Err(e) = status.publish_error(message).await {
                        tracing::warn!(error = %e, "Failed to publish error status");
                    }
                }
            }
        }));
    }

    /// Run until Ctrl+C is received.
    pub async fn run(self) -> Result<()> {
        self.run_with_metadata(None).await
    }

    /// Run until Ctrl+C is received, publishing `metadata` with the running status.
    ///
    /// On shutdown the runner signals the shutdown receivers, waits up to
    /// a grace period for tasks to finish, aborts stragglers, publishes
    /// "offline" status and closes the Zenoh session.
    pub async fn run_with_metadata(self, metadata: Option<serde_json::Value>) -> Result<()> {
        if let Some(ref status_pub) = self.status_publisher {
            if let Err(e) = status_pub.publish_running(metadata).await {
                tracing::warn!(error = %e, "Failed to publish running status");
            }
        }

        tracing::info!(
            service = %self.name,
            tasks = self.tasks.len(),
            "Service running. Press Ctrl+C to stop."
        );

        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
        }

        tracing::info!(service = %self.name, "Received shutdown signal");
        let _ = self.shutdown_tx.send(true);

        for mut task in self.tasks {
            if tokio::time::timeout(SHUTDOWN_GRACE, &mut task).await.is_err() {
                tracing::warn!("Task did not stop within grace period, aborting");
                task.abort();
            }
        }

        if let Some(ref status_pub) = self.status_publisher {
            if let Err(e) = status_pub.publish_offline().await {
                tracing::warn!(error = %e, "Failed to publish offline status");
            }
        }

        if let Some(session) = self.session {
            if let Err(e) = session.close().await {
                tracing::warn!(error = %e, "Error closing Zenoh session");
            }
        }

        tracing::info!(service = %self.name, "Goodbye!");

        Ok(())
    }
}
