//! Service status reporting.

use serde::{Deserialize, Serialize};

use crate::Result;
use crate::publisher::Publisher;

/// Service status document published under `<prefix>/@/status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceStatus {
    /// Service name.
    pub service: String,
    /// Service version.
    pub version: String,
    /// Current status ("running", "offline", "error").
    pub status: String,
    /// Additional metadata.
    #[serde(flatten)]
    pub metadata: serde_json::Value,
}

impl ServiceStatus {
    fn with_status(service: String, version: String, status: &str) -> Self {
        Self {
            service,
            version,
            status: status.to_string(),
            metadata: serde_json::Value::Null,
        }
    }

    /// Create a new status with "running" state.
    pub fn running(service: impl Into<String>, version: impl Into<String>) -> Self {
        Self::with_status(service.into(), version.into(), "running")
    }

    /// Create a status with "offline" state.
    pub fn offline(service: impl Into<String>, version: impl Into<String>) -> Self {
        Self::with_status(service.into(), version.into(), "offline")
    }

    /// Create a status with "error" state.
    pub fn error(
        service: impl Into<String>,
        version: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self::with_status(service.into(), version.into(), "error")
            .with_metadata(serde_json::json!({ "error": error.into() }))
    }

    /// Add metadata to the status.
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// Publish this status as JSON.
    pub async fn publish(&self, publisher: &Publisher) -> Result<()> {
        let key = publisher.keys().status_key();
        publisher.publish_json(&key, self).await
    }
}

/// Publishes status transitions for one service.
pub struct StatusPublisher {
    publisher: Publisher,
    service: String,
    version: String,
}

impl StatusPublisher {
    pub fn new(publisher: Publisher, service: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            publisher,
            service: service.into(),
            version: version.into(),
        }
    }

    /// Publish "running" status with optional metadata.
    pub async fn publish_running(&self, metadata: Option<serde_json::Value>) -> Result<()> {
        let mut status = ServiceStatus::running(&self.service, &self.version);
        if let Some(meta) = metadata {
            status = status.with_metadata(meta);
        }
        status.publish(&self.publisher).await
    }

    /// Publish "offline" status.
    pub async fn publish_offline(&self) -> Result<()> {
        ServiceStatus::offline(&self.service, &self.version)
            .publish(&self.publisher)
            .await
    }

    /// Publish "error" status.
    pub async fn publish_error(&self, error: impl Into<String>) -> Result<()> {
        ServiceStatus::error(&self.service, &self.version, error)
            .publish(&self.publisher)
            .await
    }
}
