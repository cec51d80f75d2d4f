//! Event publisher for Zenoh.

use std::sync::Arc;

use serde::Serialize;
use modbus_connector_common::{Format, KeyExprBuilder, encode};

use crate::error::{Result, ServiceError};

/// Publisher for sending connector events to Zenoh.
///
/// Wraps a Zenoh session together with the key layout and payload format.
#[derive(Clone, Debug)]
pub struct Publisher {
    session: Arc<zenoh::Session>,
    keys: KeyExprBuilder,
    format: Format,
}

impl Publisher {
    /// Create a new publisher.
    pub fn new(
        session: Arc<zenoh::Session>,
        key_prefix: impl Into<String>,
        format: Format,
    ) -> Self {
        Self {
            session,
            keys: KeyExprBuilder::new(key_prefix),
            format,
        }
    }

    /// Same session and prefix, different payload format.
    pub fn with_format(&self, format: Format) -> Self {
        Self {
            session: self.session.clone(),
            keys: self.keys.clone(),
            format,
        }
    }

    pub fn key_prefix(&self) -> &str {
        self.keys.prefix()
    }

    /// Key layout under this publisher's prefix.
    pub fn keys(&self) -> &KeyExprBuilder {
        &self.keys
    }

    pub fn format(&self) -> Format {
        self.format
    }

    pub fn session(&self) -> &Arc<zenoh::Session> {
        &self.session
    }

    /// Encode `value` with the publisher's format and put it on `key`.
    pub async fn publish<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let payload =
            encode(value, self.format).map_err(|e| ServiceError::Serialization(e.to_string()))?;
        self.publish_raw(key, payload, self.format).await
    }

    /// Publish already-encoded bytes, tagged with `format`'s MIME type.
    pub async fn publish_raw(&self, key: &str, payload: Vec<u8>, format: Format) -> Result<()> {
        self.session
            .put(key, payload)
            .encoding(format.mime_type())
            .await
            .map_err(|e| ServiceError::Publish {
                key: key.to_string(),
                message: e.to_string(),
            })?;

        Ok(())
    }

    /// Publish a value as JSON regardless of the configured format.
    pub async fn publish_json<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let payload = serde_json::to_vec(value)?;
        self.publish_raw(key, payload, Format::Json).await
    }
}
