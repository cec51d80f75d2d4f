//! Configuration traits and utilities.

use std::path::Path;

use serde::de::DeserializeOwned;

use crate::error::{Result, ServiceError};
use crate::{LoggingConfig, ZenohConfig};

/// Trait for service configuration types.
///
/// Implement this for the service's top-level config struct to get JSON5
/// loading with validation and uniform access to the shared sections.
///
/// # Example
///
/// ```ignore
/// use serde::Deserialize;
/// use modbus_connector_framework::{ServiceConfig, ZenohConfig, LoggingConfig};
///
/// #[derive(Debug, Deserialize)]
/// pub struct MyConfig {
///     pub zenoh: ZenohConfig,
///     pub logging: LoggingConfig,
///     pub key_prefix: String,
/// }
///
/// impl ServiceConfig for MyConfig {
///     fn zenoh(&self) -> &ZenohConfig {
///         &self.zenoh
///     }
///
///     fn logging(&self) -> &LoggingConfig {
///         &self.logging
///     }
///
///     fn key_prefix(&self) -> &str {
///         &self.key_prefix
///     }
/// }
/// ```
pub trait ServiceConfig: Sized + DeserializeOwned {
    /// Get the Zenoh configuration.
    fn zenoh(&self) -> &ZenohConfig;

    /// Get the logging configuration.
    fn logging(&self) -> &LoggingConfig;

    /// Get the key expression prefix for published data.
    fn key_prefix(&self) -> &str;

    /// Whether a Zenoh session should be opened for publishing.
    fn zenoh_enabled(&self) -> bool {
        true
    }

    /// Validate the configuration.
    ///
    /// Called automatically after loading.
    fn validate(&self) -> Result<()> {
        Ok(())
    }

    /// Load configuration from a JSON5 file and validate it.
    fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ServiceError::ConfigNotFound {
                path: path.display().to_string(),
            });
        }

        let content = std::fs::read_to_string(path)?;
        Self::from_json5(&content)
    }

    /// Parse configuration from a JSON5 string and validate it.
    fn from_json5(content: &str) -> Result<Self> {
        let config: Self = json5::from_str(content)?;
        config.validate()?;
        Ok(config)
    }
}
