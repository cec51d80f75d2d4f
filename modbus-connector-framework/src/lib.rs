//! Modbus Connector Framework
//!
//! Service plumbing shared by connector binaries.
//!
//! # Overview
//!
//! This framework provides:
//! - [`ServiceConfig`] trait for configuration loading and validation
//! - [`ServiceRunner`] for managing the service lifecycle (startup, shutdown, signal handling)
//! - [`Publisher`] for publishing events to Zenoh with automatic serialization
//! - [`ServiceArgs`] for common CLI argument parsing
//! - [`ServiceStatus`] for standardized status reporting
//!
//! # Example
//!
//! ```ignore
//! use modbus_connector_framework::{ServiceArgs, ServiceConfig, ServiceRunner};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let args = ServiceArgs::parse_with_default("service.json5");
//!     let config = MyConfig::load(&args.config)?;
//!
//!     let mut runner = ServiceRunner::new_with_args("service", config, Some(&args)).await?;
//!     runner.spawn(my_worker(runner.shutdown_receiver()));
//!
//!     runner.run().await?;
//!     Ok(())
//! }
//! ```

mod args;
mod config;
mod error;
mod publisher;
mod runner;
mod status;

pub use args::ServiceArgs;
pub use config::ServiceConfig;
pub use error::{Result, ServiceError};
pub use publisher::Publisher;
pub use runner::ServiceRunner;
pub use status::{ServiceStatus, StatusPublisher};

pub use modbus_connector_common::{Format, LoggingConfig, ZenohConfig};
