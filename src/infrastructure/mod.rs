//! Infrastructure - off the data path
//!
//! This module contains the process plumbing:
//! - Configuration management
//! - Logging and metrics
//! - Graceful shutdown

pub mod config;
pub mod logging;
pub mod metrics;
pub mod shutdown;

pub use config::{BusBackend, Config, ConfigError};
pub use metrics::{MetricsCollector, MetricsSnapshot};
pub use shutdown::{Shutdown, ShutdownSignal};
