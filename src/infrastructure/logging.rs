//! Logging setup
//!
//! Console output always; when a directory is configured, a daily-rolling
//! JSON file under it as well. `RUST_LOG` overrides the configured level.

use super::config::LoggingConfig;
use std::fs;
use std::path::Path;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize logging for `role`
///
/// Returns the appender guards, which must be kept alive for the duration
/// of the program or buffered file output is lost.
pub fn init_logging(config: &LoggingConfig, role: &str) -> std::io::Result<Vec<WorkerGuard>> {
    let mut guards = Vec::new();

    let file_layer = match &config.directory {
        Some(dir) => {
            let (appender, guard) = create_appender(dir, role)?;
            guards.push(guard);
            Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(appender)
                    .with_ansi(false)
                    .with_target(true)
                    .with_level(true)
                    .with_thread_ids(true)
                    .json(),
            )
        }
        None => None,
    };

    // Console layer
    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_level(true);

    tracing_subscriber::registry()
        .with(env_filter(&config.level))
        .with(file_layer)
        .with(console_layer)
        .init();

    match &config.directory {
        Some(dir) => tracing::info!("Logging initialized, files in {}", dir.display()),
        None => tracing::info!("Logging initialized (console only)"),
    }

    Ok(guards)
}

/// `RUST_LOG` if set and valid, otherwise the configured directive
fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Create a daily rolling file appender
fn create_appender(dir: &Path, name: &str) -> std::io::Result<(NonBlocking, WorkerGuard)> {
    fs::create_dir_all(dir)?;
    let appender = RollingFileAppender::new(Rotation::DAILY, dir, format!("{name}.log"));
    Ok(tracing_appender::non_blocking(appender))
}
