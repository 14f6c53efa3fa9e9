//! Tracing subscriber setup.
//!
//! `RUST_LOG` wins over the configured filter. When a log directory is
//! configured, a daily-rolling file layer is added next to stdout.

use crate::config::LoggingConfig;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Keeps the non-blocking file writer flushing until dropped.
#[must_use = "dropping the guard stops the file writer"]
pub struct LoggingGuard {
    _file: Option<WorkerGuard>,
}

/// Install the global subscriber.
///
/// Returns `Ok` without reinstalling if a subscriber is already set, so
/// tests and embedding applications can call it freely.
pub fn init(config: &LoggingConfig) -> crate::Result<LoggingGuard> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.filter))
        .map_err(|e| crate::OdeError::Config(format!("Invalid log filter: {}", e)))?;

    let (file_layer, guard) = match &config.directory {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, &config.file_prefix);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer)
                .boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .try_init();

    if installed.is_err() {
        tracing::debug!("Global subscriber already installed, keeping it");
    }

    Ok(LoggingGuard { _file: guard })
}
