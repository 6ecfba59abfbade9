//! Centralized file-based logging system
//!
//! Writes logs to files under the configured directory, separated by type:
//! - main/ - all events, JSON
//! - error/ - warnings and errors only
//! - ws/ - connection manager events (target `ws`)
//! - session/ - stream session events (target `session`)
//!
//! Console output goes to stderr; stdout is reserved for stream data.

use super::config::LoggingConfig;
use std::fs;
use std::path::Path;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    filter::{filter_fn, LevelFilter},
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
    EnvFilter,
};

/// Log file categories, one subdirectory each
pub const LOG_TYPES: [&str; 4] = ["main", "error", "ws", "session"];

/// Initialize centralized file logging
///
/// Returns the appender guards, which must be kept alive for the duration of
/// the program. `RUST_LOG` overrides the configured level.
pub fn init_logging(config: &LoggingConfig) -> std::io::Result<Vec<WorkerGuard>> {
    let logs_dir = config.directory.as_path();
    create_log_dirs(logs_dir)?;

    let mut guards = Vec::with_capacity(LOG_TYPES.len());

    let (main_appender, main_guard) = create_appender(logs_dir, "main");
    guards.push(main_guard);

    let (error_appender, error_guard) = create_appender(logs_dir, "error");
    guards.push(error_guard);

    let (ws_appender, ws_guard) = create_appender(logs_dir, "ws");
    guards.push(ws_guard);

    let (session_appender, session_guard) = create_appender(logs_dir, "session");
    guards.push(session_guard);

    let main_layer = tracing_subscriber::fmt::layer()
        .with_writer(main_appender)
        .with_ansi(false)
        .with_target(true)
        .with_level(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .json();

    let error_layer = tracing_subscriber::fmt::layer()
        .with_writer(error_appender)
        .with_ansi(false)
        .with_target(true)
        .with_level(true)
        .with_filter(LevelFilter::WARN);

    let ws_layer = tracing_subscriber::fmt::layer()
        .with_writer(ws_appender)
        .with_ansi(false)
        .with_target(true)
        .with_level(true)
        .with_filter(filter_fn(|metadata| metadata.target() == "ws"));

    let session_layer = tracing_subscriber::fmt::layer()
        .with_writer(session_appender)
        .with_ansi(false)
        .with_target(true)
        .with_level(true)
        .with_filter(filter_fn(|metadata| metadata.target() == "session"));

    let console_layer = config.console.then(|| {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_level(true)
    });

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(main_layer)
        .with(error_layer)
        .with(ws_layer)
        .with(session_layer)
        .with(console_layer)
        .try_init()
        .map_err(std::io::Error::other)?;

    tracing::info!(dir = %logs_dir.display(), "Logging system initialized");

    Ok(guards)
}

fn create_log_dirs(logs_dir: &Path) -> std::io::Result<()> {
    for log_type in LOG_TYPES {
        fs::create_dir_all(logs_dir.join(log_type))?;
    }
    Ok(())
}

/// Create a daily rolling file appender under `<dir>/<name>/`
fn create_appender(dir: &Path, name: &str) -> (NonBlocking, WorkerGuard) {
    let appender = RollingFileAppender::new(Rotation::DAILY, dir.join(name), name);
    tracing_appender::non_blocking(appender)
}

/// Log macro helpers for specific log types
#[macro_export]
macro_rules! log_ws {
    ($level:expr, $($arg:tt)+) => {
        tracing::event!(target: "ws", $level, $($arg)+)
    };
}

#[macro_export]
macro_rules! log_session {
    ($level:expr, $($arg:tt)+) => {
        tracing::event!(target: "session", $level, $($arg)+)
    };
}
