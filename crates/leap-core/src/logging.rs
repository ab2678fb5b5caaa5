//! Logging configuration using tracing

use std::path::PathBuf;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::error::{Result, ResultExt};

/// Environment variable holding the log filter directive
pub const LOG_ENV: &str = "LEAP_LOG";

/// Initialize the logging subsystem
///
/// Logs are written to `~/.local/share/leap-client/logs/`
/// Log level is controlled by the `LEAP_LOG` environment variable.
///
/// The session and trigger crates only emit `tracing` events; the embedding
/// application decides whether to call this.
///
/// # Examples
/// ```bash
/// LEAP_LOG=debug my-bridge
/// LEAP_LOG=leap_session=trace my-bridge
/// ```
pub fn init() -> Result<()> {
    let log_dir = get_log_directory()?;
    std::fs::create_dir_all(&log_dir)
        .with_context(|| format!("Failed to create log directory {}", log_dir.display()))?;

    let file_appender = RollingFileAppender::new(Rotation::DAILY, &log_dir, "leap.log");

    let env_filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| default_filter());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(file_appender)
                .with_ansi(false)
                .with_target(true)
                .with_thread_ids(false)
                .with_file(true)
                .with_line_number(true)
                .with_timer(fmt::time::ChronoLocal::new(
                    "%Y-%m-%d %H:%M:%S%.3f".to_string(),
                )),
        )
        .init();

    tracing::info!("leap-client logging started");
    tracing::info!("Log directory: {}", log_dir.display());

    Ok(())
}

fn default_filter() -> EnvFilter {
    EnvFilter::new(
        "leap_client=info,leap_core=info,leap_session=info,leap_trigger=info,warn",
    )
}

/// Get the log directory path
fn get_log_directory() -> Result<PathBuf> {
    let base = dirs::data_local_dir().unwrap_or_else(|| PathBuf::from("."));
    Ok(base.join("leap-client").join("logs"))
}

/// Get the log file path for the current day
pub fn get_current_log_file() -> Result<PathBuf> {
    let dir = get_log_directory()?;
    Ok(dir.join("leap.log"))
}
