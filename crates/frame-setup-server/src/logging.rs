//! Logging initialization.
//!
//! Two modes, picked by `FRAME_SETUP_ENV`:
//! - **Production**: JSON logs to daily rolling files plus compact stdout for
//!   the systemd journal
//! - **Development**: pretty stdout with span events
//!
//! The filter comes from `RUST_LOG`, then `FRAME_SETUP_LOG_LEVEL`, then `info`.

use std::path::PathBuf;
use std::sync::OnceLock;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Environment variable selecting the logging mode.
pub const ENV_MODE_VAR: &str = "FRAME_SETUP_ENV";

/// Environment variable holding the fallback filter directive.
pub const LOG_LEVEL_VAR: &str = "FRAME_SETUP_LOG_LEVEL";

/// Rolling file name prefix.
const FILE_PREFIX: &str = "frame-setup";

// Non-blocking writers stop flushing once their guard drops.
static FILE_GUARD: OnceLock<WorkerGuard> = OnceLock::new();
static STDOUT_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Output style.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogMode {
    /// JSON file plus compact stdout.
    Production,
    /// Pretty stdout.
    Development,
}

impl LogMode {
    /// Read the mode from [`ENV_MODE_VAR`]. Anything but `production` is
    /// development.
    #[must_use]
    pub fn from_env() -> Self {
        Self::parse(std::env::var(ENV_MODE_VAR).ok().as_deref())
    }

    fn parse(value: Option<&str>) -> Self {
        match value {
            Some(v) if v.eq_ignore_ascii_case("production") => Self::Production,
            _ => Self::Development,
        }
    }
}

/// Initialize the global subscriber.
///
/// # Production Mode
///
/// - Daily rolling JSON files in `/var/log/frame-setup/`
/// - Compact stdout without ANSI colors
///
/// # Development Mode
///
/// - Pretty stdout with file and line numbers
/// - Span open and close events
///
/// # Errors
///
/// Returns an error if the filter directive cannot be parsed.
pub fn init(mode: LogMode) -> anyhow::Result<()> {
    let log_level = std::env::var(LOG_LEVEL_VAR).unwrap_or_else(|_| "info".to_string());

    let env_filter =
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&log_level))?;

    match mode {
        LogMode::Production => init_production(env_filter),
        LogMode::Development => init_development(env_filter),
    }

    Ok(())
}

fn init_production(env_filter: EnvFilter) {
    let log_dir = log_directory();
    if let Err(e) = std::fs::create_dir_all(&log_dir) {
        eprintln!("Cannot create log directory {}: {e}", log_dir.display());
    }

    let file_appender = RollingFileAppender::new(Rotation::DAILY, &log_dir, FILE_PREFIX);
    let (non_blocking_file, file_guard) = tracing_appender::non_blocking(file_appender);
    let (non_blocking_stdout, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());

    let file_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking_file)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    // journald adds its own timestamps
    let stdout_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_writer(non_blocking_stdout)
        .with_target(true)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer)
        .init();

    let _ = FILE_GUARD.set(file_guard);
    let _ = STDOUT_GUARD.set(stdout_guard);
}

fn init_development(env_filter: EnvFilter) {
    let stdout_layer = tracing_subscriber::fmt::layer()
        .pretty()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .init();
}

/// Log directory for the current platform.
fn log_directory() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        PathBuf::from("/var/log/frame-setup")
    }
    #[cfg(not(target_os = "linux"))]
    {
        directories::ProjectDirs::from("", "", "frame-setup")
            .map_or_else(|| PathBuf::from("./logs"), |dirs| dirs.data_dir().join("logs"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_directory_is_valid_path() {
        assert!(!log_directory().as_os_str().is_empty());
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!(LogMode::parse(Some("production")), LogMode::Production);
        assert_eq!(LogMode::parse(Some("PRODUCTION")), LogMode::Production);
        assert_eq!(LogMode::parse(Some("dev")), LogMode::Development);
        assert_eq!(LogMode::parse(None), LogMode::Development);
    }
}
