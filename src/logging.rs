//! Logging setup for strata
//!
//! Installs a `tracing` subscriber writing to the console and to daily-rolling
//! files in the configured log directory:
//!
//! - `strata.{date}.log`: everything the filter lets through
//! - `error.{date}.log`: warnings and errors only
//!
//! ```no_run
//! use strata::config::EngineConfig;
//! use strata::logging;
//!
//! let config = EngineConfig::default();
//! logging::init(&config).expect("Failed to initialize logging");
//! tracing::info!("Engine started");
//! ```

use crate::config::EngineConfig;
use crate::error::{Result, ResultExt as _, StrataError};
use std::path::{Path, PathBuf};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    EnvFilter, Layer as _, fmt, layer::SubscriberExt as _, util::SubscriberInitExt as _,
};

const MAX_LOG_FILES: usize = 10;

/// Resolves and creates the log directory for `config`
pub fn get_log_dir(config: &EngineConfig) -> Result<PathBuf> {
    let log_dir = config.log_dir();
    if !log_dir.exists() {
        std::fs::create_dir_all(&log_dir)
            .with_context(|| format!("Failed to create log directory: {}", log_dir.display()))?;
    }
    Ok(log_dir)
}

fn appender(log_dir: &Path, prefix: &str) -> Result<RollingFileAppender> {
    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .max_log_files(MAX_LOG_FILES)
        .filename_prefix(prefix)
        .filename_suffix("log")
        .build(log_dir)
        .map_err(|e| StrataError::Config(format!("Failed to create {prefix} log appender: {e}")))
}

/// `RUST_LOG` wins over the configured level
fn env_filter(config: &EngineConfig) -> Result<EnvFilter> {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .map_err(|e| StrataError::Config(format!("Invalid log filter: {e}")))
}

/// Initializes console and file logging. Call once per process.
///
/// # Errors
///
/// Fails if the log directory cannot be created, an appender cannot be built,
/// the filter is invalid, or a global subscriber is already set.
pub fn init(config: &EngineConfig) -> Result<()> {
    let log_dir = get_log_dir(config)?;

    let stdout_layer = fmt::layer()
        .with_target(true)
        .with_line_number(true)
        .with_file(true)
        .pretty();

    let all_logs_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .with_ansi(false)
        .with_writer(appender(&log_dir, "strata")?);

    let error_logs_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .with_file(true)
        .with_ansi(false)
        .with_writer(appender(&log_dir, "error")?)
        .with_filter(EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(env_filter(config)?)
        .with(stdout_layer)
        .with(all_logs_layer)
        .with(error_logs_layer)
        .try_init()
        .map_err(|e| StrataError::Config(format!("Logging already initialized: {e}")))?;

    tracing::info!("Logging initialized, log directory: {:?}", log_dir);
    Ok(())
}

/// Path of today's main log file
pub fn get_current_log_path(config: &EngineConfig) -> Result<PathBuf> {
    let today = chrono::Utc::now().format("%Y-%m-%d");
    Ok(get_log_dir(config)?.join(format!("strata.{today}.log")))
}

/// Path of today's warning/error log file
pub fn get_current_error_log_path(config: &EngineConfig) -> Result<PathBuf> {
    let today = chrono::Utc::now().format("%Y-%m-%d");
    Ok(get_log_dir(config)?.join(format!("error.{today}.log")))
}
