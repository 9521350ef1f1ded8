//! Logging configuration.
//!
//! The library itself only emits `tracing` events; whether and where they go
//! is the embedder's choice. [`init`] installs a global `tracing-subscriber`
//! sink matching a database's configured level and log file, for embedders
//! (and tests) that don't bring their own subscriber.

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Arc;

use tracing_subscriber::filter::LevelFilter;

use crate::error::{DbError, ErrorCode};

/// Verbosity threshold for database log output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    /// Use the library's standard verbosity (equivalent to [`LogLevel::Info`]).
    #[default]
    Default,
    Debug,
    Info,
    Notice,
    Warn,
    Error,
    /// Suppress all output.
    None,
}

impl LogLevel {
    fn as_filter(self) -> LevelFilter {
        match self {
            LogLevel::Default | LogLevel::Info | LogLevel::Notice => LevelFilter::INFO,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::None => LevelFilter::OFF,
        }
    }
}

/// Where and how loudly a database logs.
#[derive(Debug, Clone, Default)]
pub struct LogConfig {
    pub level: LogLevel,
    /// Append to this file instead of writing to stderr.
    pub file: Option<PathBuf>,
}

/// Install a process-global subscriber honoring `config`. Does nothing if a
/// subscriber is already installed.
pub fn init(config: &LogConfig) -> Result<(), DbError> {
    let filter = config.level.as_filter();
    match &config.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| {
                    DbError::new(
                        ErrorCode::UnableToOpenFile,
                        format!("Unable to open the logging file <{}>: {e}", path.display()),
                    )
                })?;
            let _ = tracing_subscriber::fmt()
                .with_max_level(filter)
                .with_ansi(false)
                .with_writer(Arc::new(file))
                .try_init();
        }
        None => {
            let _ = tracing_subscriber::fmt()
                .with_max_level(filter)
                .with_writer(std::io::stderr)
                .try_init();
        }
    }
    Ok(())
}
