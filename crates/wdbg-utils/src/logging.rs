//! # Logging Utilities
//!
//! `tracing` subscriber setup for wdbg.
//!
//! Log lines go to stderr so they never interleave with the debugger's own
//! output on stdout. An optional log file receives the same events without
//! ANSI colors.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use wdbg_utils::{init_logging, LogConfig};
//!
//! let config = LogConfig::from_env()?;
//! // Keep the guard alive until exit, or buffered file lines are lost.
//! let _guard = init_logging(&config)?;
//!
//! tracing::info!("debugger started");
//! # Ok::<(), wdbg_utils::LoggingError>(())
//! ```
//!
//! ## Environment Variables
//!
//! - `RUST_LOG`: level filter (e.g. `RUST_LOG=debug`, `RUST_LOG=wdbg_core=trace`)
//! - `WDBG_LOG_FORMAT`: `pretty` (default) or `json`
//! - `WDBG_LOG_FILE`: optional log file; a directory gets a dated file inside it

use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::Utc;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::fmt::{self, MakeWriter};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

/// Environment variable selecting the output format
pub const ENV_LOG_FORMAT: &str = "WDBG_LOG_FORMAT";
/// Environment variable naming the log file
pub const ENV_LOG_FILE: &str = "WDBG_LOG_FILE";

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat
{
    /// Human-readable lines (default)
    #[default]
    Pretty,
    /// One JSON object per event, with span context
    Json,
}

impl FromStr for LogFormat
{
    type Err = LoggingError;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        match s.to_lowercase().as_str() {
            "pretty" | "dev" | "development" => Ok(LogFormat::Pretty),
            "json" | "prod" | "production" => Ok(LogFormat::Json),
            _ => Err(LoggingError::InvalidFormat(s.to_string())),
        }
    }
}

/// Log level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel
{
    /// Error level
    Error,
    /// Warning level
    Warn,
    /// Info level (default)
    Info,
    /// Debug level
    Debug,
    /// Trace level (most verbose)
    Trace,
}

impl From<LogLevel> for Level
{
    fn from(level: LogLevel) -> Self
    {
        match level {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }
}

impl FromStr for LogLevel
{
    type Err = LoggingError;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        match s.to_lowercase().as_str() {
            "error" | "err" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" | "dbg" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            _ => Err(LoggingError::InvalidLevel(s.to_string())),
        }
    }
}

/// Where and how to log
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogConfig
{
    /// Explicit level; wins over `RUST_LOG` when set
    pub level: Option<LogLevel>,
    /// Output format
    pub format: LogFormat,
    /// Optional log file (or directory for a dated file)
    pub file: Option<PathBuf>,
}

impl LogConfig
{
    /// Read `WDBG_LOG_FORMAT` and `WDBG_LOG_FILE`.
    ///
    /// ## Errors
    ///
    /// `InvalidFormat` if `WDBG_LOG_FORMAT` holds an unknown value.
    pub fn from_env() -> Result<Self, LoggingError>
    {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`Self::from_env`] with a custom variable source.
    ///
    /// ## Errors
    ///
    /// `InvalidFormat` if the format variable holds an unknown value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, LoggingError>
    {
        let format = match lookup(ENV_LOG_FORMAT) {
            Some(value) => value.parse()?,
            None => LogFormat::default(),
        };
        let file = lookup(ENV_LOG_FILE).filter(|value| !value.is_empty()).map(PathBuf::from);
        Ok(Self {
            level: None,
            format,
            file,
        })
    }

    /// Override the level.
    #[must_use]
    pub fn with_level(mut self, level: Option<LogLevel>) -> Self
    {
        if level.is_some() {
            self.level = level;
        }
        self
    }

    // Priority: explicit level, then RUST_LOG (module filters allowed), then INFO.
    fn filter(&self) -> EnvFilter
    {
        match self.level {
            Some(level) => EnvFilter::new(Level::from(level).to_string()),
            None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(Level::INFO.to_string())),
        }
    }
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync + 'static>;

fn format_layer<W>(format: LogFormat, writer: W, ansi: bool) -> BoxedLayer
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    match format {
        LogFormat::Pretty => fmt::layer()
            .with_writer(writer)
            .with_target(true)
            .with_thread_names(true)
            .with_timer(ChronoUtc::rfc_3339())
            .with_ansi(ansi)
            .boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_writer(writer)
            .with_target(true)
            .with_thread_ids(true)
            .with_thread_names(true)
            .with_file(true)
            .with_line_number(true)
            .with_timer(ChronoUtc::rfc_3339())
            .with_current_span(true)
            .with_span_list(true)
            .boxed(),
    }
}

/// Resolve the configured log path: a directory gets `YYYY-MM-DD-wdbg.log`.
pub fn log_file_path(configured: &Path) -> PathBuf
{
    if configured.is_dir() {
        let today = Utc::now().format("%Y-%m-%d");
        configured.join(format!("{today}-wdbg.log"))
    } else {
        configured.to_path_buf()
    }
}

/// Install the global subscriber.
///
/// Returns the file writer's guard when a log file is configured; dropping
/// it flushes and stops the background writer, so hold it until exit.
///
/// ## Errors
///
/// - `InvalidFile` if the log path has no file name
/// - `FileError` if the log directory cannot be created
/// - `InitializationFailed` if a global subscriber is already installed
pub fn init_logging(config: &LogConfig) -> Result<Option<WorkerGuard>, LoggingError>
{
    let mut layers: Vec<BoxedLayer> = vec![format_layer(config.format, io::stderr, true)];

    let guard = match &config.file {
        Some(configured) => {
            let path = log_file_path(configured);
            let file_name = path
                .file_name()
                .ok_or_else(|| LoggingError::InvalidFile(path.display().to_string()))?
                .to_owned();
            let directory = match path.parent() {
                Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
                _ => PathBuf::from("."),
            };
            std::fs::create_dir_all(&directory)?;

            // The date is already part of directory-derived names.
            let appender = tracing_appender::rolling::never(directory, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            layers.push(format_layer(config.format, writer, false));
            Some(guard)
        }
        None => None,
    };

    Registry::default()
        .with(layers)
        .with(config.filter())
        .try_init()
        .map_err(|err| LoggingError::InitializationFailed(err.to_string()))?;
    Ok(guard)
}

/// Logging initialization error
#[derive(Debug, thiserror::Error)]
pub enum LoggingError
{
    /// Invalid log format
    #[error("Invalid log format: {0}. Use 'pretty' or 'json'")]
    InvalidFormat(String),

    /// Invalid log level
    #[error("Invalid log level: {0}. Use 'error', 'warn', 'info', 'debug', or 'trace'")]
    InvalidLevel(String),

    /// Log path without a file name
    #[error("Invalid log file: {0}")]
    InvalidFile(String),

    /// Failed to initialize logging
    #[error("Failed to initialize logging: {0}")]
    InitializationFailed(String),

    /// File logging error
    #[error("File logging error: {0}")]
    FileError(#[from] io::Error),
}
