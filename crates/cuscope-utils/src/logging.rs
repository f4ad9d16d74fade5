//! # Logging Utilities
//!
//! Logging infrastructure for cuscope using `tracing`.
//!
//! Reports are written to stdout, so every log line goes to **stderr** (and
//! optionally to a daily-rolled file). Supported:
//! - Pretty output for terminals, JSON output for log collectors
//! - Level filtering through `RUST_LOG` or an explicit level
//! - Optional file output
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use cuscope_utils::init_logging;
//!
//! // Keep the guard alive for as long as logs should be flushed to file
//! let _guard = init_logging().expect("Failed to initialize logging");
//! tracing::info!("Application started");
//! ```
//!
//! ## Environment Variables
//!
//! - `RUST_LOG`: Filter directives (e.g., `RUST_LOG=debug`, `RUST_LOG=cuscope_core=trace`)
//! - `CUSCOPE_LOG_FORMAT`: Output format (`json` or `pretty`, default: `pretty`)
//! - `CUSCOPE_LOG_FILE`: Optional path to a log file, rolled daily

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::{env, io};

use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::fmt::{self};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

/// Environment variable selecting the output format
pub const LOG_FORMAT_ENV: &str = "CUSCOPE_LOG_FORMAT";

/// Environment variable naming an optional log file
pub const LOG_FILE_ENV: &str = "CUSCOPE_LOG_FILE";

/// Level used when neither an explicit level nor `RUST_LOG` is given
///
/// Kept at `warn` so a plain run prints only the report.
pub const DEFAULT_LEVEL: Level = Level::WARN;

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat
{
    /// Pretty-printed, human-readable format
    #[default]
    Pretty,
    /// JSON lines, one object per event
    Json,
}

impl FromStr for LogFormat
{
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        match s.to_lowercase().as_str() {
            "pretty" | "dev" | "development" => Ok(LogFormat::Pretty),
            "json" | "prod" | "production" => Ok(LogFormat::Json),
            _ => Err(format!("Unknown log format: {s}. Use 'pretty' or 'json'")),
        }
    }
}

/// Log level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel
{
    Error,
    Warn,
    Info,
    Debug,
    /// Most verbose; includes abbreviation cache hits and range list details
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
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        match s.to_lowercase().as_str() {
            "error" | "err" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" | "dbg" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            _ => Err(format!(
                "Unknown log level: {s}. Use 'error', 'warn', 'info', 'debug', or 'trace'"
            )),
        }
    }
}

/// Resolved logging settings
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoggingConfig
{
    /// Explicit level; overrides `RUST_LOG` when set
    pub level: Option<LogLevel>,
    pub format: LogFormat,
    pub log_file: Option<PathBuf>,
}

impl LoggingConfig
{
    /// Read `CUSCOPE_LOG_FORMAT` and `CUSCOPE_LOG_FILE`
    ///
    /// ## Errors
    ///
    /// Returns `InvalidFormat` if `CUSCOPE_LOG_FORMAT` holds an unknown value.
    pub fn from_env() -> Result<Self, LoggingError>
    {
        let format = match env::var(LOG_FORMAT_ENV) {
            Ok(value) => LogFormat::from_str(&value).map_err(LoggingError::InvalidFormat)?,
            Err(_) => LogFormat::default(),
        };
        let log_file = env::var_os(LOG_FILE_ENV)
            .filter(|value| !value.is_empty())
            .map(PathBuf::from);

        Ok(Self {
            level: None,
            format,
            log_file,
        })
    }

    /// Apply command-line overrides on top of the environment
    #[must_use]
    pub fn with_overrides(mut self, level: Option<LogLevel>, format: Option<LogFormat>) -> Self
    {
        if level.is_some() {
            self.level = level;
        }
        if let Some(format) = format {
            self.format = format;
        }
        self
    }

    /// Build the filter for one layer
    ///
    /// Priority: explicit level, then `RUST_LOG`, then [`DEFAULT_LEVEL`].
    fn filter(&self) -> EnvFilter
    {
        if let Some(level) = self.level {
            return EnvFilter::new(Level::from(level).to_string());
        }
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LEVEL.to_string()))
    }
}

/// Keeps the background file writer alive
///
/// Dropping the guard flushes and stops file logging.
#[must_use = "dropping the guard stops file logging"]
#[derive(Debug)]
pub struct LogGuard
{
    _file: Option<WorkerGuard>,
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

fn console_layer(config: &LoggingConfig) -> BoxedLayer
{
    match config.format {
        LogFormat::Pretty => fmt::layer()
            .with_target(true)
            .with_thread_names(true)
            .with_file(true)
            .with_line_number(true)
            .with_timer(ChronoUtc::rfc_3339())
            .with_ansi(true)
            .with_writer(io::stderr)
            .with_filter(config.filter())
            .boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_target(true)
            .with_thread_names(true)
            .with_file(true)
            .with_line_number(true)
            .with_timer(ChronoUtc::rfc_3339())
            .with_current_span(true)
            .with_span_list(true)
            .with_writer(io::stderr)
            .with_filter(config.filter())
            .boxed(),
    }
}

fn file_layer(config: &LoggingConfig, path: &Path) -> (BoxedLayer, WorkerGuard)
{
    let directory = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let file_name = path.file_name().unwrap_or_default();
    let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::daily(directory, file_name));

    let layer = match config.format {
        LogFormat::Pretty => fmt::layer()
            .with_writer(writer)
            .with_target(true)
            .with_thread_names(true)
            .with_file(true)
            .with_line_number(true)
            .with_timer(ChronoUtc::rfc_3339())
            .with_ansi(false) // No ANSI in files
            .with_filter(config.filter())
            .boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_writer(writer)
            .with_target(true)
            .with_thread_names(true)
            .with_file(true)
            .with_line_number(true)
            .with_timer(ChronoUtc::rfc_3339())
            .with_current_span(true)
            .with_span_list(true)
            .with_filter(config.filter())
            .boxed(),
    };
    (layer, guard)
}

/// Initialize logging from the environment
///
/// ## Example
///
/// ```rust,no_run
/// use cuscope_utils::init_logging;
///
/// let _guard = init_logging().expect("Failed to initialize logging");
/// tracing::warn!("visible by default");
/// ```
///
/// ## Errors
///
/// Returns an error if:
/// - Logging is already initialized
/// - `CUSCOPE_LOG_FORMAT` holds an unknown value
pub fn init_logging() -> Result<LogGuard, LoggingError>
{
    init_logging_with(&LoggingConfig::from_env()?)
}

/// Initialize logging with an explicit level and format
///
/// `CUSCOPE_LOG_FILE` is still honoured.
///
/// ## Errors
///
/// Returns an error if logging is already initialized.
pub fn init_logging_with_level(level: LogLevel, format: LogFormat) -> Result<LogGuard, LoggingError>
{
    let config = LoggingConfig {
        level: Some(level),
        format,
        log_file: env::var_os(LOG_FILE_ENV).map(PathBuf::from),
    };
    init_logging_with(&config)
}

/// Initialize logging from a resolved configuration
///
/// ## Errors
///
/// Returns `InitializationFailed` if a global subscriber is already set.
pub fn init_logging_with(config: &LoggingConfig) -> Result<LogGuard, LoggingError>
{
    let mut layers: Vec<BoxedLayer> = vec![console_layer(config)];
    let mut file_guard = None;
    if let Some(path) = &config.log_file {
        let (layer, guard) = file_layer(config, path);
        layers.push(layer);
        file_guard = Some(guard);
    }

    Registry::default()
        .with(layers)
        .try_init()
        .map_err(|err| LoggingError::InitializationFailed(err.to_string()))?;

    Ok(LogGuard { _file: file_guard })
}

/// Logging initialization error
#[derive(Debug, thiserror::Error)]
pub enum LoggingError
{
    /// Invalid log format
    #[error("Invalid log format: {0}")]
    InvalidFormat(String),

    /// Failed to initialize logging
    #[error("Failed to initialize logging: {0}")]
    InitializationFailed(String),
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_log_format_from_str()
    {
        assert_eq!(LogFormat::from_str("pretty").unwrap(), LogFormat::Pretty);
        assert_eq!(LogFormat::from_str("JSON").unwrap(), LogFormat::Json);
        assert_eq!(LogFormat::from_str("dev").unwrap(), LogFormat::Pretty);
        assert_eq!(LogFormat::from_str("prod").unwrap(), LogFormat::Json);
        assert!(LogFormat::from_str("invalid").is_err());
    }

    #[test]
    fn test_log_level_from_str()
    {
        assert_eq!(LogLevel::from_str("error").unwrap(), LogLevel::Error);
        assert_eq!(LogLevel::from_str("warning").unwrap(), LogLevel::Warn);
        assert_eq!(LogLevel::from_str("info").unwrap(), LogLevel::Info);
        assert_eq!(LogLevel::from_str("dbg").unwrap(), LogLevel::Debug);
        assert_eq!(LogLevel::from_str("trace").unwrap(), LogLevel::Trace);
        assert!(LogLevel::from_str("loud").is_err());
    }

    #[test]
    fn test_log_level_to_tracing_level()
    {
        assert_eq!(Level::from(LogLevel::Error), Level::ERROR);
        assert_eq!(Level::from(LogLevel::Warn), Level::WARN);
        assert_eq!(Level::from(LogLevel::Info), Level::INFO);
        assert_eq!(Level::from(LogLevel::Debug), Level::DEBUG);
        assert_eq!(Level::from(LogLevel::Trace), Level::TRACE);
    }

    #[test]
    fn test_overrides_replace_only_given_values()
    {
        let base = LoggingConfig {
            level: None,
            format: LogFormat::Json,
            log_file: Some(PathBuf::from("/tmp/cuscope.log")),
        };

        let unchanged = base.clone().with_overrides(None, None);
        assert_eq!(unchanged, base);

        let overridden = base.with_overrides(Some(LogLevel::Debug), Some(LogFormat::Pretty));
        assert_eq!(overridden.level, Some(LogLevel::Debug));
        assert_eq!(overridden.format, LogFormat::Pretty);
        assert_eq!(overridden.log_file, Some(PathBuf::from("/tmp/cuscope.log")));
    }
}
