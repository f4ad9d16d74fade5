//! # cuscope Utilities
//!
//! Shared logging setup and configuration for the cuscope workspace.
//!
//! Logging is built on `tracing`; see [`logging`] for the environment
//! variables it reads.

pub mod logging;

// Re-export commonly used logging functions for convenience
pub use logging::{
    init_logging, init_logging_with, init_logging_with_level, LogFormat, LogGuard, LogLevel, LoggingConfig, LoggingError,
};
pub use tracing::{debug, error, info, trace, warn};
