//! # wdbg Utilities
//!
//! Shared helpers for the wdbg workspace, mainly the `tracing` subscriber
//! setup used by the command line front end.

pub mod logging;

// Re-export commonly used logging items for convenience
pub use logging::{init_logging, LogConfig, LogFormat, LogLevel, LoggingError};
pub use tracing::{debug, error, info, trace, warn};
