//! Configuration error types

use thiserror::Error;
use std::io;

/// Configuration error type
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A required configuration value was not provided
    #[error("missing required configuration: {0}")]
    Missing(String),

    /// A configuration value is present but invalid
    #[error("invalid value for {0}: {1}")]
    InvalidValue(String, String),

    /// Configuration file could not be read
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Configuration file could not be parsed
    #[error("failed to parse configuration file: {0}")]
    Parse(String),
}

/// Result type alias for configuration operations
pub type Result<T> = std::result::Result<T, ConfigError>;
