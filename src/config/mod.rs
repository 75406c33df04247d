//! Configuration module
//!
//! Typed configuration schema plus a validation pass that runs before the
//! core components are constructed. Values come from defaults, an optional
//! JSON file, and command-line/environment overrides, merged in that order.

pub mod error;
pub mod types;
pub mod validator;

pub use error::ConfigError;
pub use types::{ProxyConfig, ProxyMode, ENV_PREFIX};
pub use validator::validate_config;
