//! Configuration validator
//!
//! Validates a fully merged configuration before any component is
//! constructed. Everything rejected here is a fatal startup error; nothing
//! in this module is reachable once the proxy is serving traffic.

use std::path::Path;

use crate::config::error::{ConfigError, Result};
use crate::config::types::{ProxyConfig, ProxyMode};
use crate::proxy::target::HttpTarget;

/// Validate the configuration
pub fn validate_config(config: &ProxyConfig) -> Result<()> {
    validate_backend(config)?;
    validate_certificate_settings(config)?;
    validate_general_settings(config)?;

    Ok(())
}

/// Validate the backend address for the active mode
///
/// The backend must be fully resolvable at startup; an ambiguous route is a
/// configuration error, never a per-connection one.
fn validate_backend(config: &ProxyConfig) -> Result<()> {
    if config.backend.is_empty() {
        return Err(ConfigError::Missing("backend".to_string()));
    }

    match config.mode {
        ProxyMode::Tcp => {
            crate::common::parse_socket_addr(&config.backend).map_err(|e| {
                ConfigError::InvalidValue("backend".to_string(), e.to_string())
            })?;
        }
        ProxyMode::Http => {
            HttpTarget::resolve(&config.backend)?;
        }
    }

    Ok(())
}

/// Validate certificate settings
fn validate_certificate_settings(config: &ProxyConfig) -> Result<()> {
    if config.cert.as_os_str().is_empty() {
        return Err(ConfigError::Missing("cert".to_string()));
    }
    if config.cert_key.as_os_str().is_empty() {
        return Err(ConfigError::Missing("cert-key".to_string()));
    }
    if config.client_ca.as_os_str().is_empty() {
        return Err(ConfigError::Missing("client-ca".to_string()));
    }

    validate_file_exists(&config.cert, "cert")?;
    validate_file_exists(&config.cert_key, "cert-key")?;
    validate_file_exists(&config.client_ca, "client-ca")?;

    if let Some(server_ca) = &config.server_ca {
        validate_file_exists(server_ca, "server-ca")?;
    }

    Ok(())
}

/// Validate general settings
fn validate_general_settings(config: &ProxyConfig) -> Result<()> {
    crate::common::parse_socket_addr(&config.listen)
        .map_err(|e| ConfigError::InvalidValue("listen".to_string(), e.to_string()))?;

    if config.connect_timeout == 0 {
        return Err(ConfigError::InvalidValue(
            "connect-timeout".to_string(),
            "Connect timeout must be greater than 0".to_string(),
        ));
    }

    match config.log_level.as_str() {
        "error" | "warn" | "info" | "debug" | "trace" => {}
        level => {
            return Err(ConfigError::InvalidValue(
                "log-level".to_string(),
                format!("Invalid log level: {}", level),
            ));
        }
    }

    Ok(())
}

fn validate_file_exists(path: &Path, name: &str) -> Result<()> {
    if !path.is_file() {
        return Err(ConfigError::InvalidValue(
            name.to_string(),
            format!("File not found: {:?}", path),
        ));
    }

    Ok(())
}
