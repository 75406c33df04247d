//! Configuration types
//!
//! This module contains the main configuration types used throughout the application.

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::error::{ConfigError, Result};

/// Forwarding mode
///
/// `Tcp` splices raw bytes between the TLS client and the backend.
/// `Http` forwards individual HTTP exchanges over a pooled transport.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ProxyMode {
    /// Raw TCP byte-stream forwarding
    Tcp,
    /// HTTP request/response forwarding
    Http,
}

impl Default for ProxyMode {
    fn default() -> Self {
        ProxyMode::Tcp
    }
}

impl std::fmt::Display for ProxyMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProxyMode::Tcp => write!(f, "tcp"),
            ProxyMode::Http => write!(f, "http"),
        }
    }
}

impl FromStr for ProxyMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "tcp" => Ok(Self::Tcp),
            "http" => Ok(Self::Http),
            _ => Err(ConfigError::InvalidValue(
                "mode".to_string(),
                format!("Invalid proxy mode: {}. Valid values are: tcp, http", s),
            )),
        }
    }
}

/// Default listen address
pub const LISTEN_STR: &str = "0.0.0.0:443";

/// Default log level
pub const LOG_LEVEL_STR: &str = "info";

/// Default backend connect timeout in seconds
pub const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Environment variable prefix for all configuration options
pub const ENV_PREFIX: &str = "MTLS_PROXY_";

/// Proxy configuration
///
/// Built once at startup from defaults, an optional JSON file and
/// command-line/environment overrides, then validated before any
/// component is constructed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct ProxyConfig {
    /// Destination host[:port] or URL traffic is forwarded to
    pub backend: String,

    /// CA bundle used to verify a TLS backend (outbound client role).
    /// Unset means backend certificate verification is disabled.
    pub server_ca: Option<PathBuf>,

    /// Bind address for inbound connections
    pub listen: String,

    /// Path to this proxy's identity certificate (PEM)
    pub cert: PathBuf,

    /// Path to the identity private key (PEM)
    pub cert_key: PathBuf,

    /// Passphrase for the identity private key
    pub cert_key_pass: Option<String>,

    /// CA bundle used to verify client certificates
    pub client_ca: PathBuf,

    /// Forwarding mode
    pub mode: ProxyMode,

    /// Log level
    pub log_level: String,

    /// Backend connect timeout in seconds (TCP mode)
    pub connect_timeout: u64,

    /// Maximum number of concurrent sessions; 0 means unbounded
    pub max_connections: usize,

    /// [UNSECURE] File where TLS session secrets are dumped. Debug only.
    pub unsecure_key_log_path: Option<PathBuf>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            backend: String::new(),
            server_ca: None,
            listen: LISTEN_STR.to_string(),
            cert: PathBuf::new(),
            cert_key: PathBuf::new(),
            cert_key_pass: None,
            client_ca: PathBuf::new(),
            mode: ProxyMode::default(),
            log_level: LOG_LEVEL_STR.to_string(),
            connect_timeout: CONNECT_TIMEOUT_SECS,
            max_connections: 0,
            unsecure_key_log_path: None,
        }
    }
}

impl ProxyConfig {
    /// Load configuration from a JSON file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;

        serde_json::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Merge another configuration into this one
    ///
    /// Fields of `other` that differ from the defaults override the
    /// corresponding fields of `self`, so later sources win.
    pub fn merge(mut self, other: ProxyConfig) -> Self {
        let defaults = ProxyConfig::default();

        if other.backend != defaults.backend {
            self.backend = other.backend;
        }
        if other.server_ca != defaults.server_ca {
            self.server_ca = other.server_ca;
        }
        if other.listen != defaults.listen {
            self.listen = other.listen;
        }
        if other.cert != defaults.cert {
            self.cert = other.cert;
        }
        if other.cert_key != defaults.cert_key {
            self.cert_key = other.cert_key;
        }
        if other.cert_key_pass != defaults.cert_key_pass {
            self.cert_key_pass = other.cert_key_pass;
        }
        if other.client_ca != defaults.client_ca {
            self.client_ca = other.client_ca;
        }
        if other.mode != defaults.mode {
            self.mode = other.mode;
        }
        if other.log_level != defaults.log_level {
            self.log_level = other.log_level;
        }
        if other.connect_timeout != defaults.connect_timeout {
            self.connect_timeout = other.connect_timeout;
        }
        if other.max_connections != defaults.max_connections {
            self.max_connections = other.max_connections;
        }
        if other.unsecure_key_log_path != defaults.unsecure_key_log_path {
            self.unsecure_key_log_path = other.unsecure_key_log_path;
        }

        self
    }

    /// Validate the configuration
    ///
    /// See [`crate::config::validator::validate_config`].
    pub fn validate(&self) -> Result<()> {
        crate::config::validator::validate_config(self)
    }
}
