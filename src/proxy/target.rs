//! Backend target resolution
//!
//! The configured backend address is parsed into a canonical destination
//! exactly once at startup. An address that cannot be resolved to a scheme
//! and `host:port` pair is a fatal configuration error, never a
//! per-request one.

use crate::config::error::{ConfigError, Result};

/// Scheme used when dialing the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendScheme {
    /// Plain HTTP
    Http,
    /// HTTPS; the outbound TLS client role applies
    Https,
}

impl std::fmt::Display for BackendScheme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendScheme::Http => write!(f, "http"),
            BackendScheme::Https => write!(f, "https"),
        }
    }
}

/// Canonical HTTP backend destination
///
/// All requests are rewritten to this scheme and authority; path and query
/// pass through untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpTarget {
    /// Backend scheme
    pub scheme: BackendScheme,
    /// Backend host (IPv6 literals keep their brackets)
    pub host: String,
    /// Backend port
    pub port: u16,
}

impl HttpTarget {
    /// `host:port` form used for the rewritten Host header
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Full backend URL for a given path-and-query
    pub fn url_for(&self, path_and_query: &str) -> String {
        format!("{}://{}:{}{}", self.scheme, self.host, self.port, path_and_query)
    }

    /// Resolve a configured backend address into a canonical destination
    ///
    /// Port/scheme inference, kept bug-for-bug compatible with the
    /// reference behavior:
    ///
    /// * explicit port `80` or `443` → scheme `http`, regardless of any
    ///   scheme in the address (`443` mapping to `http` rather than
    ///   `https` is a known quirk, preserved on purpose and pinned by
    ///   tests; do not "fix" it here);
    /// * any other explicit port → the scheme must be given;
    /// * no port → `80` for `http`, `443` for `https`;
    /// * neither scheme nor port → error.
    pub fn resolve(backend: &str) -> Result<Self> {
        let (scheme, rest) = match backend.split_once("://") {
            Some((scheme, rest)) => (Some(scheme.to_lowercase()), rest),
            None => (None, backend),
        };

        // Only scheme and authority route traffic; a path in the backend
        // address is ignored.
        let authority = rest
            .split(['/', '?', '#'])
            .next()
            .unwrap_or_default();
        if authority.is_empty() {
            return Err(ConfigError::InvalidValue(
                "backend".to_string(),
                format!("No host in backend address: {}", backend),
            ));
        }

        let (host, port) = split_host_port(authority)?;

        let (scheme, port) = match (scheme.as_deref(), port) {
            (_, Some(80)) => (BackendScheme::Http, 80),
            (_, Some(443)) => (BackendScheme::Http, 443),
            (Some("http"), Some(port)) => (BackendScheme::Http, port),
            (Some("https"), Some(port)) => (BackendScheme::Https, port),
            (Some(other), Some(_)) => {
                return Err(ConfigError::InvalidValue(
                    "backend".to_string(),
                    format!("Unsupported scheme: {}", other),
                ));
            }
            (None, Some(port)) => {
                return Err(ConfigError::InvalidValue(
                    "backend".to_string(),
                    format!("Cannot guess the scheme for port {}", port),
                ));
            }
            (Some("http"), None) => (BackendScheme::Http, 80),
            (Some("https"), None) => (BackendScheme::Https, 443),
            (Some(other), None) => {
                return Err(ConfigError::InvalidValue(
                    "backend".to_string(),
                    format!("Cannot guess the default port for scheme {}", other),
                ));
            }
            (None, None) => {
                return Err(ConfigError::InvalidValue(
                    "backend".to_string(),
                    "Cannot guess the scheme when no port is given".to_string(),
                ));
            }
        };

        Ok(Self { scheme, host, port })
    }
}

/// Split an authority into host and optional port
fn split_host_port(authority: &str) -> Result<(String, Option<u16>)> {
    let invalid = |detail: String| ConfigError::InvalidValue("backend".to_string(), detail);

    if let Some(rest) = authority.strip_prefix('[') {
        // Bracketed IPv6 literal
        let (host, after) = rest
            .split_once(']')
            .ok_or_else(|| invalid(format!("Unterminated IPv6 literal: {}", authority)))?;
        let host = format!("[{}]", host);

        return match after.strip_prefix(':') {
            Some(port) => {
                let port = port
                    .parse::<u16>()
                    .map_err(|_| invalid(format!("Invalid port: {}", port)))?;
                Ok((host, Some(port)))
            }
            None if after.is_empty() => Ok((host, None)),
            None => Err(invalid(format!("Malformed authority: {}", authority))),
        };
    }

    match authority.rsplit_once(':') {
        Some((host, _)) if host.contains(':') => {
            Err(invalid(format!("IPv6 hosts must be bracketed: {}", authority)))
        }
        Some((host, port)) => {
            let port = port
                .parse::<u16>()
                .map_err(|_| invalid(format!("Invalid port: {}", port)))?;
            Ok((host.to_string(), Some(port)))
        }
        None => Ok((authority.to_string(), None)),
    }
}
