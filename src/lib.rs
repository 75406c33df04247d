//! mTLS terminating proxy
//!
//! This library implements an identity-aware gateway placed in front of a
//! backend that expects plain TCP or plain HTTP. Inbound connections must
//! complete a TLS handshake with a verified client certificate before a
//! single byte is forwarded; the backend never has to implement TLS or
//! certificate verification itself.
//!
//! # Main Features
//!
//! - Mandatory client-certificate verification on every inbound connection
//! - Raw TCP byte-stream forwarding to a single backend (`tcp` mode)
//! - HTTP request/response forwarding over a pooled transport (`http` mode)
//! - Pinned AEAD cipher policy with session tickets disabled
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use mtls_proxy::config::ProxyConfig;
//! use mtls_proxy::proxy::TcpProxy;
//! use mtls_proxy::tls::{build_tls_acceptor, TlsPolicy};
//!
//! #[tokio::main]
//! async fn main() -> mtls_proxy::Result<()> {
//!     let config = ProxyConfig {
//!         backend: "127.0.0.1:6000".to_string(),
//!         cert: "certs/server.crt".into(),
//!         cert_key: "certs/server.key".into(),
//!         client_ca: "certs/ca.crt".into(),
//!         ..ProxyConfig::default()
//!     };
//!
//!     let policy = TlsPolicy::from_config(&config)?;
//!     let tls_acceptor = build_tls_acceptor(&policy)?;
//!
//!     let proxy = TcpProxy::new(
//!         "0.0.0.0:443".parse::<std::net::SocketAddr>().unwrap(),
//!         "127.0.0.1:6000".parse::<std::net::SocketAddr>().unwrap(),
//!         tls_acceptor,
//!         Duration::from_secs(10),
//!         0,
//!     );
//!
//!     proxy.run().await
//! }
//! ```

// Public modules
pub mod common;
pub mod config;
pub mod proxy;
pub mod tls;

// Re-export commonly used structures and functions for convenience
pub use common::{parse_socket_addr, ProxyError, Result};
pub use proxy::{HttpProxy, TcpProxy};
pub use tls::{build_tls_acceptor, TlsPolicy};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
