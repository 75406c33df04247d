//! Proxy service module
//!
//! This module implements the core functionality of the proxy service:
//! TLS termination on the listen address, raw TCP splicing in `tcp` mode
//! and per-request forwarding in `http` mode. Sessions are fully
//! independent tasks; the only shared state is the TLS acceptor and, in
//! HTTP mode, the pooled backend transport.

pub mod http;
pub mod server;
pub mod target;

mod forwarder;
mod handler;

use std::sync::Arc;

use tokio::sync::Semaphore;

pub use http::{build_transport, HttpProxy};
pub use server::{ConnectionInfo, TcpProxy};
pub use target::{BackendScheme, HttpTarget};

/// Admission policy for inbound sessions
///
/// A cap of 0 preserves the reference behavior: every accepted connection
/// immediately gets its own session, unbounded. A non-zero cap bounds the
/// number of concurrent sessions; accepting stalls while the cap is
/// reached.
pub(crate) fn admission_limiter(max_connections: usize) -> Option<Arc<Semaphore>> {
    (max_connections > 0).then(|| Arc::new(Semaphore::new(max_connections)))
}
