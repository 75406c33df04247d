//! Connection handler module
//!
//! This module handles individual client connections in TCP mode.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info};
use openssl::ssl::SslAcceptor;
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::common::{ProxyError, Result};
use crate::tls::{accept_stream, subject_string};
use super::forwarder::proxy_data;

/// Handle a single client connection
///
/// The TLS handshake is the authentication gate: it must succeed before
/// the backend is dialed, so an unauthenticated client never causes a
/// backend connection. The backend dial is bounded by `connect_timeout`;
/// on timeout or refusal the client connection is closed and the session
/// aborted without retry.
pub async fn handle_connection(
    client_stream: TcpStream,
    target_addr: SocketAddr,
    tls_acceptor: Arc<SslAcceptor>,
    connect_timeout: Duration,
) -> Result<()> {
    let stream = accept_stream(client_stream, &tls_acceptor).await?;

    if let Some(cert) = stream.ssl().peer_certificate() {
        info!("Client certificate subject: {}", subject_string(&cert));
    }

    // Connect to the target service with a bounded timeout
    let target_stream = timeout(connect_timeout, TcpStream::connect(target_addr))
        .await
        .map_err(|_| {
            ProxyError::Io(io::Error::new(
                io::ErrorKind::TimedOut,
                "Backend connection timed out",
            ))
        })?
        .map_err(ProxyError::Io)?;

    debug!("Connected to target {}", target_addr);

    // Forward data between client and target service
    proxy_data(stream, target_stream).await
}
