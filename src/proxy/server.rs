//! TCP proxy server module
//!
//! This module implements the TCP forwarding proxy: TLS termination on the
//! listen address and raw byte splicing between clients and the target
//! service.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use log::{debug, error, info};
use openssl::ssl::SslAcceptor;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::common::{ProxyError, Result};
use super::handler::handle_connection;

/// Connection information
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    /// Source address
    pub source: String,
    /// Target address
    pub target: String,
    /// Connection timestamp
    pub timestamp: SystemTime,
}

/// TCP forwarding proxy
///
/// Accepts TLS-wrapped connections, performs the handshake (which verifies
/// the client certificate), then splices bytes bidirectionally with a
/// freshly dialed backend connection. Sessions are fully independent; the
/// only state they share is the TLS acceptor.
pub struct TcpProxy {
    /// Listen address for the proxy server
    listen_addr: SocketAddr,
    /// Target service address to forward traffic to
    target_addr: SocketAddr,
    /// TLS acceptor for handling secure connections
    tls_acceptor: Arc<SslAcceptor>,
    /// Backend connect timeout
    connect_timeout: Duration,
    /// Optional admission limiter; `None` means unbounded sessions
    limiter: Option<Arc<Semaphore>>,
}

impl TcpProxy {
    /// Create a new TCP proxy instance
    ///
    /// # Parameters
    ///
    /// * `listen_addr` - Listen address
    /// * `target_addr` - Target service address
    /// * `tls_acceptor` - TLS acceptor shared by all connections
    /// * `connect_timeout` - Backend connect timeout
    /// * `max_connections` - Concurrent session cap; 0 means unbounded
    pub fn new(
        listen_addr: impl Into<SocketAddr>,
        target_addr: impl Into<SocketAddr>,
        tls_acceptor: SslAcceptor,
        connect_timeout: Duration,
        max_connections: usize,
    ) -> Self {
        Self {
            listen_addr: listen_addr.into(),
            target_addr: target_addr.into(),
            tls_acceptor: Arc::new(tls_acceptor),
            connect_timeout,
            limiter: super::admission_limiter(max_connections),
        }
    }

    /// Start the proxy service
    ///
    /// Binds the listen address and accepts connections until the process
    /// is interrupted, dispatching each accepted connection to its own
    /// task. With no admission cap configured every connection is admitted
    /// immediately; this is an explicit capacity trade-off inherited from
    /// the reference behavior.
    ///
    /// # Errors
    ///
    /// Returns an error if it cannot bind to the listen address.
    pub async fn run(&self) -> Result<()> {
        let listener = TcpListener::bind(self.listen_addr).await
            .map_err(ProxyError::Io)?;

        info!("TCP proxy started, listening on {}", self.listen_addr);
        info!("Forwarding to {}", self.target_addr);

        // Track session tasks so completed ones can be drained and logged
        let mut tasks: JoinSet<Result<()>> = JoinSet::new();

        loop {
            // Check for completed sessions and log any errors
            while let Some(result) = tasks.try_join_next() {
                match result {
                    Ok(Err(e)) => debug!("Session ended with error: {}", e),
                    Err(e) => error!("Task error: {}", e),
                    Ok(Ok(())) => {}
                }
            }

            // With a cap configured, wait for a free slot before accepting
            let permit = match &self.limiter {
                Some(limiter) => match limiter.clone().acquire_owned().await {
                    Ok(permit) => Some(permit),
                    Err(_) => break,
                },
                None => None,
            };

            match listener.accept().await {
                Ok((client_stream, client_addr)) => {
                    debug!("New connection attempt from {}", client_addr);

                    let conn_info = ConnectionInfo {
                        source: client_addr.to_string(),
                        target: self.target_addr.to_string(),
                        timestamp: SystemTime::now(),
                    };

                    // Clone necessary data for use in the new task
                    let tls_acceptor = Arc::clone(&self.tls_acceptor);
                    let target_addr = self.target_addr;
                    let connect_timeout = self.connect_timeout;

                    tasks.spawn(async move {
                        let _permit = permit;
                        debug!(
                            "Starting to handle connection: {} -> {}",
                            conn_info.source, conn_info.target
                        );

                        let result =
                            handle_connection(client_stream, target_addr, tls_acceptor, connect_timeout)
                                .await;

                        if let Ok(duration) = SystemTime::now().duration_since(conn_info.timestamp) {
                            debug!("Connection duration: {} ms", duration.as_millis());
                        }

                        result
                    });
                }
                Err(e) => {
                    error!("Error accepting connection: {}", e);
                }
            }
        }

        Ok(())
    }
}
