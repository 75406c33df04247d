//! HTTP forwarding proxy
//!
//! Terminates mTLS exactly like the TCP proxy, then forwards each inbound
//! request to the resolved backend over a shared, connection-pooling
//! transport. Requests are rewritten to the backend scheme and authority;
//! path, query, status and headers pass through verbatim and bodies are
//! streamed, never buffered.

use std::convert::Infallible;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::TryStreamExt;
use http::header::{self, HeaderMap, HeaderName, HeaderValue};
use http::{Request, Response, StatusCode};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, BodyStream, Full, StreamBody};
use hyper::body::{Body, Frame, Incoming};
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use log::{debug, error, info, warn};
use openssl::ssl::SslAcceptor;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::common::{ProxyError, Result};
use crate::tls::{accept_stream, subject_string, TlsPolicy};
use super::target::HttpTarget;

/// Backend dial timeout
const DIAL_TIMEOUT: Duration = Duration::from_secs(30);

/// TCP keep-alive interval for backend connections
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// Maximum number of idle pooled connections
const MAX_IDLE_CONNS: usize = 100;

/// Idle pooled connection timeout
const IDLE_CONN_TIMEOUT: Duration = Duration::from_secs(90);

/// Response body type relayed to clients
type ProxyBody = UnsyncBoxBody<Bytes, io::Error>;

/// Build the shared backend transport
///
/// One pooled client serves every request for the life of the process.
/// Standard proxy environment variables (`HTTP_PROXY`, `HTTPS_PROXY`,
/// `NO_PROXY`) are honored. For an https backend the proxy presents its
/// own identity as client certificate; the `server-ca` bundle verifies the
/// backend when configured, otherwise backend verification is disabled.
pub fn build_transport(policy: &TlsPolicy) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .connect_timeout(DIAL_TIMEOUT)
        .tcp_keepalive(KEEPALIVE_INTERVAL)
        .pool_max_idle_per_host(MAX_IDLE_CONNS)
        .pool_idle_timeout(IDLE_CONN_TIMEOUT)
        // A proxy relays redirects instead of chasing them
        .redirect(reqwest::redirect::Policy::none())
        .min_tls_version(reqwest::tls::Version::TLS_1_2)
        .identity(policy.client_identity()?);

    match policy.backend_root_certs()? {
        Some(roots) => {
            builder = builder.tls_built_in_root_certs(false);
            for root in roots {
                builder = builder.add_root_certificate(root);
            }
        }
        None => {
            builder = builder.danger_accept_invalid_certs(true);
        }
    }

    builder
        .build()
        .map_err(|e| ProxyError::Http(format!("Failed to build HTTP transport: {}", e)))
}

/// HTTP forwarding proxy
///
/// Shares the session-per-connection accept loop with the TCP proxy; each
/// accepted connection handshakes against the same TLS acceptor and is
/// then served by an HTTP/1.1 connection handler.
pub struct HttpProxy {
    /// Listen address for the proxy server
    listen_addr: SocketAddr,
    /// Resolved backend destination
    target: HttpTarget,
    /// TLS acceptor for handling secure connections
    tls_acceptor: Arc<SslAcceptor>,
    /// Pooled backend transport
    client: reqwest::Client,
    /// Optional admission limiter; `None` means unbounded sessions
    limiter: Option<Arc<Semaphore>>,
}

impl HttpProxy {
    /// Create a new HTTP proxy instance
    ///
    /// # Parameters
    ///
    /// * `listen_addr` - Listen address
    /// * `target` - Resolved backend destination
    /// * `tls_acceptor` - TLS acceptor shared by all connections
    /// * `client` - Pooled backend transport from [`build_transport`]
    /// * `max_connections` - Concurrent session cap; 0 means unbounded
    pub fn new(
        listen_addr: impl Into<SocketAddr>,
        target: HttpTarget,
        tls_acceptor: SslAcceptor,
        client: reqwest::Client,
        max_connections: usize,
    ) -> Self {
        Self {
            listen_addr: listen_addr.into(),
            target,
            tls_acceptor: Arc::new(tls_acceptor),
            client,
            limiter: super::admission_limiter(max_connections),
        }
    }

    /// Start the proxy service
    ///
    /// # Errors
    ///
    /// Returns an error if it cannot bind to the listen address.
    pub async fn run(&self) -> Result<()> {
        let listener = TcpListener::bind(self.listen_addr).await
            .map_err(ProxyError::Io)?;

        info!("HTTP proxy started, listening on {}", self.listen_addr);
        info!(
            "Forwarding to {}://{}",
            self.target.scheme,
            self.target.authority()
        );

        let mut tasks: JoinSet<Result<()>> = JoinSet::new();

        loop {
            while let Some(result) = tasks.try_join_next() {
                match result {
                    Ok(Err(e)) => debug!("Connection ended with error: {}", e),
                    Err(e) => error!("Task error: {}", e),
                    Ok(Ok(())) => {}
                }
            }

            let permit = match &self.limiter {
                Some(limiter) => match limiter.clone().acquire_owned().await {
                    Ok(permit) => Some(permit),
                    Err(_) => break,
                },
                None => None,
            };

            match listener.accept().await {
                Ok((stream, client_addr)) => {
                    debug!("New connection attempt from {}", client_addr);

                    let tls_acceptor = Arc::clone(&self.tls_acceptor);
                    let target = self.target.clone();
                    let client = self.client.clone();

                    tasks.spawn(async move {
                        let _permit = permit;
                        serve_connection(stream, tls_acceptor, target, client).await
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

/// Serve one accepted connection
///
/// The TLS handshake gates everything: a client that fails
/// client-certificate verification is dropped before any HTTP parsing.
async fn serve_connection(
    stream: TcpStream,
    tls_acceptor: Arc<SslAcceptor>,
    target: HttpTarget,
    client: reqwest::Client,
) -> Result<()> {
    let tls_stream = accept_stream(stream, &tls_acceptor).await?;

    if let Some(cert) = tls_stream.ssl().peer_certificate() {
        info!("Client certificate subject: {}", subject_string(&cert));
    }

    let io = TokioIo::new(tls_stream);
    let service = service_fn(move |request: Request<Incoming>| {
        let target = target.clone();
        let client = client.clone();
        async move { forward_request(request, target, client).await }
    });

    hyper::server::conn::http1::Builder::new()
        .serve_connection(io, service)
        .await
        .map_err(|e| ProxyError::Http(e.to_string()))
}

/// Forward one request and relay the outcome
///
/// Never fails the connection itself: a transport error becomes a 503
/// response carrying the error text, with no retry and no alternate
/// backend.
async fn forward_request(
    request: Request<Incoming>,
    target: HttpTarget,
    client: reqwest::Client,
) -> std::result::Result<Response<ProxyBody>, Infallible> {
    match proxy_request(request, &target, &client).await {
        Ok(response) => Ok(response),
        Err(e) => {
            warn!("Backend request failed: {}", e);
            Ok(error_response(&e))
        }
    }
}

/// Rewrite and forward one request over the pooled transport
async fn proxy_request(
    request: Request<Incoming>,
    target: &HttpTarget,
    client: &reqwest::Client,
) -> Result<Response<ProxyBody>> {
    let (parts, body) = request.into_parts();

    // Destination rewrite: backend scheme and authority, path and query
    // preserved verbatim.
    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let url = target.url_for(path_and_query);
    debug!("{} {} -> {}", parts.method, parts.uri, url);

    let mut headers = parts.headers;
    strip_hop_by_hop(&mut headers);
    // The Host header names the backend, port included
    headers.insert(
        header::HOST,
        HeaderValue::from_str(&target.authority())
            .map_err(|e| ProxyError::Http(e.to_string()))?,
    );

    let mut builder = client.request(parts.method, url).headers(headers);
    if !body.is_end_stream() {
        // Stream the request body through; nothing is materialized
        let body_stream =
            BodyStream::new(body).try_filter_map(|frame| async move { Ok(frame.into_data().ok()) });
        builder = builder.body(reqwest::Body::wrap_stream(body_stream));
    }

    let backend_response = builder
        .send()
        .await
        .map_err(|e| ProxyError::Http(e.to_string()))?;

    // Status and headers are copied verbatim, then the body is streamed to
    // the client. A copy failure mid-body fails the connection; headers
    // are already on the wire at that point.
    let status = backend_response.status();
    let headers = backend_response.headers().clone();
    let body_stream = backend_response
        .bytes_stream()
        .map_ok(Frame::data)
        .map_err(io::Error::other);

    let mut response = Response::new(StreamBody::new(body_stream).boxed_unsync());
    *response.status_mut() = status;
    *response.headers_mut() = headers;

    Ok(response)
}

/// Build the 503 response returned for backend failures
fn error_response(err: &ProxyError) -> Response<ProxyBody> {
    let body = Full::new(Bytes::from(err.to_string()))
        .map_err(|never| match never {})
        .boxed_unsync();

    let mut response = Response::new(body);
    *response.status_mut() = StatusCode::SERVICE_UNAVAILABLE;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );

    response
}

/// Strip hop-by-hop headers before handing the request to the transport
///
/// These describe the client-to-proxy connection, not the request; the
/// transport manages its own connection semantics and framing.
fn strip_hop_by_hop(headers: &mut HeaderMap) {
    headers.remove(header::CONNECTION);
    headers.remove(header::TE);
    headers.remove(header::TRAILER);
    headers.remove(header::TRANSFER_ENCODING);
    headers.remove(header::UPGRADE);
    headers.remove(HeaderName::from_static("keep-alive"));
    headers.remove(HeaderName::from_static("proxy-connection"));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_response_is_503_with_body() {
        let response = error_response(&ProxyError::Http("connection refused".to_string()));
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "text/plain; charset=utf-8"
        );
    }

    #[test]
    fn test_strip_hop_by_hop() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
        headers.insert(
            HeaderName::from_static("keep-alive"),
            HeaderValue::from_static("timeout=5"),
        );
        headers.insert(header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("12"));

        strip_hop_by_hop(&mut headers);

        assert!(headers.get(header::CONNECTION).is_none());
        assert!(headers.get("keep-alive").is_none());
        assert!(headers.get(header::TRANSFER_ENCODING).is_none());
        // End-to-end headers survive
        assert!(headers.get(header::CONTENT_TYPE).is_some());
        assert!(headers.get(header::CONTENT_LENGTH).is_some());
    }
}
