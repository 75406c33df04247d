//! Shared helpers for integration tests: a throwaway PKI generated at test
//! time, fake backends that count the connections they receive, and small
//! client utilities.

#![allow(dead_code)]

use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::{HeaderValue, Request, Response, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use openssl::asn1::{Asn1Integer, Asn1Time};
use openssl::bn::{BigNum, MsbOption};
use openssl::hash::MessageDigest;
use openssl::pkey::{PKey, Private};
use openssl::rsa::Rsa;
use openssl::ssl::{SslConnector, SslMethod, SslVerifyMode};
use openssl::x509::extension::{BasicConstraints, SubjectAlternativeName};
use openssl::x509::{X509Builder, X509NameBuilder, X509};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_openssl::SslStream;

use mtls_proxy::config::{ProxyConfig, ProxyMode};

/// A certificate authority generated for one test run
pub struct TestCa {
    pub cert: X509,
    pub key: PKey<Private>,
}

fn random_serial() -> Asn1Integer {
    let mut serial = BigNum::new().unwrap();
    serial.rand(127, MsbOption::MAYBE_ZERO, false).unwrap();
    serial.to_asn1_integer().unwrap()
}

pub fn make_ca(cn: &str) -> TestCa {
    let key = PKey::from_rsa(Rsa::generate(2048).unwrap()).unwrap();

    let mut name = X509NameBuilder::new().unwrap();
    name.append_entry_by_text("CN", cn).unwrap();
    let name = name.build();

    let mut builder = X509Builder::new().unwrap();
    builder.set_version(2).unwrap();
    builder.set_subject_name(&name).unwrap();
    builder.set_issuer_name(&name).unwrap();
    builder.set_pubkey(&key).unwrap();
    builder.set_serial_number(&random_serial()).unwrap();
    builder
        .set_not_before(&Asn1Time::days_from_now(0).unwrap())
        .unwrap();
    builder
        .set_not_after(&Asn1Time::days_from_now(1).unwrap())
        .unwrap();
    builder
        .append_extension(BasicConstraints::new().critical().ca().build().unwrap())
        .unwrap();
    builder.sign(&key, MessageDigest::sha256()).unwrap();

    TestCa {
        cert: builder.build(),
        key,
    }
}

/// Issue a leaf certificate signed by `ca`
pub fn issue_cert(ca: &TestCa, cn: &str) -> (X509, PKey<Private>) {
    let key = PKey::from_rsa(Rsa::generate(2048).unwrap()).unwrap();

    let mut name = X509NameBuilder::new().unwrap();
    name.append_entry_by_text("CN", cn).unwrap();
    let name = name.build();

    let mut builder = X509Builder::new().unwrap();
    builder.set_version(2).unwrap();
    builder.set_subject_name(&name).unwrap();
    builder.set_issuer_name(ca.cert.subject_name()).unwrap();
    builder.set_pubkey(&key).unwrap();
    builder.set_serial_number(&random_serial()).unwrap();
    builder
        .set_not_before(&Asn1Time::days_from_now(0).unwrap())
        .unwrap();
    builder
        .set_not_after(&Asn1Time::days_from_now(1).unwrap())
        .unwrap();

    let san = {
        let ctx = builder.x509v3_context(Some(&*ca.cert), None);
        SubjectAlternativeName::new()
            .dns("localhost")
            .ip("127.0.0.1")
            .build(&ctx)
            .unwrap()
    };
    builder.append_extension(san).unwrap();
    builder.sign(&ca.key, MessageDigest::sha256()).unwrap();

    (builder.build(), key)
}

/// One client identity kept in memory as PEM
pub struct ClientCreds {
    pub cert: X509,
    pub key: PKey<Private>,
    pub cert_pem: Vec<u8>,
    pub key_pem: Vec<u8>,
}

impl ClientCreds {
    fn new(cert: X509, key: PKey<Private>) -> Self {
        let cert_pem = cert.to_pem().unwrap();
        let key_pem = key.private_key_to_pem_pkcs8().unwrap();
        Self {
            cert,
            key,
            cert_pem,
            key_pem,
        }
    }
}

/// A full test PKI written to a temporary directory
///
/// `client` is signed by the CA the proxy trusts; `rogue` is signed by an
/// unrelated CA and must never pass the handshake.
pub struct TestPki {
    pub dir: tempfile::TempDir,
    pub server_cert: PathBuf,
    pub server_key: PathBuf,
    pub client_ca: PathBuf,
    pub client: ClientCreds,
    pub rogue: ClientCreds,
}

pub fn build_pki() -> TestPki {
    let ca = make_ca("mtls-proxy test ca");
    let (server_cert, server_key) = issue_cert(&ca, "proxy");
    let (client_cert, client_key) = issue_cert(&ca, "trusted client");

    let rogue_ca = make_ca("rogue ca");
    let (rogue_cert, rogue_key) = issue_cert(&rogue_ca, "rogue client");

    let dir = tempfile::TempDir::new().unwrap();
    let server_cert_path = dir.path().join("server.crt");
    let server_key_path = dir.path().join("server.key");
    let client_ca_path = dir.path().join("ca.crt");

    std::fs::write(&server_cert_path, server_cert.to_pem().unwrap()).unwrap();
    std::fs::write(
        &server_key_path,
        server_key.private_key_to_pem_pkcs8().unwrap(),
    )
    .unwrap();
    std::fs::write(&client_ca_path, ca.cert.to_pem().unwrap()).unwrap();

    TestPki {
        dir,
        server_cert: server_cert_path,
        server_key: server_key_path,
        client_ca: client_ca_path,
        client: ClientCreds::new(client_cert, client_key),
        rogue: ClientCreds::new(rogue_cert, rogue_key),
    }
}

/// Configuration pointing at the test PKI
pub fn proxy_config(pki: &TestPki, backend: &str, listen: &str, mode: ProxyMode) -> ProxyConfig {
    ProxyConfig {
        backend: backend.to_string(),
        listen: listen.to_string(),
        cert: pki.server_cert.clone(),
        cert_key: pki.server_key.clone(),
        client_ca: pki.client_ca.clone(),
        mode,
        ..ProxyConfig::default()
    }
}

/// Reserve an address for the proxy to bind
pub fn free_port_addr() -> SocketAddr {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

/// Poll until something is accepting on `addr`
pub async fn wait_until_listening(addr: SocketAddr) {
    for _ in 0..100 {
        if TcpStream::connect(addr).await.is_ok() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("nothing is listening on {}", addr);
}

/// Echo backend: every byte received is written back
///
/// Returns the bound address and a counter of accepted connections, used
/// to verify that unauthenticated clients never cause a backend dial.
pub async fn spawn_echo_backend() -> (SocketAddr, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let dials = Arc::new(AtomicUsize::new(0));
    let counter = dials.clone();

    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                break;
            };
            counter.fetch_add(1, Ordering::SeqCst);

            tokio::spawn(async move {
                let mut buf = [0u8; 4096];
                loop {
                    match stream.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            if stream.write_all(&buf[..n]).await.is_err() {
                                break;
                            }
                        }
                    }
                }
            });
        }
    });

    (addr, dials)
}

/// Backend that accepts one connection and signals once it observes EOF
pub async fn spawn_eof_watch_backend() -> (SocketAddr, tokio::sync::oneshot::Receiver<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = tokio::sync::oneshot::channel();

    tokio::spawn(async move {
        if let Ok((mut stream, _)) = listener.accept().await {
            let mut buf = [0u8; 1024];
            loop {
                match stream.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {}
                }
            }
            let _ = tx.send(());
        }
    });

    (addr, rx)
}

async fn http_echo_service(
    request: Request<Incoming>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let path = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_default();
    let host = request
        .headers()
        .get(http::header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let method = request.method().to_string();

    if path == "/not-found" {
        let mut response = Response::new(Full::new(Bytes::from_static(b"nope")));
        *response.status_mut() = StatusCode::NOT_FOUND;
        response
            .headers_mut()
            .insert("x-custom", HeaderValue::from_static("custom-value"));
        return Ok(response);
    }

    let body = request.into_body().collect().await.unwrap().to_bytes();
    let payload = if body.is_empty() {
        Bytes::from_static(b"hello from backend")
    } else {
        body
    };

    let mut response = Response::new(Full::new(payload));
    let headers = response.headers_mut();
    headers.insert("x-backend", HeaderValue::from_static("1"));
    headers.insert("x-echo-path", HeaderValue::from_str(&path).unwrap());
    headers.insert("x-echo-host", HeaderValue::from_str(&host).unwrap());
    headers.insert("x-echo-method", HeaderValue::from_str(&method).unwrap());

    Ok(response)
}

/// Plain-HTTP backend that reports back what it saw in response headers
///
/// Responds to `/not-found` with a 404 and a custom header; everything
/// else echoes path, host and method, and echoes a non-empty request body.
pub async fn spawn_http_backend() -> (SocketAddr, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let dials = Arc::new(AtomicUsize::new(0));
    let counter = dials.clone();

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            counter.fetch_add(1, Ordering::SeqCst);

            tokio::spawn(async move {
                let _ = hyper::server::conn::http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service_fn(http_echo_service))
                    .await;
            });
        }
    });

    (addr, dials)
}

/// Open a TLS connection to the proxy with the given identity
pub async fn tls_connect(
    addr: SocketAddr,
    identity: Option<(&X509, &PKey<Private>)>,
) -> Result<Pin<Box<SslStream<TcpStream>>>, String> {
    let mut builder = SslConnector::builder(SslMethod::tls()).unwrap();
    builder.set_verify(SslVerifyMode::NONE);
    if let Some((cert, key)) = identity {
        builder.set_certificate(cert).unwrap();
        builder.set_private_key(key).unwrap();
    }
    let connector = builder.build();

    let tcp = TcpStream::connect(addr).await.map_err(|e| e.to_string())?;
    let mut config = connector.configure().map_err(|e| e.to_string())?;
    config.set_verify_hostname(false);
    let ssl = config.into_ssl("localhost").map_err(|e| e.to_string())?;

    let stream = SslStream::new(ssl, tcp).map_err(|e| e.to_string())?;
    let mut stream = Box::pin(stream);
    stream.as_mut().connect().await.map_err(|e| e.to_string())?;

    Ok(stream)
}

/// Whether the proxy refused the session
///
/// With TLS 1.3 a server-side certificate rejection can surface on the
/// first read rather than in `connect`, so both paths are probed.
pub async fn session_rejected(
    addr: SocketAddr,
    identity: Option<(&X509, &PKey<Private>)>,
) -> bool {
    let mut stream = match tls_connect(addr, identity).await {
        Err(_) => return true,
        Ok(stream) => stream,
    };

    if stream.write_all(b"x").await.is_err() {
        return true;
    }
    if stream.flush().await.is_err() {
        return true;
    }

    let mut buf = [0u8; 1];
    match tokio::time::timeout(Duration::from_secs(5), stream.read(&mut buf)).await {
        Ok(Ok(0)) | Ok(Err(_)) | Err(_) => true,
        Ok(Ok(_)) => false,
    }
}

/// reqwest client presenting the given identity to the proxy
pub fn https_client(creds: &ClientCreds) -> reqwest::Client {
    let identity =
        reqwest::Identity::from_pkcs8_pem(&creds.cert_pem, &creds.key_pem).unwrap();

    reqwest::Client::builder()
        .identity(identity)
        .danger_accept_invalid_certs(true)
        // The test environment must not route through a real proxy
        .no_proxy()
        .build()
        .unwrap()
}
