//! mTLS Terminating Proxy Command Line Tool
//!
//! This binary is the command-line interface for the proxy. It merges
//! configuration from an optional JSON file, environment variables and
//! command-line flags, validates it, builds the TLS policy once, then
//! starts exactly one forwarding mode and blocks until interrupted.

use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use log::{info, warn};

use mtls_proxy::common::{init_logger, parse_socket_addr, Result};
use mtls_proxy::config::{ProxyConfig, ProxyMode};
use mtls_proxy::proxy::{build_transport, HttpProxy, HttpTarget, TcpProxy};
use mtls_proxy::tls::{build_tls_acceptor, get_cert_fingerprint, get_cert_subject, TlsPolicy};
use mtls_proxy::{APP_NAME, VERSION};

/// mTLS Terminating Proxy: identity-aware gateway for plain TCP/HTTP backends
#[derive(Parser, Debug)]
#[clap(author, version = VERSION, about, long_about = None)]
struct Args {
    /// Destination host[:port] or URL traffic is forwarded to
    #[clap(long, env = "MTLS_PROXY_BACKEND")]
    backend: Option<String>,

    /// CA bundle used to verify a TLS backend. If not set, the backend
    /// certificate is not verified
    #[clap(long, env = "MTLS_PROXY_SERVER_CA")]
    server_ca: Option<PathBuf>,

    /// Listen address
    #[clap(long, env = "MTLS_PROXY_LISTEN")]
    listen: Option<String>,

    /// Path to this proxy's identity certificate
    #[clap(long, env = "MTLS_PROXY_CERT")]
    cert: Option<PathBuf>,

    /// Path to the identity private key
    #[clap(long, env = "MTLS_PROXY_CERT_KEY")]
    cert_key: Option<PathBuf>,

    /// Password for the identity private key
    #[clap(long, env = "MTLS_PROXY_CERT_KEY_PASS")]
    cert_key_pass: Option<String>,

    /// CA bundle used to verify client certificates
    #[clap(long, env = "MTLS_PROXY_CLIENT_CA")]
    client_ca: Option<PathBuf>,

    /// Proxy mode (tcp, http)
    #[clap(long, env = "MTLS_PROXY_MODE")]
    mode: Option<String>,

    /// Log level
    #[clap(long, env = "MTLS_PROXY_LOG_LEVEL")]
    log_level: Option<String>,

    /// Backend connect timeout in seconds
    #[clap(long, env = "MTLS_PROXY_CONNECT_TIMEOUT")]
    connect_timeout: Option<u64>,

    /// Maximum number of concurrent sessions, 0 means unbounded
    #[clap(long, env = "MTLS_PROXY_MAX_CONNECTIONS")]
    max_connections: Option<usize>,

    /// [UNSECURE] Path of the file where session keys are dumped.
    /// Useful for debugging only
    #[clap(long, env = "MTLS_PROXY_UNSECURE_KEY_LOG_PATH")]
    unsecure_key_log_path: Option<PathBuf>,

    /// Load configuration from a JSON file; flags and environment
    /// variables override its values
    #[clap(long, env = "MTLS_PROXY_CONFIG_FILE")]
    config_file: Option<PathBuf>,
}

/// Apply command-line/environment overrides on top of the merged config
fn apply_args(mut config: ProxyConfig, args: &Args) -> Result<ProxyConfig> {
    if let Some(backend) = &args.backend {
        config.backend = backend.clone();
    }
    if let Some(server_ca) = &args.server_ca {
        config.server_ca = Some(server_ca.clone());
    }
    if let Some(listen) = &args.listen {
        config.listen = listen.clone();
    }
    if let Some(cert) = &args.cert {
        config.cert = cert.clone();
    }
    if let Some(cert_key) = &args.cert_key {
        config.cert_key = cert_key.clone();
    }
    if let Some(cert_key_pass) = &args.cert_key_pass {
        config.cert_key_pass = Some(cert_key_pass.clone());
    }
    if let Some(client_ca) = &args.client_ca {
        config.client_ca = client_ca.clone();
    }
    if let Some(mode) = &args.mode {
        config.mode = mode.parse()?;
    }
    if let Some(log_level) = &args.log_level {
        config.log_level = log_level.clone();
    }
    if let Some(connect_timeout) = args.connect_timeout {
        config.connect_timeout = connect_timeout;
    }
    if let Some(max_connections) = args.max_connections {
        config.max_connections = max_connections;
    }
    if let Some(path) = &args.unsecure_key_log_path {
        config.unsecure_key_log_path = Some(path.clone());
    }

    Ok(config)
}

/// Run a proxy future until an interrupt arrives
///
/// Interrupt handling is deliberately immediate: in-flight sessions are
/// severed rather than drained.
async fn run_until_interrupted(proxy: impl Future<Output = Result<()>>) -> Result<()> {
    tokio::select! {
        result = proxy => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupt received, shutting down");
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Defaults, then the configuration file, then flag/env overrides
    let mut config = ProxyConfig::default();
    if let Some(config_file) = &args.config_file {
        let file_config = ProxyConfig::from_file(config_file)?;
        config = config.merge(file_config);
    }
    let config = apply_args(config, &args)?;

    // Initialize logger
    init_logger(&config.log_level);

    info!("Starting {} v{}", APP_NAME, VERSION);

    // Validate the final configuration
    config.validate()?;

    // Try to get certificate subject
    match get_cert_subject(&config.cert) {
        Ok(subject) => info!("Certificate subject: {}", subject),
        Err(e) => warn!("Unable to get certificate subject: {}", e),
    }

    // Try to get certificate fingerprint
    match get_cert_fingerprint(&config.cert) {
        Ok(fingerprint) => info!("Certificate fingerprint: {}", fingerprint),
        Err(e) => warn!("Unable to get certificate fingerprint: {}", e),
    }

    // Build the TLS policy once; it is shared by whichever mode runs
    let policy = TlsPolicy::from_config(&config)?;
    let tls_acceptor = build_tls_acceptor(&policy)?;
    let listen_addr = parse_socket_addr(&config.listen)?;

    info!(
        "{} is ready. mode:{} listen:{} backend:{}",
        APP_NAME, config.mode, config.listen, config.backend
    );

    match config.mode {
        ProxyMode::Tcp => {
            let target_addr = parse_socket_addr(&config.backend)?;
            let proxy = TcpProxy::new(
                listen_addr,
                target_addr,
                tls_acceptor,
                Duration::from_secs(config.connect_timeout),
                config.max_connections,
            );
            run_until_interrupted(proxy.run()).await
        }
        ProxyMode::Http => {
            let target = HttpTarget::resolve(&config.backend)?;
            let client = build_transport(&policy)?;
            let proxy = HttpProxy::new(
                listen_addr,
                target,
                tls_acceptor,
                client,
                config.max_connections,
            );
            run_until_interrupted(proxy.run()).await
        }
    }
}
