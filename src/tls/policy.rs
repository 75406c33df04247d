//! TLS policy construction
//!
//! One [`TlsPolicy`] is built at startup and shared read-only by every
//! connection for the life of the process. It carries the proxy identity,
//! the trust material for both roles (client certificates inbound, backend
//! certificate outbound) and the optional session-key log sink.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use log::warn;
use openssl::x509::X509;

use crate::common::{read_file, ProxyError, Result};
use crate::config::ProxyConfig;
use crate::tls::cert::load_identity;

/// Cipher suites offered for TLS 1.2
///
/// Restricted to ECDHE + AEAD suites; legacy and static-key suites are
/// excluded. TLS 1.3 suites are AEAD-only and left at the library default.
pub const CIPHER_LIST: &str = "ECDHE-ECDSA-AES256-GCM-SHA384:\
ECDHE-RSA-AES256-GCM-SHA384:\
ECDHE-ECDSA-CHACHA20-POLY1305:\
ECDHE-RSA-CHACHA20-POLY1305:\
ECDHE-RSA-AES128-GCM-SHA256";

/// Shared TLS policy
///
/// Immutable after construction. Session tickets are disabled on the
/// inbound side so every connection re-authenticates with its client
/// certificate; session reuse on the outbound client role is owned by the
/// pooled HTTP transport. Renegotiation is left at the library defaults,
/// which refuse client-initiated renegotiation on the server role.
pub struct TlsPolicy {
    /// Identity certificate path (PEM, may contain a chain)
    pub(crate) cert: PathBuf,
    /// Identity private key path (PEM)
    pub(crate) cert_key: PathBuf,
    /// Private key passphrase
    pub(crate) cert_key_pass: Option<String>,
    /// CA bundle verifying client certificates (inbound)
    pub(crate) client_ca: PathBuf,
    /// CA bundle verifying a TLS backend (outbound); `None` disables
    /// backend certificate verification
    pub(crate) server_ca: Option<PathBuf>,
    /// Session-key log sink, debug only
    key_log: Option<Arc<Mutex<File>>>,
}

impl TlsPolicy {
    /// Build the policy from a validated configuration
    ///
    /// The identity is parsed here so a broken certificate or key is a
    /// fatal startup error. When a key log path is configured the file is
    /// opened here as well; failure to open it is fatal, but individual
    /// writes later are not checked.
    pub fn from_config(config: &ProxyConfig) -> Result<Self> {
        // Parse check only; the acceptor and the HTTP transport re-read the
        // files themselves.
        load_identity(
            &config.cert,
            &config.cert_key,
            config.cert_key_pass.as_deref(),
        )?;

        let key_log = match &config.unsecure_key_log_path {
            Some(path) => {
                warn!(
                    "TLS session secrets will be written to {:?}; \
                     this defeats the confidentiality of every proxied connection",
                    path
                );
                let file = OpenOptions::new()
                    .append(true)
                    .create(true)
                    .open(path)
                    .map_err(|e| {
                        ProxyError::Config(format!(
                            "Unable to open the key log path {:?}: {}",
                            path, e
                        ))
                    })?;
                Some(Arc::new(Mutex::new(file)))
            }
            None => None,
        };

        Ok(Self {
            cert: config.cert.clone(),
            cert_key: config.cert_key.clone(),
            cert_key_pass: config.cert_key_pass.clone(),
            client_ca: config.client_ca.clone(),
            server_ca: config.server_ca.clone(),
            key_log,
        })
    }

    /// Handle to the session-key log sink, if configured
    pub(crate) fn key_log_writer(&self) -> Option<Arc<Mutex<File>>> {
        self.key_log.clone()
    }

    /// Append one key-log line to the sink
    ///
    /// Write failures are deliberately ignored; the sink was opened at
    /// startup and this is a debug-only path.
    pub(crate) fn write_key_log(sink: &Arc<Mutex<File>>, line: &str) {
        if let Ok(mut file) = sink.lock() {
            let _ = writeln!(file, "{}", line);
        }
    }

    /// The proxy identity as a `reqwest` client identity
    ///
    /// Used when the HTTP transport dials a TLS backend; the same
    /// certificate the proxy presents to its own clients is presented to
    /// the backend. An encrypted key is decrypted before hand-off.
    pub fn client_identity(&self) -> Result<reqwest::Identity> {
        let cert_pem = read_file(&self.cert)?;
        let (_cert, key) = load_identity(
            &self.cert,
            &self.cert_key,
            self.cert_key_pass.as_deref(),
        )?;
        let key_pem = key.private_key_to_pem_pkcs8().map_err(ProxyError::Ssl)?;

        reqwest::Identity::from_pkcs8_pem(&cert_pem, &key_pem)
            .map_err(|e| ProxyError::Certificate(format!("Failed to build client identity: {}", e)))
    }

    /// Trust roots for verifying a TLS backend
    ///
    /// Returns `None` when no `server-ca` bundle is configured, in which
    /// case backend certificate verification is disabled.
    pub fn backend_root_certs(&self) -> Result<Option<Vec<reqwest::Certificate>>> {
        let Some(path) = &self.server_ca else {
            return Ok(None);
        };

        let pem = read_file(path)?;
        let stack = X509::stack_from_pem(&pem).map_err(|e| {
            ProxyError::Certificate(format!("Failed to parse CA bundle {:?}: {}", path, e))
        })?;
        if stack.is_empty() {
            return Err(ProxyError::Certificate(format!(
                "CA bundle {:?} contains no certificates",
                path
            )));
        }

        let mut roots = Vec::with_capacity(stack.len());
        for cert in stack {
            let pem = cert.to_pem().map_err(ProxyError::Ssl)?;
            let root = reqwest::Certificate::from_pem(&pem).map_err(|e| {
                ProxyError::Certificate(format!("Failed to load CA certificate: {}", e))
            })?;
            roots.push(root);
        }

        Ok(Some(roots))
    }
}
