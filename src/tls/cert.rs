//! Certificate handling module
//!
//! Helpers for loading the proxy identity and for reporting certificate
//! details (subject, fingerprint) in logs.

use std::path::Path;

use openssl::hash::MessageDigest;
use openssl::pkey::{PKey, Private};
use openssl::x509::{X509, X509Ref};

use crate::common::{read_file, ProxyError, Result};

/// Load the proxy identity from PEM files
///
/// The certificate file may contain a chain; the leaf is returned. An
/// encrypted private key is decrypted with `key_pass`.
///
/// # Errors
///
/// Returns an error if either file cannot be read or parsed, or if the
/// passphrase does not match. The process cannot serve any traffic without
/// an identity, so callers treat this as fatal.
pub fn load_identity(
    cert_path: &Path,
    key_path: &Path,
    key_pass: Option<&str>,
) -> Result<(X509, PKey<Private>)> {
    let cert_pem = read_file(cert_path)?;
    let cert = X509::from_pem(&cert_pem).map_err(|e| {
        ProxyError::Certificate(format!("Failed to parse certificate {:?}: {}", cert_path, e))
    })?;

    let key_pem = read_file(key_path)?;
    let key = match key_pass {
        Some(pass) => PKey::private_key_from_pem_passphrase(&key_pem, pass.as_bytes()),
        None => PKey::private_key_from_pem(&key_pem),
    }
    .map_err(|e| {
        ProxyError::Certificate(format!("Failed to parse private key {:?}: {}", key_path, e))
    })?;

    Ok((cert, key))
}

/// Format a certificate subject as `key=value` pairs
pub fn subject_string(cert: &X509Ref) -> String {
    cert.subject_name()
        .entries()
        .map(|entry| {
            let key = entry
                .object()
                .nid()
                .short_name()
                .unwrap_or("?")
                .to_string();
            let value = entry
                .data()
                .as_utf8()
                .map(|v| v.to_string())
                .unwrap_or_default();
            format!("{}={}", key, value)
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Get certificate subject information
pub fn get_cert_subject(cert_path: &Path) -> Result<String> {
    let cert_pem = read_file(cert_path)?;
    let cert = X509::from_pem(&cert_pem).map_err(|e| {
        ProxyError::Certificate(format!("Failed to parse certificate {:?}: {}", cert_path, e))
    })?;

    Ok(subject_string(&cert))
}

/// Get the SHA-256 fingerprint of a certificate
pub fn get_cert_fingerprint(cert_path: &Path) -> Result<String> {
    let cert_pem = read_file(cert_path)?;
    let cert = X509::from_pem(&cert_pem).map_err(|e| {
        ProxyError::Certificate(format!("Failed to parse certificate {:?}: {}", cert_path, e))
    })?;

    let digest = cert.digest(MessageDigest::sha256()).map_err(ProxyError::Ssl)?;
    let fingerprint = digest
        .iter()
        .map(|byte| format!("{:02X}", byte))
        .collect::<Vec<_>>()
        .join(":");

    Ok(fingerprint)
}
