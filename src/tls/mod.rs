//! TLS handling module
//!
//! This module handles TLS policy construction, the inbound acceptor and
//! certificate-related functionality.

pub mod acceptor;
pub mod cert;
pub mod policy;

pub use acceptor::{accept_stream, build_tls_acceptor};
pub use cert::{get_cert_fingerprint, get_cert_subject, load_identity, subject_string};
pub use policy::TlsPolicy;
