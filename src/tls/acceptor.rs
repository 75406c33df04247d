//! TLS acceptor creation and inbound handshake

use std::pin::Pin;

use log::debug;
use openssl::pkey::PKey;
use openssl::ssl::{
    Ssl, SslAcceptor, SslFiletype, SslMethod, SslOptions, SslSessionCacheMode, SslVerifyMode,
    SslVersion,
};
use tokio::net::TcpStream;
use tokio_openssl::SslStream;

use crate::common::{read_file, ProxyError, Result};
use crate::tls::policy::{TlsPolicy, CIPHER_LIST};

/// Create the TLS acceptor shared by all inbound connections
///
/// Built once at startup from the [`TlsPolicy`]; cloning the resulting
/// `SslAcceptor` handle is cheap and every accepted connection handshakes
/// against the same context.
pub fn build_tls_acceptor(policy: &TlsPolicy) -> Result<SslAcceptor> {
    let mut acceptor = SslAcceptor::mozilla_intermediate_v5(SslMethod::tls())?;

    acceptor.set_min_proto_version(Some(SslVersion::TLS1_2))?;
    acceptor.set_cipher_list(CIPHER_LIST)?;

    acceptor.set_certificate_chain_file(&policy.cert)?;
    match &policy.cert_key_pass {
        Some(pass) => {
            let key_pem = read_file(&policy.cert_key)?;
            let key = PKey::private_key_from_pem_passphrase(&key_pem, pass.as_bytes())?;
            acceptor.set_private_key(&key)?;
        }
        None => acceptor.set_private_key_file(&policy.cert_key, SslFiletype::PEM)?,
    }
    acceptor.check_private_key()?;

    // Client certificates are required and verified on every connection.
    // A failed verification aborts the handshake before any forwarding.
    acceptor.set_ca_file(&policy.client_ca)?;
    acceptor.set_verify(SslVerifyMode::PEER | SslVerifyMode::FAIL_IF_NO_PEER_CERT);

    // No session resumption on the inbound side: a resumed session would
    // bypass the mutual re-authentication above.
    acceptor.set_session_cache_mode(SslSessionCacheMode::OFF);
    acceptor.set_options(SslOptions::NO_TICKET);

    if let Some(sink) = policy.key_log_writer() {
        acceptor.set_keylog_callback(move |_ssl, line| TlsPolicy::write_key_log(&sink, line));
    }

    Ok(acceptor.build())
}

/// Perform the inbound TLS handshake on an accepted connection
///
/// This is the authentication gate: a client without a certificate signed
/// by the configured CA never gets past this point, and no backend
/// connection is attempted for it.
pub async fn accept_stream(
    stream: TcpStream,
    acceptor: &SslAcceptor,
) -> Result<Pin<Box<SslStream<TcpStream>>>> {
    let ssl = Ssl::new(acceptor.context()).map_err(ProxyError::Ssl)?;
    let stream = SslStream::new(ssl, stream).map_err(ProxyError::Ssl)?;
    let mut stream = Box::pin(stream);

    if let Err(e) = stream.as_mut().accept().await {
        debug!("TLS handshake failed: {}", e);
        return Err(ProxyError::TlsHandshake(e.to_string()));
    }

    debug!("TLS handshake successful");
    Ok(stream)
}
