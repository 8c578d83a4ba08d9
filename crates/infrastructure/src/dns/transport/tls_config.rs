//! rustls client configuration shared by DoT, DoH and DoQ.
//!
//! Every transport builds its own config at construction time so the ALPN
//! list and trust settings are fixed per upstream.

use ferrous_q_domain::{TlsSettings, TransportError};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{aws_lc_rs, CryptoProvider, WebPkiSupportedAlgorithms};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

pub const ALPN_DOT: &[u8] = b"dot";
pub const ALPN_DOQ: &[u8] = b"doq";
pub const ALPN_HTTP1: &[u8] = b"http/1.1";
pub const ALPN_H2: &[u8] = b"h2";
pub const ALPN_H3: &[u8] = b"h3";

pub fn build_client_config(
    settings: &TlsSettings,
    alpn: &[&[u8]],
) -> Result<ClientConfig, TransportError> {
    let provider = Arc::new(aws_lc_rs::default_provider());
    let builder = ClientConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()
        .map_err(|e| TransportError::InvalidConfig(format!("TLS protocol versions: {}", e)))?;

    let mut config = if settings.insecure_skip_verify {
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoCertVerification::new(&provider)))
            .with_no_client_auth()
    } else {
        builder
            .with_root_certificates(root_store(settings.ca_file.as_deref())?)
            .with_no_client_auth()
    };

    config.alpn_protocols = alpn.iter().map(|p| p.to_vec()).collect();
    Ok(config)
}

/// Bundled web PKI roots, or only the certificates in `ca_file` when one is given.
fn root_store(ca_file: Option<&Path>) -> Result<RootCertStore, TransportError> {
    let mut store = RootCertStore::empty();

    let Some(path) = ca_file else {
        store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        return Ok(store);
    };

    let file = File::open(path).map_err(|e| {
        TransportError::InvalidConfig(format!(
            "Failed to open CA file {}: {}",
            path.display(),
            e
        ))
    })?;
    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| {
            TransportError::InvalidConfig(format!(
                "Failed to parse CA file {}: {}",
                path.display(),
                e
            ))
        })?;

    if certs.is_empty() {
        return Err(TransportError::InvalidConfig(format!(
            "No certificates found in {}",
            path.display()
        )));
    }

    for cert in certs {
        store.add(cert).map_err(|e| {
            TransportError::InvalidConfig(format!(
                "Invalid CA certificate in {}: {}",
                path.display(),
                e
            ))
        })?;
    }

    Ok(store)
}

/// SNI / verification name: the configured override, else the upstream host.
pub fn server_name(
    settings: &TlsSettings,
    default_host: &str,
) -> Result<ServerName<'static>, TransportError> {
    let name = settings
        .server_name
        .as_deref()
        .unwrap_or(default_host)
        .to_string();
    ServerName::try_from(name.clone()).map_err(|e| {
        TransportError::InvalidConfig(format!("Invalid TLS server name '{}': {}", name, e))
    })
}

/// Accepts any certificate chain. Handshake signatures are still checked
/// so the peer must hold the key for the certificate it presents.
#[derive(Debug)]
struct NoCertVerification {
    algorithms: WebPkiSupportedAlgorithms,
}

impl NoCertVerification {
    fn new(provider: &CryptoProvider) -> Self {
        Self {
            algorithms: provider.signature_verification_algorithms,
        }
    }
}

impl ServerCertVerifier for NoCertVerification {
    fn verify_server_cert(
        &self,
        _: &CertificateDer<'_>,
        _: &[CertificateDer<'_>],
        _: &ServerName<'_>,
        _: &[u8],
        _: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(message, cert, dss, &self.algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(message, cert, dss, &self.algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.algorithms.supported_schemes()
    }
}

/// Finds the rustls error buried in a transport error chain, if any.
///
/// `io::Error` wraps its payload behind `get_ref` rather than `source`, so
/// each wrapped payload is searched as a chain of its own.
pub fn find_rustls_error<'a>(
    err: &'a (dyn std::error::Error + 'static),
) -> Option<&'a rustls::Error> {
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(tls) = e.downcast_ref::<rustls::Error>() {
            return Some(tls);
        }
        if let Some(inner) = e.downcast_ref::<std::io::Error>().and_then(|io| io.get_ref()) {
            if let Some(tls) = find_rustls_error(inner) {
                return Some(tls);
            }
        }
        current = e.source();
    }
    None
}

const TLS_FAILURE_MARKERS: &[&str] = &[
    "fatal alert",
    "invalid peer certificate",
    "peer is incompatible",
    "peer misbehaved",
    "handshake",
    "corrupt message",
];

/// Whether a flattened error chain reads like a rustls handshake failure.
pub fn looks_like_tls_failure(chain: &str) -> bool {
    let lower = chain.to_ascii_lowercase();
    TLS_FAILURE_MARKERS.iter().any(|marker| lower.contains(marker))
}
