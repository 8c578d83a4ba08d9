//! DNSCrypt v2 resolver certificates.
//!
//! ```text
//! 0   "DNSC"                  cert magic
//! 4   es-version (u16 BE)     1 = X25519-XSalsa20Poly1305, 2 = X25519-XChaCha20Poly1305
//! 6   minor version (u16 BE)
//! 8   Ed25519 signature       over bytes 72..
//! 72  resolver public key     32 bytes
//! 104 client magic            8 bytes
//! 112 serial (u32 BE)
//! 116 ts-start (u32 BE)
//! 120 ts-end (u32 BE)
//! 124 extensions
//! ```

use ferrous_q_domain::TransportError;
use ring::signature::{UnparsedPublicKey, ED25519};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

pub const CERT_MAGIC: [u8; 4] = *b"DNSC";
pub const MIN_CERT_LEN: usize = 124;
const SIGNED_OFFSET: usize = 72;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EsVersion {
    XSalsa20Poly1305 = 1,
    XChaCha20Poly1305 = 2,
}

impl EsVersion {
    fn from_u16(value: u16) -> Option<Self> {
        match value {
            1 => Some(Self::XSalsa20Poly1305),
            2 => Some(Self::XChaCha20Poly1305),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsCryptCert {
    pub es_version: EsVersion,
    pub resolver_pk: [u8; 32],
    pub client_magic: [u8; 8],
    pub serial: u32,
    pub ts_start: u32,
    pub ts_end: u32,
    signature: [u8; 64],
    signed: Vec<u8>,
}

fn be_u16(bin: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([bin[at], bin[at + 1]])
}

fn be_u32(bin: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([bin[at], bin[at + 1], bin[at + 2], bin[at + 3]])
}

impl DnsCryptCert {
    pub fn parse(bin: &[u8]) -> Result<Self, TransportError> {
        if bin.len() < MIN_CERT_LEN {
            return Err(TransportError::Certificate(format!(
                "certificate is {} bytes, expected at least {}",
                bin.len(),
                MIN_CERT_LEN
            )));
        }
        if bin[..4] != CERT_MAGIC {
            return Err(TransportError::Certificate("bad certificate magic".into()));
        }

        let raw_version = be_u16(bin, 4);
        let es_version = EsVersion::from_u16(raw_version).ok_or_else(|| {
            TransportError::Certificate(format!("unsupported es-version {}", raw_version))
        })?;

        let mut signature = [0u8; 64];
        signature.copy_from_slice(&bin[8..72]);
        let mut resolver_pk = [0u8; 32];
        resolver_pk.copy_from_slice(&bin[72..104]);
        let mut client_magic = [0u8; 8];
        client_magic.copy_from_slice(&bin[104..112]);

        Ok(Self {
            es_version,
            resolver_pk,
            client_magic,
            serial: be_u32(bin, 112),
            ts_start: be_u32(bin, 116),
            ts_end: be_u32(bin, 120),
            signature,
            signed: bin[SIGNED_OFFSET..].to_vec(),
        })
    }

    pub fn is_valid_at(&self, now: u64) -> bool {
        u64::from(self.ts_start) <= now && now <= u64::from(self.ts_end)
    }

    pub fn verify(&self, provider_pk: &[u8; 32]) -> Result<(), TransportError> {
        UnparsedPublicKey::new(&ED25519, provider_pk)
            .verify(&self.signed, &self.signature)
            .map_err(|_| {
                TransportError::Certificate(format!(
                    "signature of certificate serial {} does not verify against the provider key",
                    self.serial
                ))
            })
    }
}

pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Picks the certificate to use among the TXT payloads of the provider name.
///
/// Only certificates whose signature verifies and whose validity window
/// covers `now` are considered; the highest serial wins, ties going to
/// the newer es-version.
pub fn select_certificate(
    records: &[Vec<u8>],
    provider_pk: &[u8; 32],
    now: u64,
) -> Result<DnsCryptCert, TransportError> {
    let mut rejected = Vec::new();
    let mut best: Option<DnsCryptCert> = None;

    for record in records {
        let cert = match DnsCryptCert::parse(record).and_then(|cert| {
            cert.verify(provider_pk)?;
            Ok(cert)
        }) {
            Ok(cert) => cert,
            Err(e) => {
                warn!(error = %e, "Skipping DNSCrypt certificate");
                rejected.push(e.to_string());
                continue;
            }
        };

        if !cert.is_valid_at(now) {
            warn!(
                serial = cert.serial,
                ts_start = cert.ts_start,
                ts_end = cert.ts_end,
                "Skipping DNSCrypt certificate outside its validity window"
            );
            rejected.push(format!(
                "certificate serial {} is outside its validity window",
                cert.serial
            ));
            continue;
        }

        let better = best.as_ref().map_or(true, |current| {
            (cert.serial, cert.es_version) > (current.serial, current.es_version)
        });
        if better {
            best = Some(cert);
        }
    }

    if let Some(cert) = &best {
        debug!(
            serial = cert.serial,
            es_version = ?cert.es_version,
            "Selected DNSCrypt certificate"
        );
    }

    best.ok_or_else(|| {
        if records.is_empty() {
            TransportError::Certificate("provider returned no certificate records".into())
        } else {
            TransportError::Certificate(format!(
                "no usable certificate: {}",
                rejected.join("; ")
            ))
        }
    })
}
