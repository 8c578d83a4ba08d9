//! DNSCrypt v2 query/response encryption.
//!
//! Query:    client-magic(8) | client-pk(32) | client-nonce(12) | box(padded query)
//! Response: "r6fnvWj8"(8)   | nonce(24)     | box(padded response)
//!
//! The query nonce is the 12 client bytes followed by 12 zero bytes; the
//! response nonce must start with the same 12 client bytes.

use super::cert::{DnsCryptCert, EsVersion};
use crypto_box::aead::generic_array::GenericArray;
use crypto_box::aead::Aead;
use crypto_box::{ChaChaBox, PublicKey, SalsaBox, SecretKey};
use ferrous_q_domain::TransportError;
use ring::rand::{SecureRandom, SystemRandom};

pub const RESOLVER_MAGIC: [u8; 8] = *b"r6fnvWj8";
pub const CLIENT_NONCE_LEN: usize = 12;
pub const NONCE_LEN: usize = 24;
pub const PUBLIC_KEY_LEN: usize = 32;
pub const TAG_LEN: usize = 16;

/// Minimum padded query size over UDP, against amplification.
pub const MIN_UDP_QUERY_LEN: usize = 256;
const PADDING_BLOCK: usize = 64;
const PADDING_MARKER: u8 = 0x80;

const QUERY_HEADER_LEN: usize = 8 + PUBLIC_KEY_LEN + CLIENT_NONCE_LEN;
const RESPONSE_HEADER_LEN: usize = RESOLVER_MAGIC.len() + NONCE_LEN;

/// ISO/IEC 7816-4 padding up to the next 64-byte boundary, at least `min_len`.
pub fn pad(packet: &[u8], min_len: usize) -> Vec<u8> {
    let unpadded = packet.len().max(min_len.saturating_sub(1)) + 1;
    let padded_len = unpadded.div_ceil(PADDING_BLOCK) * PADDING_BLOCK;

    let mut padded = Vec::with_capacity(padded_len);
    padded.extend_from_slice(packet);
    padded.push(PADDING_MARKER);
    padded.resize(padded_len, 0);
    padded
}

pub fn unpad(padded: &[u8]) -> Result<&[u8], TransportError> {
    let marker = padded
        .iter()
        .rposition(|&b| b != 0)
        .ok_or_else(|| TransportError::Crypto("padding marker missing".into()))?;
    if padded[marker] != PADDING_MARKER {
        return Err(TransportError::Crypto("invalid padding".into()));
    }
    Ok(&padded[..marker])
}

enum SharedBox {
    Salsa(SalsaBox),
    ChaCha(ChaChaBox),
}

impl SharedBox {
    fn seal(&self, nonce: &[u8; NONCE_LEN], plaintext: &[u8]) -> Result<Vec<u8>, TransportError> {
        let nonce = GenericArray::from_slice(nonce);
        let sealed = match self {
            Self::Salsa(b) => b.encrypt(nonce, plaintext),
            Self::ChaCha(b) => b.encrypt(nonce, plaintext),
        };
        sealed.map_err(|_| TransportError::Crypto("encryption failed".into()))
    }

    fn open(&self, nonce: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, TransportError> {
        let nonce = GenericArray::from_slice(nonce);
        let opened = match self {
            Self::Salsa(b) => b.decrypt(nonce, ciphertext),
            Self::ChaCha(b) => b.decrypt(nonce, ciphertext),
        };
        opened.map_err(|_| TransportError::Crypto("response authentication failed".into()))
    }
}

/// Key material for one query; needed again to open its response.
pub struct QuerySession {
    shared: SharedBox,
    client_nonce: [u8; CLIENT_NONCE_LEN],
}

/// Encrypts `query` under a fresh ephemeral key pair.
pub fn encrypt_query(
    cert: &DnsCryptCert,
    query: &[u8],
    min_len: usize,
    rng: &SystemRandom,
) -> Result<(Vec<u8>, QuerySession), TransportError> {
    let mut secret = [0u8; 32];
    rng.fill(&mut secret)
        .map_err(|_| TransportError::Crypto("random generator failure".into()))?;
    let mut client_nonce = [0u8; CLIENT_NONCE_LEN];
    rng.fill(&mut client_nonce)
        .map_err(|_| TransportError::Crypto("random generator failure".into()))?;

    let client_sk = SecretKey::from(secret);
    let client_pk = client_sk.public_key();
    let resolver_pk = PublicKey::from(cert.resolver_pk);

    let shared = match cert.es_version {
        EsVersion::XSalsa20Poly1305 => SharedBox::Salsa(SalsaBox::new(&resolver_pk, &client_sk)),
        EsVersion::XChaCha20Poly1305 => {
            SharedBox::ChaCha(ChaChaBox::new(&resolver_pk, &client_sk))
        }
    };

    let mut nonce = [0u8; NONCE_LEN];
    nonce[..CLIENT_NONCE_LEN].copy_from_slice(&client_nonce);
    let sealed = shared.seal(&nonce, &pad(query, min_len))?;

    let mut packet = Vec::with_capacity(QUERY_HEADER_LEN + sealed.len());
    packet.extend_from_slice(&cert.client_magic);
    packet.extend_from_slice(client_pk.as_bytes());
    packet.extend_from_slice(&client_nonce);
    packet.extend_from_slice(&sealed);

    Ok((
        packet,
        QuerySession {
            shared,
            client_nonce,
        },
    ))
}

impl QuerySession {
    pub fn decrypt_response(&self, packet: &[u8]) -> Result<Vec<u8>, TransportError> {
        if packet.len() < RESPONSE_HEADER_LEN + TAG_LEN {
            return Err(TransportError::Crypto(format!(
                "response of {} bytes is too short",
                packet.len()
            )));
        }
        if packet[..RESOLVER_MAGIC.len()] != RESOLVER_MAGIC {
            return Err(TransportError::Crypto("bad resolver magic".into()));
        }

        let nonce = &packet[RESOLVER_MAGIC.len()..RESPONSE_HEADER_LEN];
        if nonce[..CLIENT_NONCE_LEN] != self.client_nonce {
            return Err(TransportError::Crypto(
                "response nonce does not echo the query nonce".into(),
            ));
        }

        let padded = self.shared.open(nonce, &packet[RESPONSE_HEADER_LEN..])?;
        unpad(&padded).map(<[u8]>::to_vec)
    }
}
