//! DNS server stamps (`sdns://`) for DNSCrypt resolvers.
//!
//! Binary layout, base64url encoded without padding:
//! ```text
//! 0x01 | props (u64 LE) | LP(addr) | LP(public key) | LP(provider name)
//! ```
//! where `LP(x)` is one length byte followed by `x`.

use crate::errors::TransportError;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

pub const STAMP_SCHEME: &str = "sdns://";
pub const DNSCRYPT_PROTOCOL_ID: u8 = 0x01;
pub const DNSCRYPT_DEFAULT_PORT: u16 = 443;
pub const PROVIDER_PK_LEN: usize = 32;

pub const PROP_DNSSEC: u64 = 1;
pub const PROP_NO_LOG: u64 = 1 << 1;
pub const PROP_NO_FILTER: u64 = 1 << 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerStamp {
    pub props: u64,
    pub server_addr: SocketAddr,
    pub provider_pk: [u8; PROVIDER_PK_LEN],
    pub provider_name: String,
}

impl ServerStamp {
    /// Provider name as a fully qualified DNS name, the target of the certificate TXT query.
    pub fn provider_fqdn(&self) -> String {
        if self.provider_name.ends_with('.') {
            self.provider_name.clone()
        } else {
            format!("{}.", self.provider_name)
        }
    }

    pub fn has_prop(&self, prop: u64) -> bool {
        self.props & prop != 0
    }
}

struct StampReader<'a> {
    bin: &'a [u8],
    pos: usize,
}

impl<'a> StampReader<'a> {
    fn take(&mut self, len: usize, field: &str) -> Result<&'a [u8], TransportError> {
        let end = self.pos + len;
        if end > self.bin.len() {
            return Err(TransportError::StampParse(format!(
                "stamp truncated while reading {}",
                field
            )));
        }
        let out = &self.bin[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn length_prefixed(&mut self, field: &str) -> Result<&'a [u8], TransportError> {
        let len = self.take(1, field)?[0] as usize;
        self.take(len, field)
    }
}

fn parse_stamp_addr(raw: &str) -> Result<SocketAddr, TransportError> {
    if let Ok(addr) = raw.parse::<SocketAddr>() {
        return Ok(addr);
    }
    let bare = raw.trim_start_matches('[').trim_end_matches(']');
    bare.parse::<IpAddr>()
        .map(|ip| SocketAddr::new(ip, DNSCRYPT_DEFAULT_PORT))
        .map_err(|_| {
            TransportError::StampParse(format!("'{}' is not an IP address with optional port", raw))
        })
}

impl FromStr for ServerStamp {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let encoded = s.strip_prefix(STAMP_SCHEME).ok_or_else(|| {
            TransportError::StampParse(format!("stamp must start with '{}'", STAMP_SCHEME))
        })?;
        let bin = URL_SAFE_NO_PAD
            .decode(encoded.trim_end_matches('='))
            .map_err(|e| TransportError::StampParse(format!("invalid base64url: {}", e)))?;

        let mut reader = StampReader { bin: &bin, pos: 0 };

        let protocol = reader.take(1, "protocol")?[0];
        if protocol != DNSCRYPT_PROTOCOL_ID {
            return Err(TransportError::StampParse(format!(
                "unsupported stamp protocol 0x{:02x}, expected DNSCrypt (0x01)",
                protocol
            )));
        }

        let mut props_bytes = [0u8; 8];
        props_bytes.copy_from_slice(reader.take(8, "props")?);
        let props = u64::from_le_bytes(props_bytes);

        let addr_raw = std::str::from_utf8(reader.length_prefixed("address")?)
            .map_err(|_| TransportError::StampParse("address is not UTF-8".into()))?;
        let server_addr = parse_stamp_addr(addr_raw)?;

        let pk = reader.length_prefixed("public key")?;
        let provider_pk: [u8; PROVIDER_PK_LEN] = pk.try_into().map_err(|_| {
            TransportError::StampParse(format!(
                "public key must be {} bytes, got {}",
                PROVIDER_PK_LEN,
                pk.len()
            ))
        })?;

        let provider_name = std::str::from_utf8(reader.length_prefixed("provider name")?)
            .map_err(|_| TransportError::StampParse("provider name is not UTF-8".into()))?
            .to_string();
        if provider_name.is_empty() {
            return Err(TransportError::StampParse("empty provider name".into()));
        }

        if reader.pos != bin.len() {
            return Err(TransportError::StampParse(format!(
                "{} trailing bytes after provider name",
                bin.len() - reader.pos
            )));
        }

        Ok(Self {
            props,
            server_addr,
            provider_pk,
            provider_name,
        })
    }
}

fn push_length_prefixed(bin: &mut Vec<u8>, field: &str, value: &[u8]) -> Result<(), TransportError> {
    let len = u8::try_from(value.len()).map_err(|_| {
        TransportError::StampParse(format!(
            "{} is {} bytes, a stamp field holds at most 255",
            field,
            value.len()
        ))
    })?;
    bin.push(len);
    bin.extend_from_slice(value);
    Ok(())
}

impl ServerStamp {
    /// Renders the `sdns://` form. Fails when a field does not fit its length byte.
    pub fn encode(&self) -> Result<String, TransportError> {
        let addr = if self.server_addr.port() == DNSCRYPT_DEFAULT_PORT {
            match self.server_addr.ip() {
                IpAddr::V4(ip) => ip.to_string(),
                IpAddr::V6(ip) => format!("[{}]", ip),
            }
        } else {
            self.server_addr.to_string()
        };

        let mut bin = Vec::with_capacity(
            1 + 8 + 3 + addr.len() + PROVIDER_PK_LEN + self.provider_name.len(),
        );
        bin.push(DNSCRYPT_PROTOCOL_ID);
        bin.extend_from_slice(&self.props.to_le_bytes());
        push_length_prefixed(&mut bin, "address", addr.as_bytes())?;
        push_length_prefixed(&mut bin, "public key", &self.provider_pk)?;
        push_length_prefixed(&mut bin, "provider name", self.provider_name.as_bytes())?;

        Ok(format!("{}{}", STAMP_SCHEME, URL_SAFE_NO_PAD.encode(bin)))
    }
}
