pub mod deadline;
pub mod plain;
pub mod resolver;
pub mod tcp;
pub mod tls_config;
pub mod udp;

#[cfg(feature = "dns-over-rustls")]
pub mod tls;

#[cfg(feature = "dns-over-h3")]
pub mod h3;
#[cfg(feature = "dns-over-https")]
pub mod https;
#[cfg(feature = "dns-over-quic")]
pub mod quic;

#[cfg(feature = "dnscrypt")]
pub mod dnscrypt;

use async_trait::async_trait;
use ferrous_q_domain::{TransportConfig, TransportError};
use hickory_proto::op::Message;

pub use deadline::Deadline;

/// One query in, one response out. Every exchange is bounded by the
/// transport's configured timeout, covering all of its phases.
#[async_trait]
pub trait DnsTransport: Send + Sync {
    async fn exchange(&self, query: &Message) -> Result<Message, TransportError>;

    fn protocol_name(&self) -> &'static str;
}

pub enum Transport {
    Plain(plain::PlainTransport),
    #[cfg(feature = "dns-over-rustls")]
    Tls(tls::TlsTransport),
    #[cfg(feature = "dns-over-https")]
    Https(https::HttpsTransport),
    #[cfg(feature = "dns-over-quic")]
    Quic(quic::QuicTransport),
    #[cfg(feature = "dnscrypt")]
    DnsCrypt(dnscrypt::DnsCryptTransport),
}

impl Transport {
    pub async fn exchange(&self, query: &Message) -> Result<Message, TransportError> {
        match self {
            Self::Plain(t) => t.exchange(query).await,
            #[cfg(feature = "dns-over-rustls")]
            Self::Tls(t) => t.exchange(query).await,
            #[cfg(feature = "dns-over-https")]
            Self::Https(t) => t.exchange(query).await,
            #[cfg(feature = "dns-over-quic")]
            Self::Quic(t) => t.exchange(query).await,
            #[cfg(feature = "dnscrypt")]
            Self::DnsCrypt(t) => t.exchange(query).await,
        }
    }

    pub fn protocol_name(&self) -> &'static str {
        match self {
            Self::Plain(t) => t.protocol_name(),
            #[cfg(feature = "dns-over-rustls")]
            Self::Tls(t) => t.protocol_name(),
            #[cfg(feature = "dns-over-https")]
            Self::Https(t) => t.protocol_name(),
            #[cfg(feature = "dns-over-quic")]
            Self::Quic(t) => t.protocol_name(),
            #[cfg(feature = "dnscrypt")]
            Self::DnsCrypt(t) => t.protocol_name(),
        }
    }
}

/// Builds the transport for `config`. TLS material, stamps and URLs are
/// validated here, so a bad configuration never reaches the network.
pub fn create_transport(config: &TransportConfig) -> Result<Transport, TransportError> {
    match config {
        TransportConfig::Plain(plain) => Ok(Transport::Plain(plain::PlainTransport::new(
            plain.clone(),
        ))),

        #[cfg(feature = "dns-over-rustls")]
        TransportConfig::Tls(tls) => Ok(Transport::Tls(tls::TlsTransport::new(tls.clone())?)),

        #[cfg(not(feature = "dns-over-rustls"))]
        TransportConfig::Tls(tls) => Err(TransportError::InvalidConfig(format!(
            "TLS feature not enabled. Enable 'dns-over-rustls' feature to use: {}",
            tls.server
        ))),

        #[cfg(feature = "dns-over-https")]
        TransportConfig::Http(http) => Ok(Transport::Https(https::HttpsTransport::new(
            http.clone(),
        )?)),

        #[cfg(not(feature = "dns-over-https"))]
        TransportConfig::Http(http) => Err(TransportError::InvalidConfig(format!(
            "HTTPS feature not enabled. Enable 'dns-over-https' feature to use: {}",
            http.url
        ))),

        #[cfg(feature = "dns-over-quic")]
        TransportConfig::Quic(quic) => Ok(Transport::Quic(quic::QuicTransport::new(
            quic.clone(),
        )?)),

        #[cfg(not(feature = "dns-over-quic"))]
        TransportConfig::Quic(quic) => Err(TransportError::InvalidConfig(format!(
            "QUIC feature not enabled. Enable 'dns-over-quic' feature to use: {}",
            quic.server
        ))),

        #[cfg(feature = "dnscrypt")]
        TransportConfig::DnsCrypt(dnscrypt) => Ok(Transport::DnsCrypt(
            dnscrypt::DnsCryptTransport::new(dnscrypt.clone())?,
        )),

        #[cfg(not(feature = "dnscrypt"))]
        TransportConfig::DnsCrypt(_) => Err(TransportError::InvalidConfig(
            "DNSCrypt feature not enabled. Enable 'dnscrypt' feature to use sdns:// stamps".into(),
        )),
    }
}
