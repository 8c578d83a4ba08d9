//! DNSCrypt v2 over UDP or TCP.
//!
//! The resolver certificate is fetched with a plain TXT query for the
//! provider name, verified against the stamp's Ed25519 key and cached on
//! the transport until it leaves its validity window. Every query uses a
//! fresh ephemeral X25519 key pair.

pub mod cert;
pub mod crypto;

use super::deadline::Deadline;
use super::{plain, tcp, udp, DnsTransport};
use crate::dns::codec;
use async_trait::async_trait;
use cert::{select_certificate, unix_now, DnsCryptCert};
use crypto::MIN_UDP_QUERY_LEN;
use ferrous_q_domain::{DnsCryptConfig, ServerStamp, TransportError};
use hickory_proto::op::Message;
use hickory_proto::rr::{RData, RecordType};
use ring::rand::SystemRandom;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

pub struct DnsCryptTransport {
    stamp: ServerStamp,
    config: DnsCryptConfig,
    cert: RwLock<Option<Arc<DnsCryptCert>>>,
    rng: SystemRandom,
}

impl DnsCryptTransport {
    pub fn new(config: DnsCryptConfig) -> Result<Self, TransportError> {
        let stamp: ServerStamp = config.stamp.parse()?;
        Ok(Self {
            stamp,
            config,
            cert: RwLock::new(None),
            rng: SystemRandom::new(),
        })
    }

    pub fn stamp(&self) -> &ServerStamp {
        &self.stamp
    }

    /// Cached certificate, or a freshly fetched one when the cache is empty
    /// or the cached certificate has expired.
    async fn certificate(&self, deadline: &Deadline) -> Result<Arc<DnsCryptCert>, TransportError> {
        if let Some(cert) = self.cert.read().await.as_ref() {
            if cert.is_valid_at(unix_now()) {
                return Ok(cert.clone());
            }
        }

        let mut slot = deadline.run("certificate", self.cert.write()).await?;
        if let Some(cert) = slot.as_ref() {
            if cert.is_valid_at(unix_now()) {
                return Ok(cert.clone());
            }
            debug!(serial = cert.serial, "DNSCrypt certificate expired, refetching");
        }
        *slot = None;

        let cert = Arc::new(self.fetch_certificate(deadline).await?);
        debug!(
            provider = %self.stamp.provider_name,
            serial = cert.serial,
            es_version = ?cert.es_version,
            "DNSCrypt certificate accepted"
        );
        *slot = Some(cert.clone());
        Ok(cert)
    }

    async fn fetch_certificate(&self, deadline: &Deadline) -> Result<DnsCryptCert, TransportError> {
        let query = codec::build_query(&self.stamp.provider_fqdn(), RecordType::TXT)?;
        let query_bytes = codec::encode(&query)?;

        let response = plain::exchange_with(
            self.stamp.server_addr,
            query.id(),
            &query_bytes,
            self.config.tcp,
            deadline,
        )
        .await?;

        let records: Vec<Vec<u8>> = response
            .answers()
            .iter()
            .filter_map(|record| match record.data() {
                RData::TXT(txt) => Some(txt.txt_data().concat()),
                _ => None,
            })
            .collect();

        select_certificate(&records, &self.stamp.provider_pk, unix_now())
    }
}

#[async_trait]
impl DnsTransport for DnsCryptTransport {
    async fn exchange(&self, query: &Message) -> Result<Message, TransportError> {
        let server = self.stamp.server_addr;
        let deadline = Deadline::after(self.config.timeout, server.to_string());
        let query_bytes = codec::encode(query)?;

        let cert = self.certificate(&deadline).await?;

        let min_len = if self.config.tcp { 0 } else { MIN_UDP_QUERY_LEN };
        let (packet, session) = crypto::encrypt_query(&cert, &query_bytes, min_len, &self.rng)?;

        let reply = if self.config.tcp {
            tcp::exchange(server, &packet, &deadline).await?
        } else {
            udp::exchange(server, &packet, &deadline).await?
        };

        let plaintext = session.decrypt_response(&reply)?;
        let response = codec::decode_response(&plaintext)?;
        codec::expect_id(&response, query.id())?;

        debug!(server = %server, response_len = plaintext.len(), "DNSCrypt response decrypted");
        Ok(response)
    }

    fn protocol_name(&self) -> &'static str {
        if self.config.tcp {
            "DNSCrypt/TCP"
        } else {
            "DNSCrypt/UDP"
        }
    }
}
