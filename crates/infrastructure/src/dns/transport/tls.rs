//! DNS-over-TLS (RFC 7858): TCP, TLS handshake with ALPN "dot", then
//! the usual 2-byte length framing.

use super::deadline::Deadline;
use super::tcp::{self, read_with_length_prefix, send_with_length_prefix};
use super::tls_config::{self, ALPN_DOT};
use super::{resolver, DnsTransport};
use crate::dns::codec;
use async_trait::async_trait;
use ferrous_q_domain::{TlsConfig, TransportError};
use hickory_proto::op::Message;
use rustls::pki_types::ServerName;
use std::sync::Arc;
use tokio_rustls::TlsConnector;
use tracing::debug;

pub struct TlsTransport {
    config: TlsConfig,
    connector: TlsConnector,
    server_name: ServerName<'static>,
}

impl TlsTransport {
    pub fn new(config: TlsConfig) -> Result<Self, TransportError> {
        let client_config = tls_config::build_client_config(&config.tls, &[ALPN_DOT])?;
        let server_name = tls_config::server_name(&config.tls, &config.server.host())?;
        Ok(Self {
            config,
            connector: TlsConnector::from(Arc::new(client_config)),
            server_name,
        })
    }
}

#[async_trait]
impl DnsTransport for TlsTransport {
    async fn exchange(&self, query: &Message) -> Result<Message, TransportError> {
        let deadline = Deadline::after(self.config.timeout, self.config.server.to_string());
        let query_bytes = codec::encode(query)?;
        let server = resolver::resolve(&self.config.server, &deadline).await?;

        let tcp_stream = tcp::connect(server, &deadline).await?;
        let mut stream = deadline
            .run(
                "handshake",
                self.connector.connect(self.server_name.clone(), tcp_stream),
            )
            .await?
            .map_err(|e| deadline.handshake_failure(e))?;

        debug!(server = %server, server_name = ?self.server_name, "TLS connection established");

        send_with_length_prefix(&mut stream, &query_bytes, &deadline).await?;
        let response_bytes = read_with_length_prefix(&mut stream, &deadline).await?;

        debug!(server = %server, response_len = response_bytes.len(), "TLS response received");

        let response = codec::decode_response(&response_bytes)?;
        codec::expect_id(&response, query.id())?;
        Ok(response)
    }

    fn protocol_name(&self) -> &'static str {
        "TLS"
    }
}
