//! DNS-over-QUIC (RFC 9250).
//!
//! One bidirectional stream per query, framed like TCP. The message ID is
//! zero on the wire and restored on the decoded response. Each exchange
//! opens its own connection and closes it afterwards.

use super::deadline::Deadline;
use super::tcp::{read_with_length_prefix, send_with_length_prefix};
use super::tls_config::{self, ALPN_DOQ};
use super::udp::unspecified_for;
use super::{resolver, DnsTransport};
use crate::dns::codec;
use async_trait::async_trait;
use ferrous_q_domain::{QuicConfig, TlsSettings, TransportError};
use hickory_proto::op::Message;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::debug;

/// DOQ_NO_ERROR
const DOQ_NO_ERROR: u32 = 0x0;

pub(crate) fn quic_client_config(
    settings: &TlsSettings,
    alpn: &[&[u8]],
) -> Result<quinn::ClientConfig, TransportError> {
    let tls = tls_config::build_client_config(settings, alpn)?;
    let quic = quinn::crypto::rustls::QuicClientConfig::try_from(Arc::new(tls)).map_err(|e| {
        TransportError::InvalidConfig(format!("TLS config unusable for QUIC: {}", e))
    })?;
    Ok(quinn::ClientConfig::new(Arc::new(quic)))
}

pub(crate) fn client_endpoint(
    server: SocketAddr,
    deadline: &Deadline,
) -> Result<quinn::Endpoint, TransportError> {
    quinn::Endpoint::client(unspecified_for(server)).map_err(|e| {
        deadline.connection_failure(format!("Failed to bind QUIC endpoint: {}", e))
    })
}

/// QUIC + TLS handshake, bounded by `deadline`.
pub(crate) async fn connect(
    endpoint: &quinn::Endpoint,
    client_config: &quinn::ClientConfig,
    server: SocketAddr,
    server_name: &str,
    deadline: &Deadline,
) -> Result<quinn::Connection, TransportError> {
    let connecting = endpoint
        .connect_with(client_config.clone(), server, server_name)
        .map_err(|e| deadline.connection_failure(format!("Failed to initiate QUIC connection: {}", e)))?;

    deadline
        .run("handshake", connecting)
        .await?
        .map_err(|e| match e {
            quinn::ConnectionError::TimedOut => deadline.expired("handshake"),
            other => deadline.handshake_failure(other),
        })
}

pub struct QuicTransport {
    config: QuicConfig,
    client_config: quinn::ClientConfig,
    server_name: String,
}

impl QuicTransport {
    pub fn new(config: QuicConfig) -> Result<Self, TransportError> {
        let client_config = quic_client_config(&config.tls, &[ALPN_DOQ])?;
        let server_name = tls_config::server_name(&config.tls, &config.server.host())?
            .to_str()
            .into_owned();
        Ok(Self {
            config,
            client_config,
            server_name,
        })
    }

    async fn send_on_stream(
        conn: &quinn::Connection,
        message_bytes: &[u8],
        deadline: &Deadline,
    ) -> Result<Vec<u8>, TransportError> {
        let (mut send_stream, mut recv_stream) = deadline
            .run("write", conn.open_bi())
            .await?
            .map_err(|e| deadline.connection_failure(format!("Failed to open QUIC stream: {}", e)))?;

        send_with_length_prefix(&mut send_stream, message_bytes, deadline).await?;

        // The FIN tells the server this stream carries no further queries.
        send_stream
            .finish()
            .map_err(|e| deadline.connection_failure(format!("Failed to finish QUIC stream: {}", e)))?;

        read_with_length_prefix(&mut recv_stream, deadline).await
    }
}

#[async_trait]
impl DnsTransport for QuicTransport {
    async fn exchange(&self, query: &Message) -> Result<Message, TransportError> {
        let deadline = Deadline::after(self.config.timeout, self.config.server.to_string());
        let wire_query = codec::encode(&codec::with_id(query, 0))?;
        let server = resolver::resolve(&self.config.server, &deadline).await?;

        let endpoint = client_endpoint(server, &deadline)?;
        let conn = connect(
            &endpoint,
            &self.client_config,
            server,
            &self.server_name,
            &deadline,
        )
        .await?;

        debug!(server = %server, server_name = %self.server_name, "QUIC connection established");

        let result = Self::send_on_stream(&conn, &wire_query, &deadline).await;
        conn.close(DOQ_NO_ERROR.into(), b"");

        let response_bytes = result?;
        debug!(server = %server, response_len = response_bytes.len(), "QUIC response received");

        let response = codec::decode_response(&response_bytes)?;
        codec::expect_id(&response, 0)?;
        Ok(codec::with_id(&response, query.id()))
    }

    fn protocol_name(&self) -> &'static str {
        "QUIC"
    }
}
