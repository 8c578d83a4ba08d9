//! Plain DNS: UDP first, with a mandatory retry over TCP when the UDP
//! answer comes back truncated.

use super::deadline::Deadline;
use super::{resolver, tcp, udp, DnsTransport};
use crate::dns::codec;
use async_trait::async_trait;
use ferrous_q_domain::{PlainConfig, TransportError};
use hickory_proto::op::Message;
use std::net::SocketAddr;
use tracing::debug;

pub struct PlainTransport {
    config: PlainConfig,
}

impl PlainTransport {
    pub fn new(config: PlainConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl DnsTransport for PlainTransport {
    async fn exchange(&self, query: &Message) -> Result<Message, TransportError> {
        let deadline = Deadline::after(self.config.timeout, self.config.server.to_string());
        let query_bytes = codec::encode(query)?;
        let server = resolver::resolve(&self.config.server, &deadline).await?;

        exchange_with(
            server,
            query.id(),
            &query_bytes,
            self.config.prefer_tcp,
            &deadline,
        )
        .await
    }

    fn protocol_name(&self) -> &'static str {
        if self.config.prefer_tcp {
            "TCP"
        } else {
            "UDP"
        }
    }
}

/// Exchange already-encoded query bytes with `server`. Also used for the
/// DNSCrypt certificate lookup, which is ordinary DNS.
pub(crate) async fn exchange_with(
    server: SocketAddr,
    query_id: u16,
    query_bytes: &[u8],
    prefer_tcp: bool,
    deadline: &Deadline,
) -> Result<Message, TransportError> {
    if !prefer_tcp {
        let response_bytes = udp::exchange(server, query_bytes, deadline).await?;
        let response = codec::decode_response(&response_bytes)?;
        codec::expect_id(&response, query_id)?;

        if !response.truncated() {
            return Ok(response);
        }

        debug!(server = %server, "UDP response truncated, retrying over TCP");
    }

    let response_bytes = tcp::exchange(server, query_bytes, deadline).await?;
    let response = codec::decode_response(&response_bytes)?;
    codec::expect_id(&response, query_id)?;
    Ok(response)
}
