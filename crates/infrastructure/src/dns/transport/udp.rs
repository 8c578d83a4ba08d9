//! DNS over UDP (RFC 1035 §4.2.1). Messages are sent as-is, one datagram each way.

use super::deadline::Deadline;
use ferrous_q_domain::TransportError;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use tokio::net::UdpSocket;
use tracing::debug;

/// Largest DNS message a single datagram can carry.
const MAX_UDP_RESPONSE_SIZE: usize = 65535;

pub(crate) fn unspecified_for(server: SocketAddr) -> SocketAddr {
    if server.is_ipv4() {
        SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))
    } else {
        SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0))
    }
}

/// Sends one datagram and returns the first datagram that comes back from `server`.
pub(crate) async fn exchange(
    server: SocketAddr,
    message_bytes: &[u8],
    deadline: &Deadline,
) -> Result<Vec<u8>, TransportError> {
    let socket = UdpSocket::bind(unspecified_for(server))
        .await
        .map_err(|e| deadline.connection_failure(format!("Failed to bind UDP socket: {}", e)))?;

    // Connected sockets drop datagrams from any other source.
    socket
        .connect(server)
        .await
        .map_err(|e| deadline.connection_failure(e))?;

    let bytes_sent = deadline
        .run("write", socket.send(message_bytes))
        .await?
        .map_err(|e| deadline.connection_failure(format!("Failed to send UDP query: {}", e)))?;

    debug!(server = %server, bytes_sent, "UDP query sent");

    let mut recv_buf = vec![0u8; MAX_UDP_RESPONSE_SIZE];
    let bytes_received = deadline
        .run("read", socket.recv(&mut recv_buf))
        .await?
        .map_err(|e| deadline.connection_failure(format!("Failed to receive UDP response: {}", e)))?;

    recv_buf.truncate(bytes_received);

    debug!(server = %server, bytes_received, "UDP response received");

    Ok(recv_buf)
}
