use super::deadline::Deadline;
use ferrous_q_domain::{TransportError, UpstreamAddr};
use std::net::SocketAddr;

/// Resolves a hostname to all its IP addresses (IPv4 + IPv6).
pub async fn resolve_all(
    hostname: &str,
    port: u16,
    deadline: &Deadline,
) -> Result<Vec<SocketAddr>, TransportError> {
    let target = format!("{}:{}", hostname, port);

    let addrs: Vec<SocketAddr> = deadline
        .run("resolve", tokio::net::lookup_host(&target))
        .await?
        .map_err(|e| deadline.connection_failure(format!("DNS resolution failed: {}", e)))?
        .collect();

    if addrs.is_empty() {
        return Err(deadline.connection_failure(format!("No addresses found for {}", target)));
    }

    Ok(addrs)
}

/// First usable address for `addr`; literal IPs skip the lookup entirely.
pub async fn resolve(addr: &UpstreamAddr, deadline: &Deadline) -> Result<SocketAddr, TransportError> {
    match addr {
        UpstreamAddr::Resolved(socket_addr) => Ok(*socket_addr),
        UpstreamAddr::Unresolved { hostname, port } => {
            let addrs = resolve_all(hostname, *port, deadline).await?;
            Ok(addrs[0])
        }
    }
}
