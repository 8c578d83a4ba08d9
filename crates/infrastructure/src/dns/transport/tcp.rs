//! DNS over TCP (RFC 1035 §4.2.2) and the 2-byte length framing shared
//! with DoT, DoQ and DNSCrypt/TCP.

use super::deadline::Deadline;
use crate::dns::codec::HEADER_LEN;
use ferrous_q_domain::TransportError;
use std::io::ErrorKind;
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

pub const MAX_TCP_MESSAGE_SIZE: usize = u16::MAX as usize;

pub(crate) async fn connect(
    server: SocketAddr,
    deadline: &Deadline,
) -> Result<TcpStream, TransportError> {
    let stream = deadline
        .run("connect", TcpStream::connect(server))
        .await?
        .map_err(|e| deadline.connection_failure(e))?;

    stream
        .set_nodelay(true)
        .map_err(|e| deadline.connection_failure(format!("Failed to set TCP_NODELAY: {}", e)))?;

    Ok(stream)
}

/// One query over a fresh connection, closed when the response has been read.
pub(crate) async fn exchange(
    server: SocketAddr,
    message_bytes: &[u8],
    deadline: &Deadline,
) -> Result<Vec<u8>, TransportError> {
    let mut stream = connect(server, deadline).await?;

    send_with_length_prefix(&mut stream, message_bytes, deadline).await?;
    debug!(server = %server, message_len = message_bytes.len(), "TCP query sent");

    let response_bytes = read_with_length_prefix(&mut stream, deadline).await?;
    debug!(server = %server, response_len = response_bytes.len(), "TCP response received");

    Ok(response_bytes)
}

/// Writes `message_bytes` behind a big-endian u16 length as a single write.
pub async fn send_with_length_prefix<S>(
    stream: &mut S,
    message_bytes: &[u8],
    deadline: &Deadline,
) -> Result<(), TransportError>
where
    S: AsyncWrite + Unpin,
{
    let length = u16::try_from(message_bytes.len()).map_err(|_| {
        TransportError::Framing(format!(
            "message of {} bytes exceeds the {}-byte frame limit",
            message_bytes.len(),
            MAX_TCP_MESSAGE_SIZE
        ))
    })?;

    let mut frame = Vec::with_capacity(2 + message_bytes.len());
    frame.extend_from_slice(&length.to_be_bytes());
    frame.extend_from_slice(message_bytes);

    deadline
        .run("write", async {
            stream.write_all(&frame).await?;
            stream.flush().await
        })
        .await?
        .map_err(|e| deadline.connection_failure(format!("Failed to write DNS message: {}", e)))
}

/// Reads exactly one length-prefixed message. Early close and short reads are framing errors.
pub async fn read_with_length_prefix<S>(
    stream: &mut S,
    deadline: &Deadline,
) -> Result<Vec<u8>, TransportError>
where
    S: AsyncRead + Unpin,
{
    deadline
        .run("read", async {
            let mut len_buf = [0u8; 2];
            read_full(stream, &mut len_buf, "length prefix").await?;

            let response_len = u16::from_be_bytes(len_buf) as usize;
            if response_len < HEADER_LEN {
                return Err(TransportError::Framing(format!(
                    "length prefix {} is smaller than a DNS header",
                    response_len
                )));
            }

            let mut response = vec![0u8; response_len];
            read_full(stream, &mut response, "message body").await?;
            Ok(response)
        })
        .await?
}

async fn read_full<S>(stream: &mut S, buf: &mut [u8], what: &str) -> Result<(), TransportError>
where
    S: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        match stream.read(&mut buf[filled..]).await {
            Ok(0) => {
                return Err(TransportError::Framing(format!(
                    "stream closed after {} of {} {} bytes",
                    filled,
                    buf.len(),
                    what
                )))
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                return Err(TransportError::Framing(format!(
                    "failed reading {} after {} of {} bytes: {}",
                    what,
                    filled,
                    buf.len(),
                    e
                )))
            }
        }
    }
    Ok(())
}
