//! DNS-over-HTTPS over HTTP/3: QUIC with ALPN "h3", one request per connection.

use super::deadline::Deadline;
use super::https::{get_url, url_upstream, DohResponse, DNS_MESSAGE_CONTENT_TYPE};
use super::quic::{client_endpoint, connect, quic_client_config};
use super::resolver;
use super::tls_config::{self, ALPN_H3};
use bytes::{Buf, Bytes};
use ferrous_q_domain::{HttpMethod, TlsSettings, TransportError, UpstreamAddr};
use reqwest::Url;
use tokio::task::JoinHandle;
use tracing::debug;

type H3SendRequest = h3::client::SendRequest<h3_quinn::OpenStreams, Bytes>;

/// H3_NO_ERROR
const H3_NO_ERROR: u32 = 0x100;
const MAX_RESPONSE_SIZE: usize = u16::MAX as usize;

/// Aborts the connection driver even when the exchange future is dropped.
struct DriverGuard(JoinHandle<()>);

impl Drop for DriverGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

pub(crate) struct H3Client {
    server: UpstreamAddr,
    server_name: String,
    client_config: quinn::ClientConfig,
}

impl H3Client {
    pub(crate) fn new(url: &Url, tls: &TlsSettings) -> Result<Self, TransportError> {
        let (server, host) = url_upstream(url)?;
        let server_name = tls_config::server_name(tls, &host)?.to_str().into_owned();
        let client_config = quic_client_config(tls, &[ALPN_H3])?;

        Ok(Self {
            server,
            server_name,
            client_config,
        })
    }

    pub(crate) async fn send(
        &self,
        url: &Url,
        method: HttpMethod,
        query_bytes: Vec<u8>,
        deadline: &Deadline,
    ) -> Result<DohResponse, TransportError> {
        let addr = resolver::resolve(&self.server, deadline).await?;
        let endpoint = client_endpoint(addr, deadline)?;
        let conn = connect(
            &endpoint,
            &self.client_config,
            addr,
            &self.server_name,
            deadline,
        )
        .await?;

        let (mut driver, mut send_request) = deadline
            .run("handshake", h3::client::new(h3_quinn::Connection::new(conn.clone())))
            .await?
            .map_err(|e| deadline.handshake_failure(format!("HTTP/3 setup failed: {}", e)))?;

        let _driver = DriverGuard(tokio::spawn(async move {
            let _ = std::future::poll_fn(|cx| driver.poll_close(cx)).await;
        }));

        debug!(server = %addr, server_name = %self.server_name, "H3 connection established");

        let result = execute_request(&mut send_request, url, method, query_bytes, deadline).await;
        conn.close(H3_NO_ERROR.into(), b"");
        result
    }
}

async fn execute_request(
    send_request: &mut H3SendRequest,
    url: &Url,
    method: HttpMethod,
    query_bytes: Vec<u8>,
    deadline: &Deadline,
) -> Result<DohResponse, TransportError> {
    let (uri, body) = match method {
        HttpMethod::Post => (url.clone(), Some(query_bytes)),
        HttpMethod::Get => (get_url(url, &query_bytes), None),
    };

    let mut builder = http::Request::builder()
        .method(method.as_str())
        .uri(uri.as_str())
        .header(http::header::ACCEPT, DNS_MESSAGE_CONTENT_TYPE);
    if body.is_some() {
        builder = builder.header(http::header::CONTENT_TYPE, DNS_MESSAGE_CONTENT_TYPE);
    }
    let request = builder
        .body(())
        .map_err(|e| TransportError::InvalidConfig(format!("Failed to build H3 request: {}", e)))?;

    let mut stream = deadline
        .run("request", send_request.send_request(request))
        .await?
        .map_err(|e| deadline.connection_failure(format!("Failed to send H3 request: {}", e)))?;

    if let Some(body) = body {
        deadline
            .run("write", stream.send_data(Bytes::from(body)))
            .await?
            .map_err(|e| deadline.connection_failure(format!("Failed to send H3 body: {}", e)))?;
    }

    deadline
        .run("write", stream.finish())
        .await?
        .map_err(|e| deadline.connection_failure(format!("Failed to finish H3 stream: {}", e)))?;

    let response = deadline
        .run("read", stream.recv_response())
        .await?
        .map_err(|e| deadline.connection_failure(format!("Failed to receive H3 response: {}", e)))?;

    let status = response.status().as_u16();
    let content_type = response
        .headers()
        .get(http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let mut body = Vec::new();
    while let Some(mut chunk) = deadline
        .run("read", stream.recv_data())
        .await?
        .map_err(|e| deadline.connection_failure(format!("Failed to read H3 body: {}", e)))?
    {
        if body.len() + chunk.remaining() > MAX_RESPONSE_SIZE {
            return Err(TransportError::Framing(
                "HTTP/3 body exceeds the maximum DNS message size".into(),
            ));
        }
        while chunk.has_remaining() {
            let part = chunk.chunk();
            body.extend_from_slice(part);
            let len = part.len();
            chunk.advance(len);
        }
    }

    Ok(DohResponse {
        status,
        content_type,
        body,
    })
}
