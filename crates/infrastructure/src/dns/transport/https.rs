//! DNS-over-HTTPS (RFC 8484) at a pinned HTTP version.
//!
//! HTTP/1.1 and HTTP/2 go through `reqwest` with ALPN restricted to the
//! requested protocol; HTTP/3 goes through [`super::h3`]. The client is
//! built per exchange so nothing is pooled between queries.
//!
//! A TLS server name override is applied by sending the request to that
//! name and pinning it to the URL's address, so SNI and certificate
//! verification use the override while the connection goes where the URL
//! points.

use super::deadline::Deadline;
use super::resolver;
use super::tls_config::{self, find_rustls_error, looks_like_tls_failure, ALPN_H2, ALPN_HTTP1};
use super::DnsTransport;
use crate::dns::codec;
use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use ferrous_q_domain::{HttpConfig, HttpMethod, HttpVersion, TransportError, UpstreamAddr};
use hickory_proto::op::Message;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::Url;
use std::net::{IpAddr, SocketAddr};
use tracing::debug;

pub const DNS_MESSAGE_CONTENT_TYPE: &str = "application/dns-message";
const MAX_RESPONSE_SIZE: usize = u16::MAX as usize;

/// Status, content type and body of a DoH reply, before any validation.
#[derive(Debug)]
pub(crate) struct DohResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl DohResponse {
    fn into_message(self, url: &Url) -> Result<Message, TransportError> {
        if !(200..300).contains(&self.status) {
            return Err(TransportError::HttpStatus {
                url: url.to_string(),
                status: self.status,
            });
        }

        if !is_dns_message(self.content_type.as_deref()) {
            return Err(TransportError::ContentType {
                url: url.to_string(),
                content_type: self.content_type.unwrap_or_default(),
            });
        }

        if self.body.len() > MAX_RESPONSE_SIZE {
            return Err(oversized_body(self.body.len()));
        }

        codec::decode_response(&self.body)
    }
}

fn oversized_body(len: usize) -> TransportError {
    TransportError::Framing(format!(
        "HTTP body of {} bytes exceeds the maximum DNS message size",
        len
    ))
}

/// Upstream address and bare host of a DoH URL.
pub(crate) fn url_upstream(url: &Url) -> Result<(UpstreamAddr, String), TransportError> {
    let host = url
        .host_str()
        .ok_or_else(|| TransportError::InvalidConfig(format!("DoH URL '{}' has no host", url)))?
        .trim_start_matches('[')
        .trim_end_matches(']')
        .to_string();
    let port = url.port_or_known_default().unwrap_or(443);

    let server = match host.parse::<IpAddr>() {
        Ok(ip) => UpstreamAddr::Resolved(SocketAddr::new(ip, port)),
        Err(_) => UpstreamAddr::Unresolved {
            hostname: host.as_str().into(),
            port,
        },
    };
    Ok((server, host))
}

/// Media type check ignoring parameters and case.
pub(crate) fn is_dns_message(content_type: Option<&str>) -> bool {
    content_type
        .and_then(|ct| ct.split(';').next())
        .map(|media| media.trim().eq_ignore_ascii_case(DNS_MESSAGE_CONTENT_TYPE))
        .unwrap_or(false)
}

/// `url` with the query appended as `dns=<base64url, unpadded>`.
pub(crate) fn get_url(url: &Url, query_bytes: &[u8]) -> Url {
    let mut with_query = url.clone();
    with_query
        .query_pairs_mut()
        .append_pair("dns", &URL_SAFE_NO_PAD.encode(query_bytes));
    with_query
}

enum HttpClient {
    Reqwest { tls: Option<rustls::ClientConfig> },
    #[cfg(feature = "dns-over-h3")]
    H3(super::h3::H3Client),
}

/// TLS name that requests are addressed to, and where it really lives.
struct PinnedHost {
    name: String,
    server: UpstreamAddr,
}

pub struct HttpsTransport {
    config: HttpConfig,
    url: Url,
    request_url: Url,
    pinned: Option<PinnedHost>,
    client: HttpClient,
}

impl HttpsTransport {
    pub fn new(config: HttpConfig) -> Result<Self, TransportError> {
        let url = Url::parse(&config.url).map_err(|e| {
            TransportError::InvalidConfig(format!("Invalid DoH URL '{}': {}", config.url, e))
        })?;
        let is_https = match url.scheme() {
            "https" => true,
            "http" => false,
            other => {
                return Err(TransportError::InvalidConfig(format!(
                    "Unsupported DoH URL scheme '{}'",
                    other
                )))
            }
        };

        let client = match config.version {
            HttpVersion::Http3 if !is_https => {
                return Err(TransportError::InvalidConfig(format!(
                    "HTTP/3 requires an https:// URL, got '{}'",
                    config.url
                )))
            }
            #[cfg(feature = "dns-over-h3")]
            HttpVersion::Http3 => HttpClient::H3(super::h3::H3Client::new(&url, &config.tls)?),
            #[cfg(not(feature = "dns-over-h3"))]
            HttpVersion::Http3 => {
                return Err(TransportError::InvalidConfig(format!(
                    "HTTP/3 feature not enabled. Enable 'dns-over-h3' feature to use: {}",
                    config.url
                )))
            }
            HttpVersion::Http1 | HttpVersion::Http2 => {
                let alpn: &[&[u8]] = if config.version == HttpVersion::Http1 {
                    &[ALPN_HTTP1]
                } else {
                    &[ALPN_H2]
                };
                let tls = is_https
                    .then(|| tls_config::build_client_config(&config.tls, alpn))
                    .transpose()?;
                HttpClient::Reqwest { tls }
            }
        };

        let pinned = match (&client, config.tls.server_name.as_deref()) {
            (HttpClient::Reqwest { tls: Some(_) }, Some(name)) => pin_server_name(&url, name)?,
            _ => None,
        };
        let request_url = match &pinned {
            Some(pin) => {
                let mut rewritten = url.clone();
                rewritten.set_host(Some(&pin.name)).map_err(|e| {
                    TransportError::InvalidConfig(format!(
                        "Invalid TLS server name '{}': {}",
                        pin.name, e
                    ))
                })?;
                rewritten
            }
            None => url.clone(),
        };

        Ok(Self {
            config,
            url,
            request_url,
            pinned,
            client,
        })
    }

    fn build_reqwest_client(
        &self,
        tls: Option<&rustls::ClientConfig>,
        pinned_addr: Option<SocketAddr>,
        deadline: &Deadline,
    ) -> Result<reqwest::Client, TransportError> {
        let mut builder = reqwest::Client::builder()
            .no_proxy()
            .pool_max_idle_per_host(0)
            .timeout(deadline.remaining());

        if let Some(tls) = tls {
            builder = builder.use_preconfigured_tls(tls.clone());
        }

        if let (Some(pin), Some(addr)) = (&self.pinned, pinned_addr) {
            builder = builder.resolve(&pin.name, addr);
        }

        builder = match self.config.version {
            HttpVersion::Http1 => builder.http1_only(),
            _ => builder.http2_prior_knowledge(),
        };

        builder
            .build()
            .map_err(|e| TransportError::InvalidConfig(format!("Failed to build HTTP client: {}", e)))
    }

    async fn send_reqwest(
        &self,
        tls: Option<&rustls::ClientConfig>,
        query_bytes: Vec<u8>,
        deadline: &Deadline,
    ) -> Result<DohResponse, TransportError> {
        let pinned_addr = match &self.pinned {
            Some(pin) => Some(resolver::resolve(&pin.server, deadline).await?),
            None => None,
        };
        let client = self.build_reqwest_client(tls, pinned_addr, deadline)?;

        let request = match self.config.method {
            HttpMethod::Post => client
                .post(self.request_url.clone())
                .header(CONTENT_TYPE, DNS_MESSAGE_CONTENT_TYPE)
                .header(ACCEPT, DNS_MESSAGE_CONTENT_TYPE)
                .body(query_bytes),
            HttpMethod::Get => client
                .get(get_url(&self.request_url, &query_bytes))
                .header(ACCEPT, DNS_MESSAGE_CONTENT_TYPE),
        };

        let mut response = deadline
            .run("request", request.send())
            .await?
            .map_err(|e| self.classify_error(e, deadline))?;

        let expected_version = match self.config.version {
            HttpVersion::Http1 => reqwest::Version::HTTP_11,
            _ => reqwest::Version::HTTP_2,
        };
        if response.version() != expected_version {
            return Err(deadline.handshake_failure(format!(
                "server answered with {:?}, {} was requested",
                response.version(),
                self.config.version.as_str()
            )));
        }

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        if let Some(len) = response.content_length() {
            if len > MAX_RESPONSE_SIZE as u64 {
                return Err(oversized_body(len as usize));
            }
        }

        let mut body = Vec::new();
        while let Some(chunk) = deadline
            .run("read", response.chunk())
            .await?
            .map_err(|e| self.classify_error(e, deadline))?
        {
            if body.len() + chunk.len() > MAX_RESPONSE_SIZE {
                return Err(oversized_body(body.len() + chunk.len()));
            }
            body.extend_from_slice(&chunk);
        }

        Ok(DohResponse {
            status,
            content_type,
            body,
        })
    }

    fn classify_error(&self, err: reqwest::Error, deadline: &Deadline) -> TransportError {
        if err.is_timeout() {
            return deadline.expired("request");
        }
        if let Some(tls) = find_rustls_error(&err) {
            return deadline.handshake_failure(tls);
        }
        let chain = error_chain(&err);
        if err.is_connect() {
            // hyper-util does not always expose the rustls error as a source.
            if looks_like_tls_failure(&chain) {
                return deadline.handshake_failure(chain);
            }
            return deadline.connection_failure(chain);
        }
        if self.config.version == HttpVersion::Http2 && err.is_request() {
            // Prior-knowledge HTTP/2 against a peer that does not speak it.
            return deadline.handshake_failure(format!("HTTP/2 negotiation failed: {}", chain));
        }
        deadline.connection_failure(chain)
    }
}

/// Pin for a DNS-name override that differs from the URL host. An IP
/// override cannot be expressed through the request URL and is rejected.
fn pin_server_name(url: &Url, name: &str) -> Result<Option<PinnedHost>, TransportError> {
    let (server, host) = url_upstream(url)?;
    if name.eq_ignore_ascii_case(&host) {
        return Ok(None);
    }
    if name.parse::<IpAddr>().is_ok() {
        return Err(TransportError::InvalidConfig(format!(
            "TLS server name '{}' must be a DNS name when it differs from the URL host '{}'",
            name, host
        )));
    }
    Ok(Some(PinnedHost {
        name: name.trim_end_matches('.').to_string(),
        server,
    }))
}

fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(inner) = source {
        out.push_str(": ");
        out.push_str(&inner.to_string());
        source = inner.source();
    }
    out
}

#[async_trait]
impl DnsTransport for HttpsTransport {
    async fn exchange(&self, query: &Message) -> Result<Message, TransportError> {
        let deadline = Deadline::after(self.config.timeout, self.config.url.clone());
        let query_bytes = codec::encode(query)?;

        let response = match &self.client {
            HttpClient::Reqwest { tls } => {
                self.send_reqwest(tls.as_ref(), query_bytes, &deadline)
                    .await?
            }
            #[cfg(feature = "dns-over-h3")]
            HttpClient::H3(h3) => {
                h3.send(&self.url, self.config.method, query_bytes, &deadline)
                    .await?
            }
        };

        debug!(
            url = %self.url,
            version = self.config.version.as_str(),
            status = response.status,
            body_len = response.body.len(),
            "DoH response received"
        );

        response.into_message(&self.url)
    }

    fn protocol_name(&self) -> &'static str {
        self.config.version.as_str()
    }
}
