use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

const DNS_PORT: u16 = 53;
const DOT_PORT: u16 = 853;
const DOQ_PORT: u16 = 853;

/// Represents an upstream server address that may or may not be resolved to an IP.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum UpstreamAddr {
    Resolved(SocketAddr),
    Unresolved { hostname: Arc<str>, port: u16 },
}

impl UpstreamAddr {
    pub fn socket_addr(&self) -> Option<SocketAddr> {
        match self {
            UpstreamAddr::Resolved(addr) => Some(*addr),
            UpstreamAddr::Unresolved { .. } => None,
        }
    }

    pub fn port(&self) -> u16 {
        match self {
            UpstreamAddr::Resolved(addr) => addr.port(),
            UpstreamAddr::Unresolved { port, .. } => *port,
        }
    }

    /// Host part used as the default TLS server name.
    pub fn host(&self) -> String {
        match self {
            UpstreamAddr::Resolved(addr) => addr.ip().to_string(),
            UpstreamAddr::Unresolved { hostname, .. } => hostname.to_string(),
        }
    }

    pub fn is_unresolved(&self) -> bool {
        matches!(self, UpstreamAddr::Unresolved { .. })
    }
}

impl fmt::Display for UpstreamAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpstreamAddr::Resolved(addr) => write!(f, "{}", addr),
            UpstreamAddr::Unresolved { hostname, port } => write!(f, "{}:{}", hostname, port),
        }
    }
}

/// Certificate verification settings shared by DoT, DoH and DoQ.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsSettings {
    /// Overrides the SNI / verification name derived from the server address.
    pub server_name: Option<Arc<str>>,
    /// PEM bundle replacing the built-in web PKI roots.
    pub ca_file: Option<PathBuf>,
    pub insecure_skip_verify: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HttpVersion {
    Http1,
    #[default]
    Http2,
    Http3,
}

impl HttpVersion {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http1 => "HTTP/1.1",
            Self::Http2 => "HTTP/2",
            Self::Http3 => "HTTP/3",
        }
    }
}

impl FromStr for HttpVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "http1" | "http/1.1" | "h1" | "1" => Ok(Self::Http1),
            "http2" | "http/2" | "h2" | "2" => Ok(Self::Http2),
            "http3" | "http/3" | "h3" | "3" => Ok(Self::Http3),
            other => Err(format!("Unknown HTTP version '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HttpMethod {
    Get,
    #[default]
    Post,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
        }
    }
}

impl FromStr for HttpMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Self::Get),
            "POST" => Ok(Self::Post),
            other => Err(format!("Unsupported HTTP method '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlainConfig {
    pub server: UpstreamAddr,
    pub timeout: Duration,
    pub prefer_tcp: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsConfig {
    pub server: UpstreamAddr,
    pub timeout: Duration,
    pub tls: TlsSettings,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpConfig {
    pub url: Arc<str>,
    pub timeout: Duration,
    pub version: HttpVersion,
    pub method: HttpMethod,
    pub tls: TlsSettings,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuicConfig {
    pub server: UpstreamAddr,
    pub timeout: Duration,
    pub tls: TlsSettings,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsCryptConfig {
    pub stamp: Arc<str>,
    pub timeout: Duration,
    pub tcp: bool,
}

/// Immutable description of one upstream, created before any exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportConfig {
    Plain(PlainConfig),
    Tls(TlsConfig),
    Http(HttpConfig),
    Quic(QuicConfig),
    DnsCrypt(DnsCryptConfig),
}

impl TransportConfig {
    pub fn timeout(&self) -> Duration {
        match self {
            Self::Plain(c) => c.timeout,
            Self::Tls(c) => c.timeout,
            Self::Http(c) => c.timeout,
            Self::Quic(c) => c.timeout,
            Self::DnsCrypt(c) => c.timeout,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        match &mut self {
            Self::Plain(c) => c.timeout = timeout,
            Self::Tls(c) => c.timeout = timeout,
            Self::Http(c) => c.timeout = timeout,
            Self::Quic(c) => c.timeout = timeout,
            Self::DnsCrypt(c) => c.timeout = timeout,
        }
        self
    }

    pub fn tls_settings_mut(&mut self) -> Option<&mut TlsSettings> {
        match self {
            Self::Tls(c) => Some(&mut c.tls),
            Self::Http(c) => Some(&mut c.tls),
            Self::Quic(c) => Some(&mut c.tls),
            Self::Plain(_) | Self::DnsCrypt(_) => None,
        }
    }

    pub fn protocol_name(&self) -> &'static str {
        match self {
            Self::Plain(c) if c.prefer_tcp => "TCP",
            Self::Plain(_) => "UDP",
            Self::Tls(_) => "TLS",
            Self::Http(c) => c.version.as_str(),
            Self::Quic(_) => "QUIC",
            Self::DnsCrypt(c) if c.tcp => "DNSCrypt/TCP",
            Self::DnsCrypt(_) => "DNSCrypt/UDP",
        }
    }
}

fn parse_host_port(s: &str) -> Option<(&str, u16)> {
    if s.starts_with('[') {
        let end = s.find(']')?;
        let host = &s[1..end];
        let rest = &s[end + 1..];
        let port_str = rest.strip_prefix(':')?;
        let port = port_str.parse::<u16>().ok()?;
        Some((host, port))
    } else {
        let (host, port_str) = s.rsplit_once(':')?;
        let port = port_str.parse::<u16>().ok()?;
        Some((host, port))
    }
}

fn parse_upstream_addr(addr_str: &str, default_port: u16) -> Result<UpstreamAddr, String> {
    if let Ok(addr) = addr_str.parse::<SocketAddr>() {
        return Ok(UpstreamAddr::Resolved(addr));
    }
    let bare = addr_str.trim_start_matches('[').trim_end_matches(']');
    if let Ok(ip) = bare.parse::<IpAddr>() {
        return Ok(UpstreamAddr::Resolved(SocketAddr::new(ip, default_port)));
    }
    if let Some((host, port)) = parse_host_port(addr_str) {
        if host.is_empty() {
            return Err(format!("Missing host in '{}'", addr_str));
        }
        return Ok(UpstreamAddr::Unresolved {
            hostname: host.into(),
            port,
        });
    }
    if !addr_str.is_empty() && !addr_str.contains([':', '/', '[', ']']) {
        return Ok(UpstreamAddr::Unresolved {
            hostname: addr_str.into(),
            port: default_port,
        });
    }
    Err(format!("Invalid address '{}'", addr_str))
}

fn plain(addr_str: &str, prefer_tcp: bool) -> Result<TransportConfig, String> {
    let server = parse_upstream_addr(addr_str, DNS_PORT)?;
    Ok(TransportConfig::Plain(PlainConfig {
        server,
        timeout: DEFAULT_TIMEOUT,
        prefer_tcp,
    }))
}

fn http(url: &str, version: HttpVersion) -> Result<TransportConfig, String> {
    let rest = url
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or_default();
    if rest.split('/').next().unwrap_or_default().is_empty() {
        return Err(format!("Invalid HTTP URL '{}': missing host", url));
    }
    Ok(TransportConfig::Http(HttpConfig {
        url: url.into(),
        timeout: DEFAULT_TIMEOUT,
        version,
        method: HttpMethod::default(),
        tls: TlsSettings::default(),
    }))
}

impl FromStr for TransportConfig {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(addr_str) = s.strip_prefix("udp://") {
            return plain(addr_str, false).map_err(|e| format!("Invalid UDP upstream: {}", e));
        }
        if let Some(addr_str) = s.strip_prefix("tcp://") {
            return plain(addr_str, true).map_err(|e| format!("Invalid TCP upstream: {}", e));
        }
        if let Some(rest) = s.strip_prefix("tls://") {
            let server = parse_upstream_addr(rest, DOT_PORT).map_err(|e| {
                format!(
                    "Invalid TLS format '{}' ({}). Expected 'tls://IP:PORT' or 'tls://HOSTNAME:PORT'",
                    s, e
                )
            })?;
            return Ok(TransportConfig::Tls(TlsConfig {
                server,
                timeout: DEFAULT_TIMEOUT,
                tls: TlsSettings::default(),
            }));
        }
        if let Some(rest) = s
            .strip_prefix("doq://")
            .or_else(|| s.strip_prefix("quic://"))
        {
            let server = parse_upstream_addr(rest, DOQ_PORT).map_err(|e| {
                format!(
                    "Invalid QUIC format '{}' ({}). Expected 'doq://IP:PORT' or 'doq://HOSTNAME:PORT'",
                    s, e
                )
            })?;
            return Ok(TransportConfig::Quic(QuicConfig {
                server,
                timeout: DEFAULT_TIMEOUT,
                tls: TlsSettings::default(),
            }));
        }
        if let Some(rest) = s.strip_prefix("h3://") {
            return http(&format!("https://{}", rest), HttpVersion::Http3);
        }
        if s.starts_with("https://") {
            return http(s, HttpVersion::Http2);
        }
        if s.starts_with("http://") {
            return http(s, HttpVersion::Http1);
        }
        if s.starts_with("sdns://") {
            return Ok(TransportConfig::DnsCrypt(DnsCryptConfig {
                stamp: s.into(),
                timeout: DEFAULT_TIMEOUT,
                tcp: false,
            }));
        }
        if !s.contains("://") {
            return plain(s, false);
        }
        Err(format!("Invalid DNS endpoint format: '{}'. Expected: udp://IP:PORT, tcp://IP:PORT, tls://HOST:PORT, https://URL, h3://URL, doq://HOST:PORT, sdns://STAMP, or IP:PORT", s))
    }
}

impl fmt::Display for TransportConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Plain(c) if c.prefer_tcp => write!(f, "tcp://{}", c.server),
            Self::Plain(c) => write!(f, "udp://{}", c.server),
            Self::Tls(c) => write!(f, "tls://{}", c.server),
            Self::Http(c) => write!(f, "{} ({})", c.url, c.version.as_str()),
            Self::Quic(c) => write!(f, "doq://{}", c.server),
            Self::DnsCrypt(c) => write!(f, "{}", c.stamp),
        }
    }
}
