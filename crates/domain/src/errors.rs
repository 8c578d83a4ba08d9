use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Transport timeout during {phase} with {server}")]
    Timeout { server: String, phase: &'static str },

    #[error("Connection to {server} failed: {reason}")]
    ConnectionFailure { server: String, reason: String },

    #[error("Handshake with {server} failed: {reason}")]
    HandshakeFailure { server: String, reason: String },

    #[error("Framing error: {0}")]
    Framing(String),

    #[error("Failed to encode DNS message: {0}")]
    Encode(String),

    #[error("Failed to decode DNS message: {0}")]
    Decode(String),

    #[error("HTTP server {url} returned HTTP {status}")]
    HttpStatus { url: String, status: u16 },

    #[error("HTTP server {url} returned unexpected content type '{content_type}'")]
    ContentType { url: String, content_type: String },

    #[error("DNSCrypt certificate error: {0}")]
    Certificate(String),

    #[error("DNSCrypt crypto error: {0}")]
    Crypto(String),

    #[error("Invalid server stamp: {0}")]
    StampParse(String),

    #[error("Invalid transport configuration: {0}")]
    InvalidConfig(String),
}

impl TransportError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    pub fn is_framing(&self) -> bool {
        matches!(self, Self::Framing(_))
    }

    pub fn is_handshake(&self) -> bool {
        matches!(self, Self::HandshakeFailure { .. })
    }

    /// Non-2xx statuses and wrong content types are both HTTP-level rejections.
    pub fn is_http_status(&self) -> bool {
        matches!(self, Self::HttpStatus { .. } | Self::ContentType { .. })
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "timeout",
            Self::ConnectionFailure { .. } => "connection",
            Self::HandshakeFailure { .. } => "handshake",
            Self::Framing(_) => "framing",
            Self::Encode(_) => "encode",
            Self::Decode(_) => "decode",
            Self::HttpStatus { .. } | Self::ContentType { .. } => "http-status",
            Self::Certificate(_) => "certificate",
            Self::Crypto(_) => "crypto",
            Self::StampParse(_) => "stamp",
            Self::InvalidConfig(_) => "config",
        }
    }
}
