//! Ferrous Q Domain Layer
pub mod config;
pub mod errors;
pub mod server_stamp;
pub mod transport_config;

pub use config::{CliOverrides, Config, ConfigError};
pub use errors::TransportError;
pub use server_stamp::ServerStamp;
pub use transport_config::{
    DnsCryptConfig, HttpConfig, HttpMethod, HttpVersion, PlainConfig, QuicConfig, TlsConfig,
    TlsSettings, TransportConfig, UpstreamAddr, DEFAULT_TIMEOUT,
};
