use serde::{Deserialize, Serialize};

use super::errors::ConfigError;
use super::logging::LoggingConfig;
use super::query::QueryConfig;
use super::upstream::UpstreamEntry;
use crate::transport_config::{HttpMethod, HttpVersion, TransportConfig};

const LOCAL_CONFIG_PATH: &str = "ferrous-q.toml";

/// Main configuration structure for the ferrous-q harness
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub query: QueryConfig,

    #[serde(default = "default_upstreams")]
    pub upstreams: Vec<UpstreamEntry>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            logging: LoggingConfig::default(),
            query: QueryConfig::default(),
            upstreams: default_upstreams(),
        }
    }
}

impl Config {
    /// Load configuration from file or use defaults
    ///
    /// Priority order:
    /// 1. Explicitly provided path
    /// 2. ferrous-q.toml in current directory
    /// 3. Default configuration
    pub fn load(path: Option<&str>, cli_overrides: CliOverrides) -> Result<Self, ConfigError> {
        let mut config = if let Some(path) = path {
            Self::from_file(path)?
        } else if std::path::Path::new(LOCAL_CONFIG_PATH).exists() {
            Self::from_file(LOCAL_CONFIG_PATH)?
        } else {
            Self::default()
        };

        config.apply_cli_overrides(cli_overrides);
        Ok(config)
    }

    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::FileRead(path.to_string(), e.to_string()))?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    fn apply_cli_overrides(&mut self, overrides: CliOverrides) {
        if let Some(name) = overrides.name {
            self.query.name = name;
        }
        if let Some(record_type) = overrides.record_type {
            self.query.record_type = record_type;
        }
        if let Some(timeout_ms) = overrides.timeout_ms {
            self.query.timeout_ms = timeout_ms;
        }
        if overrides.no_subnet {
            self.query.subnet = None;
        } else if let Some(subnet) = overrides.subnet {
            self.query.subnet = Some(subnet);
        }
        if let Some(level) = overrides.log_level {
            self.logging.level = level;
        }
        if !overrides.upstreams.is_empty() {
            self.upstreams = overrides
                .upstreams
                .into_iter()
                .map(UpstreamEntry::new)
                .collect();
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.query.timeout_ms == 0 {
            return Err(ConfigError::Validation("Query timeout cannot be 0".to_string()));
        }

        if self.query.name.trim().is_empty() {
            return Err(ConfigError::Validation("Query name cannot be empty".to_string()));
        }

        self.query.client_subnet()?;

        if self.upstreams.is_empty() {
            return Err(ConfigError::Validation(
                "No upstream servers configured".to_string(),
            ));
        }

        for upstream in &self.upstreams {
            upstream.to_transport_config(self.query.timeout())?;
        }

        Ok(())
    }

    /// Resolves every upstream entry into `(label, config)` pairs, in file order.
    pub fn transport_configs(&self) -> Result<Vec<(String, TransportConfig)>, ConfigError> {
        self.upstreams
            .iter()
            .map(|upstream| {
                let config = upstream.to_transport_config(self.query.timeout())?;
                Ok((upstream.label(), config))
            })
            .collect()
    }
}

/// Command-line overrides for configuration
#[derive(Debug, Default)]
pub struct CliOverrides {
    pub name: Option<String>,
    pub record_type: Option<String>,
    pub timeout_ms: Option<u64>,
    pub log_level: Option<String>,
    pub upstreams: Vec<String>,
    pub subnet: Option<String>,
    pub no_subnet: bool,
}

const QUAD9_DNSCRYPT_STAMP: &str = "sdns://AQMAAAAAAAAAEzE0OS4xMTIuMTEyLjExOjg0NDMgZ8hHuMh1jNEgJFVDvnVnRt803x2EwAuMRwNo34Idhj4ZMi5kbnNjcnlwdC1jZXJ0LnF1YWQ5Lm5ldA";

fn tagged(tag: &str, url: &str) -> UpstreamEntry {
    UpstreamEntry {
        tag: Some(tag.to_string()),
        ..UpstreamEntry::new(url)
    }
}

fn doh(tag: &str, version: HttpVersion) -> UpstreamEntry {
    UpstreamEntry {
        http_version: Some(version),
        method: Some(HttpMethod::Get),
        ..tagged(tag, "https://8.8.8.8/dns-query")
    }
}

/// One upstream per transport against well-known public resolvers.
fn default_upstreams() -> Vec<UpstreamEntry> {
    vec![
        tagged("UDP", "udp://8.8.8.8:53"),
        tagged("TCP", "tcp://8.8.8.8:53"),
        tagged("DoT", "tls://8.8.8.8:853"),
        doh("HTTP/1", HttpVersion::Http1),
        doh("HTTP/2", HttpVersion::Http2),
        doh("HTTP/3", HttpVersion::Http3),
        tagged("QUIC", "doq://94.140.14.14:853"),
        tagged("SDNS/U", QUAD9_DNSCRYPT_STAMP),
        UpstreamEntry {
            tcp: true,
            ..tagged("SDNS/T", QUAD9_DNSCRYPT_STAMP)
        },
    ]
}
