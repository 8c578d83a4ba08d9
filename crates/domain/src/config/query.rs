use super::errors::ConfigError;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_V4_SUBNET_PREFIX: u8 = 24;
const DEFAULT_V6_SUBNET_PREFIX: u8 = 48;

/// EDNS0 client subnet (RFC 7871) attached to the query: an address and
/// how many of its leading bits the resolver may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientSubnetSpec {
    pub addr: IpAddr,
    pub source_prefix: u8,
}

impl FromStr for ClientSubnetSpec {
    type Err = ConfigError;

    /// `addr/prefix`, or a bare address with /24 (IPv4) or /48 (IPv6).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr_str, prefix_str) = match s.split_once('/') {
            Some((addr, prefix)) => (addr, Some(prefix)),
            None => (s, None),
        };

        let addr: IpAddr = addr_str.trim().parse().map_err(|_| {
            ConfigError::Validation(format!("Invalid client subnet address '{}'", addr_str))
        })?;
        let max_prefix = if addr.is_ipv4() { 32 } else { 128 };

        let source_prefix = match prefix_str {
            Some(prefix) => prefix
                .trim()
                .parse::<u8>()
                .ok()
                .filter(|p| *p <= max_prefix)
                .ok_or_else(|| {
                    ConfigError::Validation(format!(
                        "Invalid client subnet prefix '{}', expected 0-{}",
                        prefix, max_prefix
                    ))
                })?,
            None if addr.is_ipv4() => DEFAULT_V4_SUBNET_PREFIX,
            None => DEFAULT_V6_SUBNET_PREFIX,
        };

        Ok(Self {
            addr,
            source_prefix,
        })
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueryConfig {
    #[serde(default = "default_name")]
    pub name: String,

    #[serde(default = "default_record_type")]
    pub record_type: String,

    /// Hard deadline for one whole exchange, applied to every upstream.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Client subnet sent as an EDNS0 option; empty disables it.
    #[serde(default = "default_subnet")]
    pub subnet: Option<String>,
}

impl QueryConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn client_subnet(&self) -> Result<Option<ClientSubnetSpec>, ConfigError> {
        match self.subnet.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(subnet) => subnet.parse().map(Some),
        }
    }
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            record_type: default_record_type(),
            timeout_ms: default_timeout_ms(),
            subnet: default_subnet(),
        }
    }
}

fn default_name() -> String {
    "github.com.".to_string()
}

fn default_record_type() -> String {
    "A".to_string()
}

fn default_timeout_ms() -> u64 {
    3000
}

fn default_subnet() -> Option<String> {
    Some("1.1.1.1/24".to_string())
}
