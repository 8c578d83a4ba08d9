use super::errors::ConfigError;
use crate::transport_config::{HttpMethod, HttpVersion, TransportConfig};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// One `[[upstreams]]` table. Flags that do not apply to the URL's transport are ignored.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct UpstreamEntry {
    pub url: String,

    #[serde(default)]
    pub tag: Option<String>,

    #[serde(default)]
    pub prefer_tcp: bool,

    #[serde(default)]
    pub http_version: Option<HttpVersion>,

    #[serde(default)]
    pub method: Option<HttpMethod>,

    #[serde(default)]
    pub server_name: Option<String>,

    #[serde(default)]
    pub ca_file: Option<PathBuf>,

    #[serde(default)]
    pub insecure_skip_verify: bool,

    /// DNSCrypt over TCP instead of UDP.
    #[serde(default)]
    pub tcp: bool,
}

impl UpstreamEntry {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn label(&self) -> String {
        self.tag.clone().unwrap_or_else(|| self.url.clone())
    }

    pub fn to_transport_config(&self, timeout: Duration) -> Result<TransportConfig, ConfigError> {
        let mut config: TransportConfig = self
            .url
            .parse::<TransportConfig>()
            .map_err(ConfigError::Validation)?
            .with_timeout(timeout);

        match &mut config {
            TransportConfig::Plain(plain) if self.prefer_tcp => plain.prefer_tcp = true,
            TransportConfig::Http(http) => {
                if let Some(version) = self.http_version {
                    if version == HttpVersion::Http3 && http.url.starts_with("http://") {
                        return Err(ConfigError::Validation(format!(
                            "HTTP/3 requires an https:// URL, got '{}'",
                            http.url
                        )));
                    }
                    http.version = version;
                }
                if let Some(method) = self.method {
                    http.method = method;
                }
            }
            TransportConfig::DnsCrypt(dnscrypt) => dnscrypt.tcp = self.tcp,
            _ => {}
        }

        if let Some(tls) = config.tls_settings_mut() {
            tls.server_name = self.server_name.as_deref().map(Into::into);
            tls.ca_file = self.ca_file.clone();
            tls.insecure_skip_verify = self.insecure_skip_verify;
        }

        Ok(config)
    }
}
