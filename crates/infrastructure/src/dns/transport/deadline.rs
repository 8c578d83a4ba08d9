use ferrous_q_domain::TransportError;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// One absolute deadline shared by every phase of an exchange
/// (resolve, connect, handshake, write, read).
#[derive(Debug, Clone)]
pub struct Deadline {
    at: Instant,
    server: Arc<str>,
}

impl Deadline {
    pub fn after(timeout: Duration, server: impl Into<Arc<str>>) -> Self {
        Self {
            at: Instant::now() + timeout,
            server: server.into(),
        }
    }

    pub fn instant(&self) -> Instant {
        self.at
    }

    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    pub fn expired(&self, phase: &'static str) -> TransportError {
        TransportError::Timeout {
            server: self.server.to_string(),
            phase,
        }
    }

    pub fn connection_failure(&self, reason: impl std::fmt::Display) -> TransportError {
        TransportError::ConnectionFailure {
            server: self.server.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn handshake_failure(&self, reason: impl std::fmt::Display) -> TransportError {
        TransportError::HandshakeFailure {
            server: self.server.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Runs `fut` until the deadline. Expiry yields [`TransportError::Timeout`] tagged with `phase`.
    pub async fn run<F, T>(&self, phase: &'static str, fut: F) -> Result<T, TransportError>
    where
        F: Future<Output = T>,
    {
        tokio::time::timeout_at(self.at, fut)
            .await
            .map_err(|_| self.expired(phase))
    }
}
