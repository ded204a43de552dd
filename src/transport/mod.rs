use crate::cli::TransportKind;
use crate::sample::FailureKind;
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

pub mod http;

pub use http::HttpTransport;

/// Opaque request destination
///
/// The harness never interprets the target; the transport implementation
/// decides how to turn it into an address, port and TLS session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target(String);

impl Target {
    pub fn new(target: impl Into<String>) -> Self {
        Self(target.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Certificate trust policy handed to the transport as-is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TlsPolicy {
    /// Validate server certificates against the platform roots
    #[default]
    Verify,
    /// Accept any certificate (self-signed test servers)
    AcceptInvalid,
}

/// Successful request-response exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exchange {
    /// Total response body bytes after a full drain
    pub bytes_read: u64,
    /// Negotiated protocol, for display only
    pub protocol_label: String,
}

/// Per-trial transport failure
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("response body read failed: {0}")]
    Read(String),
}

impl TransportError {
    pub fn kind(&self) -> FailureKind {
        match self {
            TransportError::Connection(_) => FailureKind::Connection,
            TransportError::Timeout(_) => FailureKind::Timeout,
            TransportError::Read(_) => FailureKind::Read,
        }
    }
}

/// Connection configuration for opening a transport
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    pub kind: TransportKind,
    pub target: Target,
    pub tls: TlsPolicy,
    /// Upper bound for connection establishment, independent of the trial timeout
    pub connect_timeout: Option<Duration>,
}

impl TransportConfig {
    pub fn new(kind: TransportKind, target: Target) -> Self {
        Self {
            kind,
            target,
            tls: TlsPolicy::default(),
            connect_timeout: None,
        }
    }
}

/// Lifecycle of a transport handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Open,
    Closed,
}

/// Request-response capability bound to one protocol and target
///
/// A handle is opened before warm-up, used by exactly one run, and closed
/// exactly once when the run completes. Implementations must report closed
/// handles as `TransportError::Connection` instead of panicking.
#[async_trait]
pub trait Transport: Send {
    /// Perform one exchange and fully drain the response body
    async fn request(&mut self, target: &Target, timeout: Duration)
        -> Result<Exchange, TransportError>;

    /// Release connections held by the handle
    async fn close(&mut self) -> Result<()>;

    /// Protocol this handle was opened for
    fn kind(&self) -> TransportKind;

    fn state(&self) -> TransportState;
}

/// Transport factory for creating handles per `TransportKind`
pub struct TransportFactory;

impl TransportFactory {
    /// Open a transport handle
    ///
    /// Failure here is the only run-level fatal condition: it happens before any
    /// trial is attempted.
    pub fn open(config: &TransportConfig) -> Result<Box<dyn Transport>> {
        Ok(Box::new(HttpTransport::open(config)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_mapping() {
        assert_eq!(
            TransportError::Connection("refused".into()).kind(),
            FailureKind::Connection
        );
        assert_eq!(
            TransportError::Timeout(Duration::from_secs(1)).kind(),
            FailureKind::Timeout
        );
        assert_eq!(
            TransportError::Read("reset".into()).kind(),
            FailureKind::Read
        );
    }

    #[test]
    fn test_transport_config_defaults() {
        let config = TransportConfig::new(TransportKind::Http2, Target::new("https://localhost/"));
        assert_eq!(config.tls, TlsPolicy::Verify);
        assert!(config.connect_timeout.is_none());
        assert_eq!(config.target.to_string(), "https://localhost/");
    }

    #[test]
    fn test_factory_rejects_malformed_target() {
        let config = TransportConfig::new(TransportKind::Http1, Target::new("not a url"));
        assert!(TransportFactory::open(&config).is_err());
    }
}
