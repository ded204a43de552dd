use super::{Exchange, Target, TlsPolicy, Transport, TransportConfig, TransportError, TransportState};
use crate::cli::TransportKind;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Url, Version};
use std::error::Error as StdError;
use std::time::Duration;
use tracing::debug;

/// HTTP transport backed by a `reqwest` client pinned to one protocol version
///
/// The client keeps at most one idle connection to the target, so warm-up
/// trials pay the handshake cost and measured trials reuse the connection.
pub struct HttpTransport {
    kind: TransportKind,
    client: Option<Client>,
    url: Url,
}

impl HttpTransport {
    pub fn open(config: &TransportConfig) -> Result<Self> {
        let url = Url::parse(config.target.as_str())
            .with_context(|| format!("Invalid target URL '{}'", config.target))?;

        let mut builder = Client::builder()
            .pool_max_idle_per_host(1)
            .danger_accept_invalid_certs(config.tls == TlsPolicy::AcceptInvalid);
        if let Some(connect_timeout) = config.connect_timeout {
            builder = builder.connect_timeout(connect_timeout);
        }

        builder = match config.kind {
            TransportKind::Http1 => builder.http1_only(),
            TransportKind::Http2 => builder.http2_prior_knowledge(),
            TransportKind::Http3 => Self::configure_http3(builder)?,
        };

        let client = builder
            .build()
            .with_context(|| format!("Failed to build {} client", config.kind))?;
        debug!("Opened {} transport for {}", config.kind, url);

        Ok(Self {
            kind: config.kind,
            client: Some(client),
            url,
        })
    }

    #[cfg(feature = "http3")]
    fn configure_http3(builder: reqwest::ClientBuilder) -> Result<reqwest::ClientBuilder> {
        Ok(builder.http3_prior_knowledge())
    }

    #[cfg(not(feature = "http3"))]
    fn configure_http3(_builder: reqwest::ClientBuilder) -> Result<reqwest::ClientBuilder> {
        anyhow::bail!(
            "HTTP/3 support is not compiled in; rebuild with `--features http3` and \
             RUSTFLAGS=\"--cfg reqwest_unstable\""
        )
    }

    fn resolve(&self, target: &Target) -> Result<Url, TransportError> {
        if target.as_str() == self.url.as_str() {
            return Ok(self.url.clone());
        }
        Url::parse(target.as_str())
            .map_err(|e| TransportError::Connection(format!("invalid target '{}': {}", target, e)))
    }
}

/// Flatten an error and its sources into one line
fn describe(error: &(dyn StdError + 'static)) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

fn protocol_label(version: Version) -> String {
    let label = if version == Version::HTTP_09 {
        "HTTP/0.9"
    } else if version == Version::HTTP_10 {
        "HTTP/1.0"
    } else if version == Version::HTTP_11 {
        "HTTP/1.1"
    } else if version == Version::HTTP_2 {
        "HTTP/2"
    } else if version == Version::HTTP_3 {
        "HTTP/3"
    } else {
        return format!("{:?}", version);
    };
    label.to_string()
}

#[async_trait]
impl Transport for HttpTransport {
    async fn request(
        &mut self,
        target: &Target,
        timeout: Duration,
    ) -> Result<Exchange, TransportError> {
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| TransportError::Connection("transport is closed".to_string()))?;
        let url = self.resolve(target)?;

        let mut response = client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TransportError::Timeout(timeout)
                } else {
                    TransportError::Connection(describe(&e))
                }
            })?;

        let protocol_label = protocol_label(response.version());

        // Sum every chunk; a single read may only return part of the body.
        let mut bytes_read = 0u64;
        loop {
            match response.chunk().await {
                Ok(Some(chunk)) => bytes_read += chunk.len() as u64,
                Ok(None) => break,
                Err(e) if e.is_timeout() => return Err(TransportError::Timeout(timeout)),
                Err(e) => return Err(TransportError::Read(describe(&e))),
            }
        }

        Ok(Exchange {
            bytes_read,
            protocol_label,
        })
    }

    async fn close(&mut self) -> Result<()> {
        match self.client.take() {
            Some(client) => {
                drop(client);
                debug!("Closed {} transport", self.kind);
                Ok(())
            }
            None => Err(anyhow::anyhow!("{} transport already closed", self.kind)),
        }
    }

    fn kind(&self) -> TransportKind {
        self.kind
    }

    fn state(&self) -> TransportState {
        if self.client.is_some() {
            TransportState::Open
        } else {
            TransportState::Closed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(kind: TransportKind) -> TransportConfig {
        TransportConfig::new(kind, Target::new("http://127.0.0.1:9/"))
    }

    #[tokio::test]
    async fn test_close_is_exactly_once() {
        let mut transport = HttpTransport::open(&config(TransportKind::Http1)).unwrap();
        assert_eq!(transport.state(), TransportState::Open);

        transport.close().await.unwrap();
        assert_eq!(transport.state(), TransportState::Closed);
        assert!(transport.close().await.is_err());
    }

    #[tokio::test]
    async fn test_request_after_close_is_connection_error() {
        let mut transport = HttpTransport::open(&config(TransportKind::Http2)).unwrap();
        transport.close().await.unwrap();

        let target = Target::new("http://127.0.0.1:9/");
        let err = transport
            .request(&target, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Connection(_)));
    }

    #[test]
    #[cfg(not(feature = "http3"))]
    fn test_http3_without_feature_fails_to_open() {
        let err = HttpTransport::open(&config(TransportKind::Http3))
            .err()
            .expect("HTTP/3 should not open without the feature");
        assert!(err.to_string().contains("HTTP/3"));
    }

    #[test]
    fn test_protocol_labels() {
        assert_eq!(protocol_label(Version::HTTP_11), "HTTP/1.1");
        assert_eq!(protocol_label(Version::HTTP_2), "HTTP/2");
        assert_eq!(protocol_label(Version::HTTP_3), "HTTP/3");
    }
}
