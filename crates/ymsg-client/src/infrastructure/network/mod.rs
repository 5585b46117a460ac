//! TCP transport for the session engine.
//!
//! [`TcpConnector`] is the production [`Connector`]: it resolves the
//! configured host, opens a `TcpStream`, and hands it to the session as a
//! boxed [`Transport`].  Framing and the handshake live in the application
//! layer; this module only produces the byte stream.

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::time;
use tracing::{debug, info, warn};

use crate::application::channel::{Connector, Transport};

/// Configuration for the TCP connection to the YMSG server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpConnectorConfig {
    pub host: String,
    pub port: u16,
    /// Upper bound on name resolution plus the TCP handshake.
    pub connect_timeout: Duration,
}

impl Default for TcpConnectorConfig {
    fn default() -> Self {
        Self {
            host: "scs.msg.yahoo.com".to_string(),
            port: 5050,
            connect_timeout: Duration::from_secs(30),
        }
    }
}

/// Opens one TCP connection per login.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    config: TcpConnectorConfig,
}

impl TcpConnector {
    pub fn new(config: TcpConnectorConfig) -> Self {
        Self { config }
    }

    /// `host:port` as passed to the resolver.
    pub fn address(&self) -> String {
        format!("{}:{}", self.config.host, self.config.port)
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self) -> io::Result<Box<dyn Transport>> {
        let addr = self.address();
        debug!(%addr, "connecting");

        let stream = match time::timeout(self.config.connect_timeout, TcpStream::connect(&addr))
            .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                warn!(%addr, "could not connect: {e}");
                return Err(e);
            }
            Err(_) => {
                warn!(%addr, "connect timed out after {:?}", self.config.connect_timeout);
                return Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("connect to {addr} timed out"),
                ));
            }
        };

        // Frames are small and latency-sensitive.
        stream.set_nodelay(true)?;
        info!(%addr, "connected to server");
        Ok(Box::new(stream))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[test]
    fn test_default_config_points_at_standard_port() {
        let connector = TcpConnector::new(TcpConnectorConfig::default());
        assert_eq!(connector.address(), "scs.msg.yahoo.com:5050");
    }

    #[tokio::test]
    async fn test_connect_yields_working_stream() {
        // Arrange
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let connector = TcpConnector::new(TcpConnectorConfig {
            host: "127.0.0.1".to_string(),
            port,
            connect_timeout: Duration::from_secs(5),
        });

        // Act
        let mut client = connector.connect().await.unwrap();
        let (mut server, _) = listener.accept().await.unwrap();
        client.write_all(b"YMSG").await.unwrap();
        let mut buf = [0u8; 4];
        server.read_exact(&mut buf).await.unwrap();

        // Assert
        assert_eq!(&buf, b"YMSG");
    }

    #[tokio::test]
    async fn test_connect_to_closed_port_fails() {
        // Arrange – bind then drop to obtain a port nobody listens on
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let connector = TcpConnector::new(TcpConnectorConfig {
            host: "127.0.0.1".to_string(),
            port,
            connect_timeout: Duration::from_secs(5),
        });

        // Act / Assert
        assert!(connector.connect().await.is_err());
    }
}
