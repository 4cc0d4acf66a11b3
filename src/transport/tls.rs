//! TLS transport over a shaped stream
//!
//! rustls writes its ClientHello into a [`ShapedStream`], so a `tlshello`
//! fragment rule splits the real handshake record on the wire.

use super::{Destination, Dialer, ShapedStream, Transport, TransportConfig, TransportError};
use crate::config::OutboundPlan;
use async_trait::async_trait;
use rustls::crypto::ring as ring_provider;
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, RootCertStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::{client::TlsStream, TlsConnector};
use tracing::{debug, warn};

/// Client config with webpki roots and the given ALPN protocols
pub fn build_tls_config(alpn: &[&str]) -> Result<ClientConfig, TransportError> {
    let root_store = RootCertStore {
        roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
    };

    let mut tls_config =
        ClientConfig::builder_with_provider(Arc::new(ring_provider::default_provider()))
            .with_safe_default_protocol_versions()
            .map_err(|e| TransportError::Tls(e.to_string()))?
            .with_root_certificates(root_store)
            .with_no_client_auth();

    tls_config.alpn_protocols = alpn.iter().map(|p| p.as_bytes().to_vec()).collect();
    Ok(tls_config)
}

/// Dials shaped TCP and completes a TLS handshake over it
#[derive(Clone)]
pub struct TlsDialer {
    dialer: Dialer,
    tls_config: Arc<ClientConfig>,
    sni: String,
}

impl TlsDialer {
    /// Dialer presenting `sni`, with webpki roots and h2/http1.1 ALPN
    pub fn new(dialer: Dialer, sni: impl Into<String>) -> Result<Self, TransportError> {
        let tls_config = build_tls_config(&["h2", "http/1.1"])?;
        Ok(Self::with_tls_config(dialer, sni, Arc::new(tls_config)))
    }

    pub fn with_tls_config(dialer: Dialer, sni: impl Into<String>, tls_config: Arc<ClientConfig>) -> Self {
        Self {
            dialer,
            tls_config,
            sni: sni.into(),
        }
    }

    /// Get the SNI being used
    pub fn sni(&self) -> &str {
        &self.sni
    }

    pub async fn dial(
        &self,
        destination: Destination,
    ) -> Result<TlsStream<ShapedStream<TcpStream>>, TransportError> {
        let timeout = Duration::from_secs(self.dialer.config().connect_timeout);
        let shaped = self.dialer.dial(destination).await?;

        let server_name = ServerName::try_from(self.sni.clone())
            .map_err(|e| TransportError::Tls(format!("Invalid SNI: {}", e)))?;
        let connector = TlsConnector::from(Arc::clone(&self.tls_config));

        let stream = tokio::time::timeout(timeout, connector.connect(server_name, shaped))
            .await
            .map_err(|_| TransportError::Timeout)?
            .map_err(|e| TransportError::Tls(e.to_string()))?;
        debug!(sni = %self.sni, "TLS handshake complete");
        Ok(stream)
    }
}

/// Shaped TLS transport
pub struct TlsTransport {
    connector: TlsDialer,
    stream: Option<TlsStream<ShapedStream<TcpStream>>>,
}

impl TlsTransport {
    /// Create a new TLS transport presenting `sni`
    pub fn new(
        config: TransportConfig,
        plan: Arc<OutboundPlan>,
        sni: impl Into<String>,
    ) -> Result<Self, TransportError> {
        Ok(Self::with_dialer(TlsDialer::new(Dialer::new(config, plan), sni)?))
    }

    pub fn with_dialer(connector: TlsDialer) -> Self {
        Self {
            connector,
            stream: None,
        }
    }

    /// Get the SNI being used
    pub fn sni(&self) -> &str {
        self.connector.sni()
    }
}

#[async_trait]
impl Transport for TlsTransport {
    async fn connect(&mut self, addr: &str) -> Result<(), TransportError> {
        let destination = Destination::parse(addr)?;
        self.stream = Some(self.connector.dial(destination).await?);
        Ok(())
    }

    async fn send(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::Closed)?;

        let timeout = Duration::from_secs(self.connector.dialer.config().write_timeout);

        tokio::time::timeout(timeout, async {
            stream.write_all(data).await?;
            stream.flush().await
        })
        .await
        .map_err(|_| TransportError::Timeout)?
        .map_err(TransportError::Io)?;

        Ok(())
    }

    async fn recv(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::Closed)?;

        let timeout = Duration::from_secs(self.connector.dialer.config().read_timeout);

        let n = tokio::time::timeout(timeout, stream.read(buf))
            .await
            .map_err(|_| TransportError::Timeout)?
            .map_err(TransportError::Io)?;

        if n == 0 {
            return Err(TransportError::Closed);
        }

        Ok(n)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.shutdown().await {
                warn!(error = %e, "TLS shutdown failed");
            }
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Bounds, FragmentMode, FragmentPlan};
    use crate::obfuscation::TLS_HANDSHAKE;
    use tokio::net::TcpListener;

    async fn read_record(socket: &mut TcpStream) -> (u8, Vec<u8>) {
        let mut header = [0u8; 5];
        socket.read_exact(&mut header).await.unwrap();
        let len = usize::from(u16::from_be_bytes([header[3], header[4]]));
        let mut body = vec![0u8; len];
        socket.read_exact(&mut body).await.unwrap();
        (header[0], body)
    }

    #[test]
    fn test_sni() {
        let transport = TlsTransport::new(
            TransportConfig::default(),
            Arc::new(OutboundPlan::default()),
            "www.example.com",
        )
        .unwrap();
        assert_eq!(transport.sni(), "www.example.com");
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn test_client_hello_is_split() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let plan = Arc::new(OutboundPlan {
            fragment: Some(FragmentPlan::new(
                FragmentMode::TlsHello,
                Bounds::fixed(40),
                Bounds::fixed(5),
            )),
            ..Default::default()
        });
        let connector =
            TlsDialer::new(Dialer::new(TransportConfig::default(), plan), "example.com").unwrap();

        let client = tokio::spawn(async move {
            // The handshake fails once the server hangs up
            connector
                .dial(Destination::new("127.0.0.1", addr.port()))
                .await
                .map(|_| ())
        });

        let (mut socket, _) = listener.accept().await.unwrap();
        let (first_type, first) = read_record(&mut socket).await;
        let (second_type, second) = read_record(&mut socket).await;
        drop(socket);

        assert_eq!(first_type, TLS_HANDSHAKE);
        assert_eq!(second_type, TLS_HANDSHAKE);
        assert_eq!(first.len(), 40);
        // ClientHello handshake message type, then the rest of it
        assert_eq!(first[0], 0x01);
        let declared = u32::from_be_bytes([0, first[1], first[2], first[3]]) as usize;
        assert_eq!(first.len() + second.len(), declared + 4);

        assert!(client.await.unwrap().is_err());
    }
}
