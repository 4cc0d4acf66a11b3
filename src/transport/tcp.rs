//! TCP transport over a shaped stream

use super::{Destination, Resolver, ShapedStream, Transport, TransportConfig, TransportError};
use crate::config::OutboundPlan;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, warn};

/// Opens outbound connections for one outbound plan
///
/// The plan is shared read-only by every connection the dialer opens.
#[derive(Debug, Clone)]
pub struct Dialer {
    config: TransportConfig,
    plan: Arc<OutboundPlan>,
    resolver: Resolver,
}

impl Dialer {
    pub fn new(config: TransportConfig, plan: Arc<OutboundPlan>) -> Self {
        let resolver = Resolver::from_plan(&plan);
        Self {
            config,
            plan,
            resolver,
        }
    }

    pub fn plan(&self) -> &Arc<OutboundPlan> {
        &self.plan
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Resolve `destination` and connect to the first address that answers
    pub async fn connect_tcp(&self, destination: Destination) -> Result<TcpStream, TransportError> {
        let timeout = Duration::from_secs(self.config.connect_timeout);
        let addrs = self.resolver.resolve(destination.clone()).await?;

        let mut last_error = None;
        for addr in addrs {
            match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
                Ok(Ok(stream)) => {
                    if self.config.nodelay {
                        stream.set_nodelay(true).ok();
                    }
                    debug!(
                        destination = %destination,
                        addr = %addr,
                        level = self.plan.user_level,
                        "connected"
                    );
                    return Ok(stream);
                }
                Ok(Err(e)) => {
                    debug!(addr = %addr, error = %e, "connect failed");
                    last_error = Some(e.to_string());
                }
                Err(_) => {
                    debug!(addr = %addr, "connect timed out");
                    last_error = Some("timed out".to_string());
                }
            }
        }

        Err(TransportError::ConnectionFailed(format!(
            "{}: {}",
            destination,
            last_error.unwrap_or_else(|| "no addresses".to_string())
        )))
    }

    /// Connect and wrap the socket in the plan's shaping
    pub async fn dial(
        &self,
        destination: Destination,
    ) -> Result<ShapedStream<TcpStream>, TransportError> {
        let stream = self.connect_tcp(destination).await?;
        Ok(ShapedStream::new(stream, Arc::clone(&self.plan)))
    }
}

/// Shaped TCP transport
pub struct TcpTransport {
    dialer: Dialer,
    stream: Option<ShapedStream<TcpStream>>,
}

impl TcpTransport {
    /// Create a new TCP transport
    pub fn new(config: TransportConfig, plan: Arc<OutboundPlan>) -> Self {
        Self {
            dialer: Dialer::new(config, plan),
            stream: None,
        }
    }

    /// Create with default configuration and no shaping
    pub fn new_default() -> Self {
        Self::new(TransportConfig::default(), Arc::new(OutboundPlan::default()))
    }

    pub fn dialer(&self) -> &Dialer {
        &self.dialer
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn connect(&mut self, addr: &str) -> Result<(), TransportError> {
        let destination = Destination::parse(addr)?;
        self.stream = Some(self.dialer.dial(destination).await?);
        Ok(())
    }

    async fn send(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::Closed)?;

        let timeout = Duration::from_secs(self.dialer.config.write_timeout);

        tokio::time::timeout(timeout, stream.write_all(data))
            .await
            .map_err(|_| TransportError::Timeout)?
            .map_err(TransportError::Io)?;

        Ok(())
    }

    async fn recv(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::Closed)?;

        let timeout = Duration::from_secs(self.dialer.config.read_timeout);

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
                warn!(error = %e, "shutdown failed");
            }
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }
}
