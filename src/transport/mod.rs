//! Transport layer implementations
//!
//! Provides:
//! - [`ShapedStream`]: fragmentation and noise on any async byte stream
//! - Destination resolution honouring the outbound's domain strategy
//! - TCP transport over a shaped stream
//! - TLS transport over a shaped stream, so the real ClientHello is split

mod resolve;
mod stream;
mod tcp;

#[cfg(feature = "tls")]
mod tls;

pub use resolve::{order_by_family, Destination, Resolver};
pub use stream::ShapedStream;
pub use tcp::{Dialer, TcpTransport};

#[cfg(feature = "tls")]
pub use tls::{build_tls_config, TlsDialer, TlsTransport};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::io;
use thiserror::Error;

/// Transport layer errors
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Resolve error: {0}")]
    Resolve(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Connection closed")]
    Closed,

    #[error("Timeout")]
    Timeout,
}

/// Trait for transport implementations
#[async_trait]
pub trait Transport: Send {
    /// Connect to a remote endpoint
    async fn connect(&mut self, addr: &str) -> Result<(), TransportError>;

    /// Send data
    async fn send(&mut self, data: &[u8]) -> Result<(), TransportError>;

    /// Receive data
    async fn recv(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;

    /// Close the connection
    async fn close(&mut self) -> Result<(), TransportError>;

    /// Check if connected
    fn is_connected(&self) -> bool;
}

/// Transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Connection timeout in seconds
    pub connect_timeout: u64,
    /// Read timeout in seconds
    pub read_timeout: u64,
    /// Write timeout in seconds
    pub write_timeout: u64,
    /// Disable Nagle's algorithm so fragments leave as separate segments
    pub nodelay: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: 30,
            read_timeout: 60,
            write_timeout: 60,
            nodelay: true,
        }
    }
}
