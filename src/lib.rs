//! # Freedom Shaper
//!
//! Traffic shaping for a direct ("freedom") outbound: the connection dialed
//! to the real destination is reshaped so that passive classifiers have a
//! harder time recognizing it.
//!
//! ## Features
//!
//! - **ClientHello fragmentation**: the first TLS record is split in two
//! - **Fake host headers**: decoy `Host:` lines ahead of plaintext requests
//! - **TCP range fragmentation**: writes cut into random-length chunks
//! - **Noise injection**: synthetic packets before and during the connection
//! - **Domain strategy and redirect** for the dialed destination
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │               Configuration Layer                    │
//! │   (ranges, noise payloads, FreedomConfig::build)    │
//! ├─────────────────────────────────────────────────────┤
//! │                 OutboundPlan                         │
//! │        (immutable, shared by every connection)       │
//! ├─────────────────────────────────────────────────────┤
//! │                 Obfuscation Layer                    │
//! │       (fragmenter, noise task, cancellable pacing)   │
//! ├─────────────────────────────────────────────────────┤
//! │                  Transport Layer                     │
//! │        (resolver, ShapedStream, TCP and TLS)         │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod obfuscation;
pub mod transport;

pub use config::{Config, ConfigError, FreedomConfig, OutboundPlan};
pub use transport::ShapedStream;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid outbound settings: {0}")]
    Build(#[from] config::ConfigError),

    #[error("Transport error: {0}")]
    Transport(#[from] transport::TransportError),

    #[error("Configuration error: {0}")]
    Config(String),
}
