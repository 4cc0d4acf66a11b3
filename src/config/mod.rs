//! Configuration management
//!
//! Raw operator settings ([`FreedomConfig`]) are validated once by
//! [`FreedomConfig::build`] into an immutable [`OutboundPlan`]. Every
//! configuration problem surfaces there; a built plan cannot fail later
//! because of bad settings.

pub mod defaults;
mod freedom;
mod noise;
mod plan;
mod range;

pub use freedom::{FragmentConfig, FreedomConfig, NoiseConfig, NoiseRange};
pub(crate) use freedom::split_host_port;
pub use noise::decode_noise;
pub use plan::{
    DestinationOverride, DomainStrategy, FragmentMode, FragmentPlan, IpFamily, NoiseDescriptor,
    NoiseKind, NoisePayload, NoisePlan, OutboundPlan, ProxyProtocolVersion,
};
pub use range::{parse_range, Bounds};

use crate::transport::TransportConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Errors found while building an [`OutboundPlan`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// Malformed number, range or address
    #[error("invalid {field} {value:?}: {reason}")]
    Parse {
        field: &'static str,
        value: String,
        reason: String,
    },

    /// Well-formed value outside its allowed domain
    #[error("invalid {field} {value:?}: {reason}")]
    Validation {
        field: &'static str,
        value: String,
        reason: String,
    },

    /// A setting that no longer exists
    #[error("the feature \"{removed}\" has been removed, use \"{replacement}\" instead")]
    RemovedFeature {
        removed: &'static str,
        replacement: &'static str,
    },

    /// Noise payload that does not decode
    #[error("invalid {kind} noise packet {value:?}: {reason}")]
    Encoding {
        kind: &'static str,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    pub(crate) fn parse(field: &'static str, value: &str, reason: impl Into<String>) -> Self {
        Self::Parse {
            field,
            value: value.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn validation(field: &'static str, value: &str, reason: impl Into<String>) -> Self {
        Self::Validation {
            field,
            value: value.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn encoding(kind: &'static str, value: &str, reason: impl Into<String>) -> Self {
        Self::Encoding {
            kind,
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Outbound shaping settings
    #[serde(default)]
    pub freedom: FreedomConfig,
    /// Local forwarder (binary only)
    pub forward: Option<ForwardConfig>,
    /// Socket timeouts
    #[serde(default)]
    pub transport: TransportConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from file. `.json` files are read as JSON,
    /// everything else as TOML.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, crate::Error> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::Error::Config(format!("Failed to read config: {}", e)))?;

        if is_json(path) {
            serde_json::from_str(&content)
                .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))
        } else {
            toml::from_str(&content)
                .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))
        }
    }

    /// Save configuration to file, in the format implied by the extension
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), crate::Error> {
        let path = path.as_ref();
        let content = if is_json(path) {
            serde_json::to_string_pretty(self)
                .map_err(|e| crate::Error::Config(format!("Failed to serialize config: {}", e)))?
        } else {
            toml::to_string_pretty(self)
                .map_err(|e| crate::Error::Config(format!("Failed to serialize config: {}", e)))?
        };

        std::fs::write(path, content)
            .map_err(|e| crate::Error::Config(format!("Failed to write config: {}", e)))
    }

    /// Build the outbound plan from the `[freedom]` section
    pub fn plan(&self) -> Result<OutboundPlan, ConfigError> {
        self.freedom.build()
    }
}

fn is_json(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false)
}

/// Local TCP forwarder settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForwardConfig {
    /// Listen address
    pub listen: String,
    /// Destination every accepted connection is forwarded to (`host:port`)
    pub target: String,
    /// Wrap the outbound side in TLS with this SNI
    #[serde(default)]
    pub tls_sni: Option<String>,
}

impl Default for ForwardConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:1080".to_string(),
            target: "example.com:443".to_string(),
            tls_sni: None,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log format (pretty, json, compact)
    pub format: String,
    /// Log file path (optional)
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file: None,
        }
    }
}

/// Generate example configuration
pub fn generate_example_config() -> Config {
    Config {
        freedom: FreedomConfig {
            domain_strategy: "AsIs".to_string(),
            fragment: Some(FragmentConfig {
                packets: "tlshello".to_string(),
                length: "100-200".to_string(),
                interval: "10-20".to_string(),
                ..Default::default()
            }),
            noises: Some(vec![NoiseConfig {
                kind: "rand".to_string(),
                packet: "10-20".to_string(),
                delay: Some(NoiseRange::between(10, 16)),
                count: None,
            }]),
            ..Default::default()
        },
        forward: Some(ForwardConfig::default()),
        transport: TransportConfig::default(),
        logging: LoggingConfig::default(),
    }
}
