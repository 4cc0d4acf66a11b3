//! Normalized outbound plan produced by [`FreedomConfig::build`]
//!
//! Everything here is immutable once built and is shared read-only by every
//! connection of the owning outbound.
//!
//! [`FreedomConfig::build`]: super::FreedomConfig::build

use super::defaults;
use super::range::Bounds;
use bytes::Bytes;
use std::time::Duration;

/// Whether and how destination hostnames are resolved before dialing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DomainStrategy {
    /// Dial the hostname as given
    #[default]
    AsIs,
    UseIp,
    UseIp4,
    UseIp6,
    UseIp46,
    UseIp64,
    ForceIp,
    ForceIp4,
    ForceIp6,
    ForceIp46,
    ForceIp64,
}

impl DomainStrategy {
    /// Match a configuration keyword, ignoring case. The empty string is `AsIs`.
    pub fn from_keyword(keyword: &str) -> Option<Self> {
        let strategy = match keyword.to_ascii_lowercase().as_str() {
            "" | "asis" => Self::AsIs,
            "useip" => Self::UseIp,
            "useipv4" => Self::UseIp4,
            "useipv6" => Self::UseIp6,
            "useipv4v6" => Self::UseIp46,
            "useipv6v4" => Self::UseIp64,
            "forceip" => Self::ForceIp,
            "forceipv4" => Self::ForceIp4,
            "forceipv6" => Self::ForceIp6,
            "forceipv4v6" => Self::ForceIp46,
            "forceipv6v4" => Self::ForceIp64,
            _ => return None,
        };
        Some(strategy)
    }

    /// Hostnames are resolved locally before dialing
    pub fn resolves(&self) -> bool {
        !matches!(self, Self::AsIs)
    }

    /// Resolution failure is fatal instead of falling back to the hostname
    pub fn is_forced(&self) -> bool {
        matches!(
            self,
            Self::ForceIp | Self::ForceIp4 | Self::ForceIp6 | Self::ForceIp46 | Self::ForceIp64
        )
    }

    /// Address families to dial, in order of preference. `None` keeps the
    /// resolver's order.
    pub fn families(&self) -> Option<&'static [IpFamily]> {
        match self {
            Self::AsIs | Self::UseIp | Self::ForceIp => None,
            Self::UseIp4 | Self::ForceIp4 => Some(&[IpFamily::V4]),
            Self::UseIp6 | Self::ForceIp6 => Some(&[IpFamily::V6]),
            Self::UseIp46 | Self::ForceIp46 => Some(&[IpFamily::V4, IpFamily::V6]),
            Self::UseIp64 | Self::ForceIp64 => Some(&[IpFamily::V6, IpFamily::V4]),
        }
    }
}

/// IP address family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpFamily {
    V4,
    V6,
}

/// Fixed replacement for the dialed destination. An empty host keeps the
/// original host and only replaces the port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestinationOverride {
    pub host: String,
    pub port: u16,
}

/// PROXY protocol header version sent ahead of the stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProxyProtocolVersion {
    #[default]
    Disabled,
    V1,
    V2,
}

impl ProxyProtocolVersion {
    pub fn from_u32(version: u32) -> Option<Self> {
        match version {
            0 => Some(Self::Disabled),
            1 => Some(Self::V1),
            2 => Some(Self::V2),
            _ => None,
        }
    }

    pub fn as_u32(&self) -> u32 {
        match self {
            Self::Disabled => 0,
            Self::V1 => 1,
            Self::V2 => 2,
        }
    }
}

/// Fragmentation mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentMode {
    /// Split the first TLS handshake record
    TlsHello,
    /// Send two decoy host lines before the first write
    FakeHost,
    /// Chunk every write inside the packet window
    TcpRange,
}

/// Normalized fragmentation rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FragmentPlan {
    pub mode: FragmentMode,
    pub packets_from: u64,
    pub packets_to: u64,
    pub length_min: u64,
    pub length_max: u64,
    /// Milliseconds
    pub interval_min: u64,
    /// Milliseconds
    pub interval_max: u64,
    pub host1_header: String,
    pub host1_domain: String,
    pub host2_header: String,
    pub host2_domain: String,
}

impl FragmentPlan {
    /// Plan for `mode` with the default packet window and decoy host lines
    pub fn new(mode: FragmentMode, length: Bounds, interval: Bounds) -> Self {
        let packets = match mode {
            FragmentMode::TlsHello => defaults::TLS_HELLO_PACKETS,
            FragmentMode::FakeHost => defaults::FAKE_HOST_PACKETS,
            FragmentMode::TcpRange => defaults::ALL_PACKETS,
        };
        Self {
            mode,
            packets_from: packets.min,
            packets_to: packets.max,
            length_min: length.min,
            length_max: length.max,
            interval_min: interval.min,
            interval_max: interval.max,
            host1_header: defaults::HOST1_HEADER.to_string(),
            host1_domain: defaults::HOST1_DOMAIN.to_string(),
            host2_header: defaults::HOST2_HEADER.to_string(),
            host2_domain: defaults::HOST2_DOMAIN.to_string(),
        }
    }

    /// Restrict a `TcpRange` plan to a window of write indices
    pub fn with_packets(mut self, packets: Bounds) -> Self {
        self.packets_from = packets.min;
        self.packets_to = packets.max;
        self
    }

    pub fn fake_host(&self) -> bool {
        self.mode == FragmentMode::FakeHost
    }

    pub fn length(&self) -> Bounds {
        Bounds::new(self.length_min, self.length_max)
    }

    pub fn interval(&self) -> Bounds {
        Bounds::new(self.interval_min, self.interval_max)
    }

    /// Whether the write with 1-based `index` falls inside the packet window.
    /// A `[0,0]` window covers every write.
    pub fn covers(&self, index: u64) -> bool {
        if self.packets_from == 0 && self.packets_to == 0 {
            return true;
        }
        Bounds::new(self.packets_from, self.packets_to).contains(index)
    }

    /// First decoy line, `host1_header + host1_domain` terminated as an HTTP header
    pub fn first_decoy(&self) -> Bytes {
        Bytes::from(format!("{}{}\r\n", self.host1_header, self.host1_domain))
    }

    /// Second decoy line, `host2_header + host2_domain` terminated as an HTTP header
    pub fn second_decoy(&self) -> Bytes {
        Bytes::from(format!("{}{}\r\n", self.host2_header, self.host2_domain))
    }
}

/// Noise packet type as written in the configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoiseKind {
    /// `rand`
    Random,
    /// `str`
    Literal,
    /// `hex`
    Hex,
    /// `base64`
    Base64,
}

impl NoiseKind {
    pub fn keyword(&self) -> &'static str {
        match self {
            Self::Random => "rand",
            Self::Literal => "str",
            Self::Hex => "hex",
            Self::Base64 => "base64",
        }
    }
}

/// What a noise descriptor writes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NoisePayload {
    /// Fresh random bytes with a length drawn per emission
    Random { length_min: u64, length_max: u64 },
    /// Fixed bytes decoded at build time
    Bytes(Bytes),
}

/// One entry of the noise sequence
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoiseDescriptor {
    pub kind: NoiseKind,
    pub payload: NoisePayload,
    /// Milliseconds to wait before this descriptor; absent means no wait
    pub delay: Option<Bounds>,
    /// Writes per activation; absent means once
    pub count: Option<Bounds>,
}

impl NoiseDescriptor {
    pub fn delay_ms(&self) -> Bounds {
        self.delay.unwrap_or(defaults::NOISE_DELAY_MS)
    }

    pub fn count(&self) -> Bounds {
        self.count.unwrap_or(defaults::NOISE_COUNT)
    }
}

/// Ordered noise sequence and its repeat interval
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NoisePlan {
    pub descriptors: Vec<NoiseDescriptor>,
    /// Seconds between repetitions; 0 fires once
    pub keep_alive_secs: u32,
}

impl NoisePlan {
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    pub fn keep_alive(&self) -> Option<Duration> {
        match self.keep_alive_secs {
            0 => None,
            secs => Some(Duration::from_secs(u64::from(secs))),
        }
    }
}

/// Fully validated outbound plan
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OutboundPlan {
    pub domain_strategy: DomainStrategy,
    pub destination_override: Option<DestinationOverride>,
    pub user_level: u32,
    pub fragment: Option<FragmentPlan>,
    pub noise: NoisePlan,
    pub proxy_protocol: ProxyProtocolVersion,
}

impl OutboundPlan {
    /// Whether connections need a shaping layer at all
    pub fn is_shaping(&self) -> bool {
        self.fragment.is_some() || !self.noise.is_empty()
    }
}
