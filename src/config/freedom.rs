//! Raw outbound settings as operators write them, and the builder that turns
//! them into an [`OutboundPlan`]

use super::defaults::{self, or_default};
use super::noise::decode_noise;
use super::plan::{
    DestinationOverride, DomainStrategy, FragmentMode, FragmentPlan, NoiseDescriptor, NoisePlan,
    OutboundPlan, ProxyProtocolVersion,
};
use super::range::{parse_range, Bounds};
use super::ConfigError;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Outbound settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FreedomConfig {
    #[serde(default)]
    pub domain_strategy: String,
    #[serde(default)]
    pub redirect: String,
    #[serde(default)]
    pub user_level: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fragment: Option<FragmentConfig>,
    /// Removed single-noise form, rejected by [`FreedomConfig::build`]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub noise: Option<NoiseConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub noises: Option<Vec<NoiseConfig>>,
    #[serde(default)]
    pub noise_keep_alive: u32,
    #[serde(default)]
    pub proxy_protocol: u32,
}

/// Fragmentation settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FragmentConfig {
    /// `tlshello`, `fakehost`, empty, or a write-index range
    #[serde(default)]
    pub packets: String,
    #[serde(default)]
    pub length: String,
    #[serde(default)]
    pub interval: String,
    #[serde(default)]
    pub host1_header: String,
    #[serde(default)]
    pub host1_domain: String,
    #[serde(default)]
    pub host2_header: String,
    #[serde(default)]
    pub host2_domain: String,
}

/// One noise entry
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoiseConfig {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub packet: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay: Option<NoiseRange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<NoiseRange>,
}

/// Integer range accepted as `{from, to}`, a bare number, or `"N-M"`.
/// An object with only one of `from`/`to` is a single value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NoiseRange {
    Pair {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        to: Option<u64>,
    },
    Single(u64),
    Text(String),
}

impl NoiseRange {
    pub fn between(from: u64, to: u64) -> Self {
        Self::Pair {
            from: Some(from),
            to: Some(to),
        }
    }

    fn to_bounds(&self, field: &'static str) -> Result<Bounds, ConfigError> {
        match self {
            Self::Pair {
                from: Some(from),
                to: Some(to),
            } => Ok(Bounds::new(*from, *to)),
            Self::Pair {
                from: Some(value),
                to: None,
            }
            | Self::Pair {
                from: None,
                to: Some(value),
            } => Ok(Bounds::fixed(*value)),
            Self::Pair {
                from: None,
                to: None,
            } => Err(ConfigError::parse(field, "{}", "expected \"from\" and/or \"to\"")),
            Self::Single(value) => Ok(Bounds::fixed(*value)),
            Self::Text(raw) => parse_range(field, raw, true),
        }
    }
}

impl FreedomConfig {
    /// Validate and normalize into an [`OutboundPlan`].
    ///
    /// Fields are checked in a fixed order and the first error is returned.
    pub fn build(&self) -> Result<OutboundPlan, ConfigError> {
        let domain_strategy = DomainStrategy::from_keyword(&self.domain_strategy).ok_or_else(|| {
            ConfigError::validation(
                "domainStrategy",
                &self.domain_strategy,
                "unsupported domain strategy",
            )
        })?;

        let fragment = self.fragment.as_ref().map(FragmentConfig::build).transpose()?;

        if self.noise.is_some() {
            return Err(ConfigError::RemovedFeature {
                removed: "noise = { ... }",
                replacement: "noises = [ { ... } ]",
            });
        }

        let descriptors = self
            .noises
            .iter()
            .flatten()
            .map(NoiseConfig::build)
            .collect::<Result<Vec<_>, _>>()?;

        let destination_override = if self.redirect.is_empty() {
            None
        } else {
            Some(parse_redirect(&self.redirect)?)
        };

        let proxy_protocol = ProxyProtocolVersion::from_u32(self.proxy_protocol).unwrap_or_else(|| {
            warn!(
                proxy_protocol = self.proxy_protocol,
                "unsupported proxyProtocol version ignored"
            );
            ProxyProtocolVersion::Disabled
        });

        Ok(OutboundPlan {
            domain_strategy,
            destination_override,
            user_level: self.user_level,
            fragment,
            noise: NoisePlan {
                descriptors,
                keep_alive_secs: self.noise_keep_alive,
            },
            proxy_protocol,
        })
    }
}

impl FragmentConfig {
    pub fn build(&self) -> Result<FragmentPlan, ConfigError> {
        let (mode, packets) = match self.packets.to_ascii_lowercase().as_str() {
            "tlshello" => (FragmentMode::TlsHello, defaults::TLS_HELLO_PACKETS),
            "fakehost" => (FragmentMode::FakeHost, defaults::FAKE_HOST_PACKETS),
            "" => (FragmentMode::TcpRange, defaults::ALL_PACKETS),
            _ => {
                let packets = parse_range("fragment.packets", &self.packets, true)?;
                if packets.min == 0 {
                    return Err(ConfigError::validation(
                        "fragment.packets",
                        &self.packets,
                        "packetsFrom can't be 0",
                    ));
                }
                (FragmentMode::TcpRange, packets)
            }
        };

        let length = parse_range("fragment.length", &self.length, false)?;
        let interval = parse_range("fragment.interval", &self.interval, true)?;

        let mut plan = FragmentPlan::new(mode, length, interval).with_packets(packets);
        plan.host1_header = or_default(&self.host1_header, defaults::HOST1_HEADER);
        plan.host1_domain = or_default(&self.host1_domain, defaults::HOST1_DOMAIN);
        plan.host2_header = or_default(&self.host2_header, defaults::HOST2_HEADER);
        plan.host2_domain = or_default(&self.host2_domain, defaults::HOST2_DOMAIN);
        Ok(plan)
    }
}

impl NoiseConfig {
    pub fn build(&self) -> Result<NoiseDescriptor, ConfigError> {
        let (kind, payload) = decode_noise(&self.kind, &self.packet)?;
        let delay = self
            .delay
            .as_ref()
            .map(|d| d.to_bounds("noises.delay"))
            .transpose()?;
        let count = self
            .count
            .as_ref()
            .map(|c| c.to_bounds("noises.count"))
            .transpose()?;

        Ok(NoiseDescriptor {
            kind,
            payload,
            delay,
            count,
        })
    }
}

fn parse_redirect(raw: &str) -> Result<DestinationOverride, ConfigError> {
    let (host, port) = split_host_port("redirect", raw)?;
    Ok(DestinationOverride { host, port })
}

/// Split `host:port`. The host may be empty, a name, an IPv4 address or a
/// bracketed IPv6 address.
pub(crate) fn split_host_port(field: &'static str, raw: &str) -> Result<(String, u16), ConfigError> {
    let malformed = |reason: &str| ConfigError::parse(field, raw, reason);

    let (host, port) = if let Some(rest) = raw.strip_prefix('[') {
        let (host, after) = rest
            .split_once(']')
            .ok_or_else(|| malformed("missing ']' in address"))?;
        let port = after
            .strip_prefix(':')
            .ok_or_else(|| malformed("missing port in address"))?;
        (host, port)
    } else {
        let (host, port) = raw
            .rsplit_once(':')
            .ok_or_else(|| malformed("missing port in address"))?;
        if host.contains(':') {
            return Err(malformed("too many colons in address"));
        }
        (host, port)
    };

    if host.contains(['[', ']']) || port.contains(['[', ']']) {
        return Err(malformed("unexpected bracket in address"));
    }

    let port = port
        .parse::<u16>()
        .map_err(|e| ConfigError::parse(field, raw, format!("invalid port {:?}: {}", port, e)))?;

    Ok((host.to_string(), port))
}
