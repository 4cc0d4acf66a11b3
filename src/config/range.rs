//! Range strings of the form `"N"` or `"N-M"`

use super::ConfigError;

/// Inclusive numeric interval with `min <= max`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Bounds {
    pub min: u64,
    pub max: u64,
}

impl Bounds {
    /// Create bounds from two endpoints in either order
    pub const fn new(a: u64, b: u64) -> Self {
        if a <= b {
            Self { min: a, max: b }
        } else {
            Self { min: b, max: a }
        }
    }

    /// Bounds containing exactly one value
    pub const fn fixed(value: u64) -> Self {
        Self {
            min: value,
            max: value,
        }
    }

    pub fn contains(&self, value: u64) -> bool {
        self.min <= value && value <= self.max
    }
}

impl std::fmt::Display for Bounds {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.min == self.max {
            write!(f, "{}", self.min)
        } else {
            write!(f, "{}-{}", self.min, self.max)
        }
    }
}

/// Parse `"N"` or `"N-M"` into inclusive bounds.
///
/// Reversed endpoints are swapped. The empty string is always an error; callers
/// that have a mode-specific default must handle it before calling. With
/// `zero_allowed == false` a resolved minimum of zero is rejected.
pub fn parse_range(field: &'static str, raw: &str, zero_allowed: bool) -> Result<Bounds, ConfigError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::parse(field, raw, "value can't be empty"));
    }

    let bounds = match trimmed.split_once('-') {
        None => Bounds::fixed(parse_endpoint(field, raw, trimmed)?),
        Some((from, to)) => Bounds::new(
            parse_endpoint(field, raw, from)?,
            parse_endpoint(field, raw, to)?,
        ),
    };

    if !zero_allowed && bounds.min == 0 {
        return Err(ConfigError::validation(field, raw, "minimum can't be 0"));
    }

    Ok(bounds)
}

fn parse_endpoint(field: &'static str, raw: &str, token: &str) -> Result<u64, ConfigError> {
    token
        .trim()
        .parse::<u64>()
        .map_err(|e| ConfigError::parse(field, raw, format!("{:?}: {}", token, e)))
}
