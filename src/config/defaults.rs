//! Default values injected by the builder

use super::range::Bounds;

/// Header used for the first decoy host line
pub const HOST1_HEADER: &str = "Host : ";
/// Domain used for the first decoy host line
pub const HOST1_DOMAIN: &str = "cloudflare.com";
/// Header used for the second decoy host line
pub const HOST2_HEADER: &str = "Host:   ";
/// Domain used for the second decoy host line
pub const HOST2_DOMAIN: &str = "cloudflare.com";

/// Packet window for `packets = "tlshello"`
pub const TLS_HELLO_PACKETS: Bounds = Bounds { min: 0, max: 1 };
/// Packet window for `packets = "fakehost"`
pub const FAKE_HOST_PACKETS: Bounds = Bounds { min: 1, max: 1 };
/// Packet window for an empty `packets` field: every write
pub const ALL_PACKETS: Bounds = Bounds { min: 0, max: 0 };

/// Delay before a noise descriptor when none is configured
pub const NOISE_DELAY_MS: Bounds = Bounds::fixed(0);
/// Repeat count of a noise descriptor when none is configured
pub const NOISE_COUNT: Bounds = Bounds::fixed(1);

/// Take `value` unless it is empty
pub(crate) fn or_default(value: &str, default: &str) -> String {
    if value.is_empty() {
        default.to_string()
    } else {
        value.to_string()
    }
}
