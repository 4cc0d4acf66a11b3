//! Noise payload decoding

use super::plan::{NoiseKind, NoisePayload};
use super::range::parse_range;
use super::ConfigError;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use bytes::Bytes;

/// Decode an operator supplied noise `packet` according to its `type`.
///
/// `rand` yields a length rule, every other type yields concrete bytes.
/// Base64 input may use either alphabet, with or without padding.
pub fn decode_noise(kind: &str, literal: &str) -> Result<(NoiseKind, NoisePayload), ConfigError> {
    let literal = literal.trim();

    match kind {
        "rand" => {
            let length = parse_range("noises.packet", literal, false)?;
            Ok((
                NoiseKind::Random,
                NoisePayload::Random {
                    length_min: length.min,
                    length_max: length.max,
                },
            ))
        }
        "str" => Ok((
            NoiseKind::Literal,
            NoisePayload::Bytes(Bytes::copy_from_slice(literal.as_bytes())),
        )),
        "hex" => {
            let bytes = hex::decode(literal)
                .map_err(|e| ConfigError::encoding("hex", literal, e.to_string()))?;
            Ok((NoiseKind::Hex, NoisePayload::Bytes(Bytes::from(bytes))))
        }
        "base64" => {
            let normalized: String = literal
                .chars()
                .filter(|c| *c != '=')
                .map(|c| match c {
                    '+' => '-',
                    '/' => '_',
                    c => c,
                })
                .collect();
            let bytes = URL_SAFE_NO_PAD
                .decode(normalized.as_bytes())
                .map_err(|e| ConfigError::encoding("base64", literal, e.to_string()))?;
            Ok((NoiseKind::Base64, NoisePayload::Bytes(Bytes::from(bytes))))
        }
        other => Err(ConfigError::validation(
            "noises.type",
            other,
            "unsupported noise type, only rand/str/hex/base64 are supported",
        )),
    }
}
