//! Traffic shaping engines
//!
//! Provides:
//! - Write fragmentation (TLS ClientHello split, fake host header, TCP chunking)
//! - Noise injection ahead of and around real traffic
//! - Connection-scoped, cancellable timing
//!
//! ## Why
//!
//! Passive classifiers match on the first bytes of a flow and on the size and
//! timing of its packets:
//!
//! 1. **ClientHello fragmentation**: the SNI never sits in a single segment
//! 2. **Fake host header**: plaintext-prefix matchers see a decoy `Host:` line
//! 3. **Noise**: synthetic packets blur size and timing signatures
//!
//! All randomness is drawn through [`Sampler`], so every decision can be
//! replayed in tests.

mod fragment;
mod noise;
mod sampler;
mod timing;

pub use fragment::{
    chunk, split_client_hello, Fragmenter, Segment, TLS_HANDSHAKE, TLS_RECORD_HEADER_LEN,
};
pub use noise::{burst, inject_noise, materialize, NoiseBurst};
pub use sampler::{RandomSampler, Sampler, SequenceSampler};
pub use timing::{closed_error, millis, Pacer, SharedWriter};
