//! Write segmentation
//!
//! [`Fragmenter`] decides how one outgoing write is cut into segments and how
//! long to wait after each. It never reorders or drops bytes: concatenating the
//! segments of a `TcpRange` or passthrough write gives back the original
//! buffer. `TlsHello` re-frames the first handshake record into two records,
//! and `FakeHost` prepends two decoy lines.

use super::sampler::Sampler;
use super::timing::millis;
use crate::config::{FragmentMode, FragmentPlan};
use bytes::{BufMut, Bytes, BytesMut};
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

/// TLS record header: type, version (2), length (2)
pub const TLS_RECORD_HEADER_LEN: usize = 5;

/// TLS record content type for handshake messages
pub const TLS_HANDSHAKE: u8 = 0x16;

/// One write to the underlying connection followed by an optional pause
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub bytes: Bytes,
    pub pause: Duration,
}

impl Segment {
    /// Segment with no pause after it
    pub fn immediate(bytes: Bytes) -> Self {
        Self {
            bytes,
            pause: Duration::ZERO,
        }
    }
}

/// Per-connection fragmentation state
#[derive(Debug, Clone)]
pub struct Fragmenter {
    plan: Arc<FragmentPlan>,
    writes: u64,
}

impl Fragmenter {
    pub fn new(plan: Arc<FragmentPlan>) -> Self {
        Self { plan, writes: 0 }
    }

    /// Number of writes segmented so far
    pub fn writes(&self) -> u64 {
        self.writes
    }

    /// Cut the next write into segments
    pub fn segment(&mut self, data: &Bytes, sampler: &mut dyn Sampler) -> Vec<Segment> {
        self.writes += 1;
        let index = self.writes;
        let plan = &*self.plan;

        let segments = match plan.mode {
            FragmentMode::TlsHello if index == 1 => split_client_hello(plan, data, sampler),
            FragmentMode::TlsHello => None,
            FragmentMode::FakeHost if plan.covers(index) => Some(fake_host(plan, data, sampler)),
            FragmentMode::FakeHost => None,
            FragmentMode::TcpRange if plan.covers(index) => Some(chunk(plan, data, sampler)),
            FragmentMode::TcpRange => None,
        };

        let segments = segments.unwrap_or_else(|| vec![Segment::immediate(data.clone())]);
        trace!(
            write = index,
            mode = ?plan.mode,
            bytes = data.len(),
            segments = segments.len(),
            "segmented write"
        );
        segments
    }
}

/// Split a buffer into chunks with lengths drawn from the plan, pausing between
/// chunks. The last chunk is clamped to what remains.
pub fn chunk(plan: &FragmentPlan, data: &Bytes, sampler: &mut dyn Sampler) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut offset = 0;

    while offset < data.len() {
        let want = to_len(sampler.sample(plan.length())).max(1);
        let end = offset + want.min(data.len() - offset);
        let pause = if end < data.len() {
            millis(sampler.sample(plan.interval()))
        } else {
            Duration::ZERO
        };
        segments.push(Segment {
            bytes: data.slice(offset..end),
            pause,
        });
        offset = end;
    }

    segments
}

/// Two decoy host lines, then the data itself
fn fake_host(plan: &FragmentPlan, data: &Bytes, sampler: &mut dyn Sampler) -> Vec<Segment> {
    vec![
        Segment {
            bytes: plan.first_decoy(),
            pause: millis(sampler.sample(plan.interval())),
        },
        Segment::immediate(plan.second_decoy()),
        Segment::immediate(data.clone()),
    ]
}

/// Re-frame the leading TLS handshake record as two records.
///
/// Returns `None` when `data` does not start with a complete handshake record
/// whose body can be split. The split offset is drawn from the length range
/// and kept inside the body; bytes after the record follow unchanged.
pub fn split_client_hello(
    plan: &FragmentPlan,
    data: &Bytes,
    sampler: &mut dyn Sampler,
) -> Option<Vec<Segment>> {
    if data.len() <= TLS_RECORD_HEADER_LEN || data[0] != TLS_HANDSHAKE {
        return None;
    }

    let body_len = usize::from(u16::from_be_bytes([data[3], data[4]]));
    let record_len = TLS_RECORD_HEADER_LEN + body_len;
    if data.len() < record_len || body_len < 2 {
        return None;
    }

    let body = data.slice(TLS_RECORD_HEADER_LEN..record_len);
    let at = to_len(sampler.sample(plan.length())).clamp(1, body_len - 1);

    let mut segments = vec![
        Segment {
            bytes: tls_record(&data[..3], &body[..at]),
            pause: millis(sampler.sample(plan.interval())),
        },
        Segment::immediate(tls_record(&data[..3], &body[at..])),
    ];
    if data.len() > record_len {
        segments.push(Segment::immediate(data.slice(record_len..)));
    }
    Some(segments)
}

/// Record with the given type/version prefix around `body`
fn tls_record(prefix: &[u8], body: &[u8]) -> Bytes {
    let mut record = BytesMut::with_capacity(TLS_RECORD_HEADER_LEN + body.len());
    record.put_slice(prefix);
    // Bodies come from a record whose length already fit in 16 bits
    record.put_u16(body.len() as u16);
    record.put_slice(body);
    record.freeze()
}

fn to_len(value: u64) -> usize {
    usize::try_from(value).unwrap_or(usize::MAX)
}
