//! Noise injection
//!
//! One task per connection walks the noise sequence in order: for each
//! descriptor it waits the sampled delay, then writes the payload the sampled
//! number of times. With a keep-alive interval the whole sequence repeats
//! until the connection closes.

use super::sampler::Sampler;
use super::timing::{millis, Pacer, SharedWriter};
use crate::config::{NoiseDescriptor, NoisePayload, NoisePlan};
use bytes::Bytes;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWrite;
use tokio::sync::watch;
use tracing::{debug, trace};

/// Timing of one descriptor for one activation. Payloads are materialized
/// one at a time as they are sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoiseBurst {
    /// Wait before the first packet
    pub delay: Duration,
    /// Packets to send
    pub count: u64,
}

/// Draw the delay and repeat count for one descriptor
pub fn burst(descriptor: &NoiseDescriptor, sampler: &mut dyn Sampler) -> NoiseBurst {
    let delay = millis(sampler.sample(descriptor.delay_ms()));
    let count = sampler.sample(descriptor.count());
    NoiseBurst { delay, count }
}

/// Concrete bytes for one emission; random payloads are generated fresh
pub fn materialize(payload: &NoisePayload, sampler: &mut dyn Sampler) -> Bytes {
    match payload {
        NoisePayload::Bytes(bytes) => bytes.clone(),
        NoisePayload::Random {
            length_min,
            length_max,
        } => {
            let len = usize::try_from(sampler.between(*length_min, *length_max)).unwrap_or(0);
            let mut buf = vec![0u8; len];
            sampler.fill(&mut buf);
            Bytes::from(buf)
        }
    }
}

/// Run the noise sequence against `writer` until it completes or the
/// connection closes.
///
/// `first_round` is set once the initial pass over the sequence is done; if
/// the task ends early the sender is dropped instead. Write failures end the
/// task quietly, the connection itself reports them on its next write.
pub async fn inject_noise<W>(
    plan: Arc<NoisePlan>,
    writer: SharedWriter<W>,
    pacer: Pacer,
    mut sampler: Box<dyn Sampler>,
    first_round: watch::Sender<bool>,
) where
    W: AsyncWrite + Unpin,
{
    let mut first_round = Some(first_round);
    let mut round: u64 = 0;

    let result: io::Result<()> = async {
        loop {
            round += 1;
            debug!(round, descriptors = plan.descriptors.len(), "sending noise");
            run_round(&plan, &writer, &pacer, sampler.as_mut()).await?;

            if let Some(tx) = first_round.take() {
                let _ = tx.send(true);
            }

            match plan.keep_alive() {
                Some(interval) => pacer.pause(interval).await?,
                None => return Ok(()),
            }
        }
    }
    .await;

    if let Err(e) = result {
        debug!(round, error = %e, "noise stopped");
    }
}

async fn run_round<W>(
    plan: &NoisePlan,
    writer: &SharedWriter<W>,
    pacer: &Pacer,
    sampler: &mut dyn Sampler,
) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    for (index, descriptor) in plan.descriptors.iter().enumerate() {
        let burst = burst(descriptor, sampler);
        pacer.pause(burst.delay).await?;
        for _ in 0..burst.count {
            let packet = materialize(&descriptor.payload, sampler);
            trace!(descriptor = index, kind = descriptor.kind.keyword(), bytes = packet.len(), "noise packet");
            pacer.send(writer, &packet).await?;
        }
    }
    Ok(())
}
