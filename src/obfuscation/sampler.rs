//! Uniform sampling behind a small trait so tests can pin every draw

use crate::config::Bounds;
use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};

/// Source of every random decision the shaping engines make
pub trait Sampler: Send {
    /// Uniform value in `[min, max]`; the endpoints may come in either order
    fn between(&mut self, min: u64, max: u64) -> u64;

    /// Fill `buf` with random bytes
    fn fill(&mut self, buf: &mut [u8]);

    /// Independent sampler for a concurrent activity of the same connection
    fn fork(&mut self) -> Box<dyn Sampler>;

    fn sample(&mut self, bounds: Bounds) -> u64 {
        self.between(bounds.min, bounds.max)
    }
}

/// [`Sampler`] backed by a `StdRng`
pub struct RandomSampler {
    rng: StdRng,
}

impl RandomSampler {
    /// Seeded from OS entropy
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    /// Reproducible sequence
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Default for RandomSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl Sampler for RandomSampler {
    fn between(&mut self, min: u64, max: u64) -> u64 {
        let (lo, hi) = if min <= max { (min, max) } else { (max, min) };
        if lo == hi {
            return lo;
        }
        self.rng.gen_range(lo..=hi)
    }

    fn fill(&mut self, buf: &mut [u8]) {
        self.rng.fill_bytes(buf);
    }

    fn fork(&mut self) -> Box<dyn Sampler> {
        Box::new(Self::seeded(self.rng.gen()))
    }
}

/// Deterministic [`Sampler`] that replays a fixed list of values, clamping
/// each into the requested range, and fills buffers with a constant byte
#[derive(Debug, Clone)]
pub struct SequenceSampler {
    values: Vec<u64>,
    next: usize,
    fill_byte: u8,
}

impl SequenceSampler {
    pub fn new(values: impl Into<Vec<u64>>) -> Self {
        Self {
            values: values.into(),
            next: 0,
            fill_byte: 0,
        }
    }

    /// Always answer the lower bound
    pub fn minimum() -> Self {
        Self::new(vec![0])
    }

    pub fn with_fill_byte(mut self, byte: u8) -> Self {
        self.fill_byte = byte;
        self
    }
}

impl Sampler for SequenceSampler {
    fn between(&mut self, min: u64, max: u64) -> u64 {
        let (lo, hi) = if min <= max { (min, max) } else { (max, min) };
        let value = match self.values.get(self.next % self.values.len().max(1)) {
            Some(v) => *v,
            None => lo,
        };
        self.next = self.next.wrapping_add(1);
        value.clamp(lo, hi)
    }

    fn fill(&mut self, buf: &mut [u8]) {
        buf.fill(self.fill_byte);
    }

    fn fork(&mut self) -> Box<dyn Sampler> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_stays_in_bounds() {
        let mut sampler = RandomSampler::new();
        for _ in 0..1_000 {
            let v = sampler.between(10, 20);
            assert!((10..=20).contains(&v));
        }
        assert_eq!(sampler.between(7, 7), 7);
        let v = sampler.between(20, 10);
        assert!((10..=20).contains(&v));
    }

    #[test]
    fn test_seeded_is_reproducible() {
        let mut a = RandomSampler::seeded(42);
        let mut b = RandomSampler::seeded(42);
        let xs: Vec<u64> = (0..16).map(|_| a.between(0, 1_000_000)).collect();
        let ys: Vec<u64> = (0..16).map(|_| b.between(0, 1_000_000)).collect();
        assert_eq!(xs, ys);
    }

    #[test]
    fn test_random_fill() {
        let mut sampler = RandomSampler::new();
        let mut buf1 = [0u8; 32];
        let mut buf2 = [0u8; 32];
        sampler.fill(&mut buf1);
        sampler.fill(&mut buf2);
        assert_ne!(buf1, buf2);
    }

    #[test]
    fn test_sequence_replays_and_clamps() {
        let mut sampler = SequenceSampler::new(vec![3, 50, 0]);
        assert_eq!(sampler.between(1, 10), 3);
        assert_eq!(sampler.between(1, 10), 10);
        assert_eq!(sampler.between(1, 10), 1);
        assert_eq!(sampler.between(1, 10), 3);
    }

    #[test]
    fn test_sequence_fork_and_fill() {
        let mut sampler = SequenceSampler::new(vec![5]).with_fill_byte(0xAA);
        let mut fork = sampler.fork();
        assert_eq!(fork.sample(Bounds::new(0, 9)), 5);

        let mut buf = [0u8; 4];
        fork.fill(&mut buf);
        assert_eq!(buf, [0xAA; 4]);
    }
}
