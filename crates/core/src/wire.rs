//! The physical boundary and a simulated wire.
//!
//! A node drives its outgoing line through [`BitSink`] once per tick, and
//! its neighbour samples the line level once per tick. [`Wire`] is the
//! host-side stand-in for that pair of pins: it holds the last emitted level
//! and can flip sampled bits with a seeded probability to exercise CRC
//! rejection and retransmission.
//!
//! # Determinism
//!
//! All noise comes from a seeded ChaCha8 RNG. Given the same seed and the
//! same emitted bits, the sampled bits are identical.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::trace;

/// Sink for transmitted bits.
pub trait BitSink {
    /// Drive the line to `bit` until the next emission.
    fn emit_bit(&mut self, bit: bool);
}

/// Line impairment settings.
#[derive(Debug, Clone, Copy)]
pub struct WireConfig {
    /// Probability that a sampled bit is inverted [0.0, 1.0]
    pub flip_rate: f64,

    /// Random seed for determinism
    pub seed: u64,
}

impl WireConfig {
    /// A clean line.
    pub fn perfect(seed: u64) -> Self {
        Self {
            flip_rate: 0.0,
            seed,
        }
    }

    /// A noisy line flipping roughly one bit in `1 / flip_rate`.
    pub fn noisy(flip_rate: f64, seed: u64) -> Self {
        Self { flip_rate, seed }
    }
}

/// One directed wire between two neighbouring nodes.
pub struct Wire {
    config: WireConfig,
    rng: ChaCha8Rng,
    level: bool,

    // Statistics
    bits_emitted: u64,
    bits_sampled: u64,
    bits_flipped: u64,
}

impl Wire {
    pub fn new(config: WireConfig) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(config.seed),
            config,
            level: false,
            bits_emitted: 0,
            bits_sampled: 0,
            bits_flipped: 0,
        }
    }

    /// Current driven level, without noise.
    pub fn level(&self) -> bool {
        self.level
    }

    /// Read the line as the neighbour's sampler sees it.
    pub fn sample(&mut self) -> bool {
        self.bits_sampled += 1;
        if self.config.flip_rate > 0.0 && self.rng.gen_bool(self.config.flip_rate.min(1.0)) {
            self.bits_flipped += 1;
            trace!(level = self.level, "line noise flipped a sampled bit");
            return !self.level;
        }
        self.level
    }

    pub fn stats(&self) -> WireStats {
        WireStats {
            bits_emitted: self.bits_emitted,
            bits_sampled: self.bits_sampled,
            bits_flipped: self.bits_flipped,
        }
    }
}

impl BitSink for Wire {
    fn emit_bit(&mut self, bit: bool) {
        self.bits_emitted += 1;
        self.level = bit;
    }
}

impl BitSink for Vec<bool> {
    fn emit_bit(&mut self, bit: bool) {
        self.push(bit);
    }
}

/// Statistics about a simulated wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WireStats {
    pub bits_emitted: u64,
    pub bits_sampled: u64,
    pub bits_flipped: u64,
}

impl WireStats {
    /// Observed bit error rate (flipped / sampled).
    pub fn error_rate(&self) -> f64 {
        if self.bits_sampled == 0 {
            0.0
        } else {
            self.bits_flipped as f64 / self.bits_sampled as f64
        }
    }
}
