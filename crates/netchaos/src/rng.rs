//! # Chaos RNG
//!
//! Deterministic 15-bit linear congruential generator used for every
//! impairment decision. A fixed seed replays the exact same
//! drop/delay/duplicate sequence. Not suitable for anything cryptographic.

use std::sync::atomic::{AtomicU32, Ordering};

const MULTIPLIER: u32 = 0x343fd;
const INCREMENT: u32 = 0x269ec3;
const U15_MAX: u32 = 0x7fff;

#[inline]
const fn step(state: u32) -> u32 {
    state.wrapping_mul(MULTIPLIER).wrapping_add(INCREMENT)
}

/// Shared LCG with lock-free state.
///
/// Each draw advances the state with a single atomic update, so concurrent
/// callers always consume distinct steps of the sequence. A single-threaded
/// caller sees exactly the reference sequence for its seed.
#[derive(Debug)]
pub struct ChaosRng {
    state: AtomicU32,
}

impl ChaosRng {
    /// Seed used when none is configured.
    pub const DEFAULT_SEED: u32 = 0x012398;

    pub fn new(seed: u32) -> Self {
        Self {
            state: AtomicU32::new(seed),
        }
    }

    /// Next value in `0..=32767`.
    pub fn next_u15(&self) -> u32 {
        let (Ok(prev) | Err(prev)) = self
            .state
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |s| Some(step(s)));
        (step(prev) >> 16) & U15_MAX
    }

    /// Next value in `[0.0, 1.0]`.
    pub fn next_float(&self) -> f32 {
        self.next_u15() as f32 / U15_MAX as f32
    }

    /// Draws once and decides an event of probability `chance`.
    ///
    /// `chance >= 1.0` always fires and `chance <= 0.0` never does; the draw
    /// is consumed either way so the sequence stays aligned.
    pub fn roll(&self, chance: f32) -> bool {
        let draw = self.next_float();
        chance >= 1.0 || draw < chance
    }
}

impl Default for ChaosRng {
    fn default() -> Self {
        Self::new(Self::DEFAULT_SEED)
    }
}
