//! # Chaos Parameters
//!
//! Fixed set of tunables read on every send and every tick. Values are kept
//! as `f32` bit patterns in atomics so producers, the dispatcher and the
//! caller can all touch them without a lock. Nothing is range-checked.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Tunable chaos parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum ParamKey {
    /// Probability in `0..=1` that a send is silently lost.
    DropChance = 0,
    /// Lower bound of the sampled delay, in seconds.
    DelayMin = 1,
    /// Upper bound of the sampled delay, in seconds.
    DelayMax = 2,
    /// Probability in `0..=1` that a dispatched packet is sent twice.
    DuplicateChance = 3,
    /// Background dispatch period in milliseconds, truncated, minimum 1.
    PollIntervalMs = 4,
}

impl ParamKey {
    pub const COUNT: usize = 5;

    pub const ALL: [ParamKey; Self::COUNT] = [
        ParamKey::DropChance,
        ParamKey::DelayMin,
        ParamKey::DelayMax,
        ParamKey::DuplicateChance,
        ParamKey::PollIntervalMs,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ParamKey::DropChance => "drop_chance",
            ParamKey::DelayMin => "delay_min",
            ParamKey::DelayMax => "delay_max",
            ParamKey::DuplicateChance => "duplicate_chance",
            ParamKey::PollIntervalMs => "poll_interval_ms",
        }
    }

    #[inline]
    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for ParamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ParamKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ParamKey::ALL
            .into_iter()
            .find(|key| key.as_str() == s.trim())
            .ok_or_else(|| Error::UnknownParameter(s.to_string()))
    }
}

/// Plain copy of every parameter, used for configuration and reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParamSnapshot {
    pub drop_chance: f32,
    pub delay_min: f32,
    pub delay_max: f32,
    pub duplicate_chance: f32,
    pub poll_interval_ms: f32,
}

impl ParamSnapshot {
    pub fn get(&self, key: ParamKey) -> f32 {
        match key {
            ParamKey::DropChance => self.drop_chance,
            ParamKey::DelayMin => self.delay_min,
            ParamKey::DelayMax => self.delay_max,
            ParamKey::DuplicateChance => self.duplicate_chance,
            ParamKey::PollIntervalMs => self.poll_interval_ms,
        }
    }

    pub fn set(&mut self, key: ParamKey, value: f32) {
        let slot = match key {
            ParamKey::DropChance => &mut self.drop_chance,
            ParamKey::DelayMin => &mut self.delay_min,
            ParamKey::DelayMax => &mut self.delay_max,
            ParamKey::DuplicateChance => &mut self.duplicate_chance,
            ParamKey::PollIntervalMs => &mut self.poll_interval_ms,
        };
        *slot = value;
    }
}

/// Lock-free parameter store. Unset keys read as `0.0`.
#[derive(Debug)]
pub struct Parameters {
    values: [AtomicU32; ParamKey::COUNT],
}

impl Parameters {
    pub fn new() -> Self {
        Self {
            values: std::array::from_fn(|_| AtomicU32::new(0f32.to_bits())),
        }
    }

    pub fn from_snapshot(snapshot: &ParamSnapshot) -> Self {
        let params = Self::new();
        params.apply(snapshot);
        params
    }

    pub fn get(&self, key: ParamKey) -> f32 {
        f32::from_bits(self.values[key.index()].load(Ordering::Relaxed))
    }

    pub fn set(&self, key: ParamKey, value: f32) {
        self.values[key.index()].store(value.to_bits(), Ordering::Relaxed);
    }

    /// Overwrites every key from `snapshot`.
    pub fn apply(&self, snapshot: &ParamSnapshot) {
        for key in ParamKey::ALL {
            self.set(key, snapshot.get(key));
        }
    }

    pub fn snapshot(&self) -> ParamSnapshot {
        let mut out = ParamSnapshot::default();
        for key in ParamKey::ALL {
            out.set(key, self.get(key));
        }
        out
    }
}

impl Default for Parameters {
    fn default() -> Self {
        Self::new()
    }
}
