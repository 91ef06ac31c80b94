//! # Emulator Configuration
//!
//! TOML-facing input struct resolved into a validated [`ChaosConfig`].

use serde::Deserialize;

use crate::emulator::DriveMode;
use crate::error::{Error, Result};
use crate::params::ParamSnapshot;
use crate::rng::ChaosRng;
use crate::slots::DEFAULT_CAPACITY;

pub const CONFIG_VERSION: u32 = 1;

/// Raw TOML shape. Everything is optional; [`resolve`](Self::resolve) fills
/// in defaults and validates.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ChaosConfigInput {
    pub version: u32,
    pub mode: Option<DriveMode>,
    pub capacity: Option<usize>,
    pub seed: Option<u32>,
    pub params: ParamSnapshot,
}

/// Resolved emulator configuration.
#[derive(Debug, Clone)]
pub struct ChaosConfig {
    pub version: u32,
    pub mode: DriveMode,
    /// Number of slots in the table.
    pub capacity: usize,
    /// RNG seed; the same seed replays the same impairment decisions.
    pub seed: u32,
    /// Initial chaos parameters.
    pub params: ParamSnapshot,
}

impl Default for ChaosConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            mode: DriveMode::default(),
            capacity: DEFAULT_CAPACITY,
            seed: ChaosRng::DEFAULT_SEED,
            params: ParamSnapshot::default(),
        }
    }
}

impl ChaosConfigInput {
    pub fn resolve(self) -> Result<ChaosConfig> {
        let version = if self.version == 0 {
            CONFIG_VERSION
        } else {
            self.version
        };
        if version != CONFIG_VERSION {
            return Err(Error::Config(format!(
                "unsupported config version {version}"
            )));
        }

        let capacity = self.capacity.unwrap_or(DEFAULT_CAPACITY);
        if capacity == 0 {
            return Err(Error::Config("capacity must be at least 1".into()));
        }

        Ok(ChaosConfig {
            version,
            mode: self.mode.unwrap_or_default(),
            capacity,
            seed: self.seed.unwrap_or(ChaosRng::DEFAULT_SEED),
            params: self.params,
        })
    }
}

impl ChaosConfig {
    pub fn from_toml_str(input: &str) -> Result<Self> {
        if input.trim().is_empty() {
            return Ok(ChaosConfig::default());
        }
        let parsed: ChaosConfigInput = toml::from_str(input)
            .map_err(|e| Error::Config(format!("invalid config TOML: {e}")))?;
        parsed.resolve()
    }
}
