//! # netchaos
//!
//! Datagram chaos emulator. Drop-in replacement for `sendto` that loses,
//! delays, reorders and duplicates outgoing datagrams so protocol code can
//! be exercised against a bad network without one.
//!
//! ## Crate structure
//!
//! - [`emulator`]: `Emulator` (admission API and run/stop driver)
//! - [`slots`]: lock-free fixed-capacity slot table
//! - `dispatcher`: per-tick aging and delayed release
//! - [`params`]: chaos parameter store
//! - [`rng`]: deterministic impairment RNG
//! - [`transmit`]: the real-send collaborator and a `sendto(2)` implementation
//! - [`config`]: TOML configuration
//! - [`stats`]: counters

pub mod config;
pub(crate) mod dispatcher;
pub mod emulator;
pub mod error;
pub mod packet;
pub mod params;
pub mod rng;
pub mod slots;
pub mod stats;
pub mod transmit;

#[cfg(test)]
pub(crate) mod test_util;

pub use config::ChaosConfig;
pub use emulator::{DriveMode, DriverState, Emulator};
pub use error::{Error, Result};
pub use packet::{Packet, SocketHandle};
pub use params::{ParamKey, ParamSnapshot};
pub use stats::StatsSnapshot;
pub use transmit::Transmit;
#[cfg(unix)]
pub use transmit::{sockaddr_bytes, SocketTransmitter};
