use std::io;

use thiserror::Error;

/// Errors surfaced by emulator construction and configuration.
///
/// Steady-state operation never fails: saturation blocks, drops are silent
/// and transmit failures are only logged.
#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to spawn dispatch thread: {0}")]
    Spawn(#[source] io::Error),
    #[error("invalid config: {0}")]
    Config(String),
    #[error("unknown chaos parameter: {0}")]
    UnknownParameter(String),
}

pub type Result<T> = std::result::Result<T, Error>;
