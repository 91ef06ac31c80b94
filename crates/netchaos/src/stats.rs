//! # Emulator Statistics
//!
//! Relaxed atomic counters updated from senders and the dispatcher, with a
//! serializable snapshot for logging or JSON export.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

#[derive(Debug, Default)]
pub struct Stats {
    sends: AtomicU64,
    dropped: AtomicU64,
    abandoned: AtomicU64,
    admitted: AtomicU64,
    backpressure_waits: AtomicU64,
    dispatched: AtomicU64,
    duplicated: AtomicU64,
    transmit_failures: AtomicU64,
}

#[inline]
fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_send(&self) {
        bump(&self.sends);
    }

    pub(crate) fn record_drop(&self) {
        bump(&self.dropped);
    }

    pub(crate) fn record_abandoned(&self) {
        bump(&self.abandoned);
    }

    pub(crate) fn record_admitted(&self) {
        bump(&self.admitted);
    }

    pub(crate) fn record_backpressure_wait(&self) {
        bump(&self.backpressure_waits);
    }

    pub(crate) fn record_dispatched(&self) {
        bump(&self.dispatched);
    }

    pub(crate) fn record_duplicated(&self) {
        bump(&self.duplicated);
    }

    pub(crate) fn record_transmit_failure(&self) {
        bump(&self.transmit_failures);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            sends: self.sends.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            abandoned: self.abandoned.load(Ordering::Relaxed),
            admitted: self.admitted.load(Ordering::Relaxed),
            backpressure_waits: self.backpressure_waits.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            duplicated: self.duplicated.load(Ordering::Relaxed),
            transmit_failures: self.transmit_failures.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`Stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// Calls to `send`.
    pub sends: u64,
    /// Sends lost to the drop roll.
    pub dropped: u64,
    /// Sends discarded because the emulator was shutting down.
    pub abandoned: u64,
    /// Sends that were placed in a slot.
    pub admitted: u64,
    /// Times a sender found the table full and had to wait.
    pub backpressure_waits: u64,
    /// Packets whose delay expired and were handed to the transmitter.
    pub dispatched: u64,
    /// Extra copies sent by the duplicate roll.
    pub duplicated: u64,
    /// Transmit attempts that returned an error.
    pub transmit_failures: u64,
}

impl StatsSnapshot {
    /// Fraction of sends lost to the drop roll.
    pub fn drop_rate(&self) -> f64 {
        if self.sends == 0 {
            0.0
        } else {
            self.dropped as f64 / self.sends as f64
        }
    }

    /// Total transmit calls made, originals plus duplicates.
    pub fn transmissions(&self) -> u64 {
        self.dispatched + self.duplicated
    }
}
