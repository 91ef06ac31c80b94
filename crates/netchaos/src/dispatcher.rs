//! # Dispatcher
//!
//! Single consumer of the slot table. Each tick ages every armed packet by
//! the elapsed time, transmits the ones whose delay ran out (possibly twice)
//! and hands their slots back to senders.

use std::sync::Arc;

use quanta::{Clock, Instant};
use tracing::{debug, trace, warn};

use crate::emulator::Shared;
use crate::packet::Packet;
use crate::params::ParamKey;
use crate::slots::Sweeper;
use crate::stats::Stats;
use crate::transmit::Transmit;

pub(crate) struct Dispatcher {
    sweeper: Sweeper,
    shared: Arc<Shared>,
    transmitter: Arc<dyn Transmit>,
    clock: Clock,
    last: Instant,
}

impl Dispatcher {
    /// Records the clock baseline for the first [`update`](Self::update).
    pub(crate) fn new(
        sweeper: Sweeper,
        shared: Arc<Shared>,
        transmitter: Arc<dyn Transmit>,
        clock: Clock,
    ) -> Self {
        let last = clock.now();
        Self {
            sweeper,
            shared,
            transmitter,
            clock,
            last,
        }
    }

    /// Advances time by `elapsed` seconds. Returns the number of packets
    /// dispatched (duplicates not counted).
    pub(crate) fn tick(&mut self, elapsed: f32) -> usize {
        let shared = &self.shared;
        let transmitter = self.transmitter.as_ref();

        let released = self.sweeper.sweep(elapsed, |slot, entry| {
            let packet = &entry.packet;
            trace!(
                id = packet.id,
                slot,
                delay = entry.delay,
                len = packet.len(),
                "sending packet"
            );
            transmit_once(transmitter, &shared.stats, packet);
            shared.stats.record_dispatched();

            if shared.rng.roll(shared.params.get(ParamKey::DuplicateChance)) {
                debug!(id = packet.id, "duplicating packet");
                transmit_once(transmitter, &shared.stats, packet);
                shared.stats.record_duplicated();
            }
            // entry (and its payload) is freed here, before the slot is emptied
        });

        if released > 0 {
            // Full channel means a wake-up is already pending.
            let _ = shared.vacancy_tx.try_send(());
        }
        released
    }

    /// Ticks by the clock time elapsed since the previous update.
    pub(crate) fn update(&mut self) -> usize {
        let now = self.clock.now();
        let elapsed = now.duration_since(self.last);
        self.last = now;
        self.tick(elapsed.as_secs_f32())
    }
}

fn transmit_once(transmitter: &dyn Transmit, stats: &Stats, packet: &Packet) {
    if let Err(e) = transmitter.transmit(packet) {
        stats.record_transmit_failure();
        warn!(id = packet.id, error = %e, "transmit failed, packet lost");
    }
}
