//! # Emulator
//!
//! Owns the slot table, parameters and RNG of one emulator instance, admits
//! packets from any thread and drives the dispatcher either from caller ticks
//! or from a background thread.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use quanta::Clock;
use serde::Deserialize;
use tracing::{debug, info, trace, warn};

use crate::config::ChaosConfig;
use crate::dispatcher::Dispatcher;
use crate::error::{Error, Result};
use crate::packet::{Packet, SocketHandle};
use crate::params::{ParamKey, ParamSnapshot, Parameters};
use crate::rng::ChaosRng;
use crate::slots::{self, Admitter, Entry};
use crate::stats::{Stats, StatsSnapshot};
use crate::transmit::Transmit;

/// Longest a sender sleeps on a full table before rescanning.
const BACKPRESSURE_WAIT: Duration = Duration::from_millis(1);

/// Who drives the dispatcher. Fixed for the lifetime of an emulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriveMode {
    /// The caller ticks the emulator itself at a regular cadence.
    #[serde(alias = "sync")]
    Cooperative,
    /// A dedicated thread ticks every `poll_interval_ms`.
    #[default]
    Background,
}

/// Driver lifecycle.
///
/// ```text
/// Uninitialized → Running → ShuttingDown → Stopped
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DriverState {
    Uninitialized = 0,
    Running = 1,
    ShuttingDown = 2,
    Stopped = 3,
}

impl DriverState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => DriverState::Running,
            2 => DriverState::ShuttingDown,
            3 => DriverState::Stopped,
            _ => DriverState::Uninitialized,
        }
    }
}

/// State shared by senders and the dispatcher.
pub(crate) struct Shared {
    pub(crate) params: Parameters,
    pub(crate) rng: ChaosRng,
    pub(crate) stats: Stats,
    pub(crate) vacancy_tx: Sender<()>,
    pub(crate) vacancy_rx: Receiver<()>,
    state: AtomicU8,
    next_id: AtomicU64,
}

impl Shared {
    pub(crate) fn new(params: &ParamSnapshot, seed: u32) -> Self {
        let (vacancy_tx, vacancy_rx) = bounded(1);
        Self {
            params: Parameters::from_snapshot(params),
            rng: ChaosRng::new(seed),
            stats: Stats::new(),
            vacancy_tx,
            vacancy_rx,
            state: AtomicU8::new(DriverState::Uninitialized as u8),
            next_id: AtomicU64::new(0),
        }
    }

    fn state(&self) -> DriverState {
        DriverState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: DriverState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn is_running(&self) -> bool {
        self.state() == DriverState::Running
    }
}

enum Driver {
    Cooperative(Mutex<Dispatcher>),
    Background {
        stop_tx: Sender<()>,
        handle: Mutex<Option<thread::JoinHandle<()>>>,
    },
}

/// Datagram chaos emulator.
///
/// Stands in for `sendto`: [`send`](Self::send) copies the datagram into a
/// slot with a randomly sampled delay (or silently loses it), and the
/// dispatcher later hands it to the [`Transmit`] collaborator, possibly
/// twice. Packets with different delays leave in a different order than
/// they arrived.
///
/// Any number of threads may call `send` concurrently. Each emulator is an
/// independent instance with its own table, parameters and RNG.
///
/// Shutdown abandons packets still waiting in the table: once
/// [`shutdown`](Self::shutdown) returns nothing else is transmitted.
/// Dropping the emulator shuts it down.
pub struct Emulator {
    shared: Arc<Shared>,
    admitter: Admitter,
    driver: Driver,
    mode: DriveMode,
}

impl Emulator {
    /// Starts an emulator with default capacity, seed and zeroed parameters
    /// on the system clock.
    pub fn init(mode: DriveMode, transmitter: Arc<dyn Transmit>) -> Result<Self> {
        let config = ChaosConfig {
            mode,
            ..ChaosConfig::default()
        };
        Self::with_config(config, Clock::new(), transmitter)
    }

    /// Starts an emulator from `config`, timing ticks with `clock`.
    ///
    /// In background mode this spawns the dispatch thread; failure to do so
    /// is the only error and leaves nothing running.
    pub fn with_config(
        config: ChaosConfig,
        clock: Clock,
        transmitter: Arc<dyn Transmit>,
    ) -> Result<Self> {
        let shared = Arc::new(Shared::new(&config.params, config.seed));
        let (admitter, sweeper) = slots::table(config.capacity);
        let dispatcher = Dispatcher::new(sweeper, shared.clone(), transmitter, clock);

        shared.set_state(DriverState::Running);
        let driver = match config.mode {
            DriveMode::Cooperative => Driver::Cooperative(Mutex::new(dispatcher)),
            DriveMode::Background => {
                let (stop_tx, stop_rx) = bounded(1);
                let worker_shared = shared.clone();
                let handle = thread::Builder::new()
                    .name("netchaos-dispatch".into())
                    .spawn(move || dispatch_worker(dispatcher, stop_rx, worker_shared))
                    .map_err(|e| {
                        shared.set_state(DriverState::Stopped);
                        Error::Spawn(e)
                    })?;
                Driver::Background {
                    stop_tx,
                    handle: Mutex::new(Some(handle)),
                }
            }
        };

        info!(
            mode = ?config.mode,
            capacity = admitter.capacity(),
            seed = config.seed,
            "chaos emulator started"
        );

        Ok(Self {
            shared,
            admitter,
            driver,
            mode: config.mode,
        })
    }

    /// Queues a datagram for delayed transmission.
    ///
    /// Always reports `payload.len()` as sent, whether the packet was queued,
    /// lost to the drop roll, or discarded because the emulator is shut
    /// down. Blocks while every slot is occupied.
    pub fn send(
        &self,
        socket: SocketHandle,
        payload: &[u8],
        flags: i32,
        destination: &[u8],
    ) -> usize {
        let shared = &*self.shared;
        let id = shared.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        shared.stats.record_send();

        if !shared.is_running() {
            shared.stats.record_abandoned();
            debug!(id, "emulator not running, discarding packet");
            return payload.len();
        }

        if shared.rng.roll(shared.params.get(ParamKey::DropChance)) {
            shared.stats.record_drop();
            debug!(id, len = payload.len(), "dropped packet");
            return payload.len();
        }

        let reservation = loop {
            if let Some(reservation) = self.admitter.try_reserve() {
                break reservation;
            }
            shared.stats.record_backpressure_wait();
            let _ = shared.vacancy_rx.recv_timeout(BACKPRESSURE_WAIT);
            if !shared.is_running() {
                shared.stats.record_abandoned();
                debug!(id, "emulator stopped while waiting for a slot");
                return payload.len();
            }
        };

        let delay_min = shared.params.get(ParamKey::DelayMin);
        let delay_max = shared.params.get(ParamKey::DelayMax);
        let delay = delay_min + shared.rng.next_float() * (delay_max - delay_min);

        let slot = reservation.index();
        reservation.arm(Entry {
            packet: Packet {
                id,
                socket,
                flags,
                destination: Bytes::copy_from_slice(destination),
                payload: Bytes::copy_from_slice(payload),
            },
            countdown: delay,
            delay,
        });
        shared.stats.record_admitted();
        trace!(id, slot, delay, "queued packet");

        payload.len()
    }

    /// Advances a cooperative emulator by `elapsed_secs`. Returns the number
    /// of packets dispatched. Ignored in background mode and after shutdown.
    pub fn tick(&self, elapsed_secs: f32) -> usize {
        self.with_dispatcher(|dispatcher| dispatcher.tick(elapsed_secs))
    }

    /// Advances a cooperative emulator by the clock time since the previous
    /// update (or since init).
    pub fn update(&self) -> usize {
        self.with_dispatcher(Dispatcher::update)
    }

    fn with_dispatcher(&self, f: impl FnOnce(&mut Dispatcher) -> usize) -> usize {
        let Driver::Cooperative(dispatcher) = &self.driver else {
            warn!("tick ignored: dispatcher runs on its own thread");
            return 0;
        };
        let mut dispatcher = dispatcher.lock().unwrap_or_else(|e| e.into_inner());
        if !self.shared.is_running() {
            warn!("tick ignored: emulator is shut down");
            return 0;
        }
        f(&mut dispatcher)
    }

    /// Stops dispatching. Blocks until the background thread (if any) has
    /// exited and any in-progress cooperative tick has finished. Idempotent.
    pub fn shutdown(&self) {
        let was_running = self
            .shared
            .state
            .compare_exchange(
                DriverState::Running as u8,
                DriverState::ShuttingDown as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();

        match &self.driver {
            Driver::Cooperative(dispatcher) => {
                drop(dispatcher.lock().unwrap_or_else(|e| e.into_inner()));
            }
            Driver::Background { stop_tx, handle } => {
                let _ = stop_tx.try_send(());
                let mut handle = handle.lock().unwrap_or_else(|e| e.into_inner());
                if let Some(handle) = handle.take() {
                    if handle.join().is_err() {
                        warn!("dispatch thread panicked");
                    }
                }
            }
        }

        self.shared.set_state(DriverState::Stopped);
        if was_running {
            let stats = self.shared.stats.snapshot();
            info!(
                in_flight = self.admitter.in_flight(),
                dispatched = stats.dispatched,
                dropped = stats.dropped,
                "chaos emulator stopped"
            );
        }
    }

    pub fn set_parameter(&self, key: ParamKey, value: f32) {
        self.shared.params.set(key, value);
    }

    pub fn get_parameter(&self, key: ParamKey) -> f32 {
        self.shared.params.get(key)
    }

    pub fn parameters(&self) -> ParamSnapshot {
        self.shared.params.snapshot()
    }

    pub fn mode(&self) -> DriveMode {
        self.mode
    }

    pub fn state(&self) -> DriverState {
        self.shared.state()
    }

    pub fn capacity(&self) -> usize {
        self.admitter.capacity()
    }

    /// Packets currently waiting in the table.
    pub fn in_flight(&self) -> usize {
        self.admitter.in_flight()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }
}

impl Drop for Emulator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Background dispatch period for a `poll_interval_ms` value.
pub(crate) fn poll_interval(ms: f32) -> Duration {
    // `as` saturates: NaN and negatives become 0
    Duration::from_millis((ms as u64).max(1))
}

fn dispatch_worker(mut dispatcher: Dispatcher, stop_rx: Receiver<()>, shared: Arc<Shared>) {
    debug!("dispatch thread running");
    while shared.is_running() {
        dispatcher.update();
        let wait = poll_interval(shared.params.get(ParamKey::PollIntervalMs));
        match stop_rx.recv_timeout(wait) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    debug!("dispatch thread exiting");
}
