//! # Slot Table
//!
//! Fixed-capacity arena of in-flight packets shared between any number of
//! senders and exactly one dispatcher, without a lock.
//!
//! Each slot carries an atomic [`SlotState`]:
//!
//! ```text
//! Empty ──CAS(Acquire)──▶ Reserving ──store(Release)──▶ Armed
//!   ▲                                                     │
//!   └──────────────────store(Release)─────────────────────┘
//! ```
//!
//! - `Empty → Reserving`: a sender wins the compare-exchange and becomes the
//!   only thread allowed to write the slot's entry. The Acquire pairs with the
//!   dispatcher's Release when it last emptied the slot, so the sender never
//!   sees a half-freed entry.
//! - `Reserving → Armed`: the sender publishes the fully written entry. The
//!   dispatcher's Acquire load of `Armed` synchronizes with this store.
//! - `Armed → Empty`: the dispatcher takes and frees the entry, then hands the
//!   slot back.
//!
//! Ownership of the two sides is split at construction: [`Admitter`] is
//! cloneable and only ever moves slots out of `Empty`, [`Sweeper`] is unique
//! and the only code that touches `Armed` slots.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use crate::packet::Packet;

/// Slot count of a default emulator.
pub const DEFAULT_CAPACITY: usize = 512;

/// Lifecycle state of one slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SlotState {
    Empty = 0,
    Reserving = 1,
    Armed = 2,
}

impl SlotState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => SlotState::Reserving,
            2 => SlotState::Armed,
            _ => SlotState::Empty,
        }
    }
}

/// A packet waiting for its delay to run out.
#[derive(Debug)]
pub struct Entry {
    pub packet: Packet,
    /// Seconds left before dispatch. May start negative.
    pub countdown: f32,
    /// Delay sampled at admission, in seconds.
    pub delay: f32,
}

struct Slot {
    state: AtomicU8,
    entry: UnsafeCell<Option<Entry>>,
}

// SAFETY: `entry` is only accessed by the thread that owns the slot through
// its state: the sender that won `Empty → Reserving`, or the unique `Sweeper`
// after observing `Armed`. Every hand-over is an Acquire/Release pair on
// `state`.
unsafe impl Sync for Slot {}

impl Slot {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(SlotState::Empty as u8),
            entry: UnsafeCell::new(None),
        }
    }
}

struct SlotTable {
    slots: Box<[Slot]>,
}

impl SlotTable {
    fn state(&self, index: usize) -> SlotState {
        SlotState::from_u8(self.slots[index].state.load(Ordering::Acquire))
    }
}

/// Builds a table of `capacity` empty slots and returns its two halves.
pub fn table(capacity: usize) -> (Admitter, Sweeper) {
    let slots: Box<[Slot]> = (0..capacity.max(1)).map(|_| Slot::new()).collect();
    let table = Arc::new(SlotTable { slots });
    (
        Admitter {
            table: table.clone(),
        },
        Sweeper { table },
    )
}

/// Sender-side handle: reserves and arms empty slots.
#[derive(Clone)]
pub struct Admitter {
    table: Arc<SlotTable>,
}

impl Admitter {
    pub fn capacity(&self) -> usize {
        self.table.slots.len()
    }

    /// Claims the lowest-indexed empty slot, or `None` if every slot is taken.
    pub fn try_reserve(&self) -> Option<Reservation<'_>> {
        self.table
            .slots
            .iter()
            .enumerate()
            .find(|(_, slot)| {
                slot.state
                    .compare_exchange(
                        SlotState::Empty as u8,
                        SlotState::Reserving as u8,
                        Ordering::Acquire,
                        Ordering::Relaxed,
                    )
                    .is_ok()
            })
            .map(|(index, slot)| Reservation { slot, index })
    }

    /// Number of slots currently holding a packet.
    pub fn in_flight(&self) -> usize {
        (0..self.capacity())
            .filter(|&i| self.table.state(i) == SlotState::Armed)
            .count()
    }

    pub fn state(&self, index: usize) -> SlotState {
        self.table.state(index)
    }
}

/// Exclusive claim on a slot in the `Reserving` state.
///
/// Dropping it without calling [`arm`](Self::arm) hands the slot back empty.
pub struct Reservation<'a> {
    slot: &'a Slot,
    index: usize,
}

impl Reservation<'_> {
    pub fn index(&self) -> usize {
        self.index
    }

    /// Writes `entry` into the slot and publishes it to the dispatcher.
    pub fn arm(self, entry: Entry) {
        let slot = self.slot;
        // SAFETY: we hold the slot in `Reserving`, nobody else reads or
        // writes the entry until the Release store below.
        unsafe {
            *slot.entry.get() = Some(entry);
        }
        slot.state.store(SlotState::Armed as u8, Ordering::Release);
        std::mem::forget(self);
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        let slot = self.slot;
        slot.state.store(SlotState::Empty as u8, Ordering::Release);
    }
}

/// Dispatcher-side handle: ages and releases armed slots.
///
/// There is exactly one per table and it cannot be cloned, so at most one
/// sweep is ever in progress.
pub struct Sweeper {
    table: Arc<SlotTable>,
}

impl Sweeper {
    pub fn capacity(&self) -> usize {
        self.table.slots.len()
    }

    /// Subtracts `elapsed` seconds from every armed countdown. Entries that
    /// reach zero or below are passed to `expire` by value and their slot is
    /// emptied once `expire` returns. Returns the number of released slots.
    pub fn sweep<F>(&mut self, elapsed: f32, mut expire: F) -> usize
    where
        F: FnMut(usize, Entry),
    {
        let mut released = 0;
        for (index, slot) in self.table.slots.iter().enumerate() {
            if slot.state.load(Ordering::Acquire) != SlotState::Armed as u8 {
                continue;
            }

            // SAFETY: the Acquire load above synchronized with the sender's
            // Release publish, and `&mut self` makes us the only reader of
            // armed entries.
            let cell = unsafe { &mut *slot.entry.get() };
            let due = match cell.as_mut() {
                Some(entry) => {
                    entry.countdown -= elapsed;
                    // NaN never counts down, release it now
                    entry.countdown <= 0.0 || entry.countdown.is_nan()
                }
                None => true,
            };
            if !due {
                continue;
            }

            if let Some(entry) = cell.take() {
                expire(index, entry);
            }
            slot.state.store(SlotState::Empty as u8, Ordering::Release);
            released += 1;
        }
        released
    }
}

impl Drop for SlotTable {
    fn drop(&mut self) {
        let abandoned = self
            .slots
            .iter_mut()
            .filter_map(|slot| slot.entry.get_mut().take())
            .count();
        if abandoned > 0 {
            tracing::debug!(abandoned, "released undispatched packets");
        }
    }
}
