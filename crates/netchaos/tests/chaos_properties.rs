//! # Chaos properties under a caller-driven (cooperative) dispatcher
//!
//! Every test ticks the emulator by hand, so time is fully simulated and the
//! outcomes are deterministic for a given seed. Transmission goes to an
//! in-memory recorder instead of the network.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use netchaos::{
    ChaosConfig, DriveMode, Emulator, Packet, ParamKey, ParamSnapshot, SocketHandle, Transmit,
};
use quanta::Clock;

// ─── Helpers ────────────────────────────────────────────────────────────────

#[derive(Default)]
struct Recorder {
    sent: Mutex<Vec<Packet>>,
}

impl Recorder {
    fn payloads(&self) -> Vec<Vec<u8>> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|p| p.payload.to_vec())
            .collect()
    }

    fn count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

impl Transmit for Recorder {
    fn transmit(&self, packet: &Packet) -> anyhow::Result<usize> {
        self.sent.lock().unwrap().push(packet.clone());
        Ok(packet.len())
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn cooperative(params: ParamSnapshot, capacity: usize) -> (Emulator, Arc<Recorder>) {
    init_tracing();
    let recorder = Arc::new(Recorder::default());
    let config = ChaosConfig {
        mode: DriveMode::Cooperative,
        capacity,
        params,
        ..ChaosConfig::default()
    };
    let emu = Emulator::with_config(config, Clock::new(), recorder.clone()).unwrap();
    (emu, recorder)
}

fn fixed_delay(seconds: f32) -> ParamSnapshot {
    ParamSnapshot {
        delay_min: seconds,
        delay_max: seconds,
        ..Default::default()
    }
}

fn send(emu: &Emulator, payload: &[u8]) -> usize {
    emu.send(SocketHandle(3), payload, 0, b"127.0.0.1:5200")
}

// ─── Loss / pass-through / duplication ─────────────────────────────────────

#[test]
fn full_drop_chance_never_transmits() {
    let (emu, recorder) = cooperative(
        ParamSnapshot {
            drop_chance: 1.0,
            ..Default::default()
        },
        16,
    );

    for i in 0..100u32 {
        assert_eq!(send(&emu, &i.to_be_bytes()), 4);
    }
    emu.tick(10.0);

    assert_eq!(recorder.count(), 0);
    let stats = emu.stats();
    assert_eq!(stats.sends, 100);
    assert_eq!(stats.dropped, 100);
    assert_eq!(stats.admitted, 0);
}

#[test]
fn clean_network_transmits_each_packet_once_unchanged() {
    let (emu, recorder) = cooperative(ParamSnapshot::default(), 64);

    let expected: Vec<Vec<u8>> = (0..50).map(|i| format!("payload-{i}").into_bytes()).collect();
    for p in &expected {
        send(&emu, p);
    }
    assert_eq!(emu.tick(0.0), 50);

    let mut got = recorder.payloads();
    got.sort();
    let mut want = expected.clone();
    want.sort();
    assert_eq!(got, want);
}

#[test]
fn full_duplicate_chance_transmits_twice() {
    let (emu, recorder) = cooperative(
        ParamSnapshot {
            duplicate_chance: 1.0,
            ..Default::default()
        },
        16,
    );

    for name in ["one", "two", "three"] {
        send(&emu, name.as_bytes());
    }
    emu.tick(0.0);

    let payloads = recorder.payloads();
    assert_eq!(payloads.len(), 6);
    for name in ["one", "two", "three"] {
        let copies = payloads.iter().filter(|p| p.as_slice() == name.as_bytes()).count();
        assert_eq!(copies, 2, "{name} should be sent exactly twice");
    }
    assert_eq!(emu.stats().duplicated, 3);
}

/// The generator's top draw maps to exactly 1.0; certainty must hold there too.
const FULL_PERIOD_SENDS: u32 = 1 << 17;

#[test]
fn full_drop_chance_holds_across_every_draw() {
    let (emu, recorder) = cooperative(
        ParamSnapshot {
            drop_chance: 1.0,
            ..Default::default()
        },
        16,
    );

    for i in 0..FULL_PERIOD_SENDS {
        send(&emu, &i.to_be_bytes());
    }
    emu.tick(10.0);

    assert_eq!(recorder.count(), 0);
    let stats = emu.stats();
    assert_eq!(stats.dropped, u64::from(FULL_PERIOD_SENDS));
    assert_eq!(stats.admitted, 0);
}

#[test]
fn full_duplicate_chance_holds_across_every_draw() {
    let (emu, recorder) = cooperative(
        ParamSnapshot {
            duplicate_chance: 1.0,
            ..Default::default()
        },
        512,
    );

    for i in 0..FULL_PERIOD_SENDS {
        send(&emu, &i.to_be_bytes());
        if i % 256 == 255 {
            emu.tick(0.0);
        }
    }
    emu.tick(0.0);

    assert_eq!(recorder.count(), 2 * FULL_PERIOD_SENDS as usize);
    assert_eq!(emu.stats().duplicated, u64::from(FULL_PERIOD_SENDS));
}

#[test]
fn destination_socket_and_flags_pass_through() {
    let (emu, recorder) = cooperative(ParamSnapshot::default(), 4);
    emu.send(SocketHandle(42), b"data", 0x40, b"\x02\x00\x14\x50");
    emu.tick(0.0);

    let sent = recorder.sent.lock().unwrap();
    assert_eq!(sent[0].socket, SocketHandle(42));
    assert_eq!(sent[0].flags, 0x40);
    assert_eq!(&sent[0].destination[..], b"\x02\x00\x14\x50");
}

// ─── Delay ─────────────────────────────────────────────────────────────────

#[test]
fn fixed_delay_is_never_shortened() {
    let (emu, recorder) = cooperative(fixed_delay(0.5), 8);

    // t = 0.0
    send(&emu, b"A");
    assert_eq!(emu.tick(0.25), 0);
    // t = 0.25
    send(&emu, b"B");
    assert_eq!(emu.tick(0.25), 1);
    // t = 0.5
    assert_eq!(recorder.payloads(), vec![b"A".to_vec()]);
    assert_eq!(emu.tick(0.125), 0);
    // t = 0.625
    assert_eq!(emu.tick(0.125), 1);
    // t = 0.75
    assert_eq!(recorder.payloads(), vec![b"A".to_vec(), b"B".to_vec()]);
}

#[test]
fn clock_driven_update_respects_delay() {
    init_tracing();
    let (clock, mock) = Clock::mock();
    let recorder = Arc::new(Recorder::default());
    let config = ChaosConfig {
        mode: DriveMode::Cooperative,
        params: fixed_delay(1.0),
        ..ChaosConfig::default()
    };
    let emu = Emulator::with_config(config, clock, recorder.clone()).unwrap();

    send(&emu, b"late");
    mock.increment(Duration::from_millis(500));
    assert_eq!(emu.update(), 0);
    mock.increment(Duration::from_millis(250));
    assert_eq!(emu.update(), 0);
    mock.increment(Duration::from_millis(250));
    assert_eq!(emu.update(), 1);
    assert_eq!(recorder.count(), 1);
}

#[test]
fn random_delays_reorder_packets() {
    let (emu, recorder) = cooperative(
        ParamSnapshot {
            delay_min: 0.0,
            delay_max: 1.0,
            ..Default::default()
        },
        128,
    );

    for i in 0..100u8 {
        send(&emu, &[i]);
    }
    for _ in 0..100 {
        emu.tick(0.01);
    }
    emu.tick(1.0);

    let order: Vec<u8> = recorder.payloads().into_iter().map(|p| p[0]).collect();
    assert_eq!(order.len(), 100);
    let mut sorted = order.clone();
    sorted.sort_unstable();
    assert_eq!(sorted, (0..100).collect::<Vec<u8>>());
    assert_ne!(order, sorted, "uniform delays should reorder something");
}

#[test]
fn negative_delay_dispatches_on_next_tick() {
    let (emu, recorder) = cooperative(fixed_delay(-0.5), 4);
    send(&emu, b"now");
    assert_eq!(emu.tick(0.0), 1);
    assert_eq!(recorder.count(), 1);
}

#[test]
fn inverted_delay_range_is_not_an_error() {
    let (emu, recorder) = cooperative(
        ParamSnapshot {
            delay_min: 0.5,
            delay_max: 0.25,
            ..Default::default()
        },
        32,
    );
    for i in 0..20u8 {
        assert_eq!(send(&emu, &[i]), 1);
    }
    assert_eq!(emu.tick(0.125), 0);
    emu.tick(0.375);
    assert_eq!(recorder.count(), 20);
}

// ─── Concrete scenario ─────────────────────────────────────────────────────

#[test]
fn four_slots_four_packets_one_tick() {
    let (emu, recorder) = cooperative(ParamSnapshot::default(), 4);
    for name in ["A", "B", "C", "D"] {
        send(&emu, name.as_bytes());
    }
    assert_eq!(emu.in_flight(), 4);
    assert_eq!(emu.tick(0.0), 4);

    let got: HashSet<Vec<u8>> = recorder.payloads().into_iter().collect();
    let want: HashSet<Vec<u8>> = ["A", "B", "C", "D"]
        .iter()
        .map(|s| s.as_bytes().to_vec())
        .collect();
    assert_eq!(got, want);
    assert_eq!(recorder.count(), 4);
}

// ─── Backpressure ──────────────────────────────────────────────────────────

#[test]
fn send_blocks_when_table_is_full() {
    let (emu, recorder) = cooperative(ParamSnapshot::default(), 2);
    send(&emu, b"first");
    send(&emu, b"second");
    assert_eq!(emu.in_flight(), 2);

    let (done_tx, done_rx) = crossbeam_channel::bounded(1);
    thread::scope(|s| {
        s.spawn(|| {
            send(&emu, b"third");
            done_tx.send(()).unwrap();
        });

        assert!(
            done_rx.recv_timeout(Duration::from_millis(100)).is_err(),
            "third send must wait for a free slot"
        );
        assert!(emu.stats().backpressure_waits > 0);
        assert_eq!(recorder.count(), 0);

        emu.tick(0.0);
        done_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("sender should resume once slots free up");
    });

    assert_eq!(emu.in_flight(), 1);
    emu.tick(0.0);
    assert_eq!(recorder.count(), 3);
    assert_eq!(emu.stats().dropped, 0);
}

// ─── Concurrency ───────────────────────────────────────────────────────────

#[test]
fn concurrent_producers_each_packet_once() {
    const PRODUCERS: usize = 8;
    const PER_PRODUCER: usize = 250;

    let (emu, recorder) = cooperative(ParamSnapshot::default(), 16);
    let finished = AtomicUsize::new(0);

    thread::scope(|s| {
        for t in 0..PRODUCERS {
            let emu = &emu;
            let finished = &finished;
            s.spawn(move || {
                for i in 0..PER_PRODUCER {
                    let payload = format!("{t}:{i}");
                    assert_eq!(
                        emu.send(SocketHandle(t as i64), payload.as_bytes(), 0, b""),
                        payload.len()
                    );
                }
                finished.fetch_add(1, Ordering::SeqCst);
            });
        }

        while finished.load(Ordering::SeqCst) < PRODUCERS {
            emu.tick(0.0);
            thread::yield_now();
        }
    });
    emu.tick(0.0);

    let payloads = recorder.payloads();
    assert_eq!(payloads.len(), PRODUCERS * PER_PRODUCER);
    let unique: HashSet<Vec<u8>> = payloads.into_iter().collect();
    assert_eq!(unique.len(), PRODUCERS * PER_PRODUCER);
    for t in 0..PRODUCERS {
        for i in 0..PER_PRODUCER {
            assert!(unique.contains(format!("{t}:{i}").as_bytes()));
        }
    }
    assert_eq!(emu.in_flight(), 0);
}

// ─── Determinism and isolation ─────────────────────────────────────────────

#[test]
fn same_seed_same_losses() {
    let run = |seed: u32| {
        let recorder = Arc::new(Recorder::default());
        let config = ChaosConfig {
            mode: DriveMode::Cooperative,
            seed,
            params: ParamSnapshot {
                drop_chance: 0.5,
                ..Default::default()
            },
            ..ChaosConfig::default()
        };
        let emu = Emulator::with_config(config, Clock::new(), recorder.clone()).unwrap();
        for i in 0..200u8 {
            send(&emu, &[i]);
        }
        emu.tick(0.0);
        let mut survivors: Vec<u8> = recorder.payloads().into_iter().map(|p| p[0]).collect();
        survivors.sort_unstable();
        survivors
    };

    let first = run(1234);
    assert_eq!(first, run(1234));
    assert!(!first.is_empty() && first.len() < 200);
}

#[test]
fn instances_are_independent() {
    let (a, rec_a) = cooperative(ParamSnapshot::default(), 4);
    let (b, rec_b) = cooperative(ParamSnapshot::default(), 4);
    b.set_parameter(ParamKey::DropChance, 1.0);

    send(&a, b"to a");
    send(&b, b"to b");
    b.tick(0.0);
    assert_eq!(rec_b.count(), 0);
    assert_eq!(a.get_parameter(ParamKey::DropChance), 0.0);

    a.tick(0.0);
    assert_eq!(rec_a.payloads(), vec![b"to a".to_vec()]);
}

#[test]
fn transmit_failures_do_not_stall_dispatch() {
    init_tracing();
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = attempts.clone();
    let flaky = move |p: &Packet| -> anyhow::Result<usize> {
        if counter.fetch_add(1, Ordering::SeqCst) % 2 == 0 {
            anyhow::bail!("EHOSTUNREACH");
        }
        Ok(p.len())
    };
    let config = ChaosConfig {
        mode: DriveMode::Cooperative,
        capacity: 8,
        ..ChaosConfig::default()
    };
    let emu = Emulator::with_config(config, Clock::new(), Arc::new(flaky)).unwrap();

    for i in 0..6u8 {
        assert_eq!(send(&emu, &[i]), 1);
    }
    assert_eq!(emu.tick(0.0), 6);
    assert_eq!(emu.in_flight(), 0);
    assert_eq!(attempts.load(Ordering::SeqCst), 6);

    let stats = emu.stats();
    assert_eq!(stats.transmit_failures, 3);
    assert_eq!(stats.dispatched, 6);
}
