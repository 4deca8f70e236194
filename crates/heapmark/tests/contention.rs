//! Concurrency tests: exactly one winner per address under contention.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use heapmark::{AnyMarker, BitMapMarker, EngineKind, Generic, MarkerConfig, ALIGNMENT, WORD_BITS};

const BEGIN: usize = 0x5000_0000;

fn available_engines() -> impl Iterator<Item = EngineKind> {
    EngineKind::ALL.into_iter().filter(|k| k.is_available())
}

#[test]
fn test_single_address_has_one_winner() {
    for kind in available_engines() {
        for threads in [2, 4, 16] {
            let marker = Arc::new(MarkerConfig::new().engine(kind).build(BEGIN, 1 << 16).unwrap());
            let barrier = Arc::new(Barrier::new(threads));
            let addr = BEGIN + 40 * ALIGNMENT;

            let handles: Vec<_> = (0..threads)
                .map(|_| {
                    let marker = Arc::clone(&marker);
                    let barrier = Arc::clone(&barrier);
                    thread::spawn(move || {
                        barrier.wait();
                        marker.check_and_mark(addr)
                    })
                })
                .collect();

            let results: Vec<bool> = handles.into_iter().map(|h| h.join().unwrap()).collect();
            let winners = results.iter().filter(|already| !**already).count();
            assert_eq!(winners, 1, "{kind} with {threads} threads: {results:?}");
            assert!(marker.is_marked(addr));
        }
    }
}

#[test]
fn test_every_address_has_one_winner() {
    const THREADS: usize = 8;
    const ADDRS: usize = 20_000;

    for kind in available_engines() {
        let marker = MarkerConfig::new().engine(kind).build(BEGIN, 1 << 20).unwrap();
        let winners: Vec<AtomicUsize> = (0..ADDRS).map(|_| AtomicUsize::new(0)).collect();
        let barrier = Barrier::new(THREADS);

        thread::scope(|s| {
            for t in 0..THREADS {
                let (marker, winners, barrier) = (&marker, &winners, &barrier);
                s.spawn(move || {
                    barrier.wait();
                    // Each thread walks the addresses in a different order so
                    // that neighbouring bits in one word are hit concurrently.
                    for i in 0..ADDRS {
                        let idx = (i * (2 * t + 1) + t * 131) % ADDRS;
                        if !marker.check_and_mark(BEGIN + idx * ALIGNMENT) {
                            winners[idx].fetch_add(1, Ordering::Relaxed);
                        }
                    }
                });
            }
        });

        for (idx, count) in winners.iter().enumerate() {
            assert_eq!(count.load(Ordering::Relaxed), 1, "{kind}: address #{idx}");
        }
        assert_eq!(marker.count_marked(), ADDRS);
    }
}

#[test]
fn test_concurrent_set_mark_loses_no_bits() {
    for kind in available_engines() {
        let marker = MarkerConfig::new().engine(kind).build(BEGIN, 1 << 16).unwrap();

        // One thread per bit of the same word; every OR must survive.
        thread::scope(|s| {
            for bit in 0..WORD_BITS {
                let marker = &marker;
                s.spawn(move || {
                    for _ in 0..100 {
                        marker.set_mark(BEGIN + bit * ALIGNMENT);
                    }
                });
            }
        });

        for bit in 0..WORD_BITS {
            assert!(marker.is_marked(BEGIN + bit * ALIGNMENT), "{kind}: bit {bit}");
        }
        assert!(!marker.is_marked(BEGIN + WORD_BITS * ALIGNMENT));
    }
}

#[test]
fn test_readers_see_marks_monotonically() {
    let marker = AnyMarker::new(BEGIN, 1 << 16).unwrap();
    let addrs: Vec<usize> = (0..512).map(|i| BEGIN + i * ALIGNMENT).collect();

    thread::scope(|s| {
        s.spawn(|| {
            for &addr in &addrs {
                marker.set_mark(addr);
            }
        });
        s.spawn(|| {
            // Once a bit is observed set it must stay set for the pass.
            let mut seen = vec![false; addrs.len()];
            for _ in 0..50 {
                for (i, &addr) in addrs.iter().enumerate() {
                    let now = marker.is_marked(addr);
                    assert!(now || !seen[i], "mark at {addr:#x} disappeared");
                    seen[i] |= now;
                }
            }
        });
    });

    assert!(addrs.iter().all(|&addr| marker.is_marked(addr)));
}

#[test]
fn test_typed_marker_is_shareable() {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<BitMapMarker<Generic>>();
    assert_send_sync::<AnyMarker>();

    let marker = Arc::new(BitMapMarker::<Generic>::new(BEGIN, 1 << 16).unwrap());
    let handles: Vec<_> = (0..4)
        .map(|t| {
            let marker = Arc::clone(&marker);
            thread::spawn(move || {
                (0..256)
                    .filter(|i| !marker.check_and_mark(BEGIN + (i * 4 + t % 2) * ALIGNMENT))
                    .count()
            })
        })
        .collect();

    let total: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
    // Threads 0/2 and 1/3 cover the same addresses pairwise.
    assert_eq!(total, 512);
}
