//! Loom tests for the compare-exchange test-and-set protocol.
//!
//! These drive the portable engine's `fetch_or_cas` over loom atomics and
//! check that racing callers agree on a single winner and never drop a
//! neighbouring bit.

use heapmark::engine::{fetch_or_cas, AtomicWord};
use loom::sync::atomic::{AtomicUsize, Ordering};
use loom::sync::Arc;

/// A loom-tracked word the engine loop can run against.
struct Cell(AtomicUsize);

impl Cell {
    fn new(value: usize) -> Self {
        Self(AtomicUsize::new(value))
    }

    fn load(&self) -> usize {
        self.0.load(Ordering::Relaxed)
    }
}

impl AtomicWord for Cell {
    fn load_acquire(&self) -> usize {
        self.0.load(Ordering::Acquire)
    }

    fn compare_exchange_weak_acq_rel(&self, current: usize, new: usize) -> Result<usize, usize> {
        self.0
            .compare_exchange_weak(current, new, Ordering::AcqRel, Ordering::Acquire)
    }
}

/// Two threads race on the same bit: exactly one sees it clear.
#[test]
#[ignore = "loom test - run with cargo test loom_test_and_set --release"]
fn test_same_bit_single_winner() {
    loom::model(|| {
        let cell = Arc::new(Cell::new(0));

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let cell = Arc::clone(&cell);
                loom::thread::spawn(move || fetch_or_cas(&*cell, 0b100) & 0b100 != 0)
            })
            .collect();

        let already: Vec<bool> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(already.iter().filter(|a| !**a).count(), 1);
        assert_eq!(cell.load(), 0b100);
    });
}

/// Two threads set different bits of one word: both bits survive.
#[test]
#[ignore = "loom test - run with cargo test loom_test_and_set --release"]
fn test_neighbour_bits_survive() {
    loom::model(|| {
        let cell = Arc::new(Cell::new(0));

        let a = loom::thread::spawn({
            let cell = Arc::clone(&cell);
            move || fetch_or_cas(&*cell, 0b01)
        });
        let b = loom::thread::spawn({
            let cell = Arc::clone(&cell);
            move || fetch_or_cas(&*cell, 0b10)
        });

        let prev_a = a.join().unwrap();
        let prev_b = b.join().unwrap();

        assert_eq!(prev_a & 0b01, 0);
        assert_eq!(prev_b & 0b10, 0);
        assert_eq!(cell.load(), 0b11);
    });
}

/// A reader racing a setter sees either state, never a torn value.
#[test]
#[ignore = "loom test - run with cargo test loom_test_and_set --release"]
fn test_reader_sees_before_or_after() {
    loom::model(|| {
        let cell = Arc::new(Cell::new(0b1000));

        let setter = loom::thread::spawn({
            let cell = Arc::clone(&cell);
            move || {
                fetch_or_cas(&*cell, 0b0001);
            }
        });
        let reader = loom::thread::spawn({
            let cell = Arc::clone(&cell);
            move || cell.load_acquire()
        });

        setter.join().unwrap();
        let seen = reader.join().unwrap();
        assert!(seen == 0b1000 || seen == 0b1001);
    });
}
