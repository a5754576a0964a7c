//! Isolated MPMC benchmark - for perf profiling
//!
//! Run: cargo build --release --bench perf_mpmc
//! Profile: sudo perf stat -e cycles,instructions,cache-misses,L1-dcache-load-misses ./target/release/deps/perf_mpmc-*

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;

use lockstep_queue::Queue;

const PRODUCERS: u64 = 4;
const CONSUMERS: u64 = 4;
const COUNT_PER_PRODUCER: u64 = 1_000_000;
const COUNT: u64 = COUNT_PER_PRODUCER * PRODUCERS;
const CAPACITY: usize = 1024;
// Expected sum: 0 + 1 + 2 + ... + (COUNT-1) = COUNT * (COUNT-1) / 2
const EXPECTED_SUM: u64 = COUNT * (COUNT - 1) / 2;

/// 256-byte message for realistic trading system simulation
#[derive(Clone, Copy)]
#[repr(C, align(64))]
struct Message {
    sequence: u64,
    _payload: [u8; 248],
}

impl Message {
    fn new(sequence: u64) -> Self {
        Self {
            sequence,
            _payload: [0u8; 248],
        }
    }
}

fn main() {
    // Warmup
    for _ in 0..3 {
        let queue = Arc::new(Queue::<Message>::new(CAPACITY).unwrap());
        let start = Arc::new(AtomicBool::new(false));
        let sum = Arc::new(AtomicU64::new(0));
        let mut handles = Vec::new();

        for p in 0..PRODUCERS {
            let queue = Arc::clone(&queue);
            let start = Arc::clone(&start);
            handles.push(thread::spawn(move || {
                while !start.load(Ordering::Acquire) {
                    std::hint::spin_loop();
                }
                let base = p * COUNT_PER_PRODUCER;
                for i in 0..COUNT_PER_PRODUCER {
                    queue.push(Message::new(base + i));
                }
            }));
        }

        for _ in 0..CONSUMERS {
            let queue = Arc::clone(&queue);
            let start = Arc::clone(&start);
            let sum = Arc::clone(&sum);
            handles.push(thread::spawn(move || {
                while !start.load(Ordering::Acquire) {
                    std::hint::spin_loop();
                }
                let mut thread_sum = 0u64;
                for _ in 0..(COUNT / CONSUMERS) {
                    thread_sum = thread_sum.wrapping_add(queue.pop().sequence);
                }
                sum.fetch_add(thread_sum, Ordering::Relaxed);
            }));
        }

        start.store(true, Ordering::Release);
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(sum.load(Ordering::Relaxed), EXPECTED_SUM);
        assert_eq!(queue.size(), 0);
    }

    println!(
        "lockstep mpmc: {} messages across {}p/{}c complete (256-byte messages)",
        COUNT, PRODUCERS, CONSUMERS
    );
}
