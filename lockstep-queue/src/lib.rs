//! Bounded lock-free queues for many-producer many-consumer workloads.
//!
//! `lockstep-queue` provides a fixed-capacity MPMC FIFO queue built on
//! per-slot turn counters: producers and consumers claim tickets from two
//! shared counters and then rendezvous on the ticketed slot, so threads
//! only ever contend on the counter fetch-add and on their own slot's
//! cache line.
//!
//! # Quick Start
//!
//! ```
//! use std::sync::Arc;
//! use std::thread;
//!
//! use lockstep_queue::Queue;
//!
//! let queue = Arc::new(Queue::<u64>::new(128).unwrap());
//!
//! let producer = {
//!     let queue = Arc::clone(&queue);
//!     thread::spawn(move || {
//!         for i in 0..100 {
//!             queue.push(i);
//!         }
//!     })
//! };
//!
//! let mut sum = 0;
//! for _ in 0..100 {
//!     sum += queue.pop();
//! }
//!
//! producer.join().unwrap();
//! assert_eq!(sum, 4950);
//! ```
//!
//! # Design
//!
//! - **Blocking operations spin.** [`Queue::push`] and [`Queue::pop`]
//!   busy-wait on their slot; there is no parking, no condition variable,
//!   and no way to interrupt the wait. Use [`Queue::try_push`] and
//!   [`Queue::try_pop`] to build timeouts or back-off.
//! - **FIFO by ticket.** The value from producer ticket `n` goes to
//!   consumer ticket `n`; with a single producer this is plain FIFO order.
//! - **No false sharing.** Slots, the head counter, and the tail counter
//!   each occupy whole cache lines, and one extra slot pads the end of the
//!   ring against neighboring allocations.
//! - **Pluggable allocation.** The slot array comes from a
//!   [`RingAlloc`](alloc::RingAlloc) implementation (the global allocator
//!   by default), used only at construction and drop.
//!
//! Ticket counters are host-word sized; on 64-bit targets they cannot wrap
//! in any realistic workload, while 32-bit targets inherit a wraparound
//! horizon of `2^32` operations per queue.

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs, missing_debug_implementations)]

use std::fmt;

pub mod alloc;
pub mod mpmc;

pub use mpmc::Queue;

/// Error returned when pushing to a full queue.
///
/// Contains the value that could not be pushed, returning ownership to the
/// caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Full<T>(pub T);

impl<T> Full<T> {
    /// Returns the value that could not be pushed.
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> fmt::Display for Full<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "queue is full")
    }
}

impl<T: fmt::Debug> std::error::Error for Full<T> {}

/// Errors surfaced by queue construction.
///
/// Construction is the only fallible part of the queue's lifetime; no
/// operation can fail once the queue exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    /// A capacity of zero was requested; the queue needs at least one slot.
    ZeroCapacity,
    /// The allocator could not produce storage for the slot array.
    Allocation(alloc::AllocError),
    /// The allocator returned a block that is not aligned for the slot
    /// type, and over-aligned storage is required to keep slots on their
    /// own cache lines.
    Misaligned,
}

impl fmt::Display for QueueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ZeroCapacity => write!(f, "capacity must be at least 1"),
            Self::Allocation(err) => write!(f, "slot array allocation failed: {err}"),
            Self::Misaligned => write!(f, "allocator returned insufficiently aligned storage"),
        }
    }
}

impl std::error::Error for QueueError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Allocation(err) => Some(err),
            _ => None,
        }
    }
}
