//! Multi-producer multi-consumer (MPMC) bounded queue.
//!
//! Any number of producers and consumers may operate on the queue
//! concurrently through a shared reference. Coordination is per-slot: a
//! thread claims a ticket by fetch-adding the shared head (producers) or
//! tail (consumers) counter, and the ticket names both a slot and a lap.
//! The slot's turn counter tells the thread when the slot is its to use,
//! so two producers never contend on the same slot and a slow thread only
//! ever delays the threads ticketed behind it on that slot.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use std::thread;
//!
//! use lockstep_queue::Queue;
//!
//! let queue = Arc::new(Queue::<u64>::new(64).unwrap());
//!
//! let producers: Vec<_> = (0..4)
//!     .map(|p| {
//!         let queue = Arc::clone(&queue);
//!         thread::spawn(move || {
//!             for i in 0..100 {
//!                 queue.push(p * 1000 + i);
//!             }
//!         })
//!     })
//!     .collect();
//!
//! let mut received = 0;
//! while received < 400 {
//!     let _ = queue.pop();
//!     received += 1;
//! }
//!
//! for handle in producers {
//!     handle.join().unwrap();
//! }
//! ```
//!
//! # Blocking vs. try operations
//!
//! [`push`](Queue::push) and [`pop`](Queue::pop) busy-spin until they
//! complete; they cannot fail and cannot be interrupted.
//! [`try_push`](Queue::try_push) and [`try_pop`](Queue::try_pop) never
//! spin on a slot: they report full/empty only after re-reading the shared
//! counter and observing no progress, so a stale snapshot never turns into
//! a spurious rejection. Callers that need cancellation or timeouts build
//! them from the try variants.

mod ring;

use std::fmt;
use std::hint;
use std::mem;
use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_utils::{Backoff, CachePadded};

use crate::alloc::{Global, RingAlloc};
use crate::{Full, QueueError};
use ring::{Ring, Slot, cache_line};

/// A bounded MPMC queue.
///
/// Shared by reference (typically behind an [`Arc`](std::sync::Arc));
/// every operation takes `&self`. The queue is not [`Clone`]; clone the
/// `Arc`, not the queue.
///
/// Values travel first-in first-out between ticket-paired producers and
/// consumers: the value written by the producer holding ticket `n` is
/// delivered to the consumer holding ticket `n`.
#[repr(C)]
pub struct Queue<T, A: RingAlloc = Global> {
    // === Hot path - cache-line padded ticket counters ===
    /// Producer ticket counter.
    head: CachePadded<AtomicUsize>,
    /// Consumer ticket counter.
    tail: CachePadded<AtomicUsize>,

    // === Cold: storage, touched through `slot()` only ===
    ring: Ring<T, A>,
}

impl<T> Queue<T, Global> {
    /// Creates a queue with the given capacity, backed by the global
    /// allocator.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::ZeroCapacity`] for `capacity == 0` and
    /// [`QueueError::Allocation`] when storage cannot be obtained.
    ///
    /// # Example
    ///
    /// ```
    /// use lockstep_queue::{Queue, QueueError};
    ///
    /// let queue = Queue::<u32>::new(16).unwrap();
    /// assert_eq!(queue.capacity(), 16);
    ///
    /// assert_eq!(Queue::<u32>::new(0).unwrap_err(), QueueError::ZeroCapacity);
    /// ```
    pub fn new(capacity: usize) -> Result<Self, QueueError> {
        Self::new_in(capacity, Global)
    }
}

impl<T, A: RingAlloc> Queue<T, A> {
    /// Creates a queue with the given capacity and allocator.
    ///
    /// One block of `capacity + 1` slots is requested up front; the
    /// allocator is not used again until the queue is dropped. If the
    /// allocator returns a block that is not aligned for the slot type,
    /// the block is handed back and construction fails with
    /// [`QueueError::Misaligned`].
    ///
    /// # Errors
    ///
    /// [`QueueError::ZeroCapacity`], [`QueueError::Allocation`], or
    /// [`QueueError::Misaligned`].
    pub fn new_in(capacity: usize, alloc: A) -> Result<Self, QueueError> {
        const {
            assert!(
                mem::align_of::<Slot<T>>() % cache_line() == 0,
                "slot must begin on a cache-line boundary"
            );
            assert!(
                mem::size_of::<Slot<T>>() % cache_line() == 0,
                "slot must occupy a whole number of cache lines"
            );
            assert!(
                mem::offset_of!(Self, tail) - mem::offset_of!(Self, head)
                    == mem::size_of::<CachePadded<AtomicUsize>>(),
                "head and tail must sit on distinct cache lines"
            );
            assert!(
                mem::size_of::<Self>() % cache_line() == 0,
                "queue must occupy a whole number of cache lines"
            );
        }

        if capacity < 1 {
            return Err(QueueError::ZeroCapacity);
        }

        Ok(Self {
            head: CachePadded::new(AtomicUsize::new(0)),
            tail: CachePadded::new(AtomicUsize::new(0)),
            ring: Ring::allocate(capacity, alloc)?,
        })
    }

    /// Enqueues `value`, spinning while the queue is full.
    ///
    /// Always succeeds. The wait is a busy-spin on this producer's slot;
    /// it holds no lock and does not impede consumers.
    pub fn push(&self, value: T) {
        let ticket = self.head.fetch_add(1, Ordering::SeqCst);
        let slot = self.ring.slot(self.index(ticket));
        let turn = 2 * self.lap(ticket);

        while slot.turn.load(Ordering::Acquire) != turn {
            hint::spin_loop();
        }

        // Safety: the ticket makes this thread the sole producer for this
        // slot and lap, and the matching turn shows the previous lap's
        // consumer is done with the storage.
        unsafe { slot.fill(value) };
        slot.turn.store(turn + 1, Ordering::Release);
    }

    /// Attempts to enqueue `value` without blocking.
    ///
    /// # Errors
    ///
    /// Returns `Err(Full(value))` only when the ring is observed full with
    /// the head counter unchanged across the re-check, giving the value
    /// back to the caller.
    ///
    /// # Example
    ///
    /// ```
    /// use lockstep_queue::{Full, Queue};
    ///
    /// let queue = Queue::<u32>::new(1).unwrap();
    ///
    /// assert!(queue.try_push(1).is_ok());
    /// assert_eq!(queue.try_push(2), Err(Full(2)));
    /// ```
    #[must_use = "try_push returns the value back inside Err when the queue is full"]
    pub fn try_push(&self, value: T) -> Result<(), Full<T>> {
        let backoff = Backoff::new();
        let mut ticket = self.head.load(Ordering::Acquire);

        loop {
            let slot = self.ring.slot(self.index(ticket));
            let turn = 2 * self.lap(ticket);

            if slot.turn.load(Ordering::Acquire) == turn {
                match self.head.compare_exchange(
                    ticket,
                    ticket.wrapping_add(1),
                    Ordering::SeqCst,
                    Ordering::Acquire,
                ) {
                    Ok(_) => {
                        // Safety: winning the CAS pairs this thread with
                        // the ticket, and the turn check above showed the
                        // slot empty for this lap.
                        unsafe { slot.fill(value) };
                        slot.turn.store(turn + 1, Ordering::Release);
                        return Ok(());
                    }
                    Err(current) => {
                        // Another producer took this ticket; retry with
                        // the counter value it left behind.
                        ticket = current;
                        backoff.spin();
                    }
                }
            } else {
                // Slot not ready. Only report full if no producer has made
                // progress since our snapshot; a stale head here would
                // reject a push that the vacating producer just made room
                // for.
                let snapshot = ticket;
                ticket = self.head.load(Ordering::Acquire);
                if ticket == snapshot {
                    return Err(Full(value));
                }
            }
        }
    }

    /// Dequeues the next value, spinning while the queue is empty.
    ///
    /// The wait is a busy-spin on this consumer's slot; it holds no lock
    /// and does not impede producers.
    pub fn pop(&self) -> T {
        let ticket = self.tail.fetch_add(1, Ordering::SeqCst);
        let slot = self.ring.slot(self.index(ticket));
        let turn = 2 * self.lap(ticket) + 1;

        while slot.turn.load(Ordering::Acquire) != turn {
            hint::spin_loop();
        }

        // Safety: the ticket makes this thread the sole consumer for this
        // slot and lap, and the matching turn shows the producer's value
        // is published.
        let value = unsafe { slot.take() };
        slot.turn.store(turn + 1, Ordering::Release);
        value
    }

    /// Attempts to dequeue a value without blocking.
    ///
    /// Returns `None` only when the queue is observed empty with the tail
    /// counter unchanged across the re-check.
    ///
    /// # Example
    ///
    /// ```
    /// use lockstep_queue::Queue;
    ///
    /// let queue = Queue::<u32>::new(4).unwrap();
    /// assert_eq!(queue.try_pop(), None);
    ///
    /// queue.push(7);
    /// assert_eq!(queue.try_pop(), Some(7));
    /// ```
    pub fn try_pop(&self) -> Option<T> {
        let backoff = Backoff::new();
        let mut ticket = self.tail.load(Ordering::Acquire);

        loop {
            let slot = self.ring.slot(self.index(ticket));
            let turn = 2 * self.lap(ticket) + 1;

            if slot.turn.load(Ordering::Acquire) == turn {
                match self.tail.compare_exchange(
                    ticket,
                    ticket.wrapping_add(1),
                    Ordering::SeqCst,
                    Ordering::Acquire,
                ) {
                    Ok(_) => {
                        // Safety: winning the CAS pairs this thread with
                        // the ticket, and the turn check above showed a
                        // published value for this lap.
                        let value = unsafe { slot.take() };
                        slot.turn.store(turn + 1, Ordering::Release);
                        return Some(value);
                    }
                    Err(current) => {
                        ticket = current;
                        backoff.spin();
                    }
                }
            } else {
                let snapshot = ticket;
                ticket = self.tail.load(Ordering::Acquire);
                if ticket == snapshot {
                    return None;
                }
            }
        }
    }

    /// Returns the difference between tickets issued to producers and to
    /// consumers.
    ///
    /// Under concurrency this is a best-effort snapshot: it can be
    /// negative (a consumer has claimed a ticket whose slot is not yet
    /// filled) or exceed the true element count (a producer has claimed a
    /// ticket but not yet published). It is exact once all threads have
    /// quiesced.
    #[inline]
    pub fn size(&self) -> isize {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Relaxed);
        head.wrapping_sub(tail) as isize
    }

    /// Returns `true` when [`size`](Queue::size) observes no unclaimed
    /// values. Best-effort, like `size`.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.size() <= 0
    }

    /// Returns the capacity fixed at construction.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    #[inline]
    fn index(&self, ticket: usize) -> usize {
        ticket % self.ring.capacity()
    }

    #[inline]
    fn lap(&self, ticket: usize) -> usize {
        ticket / self.ring.capacity()
    }
}

impl<T, A: RingAlloc> fmt::Debug for Queue<T, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Queue")
            .field("capacity", &self.capacity())
            .field("size", &self.size())
            .finish_non_exhaustive()
    }
}
