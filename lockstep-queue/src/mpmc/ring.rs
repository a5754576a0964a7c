//! Slot array storage for the MPMC queue.
//!
//! Each slot pairs a turn counter with uninitialized storage. The turn
//! counter is the sole synchronization variable between the producer and
//! consumer that meet on a slot; storage is only touched by the thread
//! whose ticket matches the current turn.
//!
//! Memory layout of the allocation:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │ Slot[0]:        { turn (cache-line padded), storage }    │
//! │ Slot[1]:        { turn (cache-line padded), storage }    │
//! │ ...                                                      │
//! │ Slot[cap - 1]:  { turn (cache-line padded), storage }    │
//! │ Slot[cap]:      uninitialized padding, never addressed   │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! The trailing slot is allocated but never used as storage; it keeps the
//! last live slot from sharing a cache line with whatever the allocator
//! places after the array.

use std::alloc::Layout;
use std::cell::UnsafeCell;
use std::mem::{self, MaybeUninit};
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_utils::CachePadded;

use crate::QueueError;
use crate::alloc::{AllocError, RingAlloc};

/// The cache-line size the layout is padded against.
///
/// `CachePadded` encodes the per-target destructive interference size
/// (128 bytes on x86_64 and aarch64, 64 on most others).
pub(crate) const fn cache_line() -> usize {
    mem::align_of::<CachePadded<()>>()
}

/// One cell of the ring.
///
/// The turn counter encodes the slot's lifecycle phase:
/// - `turn == 2 * lap`: empty, reserved for the producer holding a ticket
///   of lap `lap`
/// - `turn == 2 * lap + 1`: holds a value awaiting the consumer of lap `lap`
///
/// Every producer/consumer visit advances the turn by 2, so the counter
/// also guards against ABA: a producer that has raced ahead a full lap
/// cannot mistake a slot still holding an older lap's value for one that
/// is ready to fill.
#[repr(C)]
pub(crate) struct Slot<T> {
    /// Padded to a full cache line so that spinning on one slot's turn
    /// never invalidates a neighbor's.
    pub(crate) turn: CachePadded<AtomicUsize>,
    storage: UnsafeCell<MaybeUninit<T>>,
}

impl<T> Slot<T> {
    /// Moves `value` into the slot's storage.
    ///
    /// # Safety
    ///
    /// The caller must hold the producer ticket matching the slot's current
    /// (even) turn; the storage must not hold a live value.
    #[inline]
    pub(crate) unsafe fn fill(&self, value: T) {
        unsafe { (*self.storage.get()).write(value) };
    }

    /// Moves the stored value out, leaving the storage uninitialized.
    ///
    /// # Safety
    ///
    /// The caller must hold the consumer ticket matching the slot's current
    /// (odd) turn; the storage must hold a live value.
    #[inline]
    pub(crate) unsafe fn take(&self) -> T {
        unsafe { (*self.storage.get()).assume_init_read() }
    }

    /// Drops the stored value in place.
    ///
    /// # Safety
    ///
    /// The storage must hold a live value (odd turn) and no other thread
    /// may access the slot. Only reachable from the ring's drop walk.
    unsafe fn drop_in_place(&self) {
        unsafe { ptr::drop_in_place(self.storage.get().cast::<T>()) };
    }
}

/// The backing storage for an MPMC queue: `capacity + 1` slots in one
/// allocator-provided block. Owns the block and the values still inside it.
pub(crate) struct Ring<T, A: RingAlloc> {
    slots: NonNull<Slot<T>>,
    capacity: usize,
    layout: Layout,
    alloc: A,
}

// Safety: each slot's storage is handed off between threads through its
// turn counter (release store by the writer, acquire load by the next
// visitor), so sending or sharing the ring only moves `T` values between
// threads. The allocator is only used with exclusive access (construction
// and drop).
unsafe impl<T: Send, A: RingAlloc + Send> Send for Ring<T, A> {}
unsafe impl<T: Send, A: RingAlloc + Sync> Sync for Ring<T, A> {}

impl<T, A: RingAlloc> Ring<T, A> {
    /// Allocates a block for `capacity + 1` slots and initializes the turn
    /// of each of the first `capacity` slots to 0.
    ///
    /// The allocator is not trusted to honor the slot type's over-aligned
    /// layout; a misaligned block is returned to it and construction fails.
    pub(crate) fn allocate(capacity: usize, alloc: A) -> Result<Self, QueueError> {
        let slot_count = capacity
            .checked_add(1)
            .ok_or(QueueError::Allocation(AllocError))?;
        let layout = Layout::array::<Slot<T>>(slot_count)
            .map_err(|_| QueueError::Allocation(AllocError))?;

        let block = alloc.allocate(layout).map_err(QueueError::Allocation)?;
        if block.as_ptr() as usize % mem::align_of::<Slot<T>>() != 0 {
            // Safety: `block` came from this allocator with this layout.
            unsafe { alloc.deallocate(block, layout) };
            return Err(QueueError::Misaligned);
        }

        let slots = block.cast::<Slot<T>>();
        for i in 0..capacity {
            // Safety: `i` is in bounds of the fresh allocation. Only the
            // turn is written; storage stays uninitialized, and the padding
            // slot is never touched at all.
            unsafe {
                let slot = slots.as_ptr().add(i);
                ptr::addr_of_mut!((*slot).turn).write(CachePadded::new(AtomicUsize::new(0)));
            }
        }

        Ok(Self {
            slots,
            capacity,
            layout,
            alloc,
        })
    }

    #[inline]
    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the slot at `index`.
    #[inline]
    pub(crate) fn slot(&self, index: usize) -> &Slot<T> {
        debug_assert!(index < self.capacity);
        // Safety: index is below capacity, within the initialized prefix
        // of the allocation.
        unsafe { &*self.slots.as_ptr().add(index) }
    }
}

impl<T, A: RingAlloc> Drop for Ring<T, A> {
    fn drop(&mut self) {
        // A slot parked on an odd turn holds a value that was produced but
        // never consumed.
        for i in 0..self.capacity {
            let slot = self.slot(i);
            if slot.turn.load(Ordering::Relaxed) % 2 == 1 {
                // Safety: &mut self means no thread holds a ticket; odd
                // turn means the storage is live.
                unsafe { slot.drop_in_place() };
            }
        }

        // Safety: the block came from this allocator with this layout.
        unsafe { self.alloc.deallocate(self.slots.cast::<u8>(), self.layout) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::Global;

    #[test]
    fn turns_start_at_zero() {
        let ring = Ring::<u64, Global>::allocate(8, Global).unwrap();
        for i in 0..8 {
            assert_eq!(ring.slot(i).turn.load(Ordering::Relaxed), 0);
        }
    }

    #[test]
    fn fill_take_round_trip() {
        let ring = Ring::<String, Global>::allocate(2, Global).unwrap();
        let slot = ring.slot(0);

        unsafe { slot.fill("hello".to_string()) };
        slot.turn.store(1, Ordering::Release);

        assert_eq!(unsafe { slot.take() }, "hello");
        slot.turn.store(2, Ordering::Release);
    }

    #[test]
    fn slot_begins_on_cache_line_and_fills_whole_lines() {
        assert_eq!(mem::align_of::<Slot<u8>>() % cache_line(), 0);
        assert_eq!(mem::size_of::<Slot<u8>>() % cache_line(), 0);

        // A payload larger than one line still keeps the invariants.
        assert_eq!(mem::align_of::<Slot<[u8; 200]>>() % cache_line(), 0);
        assert_eq!(mem::size_of::<Slot<[u8; 200]>>() % cache_line(), 0);
    }

    #[test]
    fn slots_are_cache_line_disjoint() {
        let ring = Ring::<u64, Global>::allocate(4, Global).unwrap();
        let a = ring.slot(0) as *const _ as usize;
        let b = ring.slot(1) as *const _ as usize;
        assert_eq!(a % cache_line(), 0);
        assert!(b - a >= cache_line());
    }

    #[test]
    fn drop_walk_only_drops_odd_turn_slots() {
        use std::sync::atomic::AtomicUsize;

        static DROP_COUNT: AtomicUsize = AtomicUsize::new(0);

        struct DropCounter;
        impl Drop for DropCounter {
            fn drop(&mut self) {
                DROP_COUNT.fetch_add(1, Ordering::SeqCst);
            }
        }

        {
            let ring = Ring::<DropCounter, Global>::allocate(4, Global).unwrap();

            // Slot 0: produced, never consumed (odd turn, live value).
            unsafe { ring.slot(0).fill(DropCounter) };
            ring.slot(0).turn.store(1, Ordering::Release);

            // Slot 1: produced and consumed (even turn, storage dead).
            unsafe { ring.slot(1).fill(DropCounter) };
            ring.slot(1).turn.store(1, Ordering::Release);
            drop(unsafe { ring.slot(1).take() });
            ring.slot(1).turn.store(2, Ordering::Release);

            // Slots 2 and 3: never touched.
            assert_eq!(DROP_COUNT.load(Ordering::SeqCst), 1);
        }

        assert_eq!(DROP_COUNT.load(Ordering::SeqCst), 2);
    }
}
