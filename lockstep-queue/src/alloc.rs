//! Raw storage supply for the slot array.
//!
//! The queue obtains one block for its whole slot array at construction and
//! returns it at destruction; the allocator is never touched on the hot
//! path. Implementations are handed a [`Layout`] carrying the slot type's
//! over-aligned requirements, but are not obliged to honor them: the queue
//! verifies the returned address itself and fails construction on a
//! misaligned block.

use std::alloc::Layout;
use std::fmt;
use std::ptr::NonNull;

/// Supplies raw storage for the slot array.
///
/// # Example
///
/// An allocator that counts outstanding blocks:
///
/// ```
/// use std::alloc::Layout;
/// use std::ptr::NonNull;
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicUsize, Ordering};
///
/// use lockstep_queue::alloc::{AllocError, Global, RingAlloc};
///
/// #[derive(Clone, Default)]
/// struct Counting(Arc<AtomicUsize>);
///
/// impl RingAlloc for Counting {
///     fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, AllocError> {
///         self.0.fetch_add(1, Ordering::Relaxed);
///         Global.allocate(layout)
///     }
///
///     unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
///         self.0.fetch_sub(1, Ordering::Relaxed);
///         unsafe { Global.deallocate(ptr, layout) }
///     }
/// }
/// ```
pub trait RingAlloc {
    /// Allocates a block of at least `layout.size()` bytes, or reports
    /// exhaustion.
    ///
    /// The block should be aligned to `layout.align()`; if it is not, the
    /// queue detects this and rejects it (returning it through
    /// [`deallocate`](Self::deallocate)) rather than using it.
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, AllocError>;

    /// Releases a block previously returned by [`allocate`](Self::allocate).
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by `allocate` on this same allocator
    /// with the same `layout`, and must not be accessed after this call.
    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout);
}

/// The default allocator, backed by [`std::alloc`].
///
/// The standard global allocator honors arbitrary power-of-two alignments,
/// so queues built on `Global` never fail the alignment check.
#[derive(Debug, Default, Clone, Copy)]
pub struct Global;

impl RingAlloc for Global {
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, AllocError> {
        // Safety: the queue always requests at least two slots, and a slot
        // is at least one cache line, so the layout is never zero-sized.
        let ptr = unsafe { std::alloc::alloc(layout) };
        NonNull::new(ptr).ok_or(AllocError)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        unsafe { std::alloc::dealloc(ptr.as_ptr(), layout) }
    }
}

/// Returned when an allocator cannot produce storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocError;

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "allocation failed")
    }
}

impl std::error::Error for AllocError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_honors_over_alignment() {
        let layout = Layout::from_size_align(4096, 512).unwrap();
        let ptr = Global.allocate(layout).unwrap();
        assert_eq!(ptr.as_ptr() as usize % 512, 0);
        unsafe { Global.deallocate(ptr, layout) };
    }

    #[test]
    fn global_round_trips_many_blocks() {
        let layout = Layout::from_size_align(256, 128).unwrap();
        let blocks: Vec<_> = (0..32)
            .map(|_| Global.allocate(layout).unwrap())
            .collect();

        for (i, a) in blocks.iter().enumerate() {
            for b in &blocks[i + 1..] {
                assert_ne!(a.as_ptr(), b.as_ptr());
            }
        }

        for ptr in blocks {
            unsafe { Global.deallocate(ptr, layout) };
        }
    }
}
