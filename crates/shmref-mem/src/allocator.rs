//! The allocator capability consumed by the pointer layer.
//!
//! [`Allocator`] is object safe so handles can keep a `&'static dyn
//! Allocator` back-reference. The typed helpers every caller actually wants
//! (allocate-and-construct, free-with-drop, offset conversion for a `T`) live
//! in [`AllocatorExt`], which is implemented for every allocator including
//! trait objects.

use crate::error::Result;
use crate::id::{AllocatorId, OffsetPointer};
use std::alloc::Layout;
use std::ptr::NonNull;

/// Allocation counters reported by an allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AllocStats {
    /// Successful allocations since the allocator was created.
    pub allocations: usize,
    /// Frees since the allocator was created.
    pub frees: usize,
    /// Bytes currently handed out, rounded to block sizes.
    pub bytes_in_use: usize,
    /// Total bytes the allocator manages.
    pub capacity: usize,
}

impl AllocStats {
    /// Allocations not yet returned.
    #[must_use]
    pub fn live(&self) -> usize {
        self.allocations - self.frees
    }
}

/// Allocates objects inside one region and translates between local
/// addresses and region-relative offsets.
pub trait Allocator: Send + Sync {
    /// Identity under which this allocator is registered.
    fn id(&self) -> AllocatorId;

    /// Allocates a block for `layout`, returning its local address and offset.
    fn allocate(&self, layout: Layout) -> Result<(NonNull<u8>, OffsetPointer)>;

    /// Returns a block to the allocator.
    ///
    /// # Safety
    ///
    /// `ptr` must come from `allocate` on this allocator with the same
    /// `layout`, and must not be freed twice.
    unsafe fn free(&self, ptr: NonNull<u8>, layout: Layout);

    /// Converts a local address inside the region to an offset.
    ///
    /// Null or out-of-region addresses map to [`OffsetPointer::null`].
    fn to_offset(&self, ptr: *const u8) -> OffsetPointer;

    /// Converts an offset back to a local address; null maps to null.
    fn to_ptr(&self, off: OffsetPointer) -> *mut u8;

    /// Returns `true` if `ptr` points into the managed region.
    fn contains(&self, ptr: *const u8) -> bool;

    /// Local address of an object with `layout` at `off`.
    ///
    /// Returns `None` unless the whole object lies inside the region and
    /// its address satisfies the layout's alignment.
    fn resolve(&self, off: OffsetPointer, layout: Layout) -> Option<NonNull<u8>> {
        let start = NonNull::new(self.to_ptr(off))?;
        if start.as_ptr().addr() % layout.align() != 0 {
            return None;
        }
        let last = start.as_ptr().wrapping_add(layout.size().saturating_sub(1));
        if last.addr() < start.as_ptr().addr() || !self.contains(last) {
            return None;
        }
        Some(start)
    }

    fn stats(&self) -> AllocStats;
}

/// Typed helpers over [`Allocator`].
pub trait AllocatorExt: Allocator {
    /// Allocates space for a `T` and moves `value` into it.
    fn allocate_construct<T>(&self, value: T) -> Result<(NonNull<T>, OffsetPointer)> {
        let (ptr, off) = self.allocate(Layout::new::<T>())?;
        let ptr = ptr.cast::<T>();
        // SAFETY: freshly allocated, sized and aligned for T.
        unsafe { ptr.as_ptr().write(value) };
        Ok((ptr, off))
    }

    /// Moves `value` into already-allocated storage.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for writes of a `T` and must not hold a live `T`
    /// (it would be overwritten without being dropped).
    unsafe fn construct<T>(&self, ptr: NonNull<T>, value: T) {
        // SAFETY: upheld by the caller.
        unsafe { ptr.as_ptr().write(value) };
    }

    /// Drops the `T` at `ptr` in place and frees its block.
    ///
    /// # Safety
    ///
    /// `ptr` must come from [`allocate_construct`](Self::allocate_construct)
    /// (or `allocate` with `Layout::new::<T>()`) on this allocator, hold a
    /// live `T`, and not be freed twice.
    unsafe fn free_ptr<T>(&self, ptr: NonNull<T>) {
        // SAFETY: upheld by the caller.
        unsafe {
            std::ptr::drop_in_place(ptr.as_ptr());
            self.free(ptr.cast(), Layout::new::<T>());
        }
    }

    /// Offset of a typed pointer.
    fn convert<T>(&self, ptr: *const T) -> OffsetPointer {
        self.to_offset(ptr.cast())
    }

    /// Typed pointer for an offset.
    fn convert_offset<T>(&self, off: OffsetPointer) -> *mut T {
        self.to_ptr(off).cast()
    }

    /// Typed pointer for an offset, if a whole aligned `T` fits there.
    fn resolve_offset<T>(&self, off: OffsetPointer) -> Option<NonNull<T>> {
        self.resolve(off, Layout::new::<T>()).map(NonNull::cast)
    }
}

impl<A: Allocator + ?Sized> AllocatorExt for A {}

impl std::fmt::Debug for dyn Allocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Allocator").field("id", &self.id()).finish()
    }
}
