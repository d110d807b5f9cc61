//! Process-independent descriptors.
//!
//! A descriptor names an object by the identity of the allocator that owns
//! it and a byte offset into that allocator's region. It holds no local
//! address, so it can be written into shared memory, read back by another
//! process and resolved through that process's registry.
//!
//! [`Pointer`] is the plain form. [`AtomicPointer`] stores the offset in an
//! `AtomicU64` so one thread can publish a handle that others pick up.

use shmref_mem::{AllocatorId, OffsetPointer};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};

/// Read and write access to the two halves of a descriptor.
///
/// Smart pointers serialize into, and deserialize from, anything that
/// implements this for their target type.
pub trait Descriptor<T> {
    fn allocator_id(&self) -> AllocatorId;

    fn offset(&self) -> OffsetPointer;

    /// Overwrites both halves.
    fn store(&mut self, id: AllocatorId, offset: OffsetPointer);

    /// A descriptor with a null offset names nothing, whatever its identity.
    fn is_null(&self) -> bool {
        self.offset().is_null()
    }
}

/// Typed `(allocator id, offset)` pair.
#[repr(C)]
pub struct Pointer<T> {
    allocator_id: AllocatorId,
    offset: OffsetPointer,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Pointer<T> {
    #[must_use]
    pub const fn new(allocator_id: AllocatorId, offset: OffsetPointer) -> Self {
        Self {
            allocator_id,
            offset,
            _marker: PhantomData,
        }
    }

    /// The descriptor that names nothing.
    #[must_use]
    pub const fn null() -> Self {
        Self::new(AllocatorId::null(), OffsetPointer::null())
    }

    #[must_use]
    pub const fn allocator_id(&self) -> AllocatorId {
        self.allocator_id
    }

    #[must_use]
    pub const fn offset(&self) -> OffsetPointer {
        self.offset
    }

    #[must_use]
    pub const fn is_null(&self) -> bool {
        self.offset.is_null()
    }

    /// Reinterprets the descriptor as naming a `U` at the same place.
    #[must_use]
    pub const fn cast<U>(self) -> Pointer<U> {
        Pointer::new(self.allocator_id, self.offset)
    }
}

impl<T> Descriptor<T> for Pointer<T> {
    fn allocator_id(&self) -> AllocatorId {
        self.allocator_id
    }

    fn offset(&self) -> OffsetPointer {
        self.offset
    }

    fn store(&mut self, id: AllocatorId, offset: OffsetPointer) {
        self.allocator_id = id;
        self.offset = offset;
    }
}

impl<T> Default for Pointer<T> {
    fn default() -> Self {
        Self::null()
    }
}

impl<T> Clone for Pointer<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Pointer<T> {}

impl<T> PartialEq for Pointer<T> {
    fn eq(&self, other: &Self) -> bool {
        self.allocator_id == other.allocator_id && self.offset == other.offset
    }
}

impl<T> Eq for Pointer<T> {}

impl<T> Hash for Pointer<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.allocator_id.hash(state);
        self.offset.hash(state);
    }
}

impl<T> fmt::Debug for Pointer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pointer")
            .field("allocator_id", &self.allocator_id)
            .field("offset", &self.offset)
            .finish()
    }
}

impl<T> fmt::Display for Pointer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.offset, self.allocator_id)
    }
}

/// A [`Pointer`] whose offset can be read and written concurrently.
///
/// The allocator identity is fixed once the descriptor is shared; only the
/// offset changes through `&self`. Publishing with `Release` and loading
/// with `Acquire` makes the pointed-to object's initialisation visible to
/// the loading thread.
#[repr(C)]
pub struct AtomicPointer<T> {
    allocator_id: AllocatorId,
    offset: AtomicU64,
    _marker: PhantomData<fn() -> T>,
}

impl<T> AtomicPointer<T> {
    #[must_use]
    pub const fn new(ptr: Pointer<T>) -> Self {
        Self {
            allocator_id: ptr.allocator_id,
            offset: AtomicU64::new(ptr.offset.get()),
            _marker: PhantomData,
        }
    }

    #[must_use]
    pub const fn null() -> Self {
        Self::new(Pointer::null())
    }

    /// Snapshot of the descriptor.
    pub fn load(&self, order: Ordering) -> Pointer<T> {
        Pointer::new(self.allocator_id, self.load_offset(order))
    }

    pub fn load_offset(&self, order: Ordering) -> OffsetPointer {
        OffsetPointer::new(self.offset.load(order))
    }

    /// Publishes a new offset within the same allocator.
    pub fn store_offset(&self, offset: OffsetPointer, order: Ordering) {
        self.offset.store(offset.get(), order);
    }

    /// Replaces the offset, returning the previous one.
    pub fn swap_offset(&self, offset: OffsetPointer, order: Ordering) -> OffsetPointer {
        OffsetPointer::new(self.offset.swap(offset.get(), order))
    }
}

impl<T> Descriptor<T> for AtomicPointer<T> {
    fn allocator_id(&self) -> AllocatorId {
        self.allocator_id
    }

    fn offset(&self) -> OffsetPointer {
        self.load_offset(Ordering::Acquire)
    }

    fn store(&mut self, id: AllocatorId, offset: OffsetPointer) {
        self.allocator_id = id;
        *self.offset.get_mut() = offset.get();
    }
}

impl<T> Default for AtomicPointer<T> {
    fn default() -> Self {
        Self::null()
    }
}

impl<T> From<Pointer<T>> for AtomicPointer<T> {
    fn from(ptr: Pointer<T>) -> Self {
        Self::new(ptr)
    }
}

impl<T> fmt::Debug for AtomicPointer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AtomicPointer")
            .field("allocator_id", &self.allocator_id)
            .field("offset", &self.load_offset(Ordering::Relaxed))
            .finish()
    }
}
