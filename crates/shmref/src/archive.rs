//! Resolved storage locations.
//!
//! [`Archive`] is an in-region slot with room for one target's stored form.
//! Structures that live in a region embed archives for their children, and
//! handles can be constructed directly into them.
//!
//! [`Deserialize`] is the result of resolving a descriptor in this process:
//! a local address of the stored form plus the allocator that owns it. It
//! is what handles and self-describing views are built from.

use crate::error::{Error, Result};
use crate::pointee::Pointee;
use crate::pointer::{Descriptor, Pointer};
use shmref_log::{debug, trace};
use shmref_mem::{Allocator, AllocatorExt, MemoryRegistry, memory_registry};
use std::any::type_name;
use std::cell::UnsafeCell;
use std::fmt;
use std::mem::MaybeUninit;
use std::ptr::NonNull;

/// Uninitialised in-region storage for one `T::Stored`.
///
/// The slot itself never reads or drops its contents; whoever constructs
/// into it decides how long the value lives.
#[repr(transparent)]
pub struct Archive<T: Pointee> {
    slot: UnsafeCell<MaybeUninit<T::Stored>>,
}

// SAFETY: the slot is only written through handles constructed into it,
// which carry their own synchronisation requirements.
unsafe impl<T: Pointee> Sync for Archive<T> where T::Stored: Sync {}

impl<T: Pointee> Archive<T> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            slot: UnsafeCell::new(MaybeUninit::uninit()),
        }
    }

    /// Address of the slot.
    #[must_use]
    pub fn as_ptr(&self) -> NonNull<T::Stored> {
        // SAFETY: UnsafeCell::get never returns null.
        unsafe { NonNull::new_unchecked(self.slot.get().cast::<T::Stored>()) }
    }

    /// Descriptor for the slot, or null if `alloc` does not contain it.
    #[must_use]
    pub fn to_pointer(&self, alloc: &dyn Allocator) -> Pointer<T> {
        match alloc.convert(self.as_ptr().as_ptr()) {
            off if off.is_null() => Pointer::null(),
            off => Pointer::new(alloc.id(), off),
        }
    }
}

impl<T: Pointee> Default for Archive<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Pointee> fmt::Debug for Archive<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Archive").field(&self.as_ptr()).finish()
    }
}

/// A stored form resolved to a local address, with its allocator.
pub struct Deserialize<T: Pointee> {
    header: NonNull<T::Stored>,
    alloc: &'static dyn Allocator,
}

impl<T: Pointee> Deserialize<T> {
    #[must_use]
    pub fn new(header: NonNull<T::Stored>, alloc: &'static dyn Allocator) -> Self {
        Self { header, alloc }
    }

    /// Resolves `ptr` through the process-wide registry.
    pub fn from_descriptor<P: Descriptor<T> + ?Sized>(ptr: &P) -> Result<Self> {
        Self::from_descriptor_in(memory_registry(), ptr)
    }

    /// Resolves `ptr` through `registry`.
    pub fn from_descriptor_in<P: Descriptor<T> + ?Sized>(
        registry: &MemoryRegistry,
        ptr: &P,
    ) -> Result<Self> {
        let id = ptr.allocator_id();
        let offset = ptr.offset();
        if offset.is_null() {
            return Err(Error::NullPointer);
        }

        let alloc = registry.get(id).ok_or_else(|| {
            debug!("cannot resolve {offset}: allocator {id} is not registered");
            Error::AllocatorNotFound { id }
        })?;
        let header = alloc.resolve_offset::<T::Stored>(offset).ok_or_else(|| {
            let ty = type_name::<T::Stored>();
            debug!("cannot resolve {offset}: no aligned {ty} fits in allocator {id}");
            Error::OffsetOutOfRange { id, offset }
        })?;

        trace!("resolved {offset}@{id} to {header:p}");
        Ok(Self { header, alloc })
    }

    /// Views an initialised archive slot owned by `alloc`.
    #[must_use]
    pub fn from_archive(ar: &Archive<T>, alloc: &'static dyn Allocator) -> Self {
        Self::new(ar.as_ptr(), alloc)
    }

    #[must_use]
    pub fn header(&self) -> NonNull<T::Stored> {
        self.header
    }

    #[must_use]
    pub fn allocator(&self) -> &'static dyn Allocator {
        self.alloc
    }

    /// Descriptor naming the same header.
    #[must_use]
    pub fn to_pointer(&self) -> Pointer<T> {
        Pointer::new(self.alloc.id(), self.alloc.convert(self.header.as_ptr()))
    }
}

impl<T: Pointee> Clone for Deserialize<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: Pointee> Copy for Deserialize<T> {}

impl<T: Pointee> fmt::Debug for Deserialize<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deserialize")
            .field("header", &self.header)
            .field("allocator", &self.alloc.id())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shmref_mem::{AllocatorId, MemoryConfig, OffsetPointer, RegionAllocator};

    fn registry_with(id: AllocatorId) -> (MemoryRegistry, &'static dyn Allocator) {
        let registry = MemoryRegistry::new(MemoryConfig::default());
        let alloc = registry
            .register(RegionAllocator::new(id, 64 * 1024).unwrap())
            .unwrap();
        (registry, alloc)
    }

    #[test]
    fn test_resolve_descriptor() {
        let (registry, alloc) = registry_with(AllocatorId::new(40, 0));
        let (ptr, off) = alloc.allocate_construct(99u32).unwrap();

        let ar = Deserialize::<u32>::from_descriptor_in(&registry, &Pointer::new(alloc.id(), off))
            .unwrap();
        assert_eq!(ar.header(), ptr);
        assert_eq!(ar.allocator().id(), alloc.id());
        assert_eq!(ar.to_pointer(), Pointer::new(alloc.id(), off));
    }

    #[test]
    fn test_resolve_failures() {
        let (registry, alloc) = registry_with(AllocatorId::new(41, 0));

        let null = Pointer::<u32>::null();
        assert_eq!(
            Deserialize::from_descriptor_in(&registry, &null).unwrap_err(),
            Error::NullPointer
        );

        let unknown = Pointer::<u32>::new(AllocatorId::new(99, 0), OffsetPointer::new(64));
        assert_eq!(
            Deserialize::from_descriptor_in(&registry, &unknown).unwrap_err(),
            Error::AllocatorNotFound {
                id: AllocatorId::new(99, 0)
            }
        );

        let past_end = OffsetPointer::new(1 << 40);
        let far = Pointer::<u32>::new(alloc.id(), past_end);
        assert_eq!(
            Deserialize::from_descriptor_in(&registry, &far).unwrap_err(),
            Error::OffsetOutOfRange {
                id: alloc.id(),
                offset: past_end
            }
        );
    }

    #[test]
    fn test_offset_must_hold_whole_value() {
        let (registry, alloc) = registry_with(AllocatorId::new(43, 0));
        let len = alloc.stats().capacity as u64;

        let last = OffsetPointer::new(len - 1);
        assert_eq!(
            Deserialize::<u64>::from_descriptor_in(&registry, &Pointer::new(alloc.id(), last))
                .unwrap_err(),
            Error::OffsetOutOfRange {
                id: alloc.id(),
                offset: last
            }
        );
        assert!(
            Deserialize::<u8>::from_descriptor_in(&registry, &Pointer::new(alloc.id(), last))
                .is_ok()
        );

        let (_, off) = alloc.allocate_construct(1u64).unwrap();
        let misaligned = Pointer::<u64>::new(alloc.id(), OffsetPointer::new(off.get() + 4));
        assert!(matches!(
            Deserialize::from_descriptor_in(&registry, &misaligned),
            Err(Error::OffsetOutOfRange { .. })
        ));
    }

    #[test]
    fn test_archive_slot_in_region() {
        let (_registry, alloc) = registry_with(AllocatorId::new(42, 0));
        let (slot, off) = alloc.allocate_construct(Archive::<u64>::new()).unwrap();
        // SAFETY: the slot was just allocated and is not shared.
        let slot = unsafe { slot.as_ref() };

        assert_eq!(slot.to_pointer(alloc), Pointer::new(alloc.id(), off));
        assert_eq!(Deserialize::from_archive(slot, alloc).header(), slot.as_ptr());

        let local = Archive::<u64>::new();
        assert!(local.to_pointer(alloc).is_null());
    }
}
