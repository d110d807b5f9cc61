//! What a smart pointer can point at.
//!
//! Every target type picks one of two in-process representations through
//! [`Pointee::Ref`]:
//!
//! - **Plain types** ([`Plain`]) are stored in the region as-is. The handle
//!   keeps a local address to them and goes through the allocator to create
//!   and free them.
//! - **Self-describing types** ([`ShmContainer`]) keep a fixed-size header
//!   in the region and hand out a lightweight process-local *view* built
//!   from that header. The handle stores the view inline and the type
//!   controls its own construction and teardown.
//!
//! The choice is made by the type, at compile time, so a handle never pays
//! for the representation it does not use.

use crate::archive::Deserialize;
use crate::error::Result;
use crate::reference::{ExternalRef, Reference};
use shmref_mem::Allocator;
use std::ptr::NonNull;

/// A type that smart pointers can target.
pub trait Pointee: Sized {
    /// What lives in the region. `Self` for plain types, the header for
    /// self-describing ones.
    type Stored;

    /// In-process representation used by a handle. `DESTRUCTIBLE` is the
    /// handle's permission to free the target.
    type Ref<const DESTRUCTIBLE: bool>: Reference<Target = Self>;
}

/// Marker for types stored directly in the region.
///
/// A plain type must not hold process-local addresses, since other
/// processes see its bytes unchanged.
pub trait Plain: Pointee<Stored = Self> {}

/// A type with a region header and a process-local view over it.
///
/// The view is rebuilt from a [`Deserialize`] whenever a handle is
/// created, so it must stay cheap to construct and must not own
/// process-local resources that would need dropping.
pub trait ShmContainer: Pointee {
    /// Builds a view over an initialised header.
    fn shm_deserialize(ar: Deserialize<Self>) -> Self;

    /// Header address and allocator of this view.
    fn shm_archive(&self) -> Deserialize<Self>;

    /// Whether [`shm_destroy`](Self::shm_destroy) may release memory.
    fn set_header_owned(&mut self, owned: bool);

    /// Tears the object down: releases the header and everything it
    /// reaches, or only detaches the view when the header is not owned.
    fn shm_destroy(&mut self);
}

/// Construction of a self-describing type from `A`.
pub trait ShmInit<A>: ShmContainer {
    /// Initialises a header in place.
    ///
    /// On error the header must be left without any allocations of its own;
    /// the caller releases the header block.
    ///
    /// # Safety
    ///
    /// `header` must be valid for writes of `Self::Stored`, allocated from
    /// `alloc`, and must not hold a live header.
    unsafe fn shm_init(
        header: NonNull<Self::Stored>,
        alloc: &'static dyn Allocator,
        args: A,
    ) -> Result<()>;
}

/// Two independent argument groups for one construction.
///
/// Used where a target is built from two parts, such as a key and a value,
/// each of which would otherwise need its own tuple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Piecewise<A, B> {
    pub first: A,
    pub second: B,
}

impl<A, B> Piecewise<A, B> {
    #[must_use]
    pub const fn new(first: A, second: B) -> Self {
        Self { first, second }
    }

    pub fn into_parts(self) -> (A, B) {
        (self.first, self.second)
    }
}

/// Implements [`Plain`] and [`Pointee`] for types stored directly in the
/// region.
///
/// ```
/// use shmref::{plain_pointee, make_uptr_in};
/// # use shmref_mem::{AllocatorId, RegionAllocator};
///
/// #[derive(Debug, Clone, Copy, PartialEq)]
/// struct Sample {
///     ts: u64,
///     value: f64,
/// }
/// plain_pointee!(Sample);
///
/// # let alloc: &'static RegionAllocator =
/// #     Box::leak(Box::new(RegionAllocator::new(AllocatorId::new(90, 0), 64 * 1024).unwrap()));
/// let sample = make_uptr_in::<Sample, _>(alloc, Sample { ts: 1, value: 0.5 }).unwrap();
/// assert_eq!(sample.ts, 1);
/// ```
#[macro_export]
macro_rules! plain_pointee {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl $crate::Pointee for $ty {
                type Stored = Self;
                type Ref<const DESTRUCTIBLE: bool> = $crate::ExternalRef<Self, DESTRUCTIBLE>;
            }

            impl $crate::Plain for $ty {}
        )+
    };
}

plain_pointee!(
    u8, u16, u32, u64, u128, usize, i8, i16, i32, i64, i128, isize, f32, f64, bool, char, ()
);

impl<T: Plain, const N: usize> Pointee for [T; N] {
    type Stored = Self;
    type Ref<const DESTRUCTIBLE: bool> = ExternalRef<Self, DESTRUCTIBLE>;
}

impl<T: Plain, const N: usize> Plain for [T; N] {}

#[cfg(test)]
mod tests {
    use super::*;

    fn stored_size<T: Pointee>() -> usize {
        std::mem::size_of::<T::Stored>()
    }

    #[test]
    fn test_plain_types_store_themselves() {
        assert_eq!(stored_size::<u64>(), 8);
        assert_eq!(stored_size::<[u32; 4]>(), 16);
        assert_eq!(stored_size::<()>(), 0);
    }

    #[test]
    fn test_piecewise_parts() {
        let args = Piecewise::new(1u8, "two");
        assert_eq!(args.first, 1);
        assert_eq!(args.into_parts(), (1, "two"));
    }
}
