//! Factory functions for smart pointers.
//!
//! Every factory allocates the target through an allocator, constructs it
//! from the given arguments and returns an owning handle. Allocation
//! failures are returned as-is; nothing is retried and there is no fallback
//! allocator.
//!
//! # Variants
//!
//! - `make_mptr`, `make_uptr`, `make_ref` use the process-wide default
//!   allocator
//! - the `_in` variants take an explicit allocator
//! - the `_at` variants construct into an existing [`Archive`] slot instead
//!   of allocating
//! - `make_ptr_base` and `make_piecewise` are generic over the handle type
//!
//! # Examples
//!
//! ```
//! use shmref::make_uptr_in;
//! use shmref_mem::{Allocator, AllocatorId, RegionAllocator};
//!
//! let alloc: &'static RegionAllocator =
//!     Box::leak(Box::new(RegionAllocator::new(AllocatorId::new(91, 0), 64 * 1024).unwrap()));
//!
//! let n = make_uptr_in::<u64, _>(alloc, 42u32).unwrap();
//! assert_eq!(*n, 42);
//!
//! // Dropping the only owner returns the block.
//! drop(n);
//! assert_eq!(alloc.stats().live(), 0);
//! ```

use crate::archive::Archive;
use crate::error::Result;
use crate::pointee::{Piecewise, Pointee};
use crate::reference::Construct;
use crate::smart_ptr::{Mptr, Ref, SmartPtr, Uptr};
use shmref_mem::{Allocator, memory_registry};

/// Handles that can be built from `A`.
///
/// Implemented for every [`SmartPtr`] whose reference accepts `A`, so
/// generic code can pick the handle type with a turbofish.
pub trait MakePtr<A>: Sized {
    fn make_in(alloc: &'static dyn Allocator, args: A) -> Result<Self>;
}

impl<T: Pointee, A, const U: bool, const D: bool> MakePtr<A> for SmartPtr<T, U, D>
where
    T::Ref<D>: Construct<A>,
{
    fn make_in(alloc: &'static dyn Allocator, args: A) -> Result<Self> {
        Self::new_in(alloc, args)
    }
}

/// Builds a `P` from `args` in the default allocator.
pub fn make_ptr_base<P: MakePtr<A>, A>(args: A) -> Result<P> {
    P::make_in(memory_registry().default_allocator()?, args)
}

/// Builds a `P` from `args` in `alloc`.
pub fn make_ptr_base_in<P: MakePtr<A>, A>(alloc: &'static dyn Allocator, args: A) -> Result<P> {
    P::make_in(alloc, args)
}

/// Builds a `P` from two argument groups in the default allocator.
pub fn make_piecewise<P, A1, A2>(first: A1, second: A2) -> Result<P>
where
    P: MakePtr<Piecewise<A1, A2>>,
{
    make_ptr_base(Piecewise::new(first, second))
}

/// Builds a `P` from two argument groups in `alloc`.
pub fn make_piecewise_in<P, A1, A2>(
    alloc: &'static dyn Allocator,
    first: A1,
    second: A2,
) -> Result<P>
where
    P: MakePtr<Piecewise<A1, A2>>,
{
    make_ptr_base_in(alloc, Piecewise::new(first, second))
}

pub fn make_mptr<T: Pointee, A>(args: A) -> Result<Mptr<T>>
where
    T::Ref<true>: Construct<A>,
{
    make_ptr_base(args)
}

pub fn make_mptr_in<T: Pointee, A>(alloc: &'static dyn Allocator, args: A) -> Result<Mptr<T>>
where
    T::Ref<true>: Construct<A>,
{
    make_ptr_base_in(alloc, args)
}

pub fn make_uptr<T: Pointee, A>(args: A) -> Result<Uptr<T>>
where
    T::Ref<true>: Construct<A>,
{
    make_ptr_base(args)
}

pub fn make_uptr_in<T: Pointee, A>(alloc: &'static dyn Allocator, args: A) -> Result<Uptr<T>>
where
    T::Ref<true>: Construct<A>,
{
    make_ptr_base_in(alloc, args)
}

/// Builds a target that no handle will ever free.
///
/// The block stays allocated until the region itself goes away.
pub fn make_ref<T: Pointee, A>(args: A) -> Result<Ref<T>>
where
    T::Ref<false>: Construct<A>,
{
    make_ptr_base(args)
}

pub fn make_ref_in<T: Pointee, A>(alloc: &'static dyn Allocator, args: A) -> Result<Ref<T>>
where
    T::Ref<false>: Construct<A>,
{
    make_ptr_base_in(alloc, args)
}

/// Builds a non-owning target from two argument groups.
pub fn make_ref_piecewise<T: Pointee, A1, A2>(first: A1, second: A2) -> Result<Ref<T>>
where
    T::Ref<false>: Construct<Piecewise<A1, A2>>,
{
    make_piecewise(first, second)
}

/// Constructs a target inside `slot` and returns a reference to it.
///
/// The slot is typically a field of a structure already in the region.
///
/// # Safety
///
/// `slot` must lie in `alloc`'s region and outlive the reference.
pub unsafe fn make_ref_at<T: Pointee, A>(
    slot: &Archive<T>,
    alloc: &'static dyn Allocator,
    args: A,
) -> Result<Ref<T>>
where
    T::Ref<false>: Construct<A>,
{
    // SAFETY: upheld by the caller; a `Ref` never frees the slot.
    unsafe { Ref::new_at(slot, alloc, args) }
}

/// Constructs a target from two argument groups inside `slot` and returns a
/// reference to it.
///
/// # Safety
///
/// As for [`make_ref_at`].
pub unsafe fn make_ref_piecewise_at<T: Pointee, A1, A2>(
    slot: &Archive<T>,
    alloc: &'static dyn Allocator,
    first: A1,
    second: A2,
) -> Result<Ref<T>>
where
    T::Ref<false>: Construct<Piecewise<A1, A2>>,
{
    // SAFETY: upheld by the caller.
    unsafe { make_ref_at(slot, alloc, Piecewise::new(first, second)) }
}

/// Constructs a target inside `slot` and returns its unique owner.
///
/// # Safety
///
/// `slot` must be a block of its own, allocated from `alloc` with the
/// layout of `Archive<T>`, since dropping the owner frees it.
pub unsafe fn make_uptr_at<T: Pointee, A>(
    slot: &Archive<T>,
    alloc: &'static dyn Allocator,
    args: A,
) -> Result<Uptr<T>>
where
    T::Ref<true>: Construct<A>,
{
    // SAFETY: upheld by the caller.
    unsafe { Uptr::new_at(slot, alloc, args) }
}
