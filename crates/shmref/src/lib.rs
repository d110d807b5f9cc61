//! Relocatable smart pointers for shared memory.
//!
//! Objects created through this crate live in allocator-managed regions that
//! several processes may map at different addresses. Handles work with local
//! addresses, and every handle can be reduced to a [`Pointer`] (allocator
//! identity plus offset) that any process can resolve back into a handle.
//!
//! - **Handles**: [`Uptr`] (unique owner), [`Mptr`] (shared, explicit
//!   destroy) and [`Ref`] (never frees), all instances of [`SmartPtr`]
//! - **Descriptors**: [`Pointer`] and [`AtomicPointer`]
//! - **Targets**: plain values ([`Plain`]) stored as-is, or self-describing
//!   types ([`ShmContainer`]) that manage their own region header
//! - **Factories**: [`make_uptr`], [`make_mptr`], [`make_ref`] and friends
//!
//! # Example
//!
//! ```
//! use shmref::{Uptr, make_uptr_in};
//! use shmref_mem::{AllocatorId, MemoryConfig, MemoryRegistry, RegionAllocator};
//!
//! let registry = MemoryRegistry::new(MemoryConfig::default());
//! let alloc = registry
//!     .register(RegionAllocator::new(AllocatorId::new(1, 0), 64 * 1024).unwrap())
//!     .unwrap();
//!
//! let value = make_uptr_in::<u32, _>(alloc, 7u32).unwrap();
//! let descriptor = value.to_pointer();
//!
//! // SAFETY: `value` keeps the target alive while `view` is used.
//! let view = unsafe { Uptr::<u32>::from_pointer_in(&registry, &descriptor) }.unwrap();
//! assert_eq!(*view, 7);
//! assert!(!view.is_owner());
//! ```

pub mod archive;
pub mod error;
pub mod factory;
pub mod pointee;
pub mod pointer;
pub mod reference;
pub mod smart_ptr;

pub use archive::{Archive, Deserialize};
pub use error::{Error, Result};
pub use factory::{
    MakePtr, make_mptr, make_mptr_in, make_piecewise, make_piecewise_in, make_ptr_base,
    make_ptr_base_in, make_ref, make_ref_at, make_ref_in, make_ref_piecewise, make_ref_piecewise_at,
    make_uptr, make_uptr_at, make_uptr_in,
};
pub use pointee::{Piecewise, Plain, Pointee, ShmContainer, ShmInit};
pub use pointer::{AtomicPointer, Descriptor, Pointer};
pub use reference::{Construct, ExternalRef, InlineRef, Reference};
pub use smart_ptr::{Mptr, Ref, SmartPtr, Uptr};
