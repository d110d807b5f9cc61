//! Memory infrastructure for `shmref`.
//!
//! This crate provides the pieces the pointer layer consumes but does not
//! define itself:
//!
//! - **Identities and offsets**: [`AllocatorId`] and [`OffsetPointer`], the
//!   two halves of a process-independent address
//! - **The allocator capability**: the object-safe [`Allocator`] trait and
//!   its typed helpers in [`AllocatorExt`]
//! - **Regions**: [`Region`] byte ranges, owned or borrowed over a shared
//!   mapping, and [`RegionAllocator`], which keeps all of its state inside
//!   the region so other processes can attach to it
//! - **The registry**: [`MemoryRegistry`], resolving identities back to
//!   allocators in the current process, and the process-wide
//!   [`memory_registry`]
//!

pub mod allocator;
pub mod config;
pub mod error;
pub mod id;
pub mod region;
pub mod region_alloc;
pub mod registry;

pub use allocator::{AllocStats, Allocator, AllocatorExt};
pub use config::MemoryConfig;
pub use error::{Error, Result};
pub use id::{AllocatorId, OffsetPointer};
pub use region::Region;
pub use region_alloc::RegionAllocator;
pub use registry::{MemoryRegistry, configure_memory_registry, memory_registry};
