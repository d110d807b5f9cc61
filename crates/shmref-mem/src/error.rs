//! Error types for region allocation and allocator registration.

use crate::id::AllocatorId;
use std::fmt;

/// Errors raised by allocators and the allocator registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The region has no block large enough for the request.
    OutOfMemory {
        /// Bytes requested, after rounding to the block size class.
        requested: usize,
        /// Bytes left between the bump cursor and the end of the region.
        available: usize,
    },

    /// Alignment is zero, not a power of two, or larger than a page.
    InvalidAlignment {
        /// The requested alignment.
        alignment: usize,
    },

    /// The region cannot hold the allocator header.
    RegionTooSmall {
        /// Size of the offered region.
        size: usize,
        /// Smallest usable region size.
        minimum: usize,
    },

    /// The bytes being attached do not start with a region allocator header.
    InvalidRegion,

    /// The system allocator refused to back a region.
    RegionAllocationFailed {
        /// The requested region size.
        size: usize,
    },

    /// An allocator with this identity is already registered.
    AllocatorExists {
        /// The conflicting identity.
        id: AllocatorId,
    },

    /// No allocator with this identity is registered.
    AllocatorNotFound {
        /// The missing identity.
        id: AllocatorId,
    },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::OutOfMemory {
                requested,
                available,
            } => write!(
                f,
                "Region out of memory: requested {requested} bytes, available {available} bytes"
            ),
            Error::InvalidAlignment { alignment } => write!(
                f,
                "Invalid alignment: {alignment} is not a power of two no larger than a page"
            ),
            Error::RegionTooSmall { size, minimum } => write!(
                f,
                "Region too small: {size} bytes, need at least {minimum} bytes"
            ),
            Error::InvalidRegion => {
                write!(f, "Region does not contain a region allocator header")
            }
            Error::RegionAllocationFailed { size } => {
                write!(f, "Failed to allocate region of size {size} bytes")
            }
            Error::AllocatorExists { id } => {
                write!(f, "Allocator {id} is already registered")
            }
            Error::AllocatorNotFound { id } => {
                write!(f, "Allocator {id} is not registered")
            }
        }
    }
}

impl std::error::Error for Error {}

/// Result type for allocator and registry operations.
pub type Result<T> = std::result::Result<T, Error>;
