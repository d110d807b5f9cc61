//! Error types for the pointer layer.
//!
//! Allocation failures come from the allocator and are wrapped unchanged.
//! The remaining variants are raised while turning a descriptor back into a
//! live handle.

use shmref_mem::{AllocatorId, OffsetPointer};
use std::fmt;

/// Errors that can occur while constructing or resolving handles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The allocator failed to provide storage.
    Memory(shmref_mem::Error),

    /// The descriptor names an allocator this process has not registered.
    AllocatorNotFound {
        /// Identity carried by the descriptor.
        id: AllocatorId,
    },

    /// The descriptor is null.
    NullPointer,

    /// The descriptor's offset does not address a whole, aligned stored
    /// value inside its allocator's region.
    OffsetOutOfRange {
        /// Identity carried by the descriptor.
        id: AllocatorId,
        /// The offending offset.
        offset: OffsetPointer,
    },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Memory(err) => write!(f, "Allocation failed: {err}"),
            Error::AllocatorNotFound { id } => {
                write!(f, "Descriptor names unregistered allocator {id}")
            }
            Error::NullPointer => write!(f, "Cannot deserialize a null descriptor"),
            Error::OffsetOutOfRange { id, offset } => {
                write!(f, "Offset {offset} is not a valid location in allocator {id}")
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Memory(err) => Some(err),
            _ => None,
        }
    }
}

impl From<shmref_mem::Error> for Error {
    fn from(err: shmref_mem::Error) -> Self {
        Error::Memory(err)
    }
}

/// Result type for pointer operations.
pub type Result<T> = std::result::Result<T, Error>;
