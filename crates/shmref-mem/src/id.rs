//! Allocator identities and region-relative offsets.
//!
//! Neither type contains a process-local address, so both can be stored in
//! shared memory and read back by any process that maps the same region.
//!
//! ```
//! use shmref_mem::{AllocatorId, OffsetPointer};
//!
//! let id = AllocatorId::new(2, 0);
//! assert_eq!(id.to_string(), "2.0");
//! assert!(AllocatorId::null().is_null());
//!
//! let off = OffsetPointer::new(0x80);
//! assert_eq!(off.get(), 0x80);
//! assert!(OffsetPointer::null().is_null());
//! ```

use std::fmt;

/// Identity of an allocator, stable across processes.
///
/// `major` usually names the backing region and `minor` distinguishes
/// allocators that share it. The all-ones value is the null identity.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AllocatorId {
    major: u32,
    minor: u32,
}

impl AllocatorId {
    /// Creates an identity from its two components.
    #[must_use]
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    /// The identity that names no allocator.
    #[must_use]
    pub const fn null() -> Self {
        Self {
            major: u32::MAX,
            minor: u32::MAX,
        }
    }

    /// Returns `true` for the null identity.
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.major == u32::MAX && self.minor == u32::MAX
    }

    #[must_use]
    pub const fn major(self) -> u32 {
        self.major
    }

    #[must_use]
    pub const fn minor(self) -> u32 {
        self.minor
    }

    /// Packs both components into one integer, `major` in the high half.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        ((self.major as u64) << 32) | self.minor as u64
    }
}

impl Default for AllocatorId {
    fn default() -> Self {
        Self::null()
    }
}

impl fmt::Display for AllocatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            f.write_str("null")
        } else {
            write!(f, "{}.{}", self.major, self.minor)
        }
    }
}

/// Byte distance from the start of a region.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OffsetPointer(u64);

impl OffsetPointer {
    const NULL: u64 = u64::MAX;

    #[must_use]
    pub const fn new(off: u64) -> Self {
        Self(off)
    }

    /// The offset that addresses nothing.
    #[must_use]
    pub const fn null() -> Self {
        Self(Self::NULL)
    }

    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == Self::NULL
    }

    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl Default for OffsetPointer {
    fn default() -> Self {
        Self::null()
    }
}

impl fmt::Display for OffsetPointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            f.write_str("null")
        } else {
            write!(f, "{:#x}", self.0)
        }
    }
}

impl From<u64> for OffsetPointer {
    fn from(off: u64) -> Self {
        Self(off)
    }
}
