//! Contiguous memory regions that allocators carve objects out of.
//!
//! A [`Region`] is either owned (backed by the system allocator, freed on
//! drop) or borrowed over memory someone else mapped, such as a shared
//! memory segment. Allocators only ever see the base address and length, so
//! the same bytes can be attached at different base addresses in different
//! processes.

use crate::error::{Error, Result};
use std::alloc::{self, Layout};
use std::ptr::NonNull;

/// Alignment of owned region bases.
pub const REGION_ALIGNMENT: usize = 4096;

/// A contiguous block of bytes.
pub struct Region {
    base: NonNull<u8>,
    len: usize,
    /// Set when this region allocated `base` and must free it.
    owned: bool,
}

// SAFETY: a Region is a plain byte range; synchronisation of its contents is
// the job of whoever allocates from it.
unsafe impl Send for Region {}
unsafe impl Sync for Region {}

impl Region {
    /// Allocates a zeroed, page-aligned region of `len` bytes.
    pub fn new(len: usize) -> Result<Self> {
        if len == 0 {
            return Err(Error::RegionTooSmall { size: 0, minimum: 1 });
        }
        let layout = Layout::from_size_align(len, REGION_ALIGNMENT)
            .map_err(|_| Error::RegionAllocationFailed { size: len })?;

        // SAFETY: layout has a non-zero size (checked above).
        let base = unsafe { alloc::alloc_zeroed(layout) };
        let base = NonNull::new(base).ok_or(Error::RegionAllocationFailed { size: len })?;

        Ok(Region {
            base,
            len,
            owned: true,
        })
    }

    /// Wraps memory that outlives the region, typically a shared mapping.
    ///
    /// # Safety
    ///
    /// `base` must be valid for reads and writes of `len` bytes for as long
    /// as the region, and anything allocated from it, is in use. Region
    /// allocators additionally require `base` to be aligned to
    /// [`REGION_ALIGNMENT`], which any page-granular mapping satisfies.
    #[must_use]
    pub unsafe fn from_raw_parts(base: NonNull<u8>, len: usize) -> Self {
        Region {
            base,
            len,
            owned: false,
        }
    }

    /// Allocates a new owned region holding a copy of `bytes`.
    ///
    /// The copy lives at a different base address than the source, which is
    /// how tests stand in for a second process mapping the same segment.
    pub fn copy_of(bytes: &[u8]) -> Result<Self> {
        let region = Region::new(bytes.len())?;
        // SAFETY: the new region is exactly bytes.len() long and cannot
        // overlap a live slice.
        unsafe {
            std::ptr::copy_nonoverlapping(
                bytes.as_ptr(),
                region.base.as_ptr(),
                bytes.len(),
            );
        }
        Ok(region)
    }

    #[must_use]
    pub fn base(&self) -> NonNull<u8> {
        self.base
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns `true` if `ptr` points inside this region.
    #[must_use]
    pub fn contains(&self, ptr: *const u8) -> bool {
        let start = self.base.as_ptr().addr();
        let addr = ptr.addr();
        addr >= start && addr < start + self.len
    }

    /// Views the whole region as bytes.
    ///
    /// # Safety
    ///
    /// No other thread or process may be writing to the region while the
    /// returned slice is alive.
    #[must_use]
    pub unsafe fn as_bytes(&self) -> &[u8] {
        // SAFETY: base is valid for len bytes; the caller excludes writers.
        unsafe { std::slice::from_raw_parts(self.base.as_ptr(), self.len) }
    }
}

impl Drop for Region {
    fn drop(&mut self) {
        if !self.owned {
            return;
        }
        // SAFETY: owned regions were allocated in `new` with this layout.
        unsafe {
            let layout = Layout::from_size_align_unchecked(self.len, REGION_ALIGNMENT);
            alloc::dealloc(self.base.as_ptr(), layout);
        }
    }
}

impl std::fmt::Debug for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Region")
            .field("base", &self.base)
            .field("len", &self.len)
            .field("owned", &self.owned)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_is_zeroed_and_aligned() {
        let region = Region::new(8192).unwrap();
        assert_eq!(region.len(), 8192);
        assert_eq!(region.base().as_ptr().addr() % REGION_ALIGNMENT, 0);

        let bytes = unsafe { region.as_bytes() };
        assert!(bytes.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_region_contains() {
        let region = Region::new(4096).unwrap();
        let base = region.base().as_ptr();

        assert!(region.contains(base));
        assert!(region.contains(base.wrapping_add(4095)));
        assert!(!region.contains(base.wrapping_add(4096)));
        assert!(!region.contains(std::ptr::null()));
    }

    #[test]
    fn test_region_copy_has_new_base() {
        let region = Region::new(4096).unwrap();
        unsafe { region.base().as_ptr().add(10).write(0xAB) };

        let copy = Region::copy_of(unsafe { region.as_bytes() }).unwrap();
        assert_ne!(copy.base(), region.base());
        assert_eq!(unsafe { copy.as_bytes() }[10], 0xAB);
    }

    #[test]
    fn test_region_zero_len_rejected() {
        assert!(matches!(Region::new(0), Err(Error::RegionTooSmall { .. })));
    }

    #[test]
    fn test_borrowed_region_does_not_free() {
        let owner = Region::new(4096).unwrap();
        let borrowed = unsafe { Region::from_raw_parts(owner.base(), owner.len()) };
        drop(borrowed);

        // Still writable: the borrowed view did not release the memory.
        unsafe { owner.base().as_ptr().write(1) };
        assert_eq!(unsafe { owner.as_bytes() }[0], 1);
    }
}
