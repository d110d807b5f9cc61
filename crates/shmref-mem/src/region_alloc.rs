//! Size-class allocator whose entire state lives inside its region.
//!
//! The first bytes of the region hold a [`RegionHeader`]: magic, identity,
//! bump cursor, per-class free lists and counters. Everything after the
//! header is handed out in power-of-two blocks addressed by offset. Because
//! no process-local address is stored anywhere, a second process (or a copy
//! of the bytes at another base address) can [`attach`](RegionAllocator::attach)
//! and continue allocating and freeing where the first left off.
//!
//! # Layout
//!
//! ```text
//! 0                 DATA_START                                  capacity
//! +-----------------+------+----------+------+---------- ... ---+
//! | RegionHeader    | blk  | blk      | blk  |  unused          |
//! +-----------------+------+----------+------+---------- ... ---+
//!                                            ^ cursor
//! ```
//!
//! Blocks are naturally aligned to their size (capped at a page), so a
//! free block of a class can serve any request of that class. A freed block
//! stores the offset of the next free block of its class in its first eight
//! bytes.
//!
//! # Example
//!
//! ```
//! use shmref_mem::{AllocatorExt, AllocatorId, Allocator, RegionAllocator};
//!
//! let alloc = RegionAllocator::new(AllocatorId::new(1, 0), 64 * 1024).unwrap();
//! let (ptr, off) = alloc.allocate_construct(42u64).unwrap();
//!
//! assert_eq!(alloc.convert_offset::<u64>(off), ptr.as_ptr());
//! assert_eq!(unsafe { *ptr.as_ptr() }, 42);
//!
//! unsafe { alloc.free_ptr(ptr) };
//! assert_eq!(alloc.stats().live(), 0);
//! ```

use crate::allocator::{AllocStats, Allocator};
use crate::error::{Error, Result};
use crate::id::{AllocatorId, OffsetPointer};
use crate::region::{REGION_ALIGNMENT, Region};
use shmref_log::{info, trace, warn};
use std::alloc::Layout;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

const REGION_MAGIC: u64 = u64::from_le_bytes(*b"SHMREF01");

/// Smallest block handed out, as a power of two (16 bytes).
const MIN_CLASS_SHIFT: u32 = 4;

/// Number of size classes: 16 B up to 2 GiB.
const NUM_CLASSES: usize = 28;

/// Largest alignment a block is guaranteed to have.
const MAX_BLOCK_ALIGN: u64 = REGION_ALIGNMENT as u64;

/// Offset of the first block.
const DATA_START: u64 = round_up(size_of::<RegionHeader>() as u64, 64);

/// Smallest region that can hold the header and one minimal block.
pub const MIN_REGION_SIZE: usize = DATA_START as usize + (1 << MIN_CLASS_SHIFT);

const NIL: u64 = u64::MAX;

const fn round_up(value: u64, align: u64) -> u64 {
    (value + align - 1) & !(align - 1)
}

/// Allocator state stored at offset zero of the region.
#[repr(C)]
struct RegionHeader {
    magic: u64,
    id: AllocatorId,
    capacity: u64,
    /// Guards `cursor` and `free_heads`.
    lock: AtomicU32,
    _reserved: u32,
    cursor: AtomicU64,
    allocations: AtomicU64,
    frees: AtomicU64,
    bytes_in_use: AtomicU64,
    free_heads: [AtomicU64; NUM_CLASSES],
}

/// Releases the header spin lock on drop.
struct HeaderGuard<'a> {
    lock: &'a AtomicU32,
}

impl Drop for HeaderGuard<'_> {
    fn drop(&mut self) {
        self.lock.store(0, Ordering::Release);
    }
}

impl RegionHeader {
    fn lock(&self) -> HeaderGuard<'_> {
        while self
            .lock
            .compare_exchange_weak(0, 1, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            std::hint::spin_loop();
        }
        HeaderGuard { lock: &self.lock }
    }
}

/// Block size and class index for a layout.
fn size_class(layout: Layout) -> Result<(u64, usize)> {
    let align = layout.align() as u64;
    if align > MAX_BLOCK_ALIGN {
        return Err(Error::InvalidAlignment {
            alignment: layout.align(),
        });
    }

    let size = (layout.size() as u64)
        .max(align)
        .max(1 << MIN_CLASS_SHIFT)
        .next_power_of_two();
    let class = (size.trailing_zeros() - MIN_CLASS_SHIFT) as usize;
    Ok((size, class))
}

/// Allocator over a single [`Region`], shareable across processes.
pub struct RegionAllocator {
    region: Region,
    header: NonNull<RegionHeader>,
}

// SAFETY: all mutable header state is atomic or guarded by the header lock.
unsafe impl Send for RegionAllocator {}
unsafe impl Sync for RegionAllocator {}

impl RegionAllocator {
    /// Allocates a fresh owned region of `len` bytes and formats it.
    pub fn new(id: AllocatorId, len: usize) -> Result<Self> {
        Self::create(id, Region::new(len)?)
    }

    /// Formats `region` as a new allocator, discarding whatever it held.
    pub fn create(id: AllocatorId, region: Region) -> Result<Self> {
        Self::check_region(&region)?;

        let header = region.base().cast::<RegionHeader>();
        // SAFETY: the region is large enough and page aligned (checked
        // above); no one else can be using it while it is being formatted.
        unsafe {
            header.as_ptr().write(RegionHeader {
                magic: REGION_MAGIC,
                id,
                capacity: region.len() as u64,
                lock: AtomicU32::new(0),
                _reserved: 0,
                cursor: AtomicU64::new(DATA_START),
                allocations: AtomicU64::new(0),
                frees: AtomicU64::new(0),
                bytes_in_use: AtomicU64::new(0),
                free_heads: std::array::from_fn(|_| AtomicU64::new(NIL)),
            });
        }

        info!("created region allocator {id} over {} bytes", region.len());
        Ok(RegionAllocator { region, header })
    }

    /// Attaches to a region previously formatted by [`create`](Self::create),
    /// possibly by another process and at another base address.
    pub fn attach(region: Region) -> Result<Self> {
        Self::check_region(&region)?;

        let header = region.base().cast::<RegionHeader>();
        // SAFETY: the region holds at least a header's worth of bytes.
        let (magic, capacity, id) = unsafe {
            let h = header.as_ref();
            (h.magic, h.capacity, h.id)
        };
        if magic != REGION_MAGIC || capacity != region.len() as u64 {
            return Err(Error::InvalidRegion);
        }

        info!("attached region allocator {id} at {:p}", region.base());
        Ok(RegionAllocator { region, header })
    }

    fn check_region(region: &Region) -> Result<()> {
        if region.len() < MIN_REGION_SIZE {
            return Err(Error::RegionTooSmall {
                size: region.len(),
                minimum: MIN_REGION_SIZE,
            });
        }
        if region.base().as_ptr().addr() % REGION_ALIGNMENT != 0 {
            return Err(Error::InvalidAlignment {
                alignment: REGION_ALIGNMENT,
            });
        }
        Ok(())
    }

    fn header(&self) -> &RegionHeader {
        // SAFETY: the header was written by `create` (possibly in another
        // process) and lives as long as the region.
        unsafe { self.header.as_ref() }
    }

    /// The region this allocator manages.
    #[must_use]
    pub fn region(&self) -> &Region {
        &self.region
    }

    /// Bytes between the bump cursor and the end of the region.
    #[must_use]
    pub fn remaining(&self) -> usize {
        let header = self.header();
        (header.capacity - header.cursor.load(Ordering::Relaxed)) as usize
    }

    /// Local address of the block at `off`.
    fn block(&self, off: u64) -> *mut u8 {
        self.region.base().as_ptr().wrapping_add(off as usize)
    }
}

impl Allocator for RegionAllocator {
    fn id(&self) -> AllocatorId {
        self.header().id
    }

    fn allocate(&self, layout: Layout) -> Result<(NonNull<u8>, OffsetPointer)> {
        let (size, class) = size_class(layout)?;
        let header = self.header();
        if class >= NUM_CLASSES {
            return Err(Error::OutOfMemory {
                requested: size as usize,
                available: self.remaining(),
            });
        }

        let off = {
            let _guard = header.lock();
            let head = header.free_heads[class].load(Ordering::Relaxed);
            if head != NIL {
                // SAFETY: free blocks store the next free offset in their
                // first eight bytes; blocks are at least 16 bytes and aligned.
                let next = unsafe { self.block(head).cast::<u64>().read() };
                header.free_heads[class].store(next, Ordering::Relaxed);
                head
            } else {
                let cursor = header.cursor.load(Ordering::Relaxed);
                let start = round_up(cursor, size.min(MAX_BLOCK_ALIGN));
                let end = start.saturating_add(size);
                if end > header.capacity {
                    drop(_guard);
                    warn!(
                        "allocator {} exhausted: {size} bytes requested, {} free",
                        header.id,
                        header.capacity - cursor
                    );
                    return Err(Error::OutOfMemory {
                        requested: size as usize,
                        available: (header.capacity - cursor) as usize,
                    });
                }
                header.cursor.store(end, Ordering::Relaxed);
                start
            }
        };

        header.allocations.fetch_add(1, Ordering::Relaxed);
        header.bytes_in_use.fetch_add(size, Ordering::Relaxed);
        trace!("allocator {}: {size} byte block at {off:#x}", header.id);

        // SAFETY: off is DATA_START or later and inside the region.
        let ptr = unsafe { NonNull::new_unchecked(self.block(off)) };
        Ok((ptr, OffsetPointer::new(off)))
    }

    unsafe fn free(&self, ptr: NonNull<u8>, layout: Layout) {
        let Ok((size, class)) = size_class(layout) else {
            warn!("free with unsupported layout {layout:?} ignored");
            return;
        };
        let header = self.header();
        let off = self.to_offset(ptr.as_ptr());
        if off.is_null() {
            warn!("allocator {}: free of foreign pointer {ptr:p} ignored", header.id);
            return;
        }

        {
            let _guard = header.lock();
            let head = header.free_heads[class].load(Ordering::Relaxed);
            // SAFETY: the caller hands back a block of this class that no
            // one else is using.
            unsafe { ptr.as_ptr().cast::<u64>().write(head) };
            header.free_heads[class].store(off.get(), Ordering::Relaxed);
        }

        header.frees.fetch_add(1, Ordering::Relaxed);
        header.bytes_in_use.fetch_sub(size, Ordering::Relaxed);
        trace!("allocator {}: freed {size} byte block at {off}", header.id);
    }

    fn to_offset(&self, ptr: *const u8) -> OffsetPointer {
        if ptr.is_null() || !self.region.contains(ptr) {
            return OffsetPointer::null();
        }
        let off = ptr.addr() - self.region.base().as_ptr().addr();
        OffsetPointer::new(off as u64)
    }

    fn to_ptr(&self, off: OffsetPointer) -> *mut u8 {
        if off.is_null() || off.get() >= self.region.len() as u64 {
            return std::ptr::null_mut();
        }
        self.block(off.get())
    }

    fn contains(&self, ptr: *const u8) -> bool {
        self.region.contains(ptr)
    }

    fn stats(&self) -> AllocStats {
        let header = self.header();
        AllocStats {
            allocations: header.allocations.load(Ordering::Relaxed) as usize,
            frees: header.frees.load(Ordering::Relaxed) as usize,
            bytes_in_use: header.bytes_in_use.load(Ordering::Relaxed) as usize,
            capacity: header.capacity as usize,
        }
    }
}

impl std::fmt::Debug for RegionAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegionAllocator")
            .field("id", &self.id())
            .field("region", &self.region)
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::AllocatorExt;

    fn allocator(len: usize) -> RegionAllocator {
        RegionAllocator::new(AllocatorId::new(9, 0), len).unwrap()
    }

    #[test]
    fn test_size_classes() {
        assert_eq!(size_class(Layout::new::<u8>()).unwrap(), (16, 0));
        assert_eq!(size_class(Layout::new::<[u8; 17]>()).unwrap(), (32, 1));
        assert_eq!(size_class(Layout::new::<[u64; 8]>()).unwrap(), (64, 2));
        assert_eq!(
            size_class(Layout::from_size_align(8, 256).unwrap()).unwrap(),
            (256, 4)
        );
        assert!(matches!(
            size_class(Layout::from_size_align(8, 8192).unwrap()),
            Err(Error::InvalidAlignment { alignment: 8192 })
        ));
    }

    #[test]
    fn test_allocate_and_convert() {
        let alloc = allocator(16 * 1024);

        let (a, off_a) = alloc.allocate_construct(1u32).unwrap();
        let (b, off_b) = alloc.allocate_construct(2u64).unwrap();

        assert_ne!(off_a, off_b);
        assert!(off_a.get() >= DATA_START);
        assert_eq!(alloc.convert(a.as_ptr()), off_a);
        assert_eq!(alloc.convert_offset::<u64>(off_b), b.as_ptr());
        unsafe {
            assert_eq!(*a.as_ptr(), 1);
            assert_eq!(*b.as_ptr(), 2);
        }
    }

    #[test]
    fn test_blocks_are_aligned() {
        let alloc = allocator(64 * 1024);
        for align in [1usize, 8, 64, 512, 4096] {
            let layout = Layout::from_size_align(24, align).unwrap();
            let (ptr, _) = alloc.allocate(layout).unwrap();
            assert_eq!(ptr.as_ptr().addr() % align, 0);
        }
    }

    #[test]
    fn test_free_list_reuse() {
        let alloc = allocator(16 * 1024);

        let (first, off) = alloc.allocate_construct([0u8; 40]).unwrap();
        unsafe { alloc.free_ptr(first) };

        let (_, again) = alloc.allocate_construct([1u8; 60]).unwrap();
        assert_eq!(again, off, "same class must reuse the freed block");

        let stats = alloc.stats();
        assert_eq!(stats.allocations, 2);
        assert_eq!(stats.frees, 1);
        assert_eq!(stats.bytes_in_use, 64);
    }

    #[test]
    fn test_exhaustion() {
        let alloc = allocator(MIN_REGION_SIZE + 64);

        assert!(alloc.allocate(Layout::new::<[u8; 64]>()).is_ok());
        let err = alloc.allocate(Layout::new::<[u8; 64]>()).unwrap_err();
        assert!(matches!(err, Error::OutOfMemory { requested: 64, .. }));
    }

    #[test]
    fn test_region_too_small() {
        let region = Region::new(64).unwrap();
        assert!(matches!(
            RegionAllocator::create(AllocatorId::new(1, 1), region),
            Err(Error::RegionTooSmall { size: 64, .. })
        ));
    }

    #[test]
    fn test_foreign_addresses() {
        let alloc = allocator(8192);
        let local = 5u32;

        assert!(alloc.to_offset(&local as *const u32 as *const u8).is_null());
        assert!(alloc.to_offset(std::ptr::null()).is_null());
        assert!(alloc.to_ptr(OffsetPointer::null()).is_null());
        assert!(alloc.to_ptr(OffsetPointer::new(1 << 40)).is_null());
    }

    #[test]
    fn test_resolve_checks_extent_and_alignment() {
        let alloc = allocator(8192);
        let (ptr, off) = alloc.allocate_construct(3u64).unwrap();
        assert_eq!(alloc.resolve_offset::<u64>(off), Some(ptr));

        let last = OffsetPointer::new(8192 - 1);
        assert!(alloc.resolve_offset::<u8>(last).is_some());
        assert!(alloc.resolve_offset::<u64>(last).is_none());

        let tail = OffsetPointer::new(8192 - 8);
        assert!(alloc.resolve_offset::<u64>(tail).is_some());
        assert!(alloc.resolve_offset::<[u64; 2]>(tail).is_none());

        let odd = OffsetPointer::new(off.get() + 1);
        assert!(alloc.resolve_offset::<u64>(odd).is_none());
    }

    #[test]
    fn test_attach_copy_at_new_base() {
        let alloc = allocator(16 * 1024);
        let (_, off) = alloc.allocate_construct(0xDEAD_BEEFu64).unwrap();

        let copy = Region::copy_of(unsafe { alloc.region().as_bytes() }).unwrap();
        let attached = RegionAllocator::attach(copy).unwrap();

        assert_eq!(attached.id(), alloc.id());
        assert_ne!(attached.to_ptr(off), alloc.to_ptr(off));
        assert_eq!(
            unsafe { *attached.convert_offset::<u64>(off) },
            0xDEAD_BEEF
        );

        // The copy continues from the same cursor rather than reformatting.
        let (_, next) = attached.allocate_construct(1u64).unwrap();
        assert_ne!(next, off);
        assert_eq!(attached.stats().allocations, 2);
    }

    #[test]
    fn test_attach_rejects_unformatted() {
        let region = Region::new(8192).unwrap();
        assert_eq!(
            RegionAllocator::attach(region).unwrap_err(),
            Error::InvalidRegion
        );
    }

    #[test]
    fn test_concurrent_allocation() {
        use std::sync::Arc;
        use std::thread;

        let alloc = Arc::new(allocator(256 * 1024));
        let handles: Vec<_> = (0..8u64)
            .map(|t| {
                let alloc = Arc::clone(&alloc);
                thread::spawn(move || {
                    (0..100u64)
                        .map(|i| alloc.allocate_construct(t * 1000 + i).unwrap())
                        .map(|(ptr, off)| (unsafe { *ptr.as_ptr() }, off))
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut offsets = Vec::new();
        for (t, handle) in handles.into_iter().enumerate() {
            for (i, (value, off)) in handle.join().unwrap().into_iter().enumerate() {
                assert_eq!(value, t as u64 * 1000 + i as u64);
                offsets.push(off);
            }
        }
        offsets.sort();
        offsets.dedup();
        assert_eq!(offsets.len(), 800);
    }
}
