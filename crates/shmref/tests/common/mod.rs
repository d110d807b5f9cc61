// Common test utilities for integration tests
//
// Provides fresh allocators with unique identities and `ShmList`, a small
// self-describing container used to exercise the inline representation.

#![allow(dead_code)]

use shmref::{Deserialize, InlineRef, Piecewise, Pointee, ShmContainer, ShmInit};
use shmref_mem::{
    Allocator, AllocatorExt, AllocatorId, OffsetPointer, RegionAllocator, memory_registry,
    region_alloc::MIN_REGION_SIZE,
};
use std::alloc::Layout;
use std::marker::PhantomData;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU32, Ordering};

static NEXT_ID: AtomicU32 = AtomicU32::new(1000);

pub const REGION_SIZE: usize = 256 * 1024;

/// Allocator identity no other test in this binary uses.
pub fn fresh_id() -> AllocatorId {
    AllocatorId::new(NEXT_ID.fetch_add(1, Ordering::SeqCst), 0)
}

/// Creates an allocator and registers it with the process-wide registry.
pub fn fresh_allocator() -> &'static dyn Allocator {
    memory_registry()
        .register(RegionAllocator::new(fresh_id(), REGION_SIZE).unwrap())
        .unwrap()
}

/// Registered allocator with no room left for blocks over 16 bytes.
pub fn exhausted_allocator() -> &'static dyn Allocator {
    let alloc = memory_registry()
        .register(RegionAllocator::new(fresh_id(), MIN_REGION_SIZE + 64).unwrap())
        .unwrap();
    alloc.allocate(Layout::new::<[u8; 64]>()).unwrap();
    alloc
}

/// Like [`fresh_allocator`], keeping the concrete type so tests can reach
/// the region bytes.
pub fn fresh_region_allocator() -> &'static RegionAllocator {
    let alloc: &'static RegionAllocator =
        Box::leak(Box::new(RegionAllocator::new(fresh_id(), REGION_SIZE).unwrap()));
    memory_registry().register_static(alloc).unwrap();
    alloc
}

/// Region header of a [`ShmList`].
#[repr(C)]
pub struct ListHeader {
    len: u64,
    cap: u64,
    data: OffsetPointer,
}

/// Growable array of `E` whose header and elements live in a region.
pub struct ShmList<E> {
    header: NonNull<ListHeader>,
    alloc: &'static dyn Allocator,
    owned: bool,
    _marker: PhantomData<E>,
}

impl<E: Copy> ShmList<E> {
    fn header(&self) -> &ListHeader {
        // SAFETY: views are only built over initialised headers.
        unsafe { self.header.as_ref() }
    }

    fn data(&self) -> *mut E {
        self.alloc.convert_offset::<E>(self.header().data)
    }

    pub fn len(&self) -> usize {
        self.header().len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn item(&self, index: usize) -> Option<E> {
        if index >= self.len() {
            return None;
        }
        // SAFETY: index is below len, and len elements are initialised.
        Some(unsafe { self.data().add(index).read() })
    }

    pub fn to_vec(&self) -> Vec<E> {
        (0..self.len()).filter_map(|i| self.item(i)).collect()
    }

    pub fn push(&mut self, value: E) -> shmref::Result<()> {
        // SAFETY: see `header`; the view is the only writer in these tests.
        let header = unsafe { self.header.as_mut() };
        if header.len == header.cap {
            Self::grow(header, self.alloc)?;
        }
        let data = self.alloc.convert_offset::<E>(header.data);
        // SAFETY: len < cap after growing.
        unsafe { data.add(header.len as usize).write(value) };
        header.len += 1;
        Ok(())
    }

    fn grow(header: &mut ListHeader, alloc: &'static dyn Allocator) -> shmref::Result<()> {
        let cap = (header.cap * 2).max(4);
        let (block, off) = alloc.allocate(Layout::array::<E>(cap as usize).unwrap())?;
        if !header.data.is_null() {
            let old = alloc.convert_offset::<E>(header.data);
            // SAFETY: the old block holds len initialised elements and does
            // not overlap the new one.
            unsafe {
                std::ptr::copy_nonoverlapping(old, block.as_ptr().cast::<E>(), header.len as usize);
                Self::free_data(alloc, header.data, header.cap);
            }
        }
        header.data = off;
        header.cap = cap;
        Ok(())
    }

    unsafe fn free_data(alloc: &'static dyn Allocator, data: OffsetPointer, cap: u64) {
        if let Some(ptr) = NonNull::new(alloc.to_ptr(data)) {
            // SAFETY: data blocks are allocated with exactly this layout.
            unsafe { alloc.free(ptr, Layout::array::<E>(cap as usize).unwrap()) };
        }
    }
}

impl<E: Copy> Pointee for ShmList<E> {
    type Stored = ListHeader;
    type Ref<const DESTRUCTIBLE: bool> = InlineRef<Self, DESTRUCTIBLE>;
}

impl<E: Copy> ShmContainer for ShmList<E> {
    fn shm_deserialize(ar: Deserialize<Self>) -> Self {
        Self {
            header: ar.header(),
            alloc: ar.allocator(),
            owned: false,
            _marker: PhantomData,
        }
    }

    fn shm_archive(&self) -> Deserialize<Self> {
        Deserialize::new(self.header, self.alloc)
    }

    fn set_header_owned(&mut self, owned: bool) {
        self.owned = owned;
    }

    fn shm_destroy(&mut self) {
        if !self.owned {
            return;
        }
        let (data, cap) = (self.header().data, self.header().cap);
        // SAFETY: an owned header and its data block are released once.
        unsafe {
            Self::free_data(self.alloc, data, cap);
            self.alloc.free(self.header.cast(), Layout::new::<ListHeader>());
        }
        self.owned = false;
    }
}

impl<E: Copy> ShmInit<()> for ShmList<E> {
    unsafe fn shm_init(
        header: NonNull<ListHeader>,
        _alloc: &'static dyn Allocator,
        _args: (),
    ) -> shmref::Result<()> {
        // SAFETY: upheld by the caller.
        unsafe {
            header.as_ptr().write(ListHeader {
                len: 0,
                cap: 0,
                data: OffsetPointer::null(),
            })
        };
        Ok(())
    }
}

impl<E: Copy> ShmInit<Vec<E>> for ShmList<E> {
    unsafe fn shm_init(
        header: NonNull<ListHeader>,
        alloc: &'static dyn Allocator,
        args: Vec<E>,
    ) -> shmref::Result<()> {
        let args = Piecewise::new(args, Vec::new());
        // SAFETY: upheld by the caller.
        unsafe { <Self as ShmInit<Piecewise<Vec<E>, Vec<E>>>>::shm_init(header, alloc, args) }
    }
}

impl<E: Copy> ShmInit<Piecewise<Vec<E>, Vec<E>>> for ShmList<E> {
    unsafe fn shm_init(
        header: NonNull<ListHeader>,
        alloc: &'static dyn Allocator,
        args: Piecewise<Vec<E>, Vec<E>>,
    ) -> shmref::Result<()> {
        // SAFETY: upheld by the caller.
        unsafe { <Self as ShmInit<()>>::shm_init(header, alloc, ())? };

        let mut list = Self::shm_deserialize(Deserialize::new(header, alloc));
        let (first, second) = args.into_parts();
        for value in first.into_iter().chain(second) {
            if let Err(err) = list.push(value) {
                let (data, cap) = (list.header().data, list.header().cap);
                // SAFETY: the data block was allocated by `push` above.
                unsafe { Self::free_data(alloc, data, cap) };
                return Err(err);
            }
        }
        Ok(())
    }
}
