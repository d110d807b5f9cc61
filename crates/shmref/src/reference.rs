//! The two in-process representations behind a smart pointer.
//!
//! [`ExternalRef`] serves plain types: it holds the local address of the
//! value and the allocator it came from. [`InlineRef`] serves
//! self-describing types: it holds the type's view inline and lets the type
//! manage its header.
//!
//! Both are parameterised by `DESTRUCTIBLE`. A non-destructible reference
//! never frees anything, whatever the handle around it asks for.

use crate::archive::{Archive, Deserialize};
use crate::error::Result;
use crate::pointee::{Plain, Pointee, ShmContainer, ShmInit};
use crate::pointer::Descriptor;
use shmref_log::{trace, warn};
use shmref_mem::{Allocator, AllocatorExt, AllocatorId, OffsetPointer, memory_registry};
use std::alloc::Layout;
use std::mem::MaybeUninit;
use std::ptr::NonNull;

/// Operations a handle performs on its representation.
pub trait Reference: Sized {
    type Target: Pointee;

    /// A reference to nothing. Only valid as a target for one of the
    /// initialising operations.
    fn empty() -> Self;

    /// Local address of the target.
    fn get(&self) -> *const Self::Target;

    fn get_mut(&mut self) -> *mut Self::Target;

    /// Allocator that owns the target, if known.
    fn allocator(&self) -> Option<&'static dyn Allocator>;

    /// Resolved location of the target, if it has one in a region.
    fn archive(&self) -> Option<Deserialize<Self::Target>>;

    /// Points at the same target as `other`.
    fn strong_copy(&mut self, other: &Self);

    /// Points at the target resolved in `ar`.
    fn deserialize(&mut self, ar: Deserialize<Self::Target>);

    /// Points at an existing value.
    fn deserialize_value(&mut self, value: &mut Self::Target);

    /// Writes a descriptor for the target into `ptr`, or null if the target
    /// cannot be named.
    fn serialize<P: Descriptor<Self::Target> + ?Sized>(&self, ptr: &mut P) {
        match self.archive() {
            Some(ar) => {
                let alloc = ar.allocator();
                ptr.store(alloc.id(), alloc.convert(ar.header().as_ptr()));
            }
            None => ptr.store(AllocatorId::null(), OffsetPointer::null()),
        }
    }

    /// Releases the target if this reference is destructible.
    ///
    /// # Safety
    ///
    /// The target must be live and must not be released again through this
    /// or any other reference.
    unsafe fn destroy(&mut self);
}

/// Construction of a reference's target from `A`.
pub trait Construct<A>: Reference {
    /// Allocates the target from `alloc` and builds it from `args`.
    fn init(&mut self, alloc: &'static dyn Allocator, args: A) -> Result<()>;

    /// Builds the target from `args` inside an existing slot.
    ///
    /// # Safety
    ///
    /// `slot` must lie in `alloc`'s region and outlive every use of this
    /// reference. A destructible reference built this way frees the slot
    /// on destroy, so the slot must then be a block of its own allocated
    /// from `alloc`.
    unsafe fn init_at(
        &mut self,
        slot: &Archive<Self::Target>,
        alloc: &'static dyn Allocator,
        args: A,
    ) -> Result<()>;
}

/// Reference to a plain value stored in a region.
pub struct ExternalRef<T, const DESTRUCTIBLE: bool> {
    obj: *mut T,
    alloc: Option<&'static dyn Allocator>,
}

// SAFETY: the reference is a pointer to a `T` plus a `Sync` allocator, so it
// may move between threads when a `&mut T` may.
unsafe impl<T: Send, const D: bool> Send for ExternalRef<T, D> {}
// SAFETY: shared access only hands out `*const T`.
unsafe impl<T: Sync, const D: bool> Sync for ExternalRef<T, D> {}

impl<T: Plain, const D: bool> Reference for ExternalRef<T, D> {
    type Target = T;

    fn empty() -> Self {
        Self {
            obj: std::ptr::null_mut(),
            alloc: None,
        }
    }

    fn get(&self) -> *const T {
        self.obj
    }

    fn get_mut(&mut self) -> *mut T {
        self.obj
    }

    fn allocator(&self) -> Option<&'static dyn Allocator> {
        self.alloc
    }

    fn archive(&self) -> Option<Deserialize<T>> {
        Some(Deserialize::new(NonNull::new(self.obj)?, self.alloc?))
    }

    fn strong_copy(&mut self, other: &Self) {
        self.obj = other.obj;
        self.alloc = other.alloc;
    }

    fn deserialize(&mut self, ar: Deserialize<T>) {
        self.obj = ar.header().as_ptr();
        self.alloc = Some(ar.allocator());
    }

    fn deserialize_value(&mut self, value: &mut T) {
        self.obj = value;
        self.alloc = memory_registry().find_owner(self.obj.cast::<u8>());
        if self.alloc.is_none() {
            trace!("{:p} is not in a registered region", self.obj);
        }
    }

    unsafe fn destroy(&mut self) {
        if !D {
            return;
        }
        match (NonNull::new(self.obj), self.alloc) {
            (Some(obj), Some(alloc)) => {
                trace!("freeing {obj:p} in allocator {}", alloc.id());
                // SAFETY: upheld by the caller; `obj` came from `alloc`.
                unsafe { alloc.free_ptr(obj) };
            }
            (Some(obj), None) => warn!("cannot free {obj:p}: owning allocator is unknown"),
            (None, _) => {}
        }
        self.obj = std::ptr::null_mut();
    }
}

impl<T: Plain, A: Into<T>, const D: bool> Construct<A> for ExternalRef<T, D> {
    fn init(&mut self, alloc: &'static dyn Allocator, args: A) -> Result<()> {
        let (obj, _) = alloc.allocate_construct(args.into())?;
        self.obj = obj.as_ptr();
        self.alloc = Some(alloc);
        Ok(())
    }

    unsafe fn init_at(
        &mut self,
        slot: &Archive<T>,
        alloc: &'static dyn Allocator,
        args: A,
    ) -> Result<()> {
        let obj = slot.as_ptr();
        // SAFETY: archive slots hold no live value until constructed into.
        unsafe { alloc.construct(obj, args.into()) };
        self.obj = obj.as_ptr();
        self.alloc = Some(alloc);
        Ok(())
    }
}

impl<T, const D: bool> std::fmt::Debug for ExternalRef<T, D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExternalRef")
            .field("obj", &self.obj)
            .field("allocator", &self.alloc.map(|a| a.id()))
            .finish()
    }
}

/// Reference holding a self-describing type's view inline.
pub struct InlineRef<T, const DESTRUCTIBLE: bool> {
    obj: MaybeUninit<T>,
}

impl<T: ShmContainer, const D: bool> InlineRef<T, D> {
    fn view(&self) -> &T {
        // SAFETY: handles only expose initialised references.
        unsafe { self.obj.assume_init_ref() }
    }

    fn set_view(&mut self, ar: Deserialize<T>) {
        self.obj.write(T::shm_deserialize(ar));
    }
}

impl<T: ShmContainer, const D: bool> Reference for InlineRef<T, D> {
    type Target = T;

    fn empty() -> Self {
        Self {
            obj: MaybeUninit::uninit(),
        }
    }

    fn get(&self) -> *const T {
        self.obj.as_ptr()
    }

    fn get_mut(&mut self) -> *mut T {
        self.obj.as_mut_ptr()
    }

    fn allocator(&self) -> Option<&'static dyn Allocator> {
        Some(self.view().shm_archive().allocator())
    }

    fn archive(&self) -> Option<Deserialize<T>> {
        Some(self.view().shm_archive())
    }

    fn strong_copy(&mut self, other: &Self) {
        self.set_view(other.view().shm_archive());
    }

    fn deserialize(&mut self, ar: Deserialize<T>) {
        self.set_view(ar);
    }

    fn deserialize_value(&mut self, value: &mut T) {
        self.set_view(value.shm_archive());
    }

    unsafe fn destroy(&mut self) {
        // SAFETY: handles only destroy initialised references.
        let view = unsafe { self.obj.assume_init_mut() };
        view.set_header_owned(D);
        view.shm_destroy();
    }
}

impl<T: ShmInit<A>, A, const D: bool> Construct<A> for InlineRef<T, D> {
    fn init(&mut self, alloc: &'static dyn Allocator, args: A) -> Result<()> {
        let layout = Layout::new::<T::Stored>();
        let (block, _) = alloc.allocate(layout)?;
        let header = block.cast::<T::Stored>();

        // SAFETY: the block is fresh, sized and aligned for the header.
        if let Err(err) = unsafe { T::shm_init(header, alloc, args) } {
            // SAFETY: allocated above with the same layout, never shared.
            unsafe { alloc.free(block, layout) };
            return Err(err);
        }
        self.set_view(Deserialize::new(header, alloc));
        Ok(())
    }

    unsafe fn init_at(
        &mut self,
        slot: &Archive<T>,
        alloc: &'static dyn Allocator,
        args: A,
    ) -> Result<()> {
        let header = slot.as_ptr();
        // SAFETY: archive slots hold no live header until constructed into.
        unsafe { T::shm_init(header, alloc, args)? };
        self.set_view(Deserialize::new(header, alloc));
        Ok(())
    }
}

impl<T, const D: bool> std::fmt::Debug for InlineRef<T, D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InlineRef").finish_non_exhaustive()
    }
}
