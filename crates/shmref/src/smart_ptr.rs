//! Typed handles to objects in shared memory.
//!
//! [`SmartPtr`] is one handle type specialised along two axes:
//!
//! | alias     | `UNIQUE` | `DESTRUCTIBLE` | dropped while owning  | `destroy()` |
//! |-----------|----------|----------------|-----------------------|-------------|
//! | [`Uptr`]  | yes      | yes            | frees the target      | frees       |
//! | [`Mptr`]  | no       | yes            | leaves it             | frees       |
//! | [`Ref`]   | no       | no             | leaves it             | no-op       |
//!
//! Handles created by a factory own their target. Handles rebuilt from a
//! descriptor, archive or existing value never do, so a process that picks
//! up a pointer published by another one cannot free it by accident.
//!
//! Ownership moves with [`SmartPtr::assign_from`]: the destination takes
//! the source's target and owner flag, and the source is left detached. A
//! detached handle names nothing; it serializes to the null descriptor,
//! `destroy` on it does nothing and dereferencing it panics. Only [`Ref`]
//! handles are `Clone`.

use crate::archive::{Archive, Deserialize};
use crate::error::Result;
use crate::pointee::Pointee;
use crate::pointer::{AtomicPointer, Descriptor, Pointer};
use crate::reference::{Construct, Reference};
use fxhash::FxHasher;
use shmref_log::trace;
use shmref_mem::{Allocator, AllocatorId, MemoryRegistry, OffsetPointer, memory_registry};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::{Deref, DerefMut};

/// Handle to a `T` living in a region.
pub struct SmartPtr<T: Pointee, const UNIQUE: bool, const DESTRUCTIBLE: bool> {
    /// `None` once the target has been handed to another handle.
    obj: Option<T::Ref<DESTRUCTIBLE>>,
    owner: bool,
}

/// Shared handle; the target is freed only by an explicit
/// [`destroy`](SmartPtr::destroy).
pub type Mptr<T> = SmartPtr<T, false, true>;

/// Non-owning reference; never frees the target.
pub type Ref<T> = SmartPtr<T, false, false>;

/// Unique owner; frees the target when dropped.
pub type Uptr<T> = SmartPtr<T, true, true>;

impl<T: Pointee, const U: bool, const D: bool> SmartPtr<T, U, D> {
    fn with(obj: T::Ref<D>, owner: bool) -> Self {
        Self {
            obj: Some(obj),
            owner,
        }
    }

    fn target(&self) -> &T::Ref<D> {
        match &self.obj {
            Some(obj) => obj,
            None => panic!("dereferenced a detached handle"),
        }
    }

    /// Builds a target from `args` in the default allocator.
    pub fn new<A>(args: A) -> Result<Self>
    where
        T::Ref<D>: Construct<A>,
    {
        Self::new_in(memory_registry().default_allocator()?, args)
    }

    /// Builds a target from `args` in `alloc`.
    pub fn new_in<A>(alloc: &'static dyn Allocator, args: A) -> Result<Self>
    where
        T::Ref<D>: Construct<A>,
    {
        let mut obj = <T::Ref<D> as Reference>::empty();
        obj.init(alloc, args)?;
        Ok(Self::with(obj, true))
    }

    /// Builds a target from `args` inside `slot`.
    ///
    /// # Safety
    ///
    /// `slot` must lie in `alloc`'s region and outlive the handle. For
    /// destructible handles the slot must be a block of its own allocated
    /// from `alloc`, since destroying the handle frees it.
    pub unsafe fn new_at<A>(
        slot: &Archive<T>,
        alloc: &'static dyn Allocator,
        args: A,
    ) -> Result<Self>
    where
        T::Ref<D>: Construct<A>,
    {
        let mut obj = <T::Ref<D> as Reference>::empty();
        // SAFETY: upheld by the caller.
        unsafe { obj.init_at(slot, alloc, args)? };
        Ok(Self::with(obj, true))
    }

    /// Replaces the target with a new one built from `args` in the default
    /// allocator.
    pub fn init<A>(&mut self, args: A) -> Result<()>
    where
        T::Ref<D>: Construct<A>,
    {
        self.init_in(memory_registry().default_allocator()?, args)
    }

    /// Replaces the target with a new one built from `args` in `alloc`.
    ///
    /// The new target is built first; only then does a unique owner release
    /// its current one. On error the handle is left unchanged.
    pub fn init_in<A>(&mut self, alloc: &'static dyn Allocator, args: A) -> Result<()>
    where
        T::Ref<D>: Construct<A>,
    {
        let fresh = Self::new_in(alloc, args)?;
        self.replace(fresh);
        Ok(())
    }

    /// Replaces the target with a new one built from `args` inside `slot`.
    ///
    /// # Safety
    ///
    /// As for [`new_at`](Self::new_at).
    pub unsafe fn init_at<A>(
        &mut self,
        slot: &Archive<T>,
        alloc: &'static dyn Allocator,
        args: A,
    ) -> Result<()>
    where
        T::Ref<D>: Construct<A>,
    {
        // SAFETY: upheld by the caller.
        let fresh = unsafe { Self::new_at(slot, alloc, args)? };
        self.replace(fresh);
        Ok(())
    }

    /// Handle over a resolved location. Never owning.
    ///
    /// # Safety
    ///
    /// `ar` must name an initialised target that outlives the handle. For
    /// destructible handles, `destroy` frees the target, so no other handle
    /// may free it as well.
    #[must_use]
    pub unsafe fn from_deserialize(ar: Deserialize<T>) -> Self {
        let mut obj = <T::Ref<D> as Reference>::empty();
        obj.deserialize(ar);
        Self::with(obj, false)
    }

    /// Handle for the target `ptr` names, resolved through the process-wide
    /// registry. Never owning.
    ///
    /// # Safety
    ///
    /// As for [`from_deserialize`](Self::from_deserialize).
    pub unsafe fn from_pointer(ptr: &Pointer<T>) -> Result<Self> {
        // SAFETY: upheld by the caller.
        unsafe { Self::from_pointer_in(memory_registry(), ptr) }
    }

    /// Like [`from_pointer`](Self::from_pointer), reading the offset with
    /// `Acquire` ordering.
    ///
    /// # Safety
    ///
    /// As for [`from_deserialize`](Self::from_deserialize).
    pub unsafe fn from_atomic_pointer(ptr: &AtomicPointer<T>) -> Result<Self> {
        // SAFETY: upheld by the caller.
        unsafe { Self::from_pointer_in(memory_registry(), ptr) }
    }

    /// Handle for the target `ptr` names, resolved through `registry`.
    /// Never owning.
    ///
    /// # Safety
    ///
    /// As for [`from_deserialize`](Self::from_deserialize).
    pub unsafe fn from_pointer_in<P: Descriptor<T> + ?Sized>(
        registry: &MemoryRegistry,
        ptr: &P,
    ) -> Result<Self> {
        let ar = Deserialize::from_descriptor_in(registry, ptr)?;
        // SAFETY: upheld by the caller.
        Ok(unsafe { Self::from_deserialize(ar) })
    }

    /// Handle over an initialised archive slot. Never owning.
    ///
    /// # Safety
    ///
    /// `slot` must hold an initialised target allocated from `alloc` and
    /// outlive the handle.
    #[must_use]
    pub unsafe fn from_archive(slot: &Archive<T>, alloc: &'static dyn Allocator) -> Self {
        // SAFETY: upheld by the caller.
        unsafe { Self::from_deserialize(Deserialize::from_archive(slot, alloc)) }
    }

    /// Handle over an existing value. Never owning.
    ///
    /// For plain types the owning allocator is looked up by address; a
    /// value outside every registered region gets a handle that serializes
    /// to null.
    ///
    /// # Safety
    ///
    /// `value` must outlive the handle and must not be accessed through
    /// other paths while the handle mutates it.
    #[must_use]
    pub unsafe fn from_value(value: &mut T) -> Self {
        let mut obj = <T::Ref<D> as Reference>::empty();
        obj.deserialize_value(value);
        Self::with(obj, false)
    }

    /// Re-points this handle at the target `ar` resolves to, releasing a
    /// uniquely owned target first. The handle ends non-owning.
    ///
    /// # Safety
    ///
    /// As for [`from_deserialize`](Self::from_deserialize).
    pub unsafe fn deserialize(&mut self, ar: Deserialize<T>) {
        // SAFETY: upheld by the caller.
        let fresh = unsafe { Self::from_deserialize(ar) };
        self.replace(fresh);
    }

    /// Writes a descriptor for the target into `ptr`; null when detached.
    pub fn serialize<P: Descriptor<T> + ?Sized>(&self, ptr: &mut P) {
        match &self.obj {
            Some(obj) => obj.serialize(ptr),
            None => ptr.store(AllocatorId::null(), OffsetPointer::null()),
        }
    }

    /// Descriptor for the target; null if its allocator is unknown.
    #[must_use]
    pub fn to_pointer(&self) -> Pointer<T> {
        let mut ptr = Pointer::null();
        self.serialize(&mut ptr);
        ptr
    }

    /// Resolved location of the target, if it lives in a known region.
    #[must_use]
    pub fn archive(&self) -> Option<Deserialize<T>> {
        self.obj.as_ref()?.archive()
    }

    /// Non-owning reference to the same target.
    ///
    /// Returns `None` when the handle is detached or the target's allocator
    /// is unknown.
    ///
    /// # Safety
    ///
    /// The returned handle must not be used after the target is destroyed.
    #[must_use]
    pub unsafe fn to_ref(&self) -> Option<Ref<T>> {
        let ar = self.archive()?;
        // SAFETY: upheld by the caller.
        Some(unsafe { Ref::from_deserialize(ar) })
    }

    /// Moves `other`'s target and ownership into this handle.
    ///
    /// A target this handle uniquely owned is released first. `other` is
    /// left detached, so it can neither reach nor free the target again.
    pub fn assign_from(&mut self, other: &mut Self) {
        let taken = Self {
            obj: other.obj.take(),
            owner: std::mem::take(&mut other.owner),
        };
        self.replace(taken);
    }

    /// Releases the target.
    ///
    /// Frees it for destructible handles whether or not this handle owns
    /// it; a [`Ref`] is simply dropped, and so is a detached handle.
    pub fn destroy(mut self) {
        if let Some(mut obj) = self.obj.take() {
            // SAFETY: the handle is consumed, so the target is released once
            // through it.
            unsafe { obj.destroy() };
        }
        self.owner = false;
    }

    /// Whether the handle has given its target away.
    #[must_use]
    pub fn is_detached(&self) -> bool {
        self.obj.is_none()
    }

    /// Whether dropping this handle frees the target.
    #[must_use]
    pub fn is_owner(&self) -> bool {
        U && self.owner
    }

    /// Allocator that owns the target, if known.
    #[must_use]
    pub fn allocator(&self) -> Option<&'static dyn Allocator> {
        self.obj.as_ref()?.allocator()
    }

    /// Local address of the target; null when detached.
    #[must_use]
    pub fn get(&self) -> *const T {
        self.obj.as_ref().map_or(std::ptr::null(), |obj| obj.get())
    }

    #[must_use]
    pub fn get_mut(&mut self) -> *mut T {
        self.obj
            .as_mut()
            .map_or(std::ptr::null_mut(), |obj| obj.get_mut())
    }

    /// The target, unless the handle is detached.
    #[must_use]
    pub fn value(&self) -> Option<&T> {
        // SAFETY: an attached handle always names an initialised target.
        self.obj.as_ref().map(|obj| unsafe { &*obj.get() })
    }

    /// Hash of the target's value.
    #[must_use]
    pub fn hash_value(&self) -> u64
    where
        T: Hash,
    {
        let mut hasher = FxHasher::default();
        self.hash(&mut hasher);
        hasher.finish()
    }

    /// Releases a uniquely owned target and takes over `fresh`'s state.
    fn replace(&mut self, mut fresh: Self) {
        self.release();
        self.obj = fresh.obj.take();
        self.owner = std::mem::take(&mut fresh.owner);
    }

    fn release(&mut self) {
        if U && self.owner {
            if let Some(obj) = self.obj.as_mut() {
                // SAFETY: this handle is the unique owner of a live target.
                unsafe { obj.destroy() };
            }
        }
        self.owner = false;
    }
}

impl<T: Pointee, const U: bool, const D: bool> Drop for SmartPtr<T, U, D> {
    fn drop(&mut self) {
        if U && self.owner {
            trace!("dropping owning handle {:p}", self.get());
            self.release();
        }
    }
}

impl<T: Pointee, const U: bool, const D: bool> Deref for SmartPtr<T, U, D> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: an attached handle always names an initialised target.
        unsafe { &*self.target().get() }
    }
}

impl<T: Pointee, const U: bool, const D: bool> DerefMut for SmartPtr<T, U, D> {
    fn deref_mut(&mut self) -> &mut T {
        match self.obj.as_mut() {
            // SAFETY: as for `deref`.
            Some(obj) => unsafe { &mut *obj.get_mut() },
            None => panic!("dereferenced a detached handle"),
        }
    }
}

impl<T: Pointee> Clone for Ref<T> {
    fn clone(&self) -> Self {
        let obj = self.obj.as_ref().map(|other| {
            let mut obj = <T::Ref<false> as Reference>::empty();
            obj.strong_copy(other);
            obj
        });
        Self { obj, owner: false }
    }
}

impl<T: Pointee + Hash, const U: bool, const D: bool> Hash for SmartPtr<T, U, D> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.value().hash(state);
    }
}

impl<T: Pointee + PartialEq, const U: bool, const D: bool> PartialEq for SmartPtr<T, U, D> {
    fn eq(&self, other: &Self) -> bool {
        self.value() == other.value()
    }
}

impl<T: Pointee + Eq, const U: bool, const D: bool> Eq for SmartPtr<T, U, D> {}

impl<T: Pointee + fmt::Debug, const U: bool, const D: bool> fmt::Debug for SmartPtr<T, U, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmartPtr")
            .field("value", &self.value())
            .field("owner", &self.owner)
            .finish()
    }
}
