//! Process-local lookup from allocator identity to allocator.
//!
//! Descriptors carry only an [`AllocatorId`]; the registry turns that back
//! into an allocator living in the current process. Registered allocators
//! are leaked so that handles can hold `&'static dyn Allocator`
//! back-references without tracking lifetimes. Unregistering removes the
//! name, not the memory: descriptors naming an unregistered allocator stop
//! resolving, and handles that already resolved it are out of contract.
//!
//! # Example
//!
//! ```
//! use shmref_mem::{AllocatorId, MemoryConfig, MemoryRegistry, RegionAllocator};
//!
//! let registry = MemoryRegistry::new(MemoryConfig::default());
//! let id = AllocatorId::new(12, 0);
//!
//! registry.register(RegionAllocator::new(id, 64 * 1024).unwrap()).unwrap();
//! assert_eq!(registry.resolve(id).unwrap().id(), id);
//! ```

use crate::allocator::Allocator;
use crate::config::MemoryConfig;
use crate::error::{Error, Result};
use crate::id::AllocatorId;
use crate::region_alloc::RegionAllocator;
use fxhash::FxBuildHasher;
use hashbrown::HashMap;
use shmref_log::{debug, info};
use std::sync::{OnceLock, RwLock};

type AllocatorMap = HashMap<AllocatorId, &'static dyn Allocator, FxBuildHasher>;

/// Registry of the allocators known to this process.
pub struct MemoryRegistry {
    allocators: RwLock<AllocatorMap>,
    default: RwLock<Option<&'static dyn Allocator>>,
    config: MemoryConfig,
}

impl MemoryRegistry {
    /// Creates an empty registry. The default allocator is created on first
    /// use from `config`.
    #[must_use]
    pub fn new(config: MemoryConfig) -> Self {
        Self {
            allocators: RwLock::new(HashMap::with_hasher(FxBuildHasher::default())),
            default: RwLock::new(None),
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    /// Takes ownership of `alloc` and registers it under its identity.
    pub fn register<A: Allocator + 'static>(&self, alloc: A) -> Result<&'static dyn Allocator> {
        let id = alloc.id();
        let mut allocators = self.write_map();
        if allocators.contains_key(&id) {
            return Err(Error::AllocatorExists { id });
        }

        let alloc: &'static dyn Allocator = Box::leak(Box::new(alloc));
        allocators.insert(id, alloc);
        info!("registered allocator {id}");
        Ok(alloc)
    }

    /// Registers an allocator that already lives for the whole program.
    pub fn register_static(&self, alloc: &'static dyn Allocator) -> Result<()> {
        let id = alloc.id();
        let mut allocators = self.write_map();
        if allocators.contains_key(&id) {
            return Err(Error::AllocatorExists { id });
        }
        allocators.insert(id, alloc);
        info!("registered allocator {id}");
        Ok(())
    }

    /// Removes `id`, clearing the default if it named the same allocator.
    pub fn unregister(&self, id: AllocatorId) -> Option<&'static dyn Allocator> {
        let removed = self.write_map().remove(&id)?;

        let mut default = self
            .default
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if default.is_some_and(|d| d.id() == id) {
            *default = None;
        }
        info!("unregistered allocator {id}");
        Some(removed)
    }

    /// Looks up `id`.
    #[must_use]
    pub fn get(&self, id: AllocatorId) -> Option<&'static dyn Allocator> {
        self.read_map().get(&id).copied()
    }

    /// Looks up `id`, failing with [`Error::AllocatorNotFound`].
    pub fn resolve(&self, id: AllocatorId) -> Result<&'static dyn Allocator> {
        self.get(id).ok_or_else(|| {
            debug!("descriptor names unknown allocator {id}");
            Error::AllocatorNotFound { id }
        })
    }

    /// Returns the default allocator, creating and registering it if needed.
    ///
    /// An allocator already registered under the configured default identity
    /// is adopted instead of creating a new region.
    pub fn default_allocator(&self) -> Result<&'static dyn Allocator> {
        if let Some(alloc) = *self.read_default() {
            return Ok(alloc);
        }

        let mut default = self
            .default
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(alloc) = *default {
            return Ok(alloc);
        }

        let id = self.config.default_allocator_id;
        let alloc = match self.get(id) {
            Some(existing) => existing,
            None => {
                let region = RegionAllocator::new(id, self.config.default_region_size)?;
                self.register(region)?
            }
        };
        *default = Some(alloc);
        Ok(alloc)
    }

    /// Makes the registered allocator `id` the default.
    pub fn set_default(&self, id: AllocatorId) -> Result<()> {
        let alloc = self.resolve(id)?;
        *self
            .default
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(alloc);
        info!("default allocator is now {id}");
        Ok(())
    }

    /// Finds the registered allocator whose region contains `ptr`.
    #[must_use]
    pub fn find_owner(&self, ptr: *const u8) -> Option<&'static dyn Allocator> {
        if ptr.is_null() {
            return None;
        }
        self.read_map().values().copied().find(|alloc| alloc.contains(ptr))
    }

    /// Identities of all registered allocators, in no particular order.
    #[must_use]
    pub fn ids(&self) -> Vec<AllocatorId> {
        self.read_map().keys().copied().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.read_map().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read_map().is_empty()
    }

    // A poisoned lock only means another thread panicked mid-lookup; the map
    // itself is never left half-updated.
    fn read_map(&self) -> std::sync::RwLockReadGuard<'_, AllocatorMap> {
        self.allocators
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn write_map(&self) -> std::sync::RwLockWriteGuard<'_, AllocatorMap> {
        self.allocators
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn read_default(&self) -> std::sync::RwLockReadGuard<'_, Option<&'static dyn Allocator>> {
        self.default
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl std::fmt::Debug for MemoryRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryRegistry")
            .field("allocators", &self.ids())
            .field("config", &self.config)
            .finish()
    }
}

static REGISTRY: OnceLock<MemoryRegistry> = OnceLock::new();

/// Returns the process-wide registry.
///
/// On first use the registry is configured from the environment
/// (`SHMREF_REGION_SIZE`) and the log level is read from `SHMREF_LOG`,
/// unless [`configure_memory_registry`] ran first.
pub fn memory_registry() -> &'static MemoryRegistry {
    REGISTRY.get_or_init(|| {
        shmref_log::init_from_env();
        MemoryRegistry::new(MemoryConfig::from_env())
    })
}

/// Installs `config` for the process-wide registry.
///
/// Returns `false` if the registry was already initialised, in which case
/// the existing configuration stays in effect.
pub fn configure_memory_registry(config: MemoryConfig) -> bool {
    let mut installed = false;
    REGISTRY.get_or_init(|| {
        installed = true;
        MemoryRegistry::new(config)
    });
    installed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::AllocatorExt;

    fn registry() -> MemoryRegistry {
        MemoryRegistry::new(
            MemoryConfig::default()
                .with_region_size(64 * 1024)
                .with_default_id(AllocatorId::new(0, 0)),
        )
    }

    #[test]
    fn test_register_and_resolve() {
        let registry = registry();
        let id = AllocatorId::new(5, 0);
        registry.register(RegionAllocator::new(id, 8192).unwrap()).unwrap();

        assert_eq!(registry.resolve(id).unwrap().id(), id);
        assert_eq!(registry.len(), 1);
        assert_eq!(
            registry.resolve(AllocatorId::new(6, 0)).unwrap_err(),
            Error::AllocatorNotFound {
                id: AllocatorId::new(6, 0)
            }
        );
    }

    #[test]
    fn test_duplicate_registration() {
        let registry = registry();
        let id = AllocatorId::new(5, 1);
        registry.register(RegionAllocator::new(id, 8192).unwrap()).unwrap();

        let again = registry.register(RegionAllocator::new(id, 8192).unwrap());
        assert_eq!(again.unwrap_err(), Error::AllocatorExists { id });
    }

    #[test]
    fn test_default_is_created_once() {
        let registry = registry();
        assert!(registry.is_empty());

        let a = registry.default_allocator().unwrap();
        let b = registry.default_allocator().unwrap();
        assert!(std::ptr::addr_eq(a, b));
        assert_eq!(a.id(), AllocatorId::new(0, 0));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_default_adopts_registered_identity() {
        let registry = registry();
        let existing = registry
            .register(RegionAllocator::new(AllocatorId::new(0, 0), 8192).unwrap())
            .unwrap();

        let default = registry.default_allocator().unwrap();
        assert!(std::ptr::addr_eq(existing, default));
    }

    #[test]
    fn test_set_default_and_unregister() {
        let registry = registry();
        let id = AllocatorId::new(8, 0);
        registry.register(RegionAllocator::new(id, 8192).unwrap()).unwrap();
        registry.set_default(id).unwrap();
        assert_eq!(registry.default_allocator().unwrap().id(), id);

        assert!(registry.unregister(id).is_some());
        assert!(registry.get(id).is_none());
        assert!(registry.unregister(id).is_none());

        // The default falls back to a freshly created one.
        assert_eq!(
            registry.default_allocator().unwrap().id(),
            AllocatorId::new(0, 0)
        );
    }

    #[test]
    fn test_find_owner() {
        let registry = registry();
        let a = registry
            .register(RegionAllocator::new(AllocatorId::new(1, 0), 8192).unwrap())
            .unwrap();
        let b = registry
            .register(RegionAllocator::new(AllocatorId::new(2, 0), 8192).unwrap())
            .unwrap();

        let (ptr, _) = b.allocate_construct(7u32).unwrap();
        let owner = registry.find_owner(ptr.as_ptr().cast::<u8>()).unwrap();
        assert_eq!(owner.id(), b.id());
        assert_ne!(owner.id(), a.id());

        let local = 0u8;
        assert!(registry.find_owner(&local).is_none());
        assert!(registry.find_owner(std::ptr::null()).is_none());
    }

    #[test]
    fn test_global_registry_singleton() {
        assert!(std::ptr::eq(memory_registry(), memory_registry()));
        // Already initialised above, so a late configuration is refused.
        assert!(!configure_memory_registry(MemoryConfig::default()));
    }
}
