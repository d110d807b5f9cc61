//! Configuration for the process-wide allocator registry.
//!
//! The registry creates its default allocator lazily, the first time a
//! handle is built without an explicit allocator. [`MemoryConfig`] controls
//! the identity and size of that allocator.
//!
//! ```
//! use shmref_mem::{AllocatorId, MemoryConfig};
//!
//! let config = MemoryConfig::default()
//!     .with_region_size(1 << 20)
//!     .with_default_id(AllocatorId::new(4, 0));
//!
//! assert_eq!(config.default_region_size, 1 << 20);
//! ```

use crate::id::AllocatorId;
use shmref_log::warn;

/// Environment variable holding the default region size.
pub const REGION_SIZE_ENV: &str = "SHMREF_REGION_SIZE";

/// Default size of the lazily created default region (16 MiB).
pub const DEFAULT_REGION_SIZE: usize = 16 * 1024 * 1024;

/// Settings for [`MemoryRegistry`](crate::MemoryRegistry).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryConfig {
    /// Size in bytes of the default allocator's region.
    pub default_region_size: usize,
    /// Identity the default allocator registers under.
    pub default_allocator_id: AllocatorId,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            default_region_size: DEFAULT_REGION_SIZE,
            default_allocator_id: AllocatorId::new(0, 0),
        }
    }
}

impl MemoryConfig {
    /// Defaults overridden by `SHMREF_REGION_SIZE` when it is set and valid.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(value) = std::env::var(REGION_SIZE_ENV) {
            match parse_size(&value) {
                Some(size) => config.default_region_size = size,
                None => warn!("ignoring {REGION_SIZE_ENV}={value:?}: not a byte size"),
            }
        }
        config
    }

    #[must_use]
    pub const fn with_region_size(mut self, size: usize) -> Self {
        self.default_region_size = size;
        self
    }

    #[must_use]
    pub const fn with_default_id(mut self, id: AllocatorId) -> Self {
        self.default_allocator_id = id;
        self
    }
}

/// Parses a byte count with an optional `k`, `m` or `g` suffix (powers of
/// 1024, case-insensitive).
#[must_use]
pub fn parse_size(s: &str) -> Option<usize> {
    let s = s.trim();
    let (digits, shift) = match s.chars().last()?.to_ascii_lowercase() {
        'k' => (&s[..s.len() - 1], 10),
        'm' => (&s[..s.len() - 1], 20),
        'g' => (&s[..s.len() - 1], 30),
        _ => (s, 0),
    };
    let value: usize = digits.trim().parse().ok()?;
    value.checked_mul(1usize << shift)
}
