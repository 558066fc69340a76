//! Configuration for the buffer pool.

use super::{Error, Result};

/// Size of a page in bytes (4KB).
///
/// This value is chosen to match:
/// - OS page size on most systems (4096 bytes)
/// - Common database page sizes
///
/// Page N lives at file offset `N × PAGE_SIZE`.
pub const PAGE_SIZE: usize = 4096;

/// Maximum number of pages with u32 PageId (the last value is the INVALID sentinel).
pub const MAX_PAGES: u64 = u32::MAX as u64;

/// Default number of frames in the pool.
pub const DEFAULT_POOL_SIZE: usize = 10;

/// Default history depth of the LRU-K replacer.
pub const DEFAULT_REPLACER_K: usize = 10;

/// Tunables for a [`BufferPoolManager`](crate::BufferPoolManager).
///
/// # Example
/// ```
/// use pagepool::BufferPoolConfig;
///
/// let config = BufferPoolConfig::new(64).with_replacer_k(2);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferPoolConfig {
    /// Number of frames allocated at construction.
    pub pool_size: usize,

    /// How many access timestamps the replacer keeps per frame.
    pub replacer_k: usize,
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        Self {
            pool_size: DEFAULT_POOL_SIZE,
            replacer_k: DEFAULT_REPLACER_K,
        }
    }
}

impl BufferPoolConfig {
    /// Creates a configuration with `pool_size` frames and the default K.
    pub fn new(pool_size: usize) -> Self {
        Self {
            pool_size,
            ..Default::default()
        }
    }

    /// Sets the number of frames.
    #[must_use]
    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }

    /// Sets the replacer's K.
    #[must_use]
    pub fn with_replacer_k(mut self, k: usize) -> Self {
        self.replacer_k = k;
        self
    }

    /// Rejects zero-sized pools and a zero K.
    pub fn validate(&self) -> Result<()> {
        if self.pool_size == 0 {
            return Err(Error::InvalidConfig("pool_size must be > 0".into()));
        }
        if self.replacer_k == 0 {
            return Err(Error::InvalidConfig("replacer_k must be > 0".into()));
        }
        Ok(())
    }
}
