//! Page - the fundamental 4KB unit of storage.
//!
//! A [`Page`] is a raw byte array with no header: interpreting its
//! contents is up to the layer above the buffer pool.

use crate::common::config::PAGE_SIZE;

/// A page of data (4KB, 4KB-aligned).
///
/// This is the unit of I/O between disk and memory. Each buffer pool frame
/// owns exactly one, allocated when the pool is built.
///
/// # Clone
/// `Page` does not implement `Clone` outside tests: copying 4KB should be
/// explicit, see [`Page::boxed_copy`].
///
/// # Example
/// ```
/// use pagepool::storage::page::Page;
///
/// let mut page = Page::new();
/// page.as_mut_slice()[0] = 0xFF;
/// assert_eq!(page.as_slice()[0], 0xFF);
/// ```
#[repr(align(4096))]
pub struct Page {
    data: [u8; PAGE_SIZE],
}

impl Page {
    /// Create a new zeroed page.
    #[inline]
    pub fn new() -> Self {
        Self {
            data: [0u8; PAGE_SIZE],
        }
    }

    /// Allocate a zeroed page on the heap.
    pub fn new_boxed() -> Box<Self> {
        Box::new(Self::new())
    }

    /// Get immutable slice of page data.
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Get mutable slice of page data.
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Overwrite this page with the contents of `other`.
    #[inline]
    pub fn copy_from(&mut self, other: &Page) {
        self.data.copy_from_slice(&other.data);
    }

    /// Heap copy of this page, used to hand bytes to the disk scheduler.
    pub fn boxed_copy(&self) -> Box<Page> {
        let mut copy = Self::new_boxed();
        copy.copy_from(self);
        copy
    }

    /// Zero out the entire page.
    pub fn reset(&mut self) {
        self.data.fill(0);
    }

    /// Get the size of a page.
    #[inline]
    pub const fn size() -> usize {
        PAGE_SIZE
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new()
    }
}

// Clone only available in tests - forces explicit copying in production
#[cfg(test)]
impl Clone for Page {
    fn clone(&self) -> Self {
        let mut new_page = Page::new();
        new_page.copy_from(self);
        new_page
    }
}
