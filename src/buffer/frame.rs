//! Frame - a slot in the buffer pool.
//!
//! A [`Frame`] holds a [`Page`] plus the metadata the pool needs:
//! - Which page is resident (if any)
//! - Pin count
//! - Dirty flag
//! - The reader/writer latch over the page bytes

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::common::{FrameId, PageId};
use crate::storage::page::Page;

/// A frame in the buffer pool.
///
/// Frames are allocated once when the pool is built and never reallocated;
/// only their contents and mapping change across fetch/evict cycles.
///
/// # Synchronization
/// - `page`: the frame latch. Shared for read guards, exclusive for write
///   guards and for loading a page from disk.
/// - `page_id`, `pin_count`: only modified under the pool-wide mutex, so
///   `Relaxed` atomics suffice; they are atomics so diagnostics and guards
///   can read them without that mutex.
/// - `is_dirty`: set by write guards while they hold the latch, cleared by
///   a successful flush.
pub struct Frame {
    frame_id: FrameId,

    /// The page data, protected by the frame latch.
    page: RwLock<Page>,

    /// Resident page, `PageId::INVALID` when the frame is empty.
    page_id: AtomicU32,

    /// Number of guards (and in-flight pool operations) holding this frame.
    pin_count: AtomicU32,

    /// Whether the bytes differ from what is on disk.
    is_dirty: AtomicBool,
}

impl Frame {
    /// Create a new empty frame.
    pub fn new(frame_id: FrameId) -> Self {
        Self {
            frame_id,
            page: RwLock::new(Page::new()),
            page_id: AtomicU32::new(PageId::INVALID.0),
            pin_count: AtomicU32::new(0),
            is_dirty: AtomicBool::new(false),
        }
    }

    /// Index of this frame in the pool.
    #[inline]
    pub fn frame_id(&self) -> FrameId {
        self.frame_id
    }

    // ========================================================================
    // Latch
    // ========================================================================

    /// Acquire the latch in shared mode.
    #[inline]
    pub fn page(&self) -> RwLockReadGuard<'_, Page> {
        self.page.read()
    }

    /// Acquire the latch in exclusive mode.
    #[inline]
    pub fn page_mut(&self) -> RwLockWriteGuard<'_, Page> {
        self.page.write()
    }

    /// Acquire the latch in exclusive mode if nobody holds it.
    #[inline]
    pub(crate) fn try_page_mut(&self) -> Option<RwLockWriteGuard<'_, Page>> {
        self.page.try_write()
    }

    // ========================================================================
    // Residency
    // ========================================================================

    /// The resident page, or None if the frame is empty.
    #[inline]
    pub fn page_id(&self) -> Option<PageId> {
        let raw = PageId(self.page_id.load(Ordering::Relaxed));
        raw.is_valid().then_some(raw)
    }

    #[inline]
    pub(crate) fn set_page_id(&self, page_id: Option<PageId>) {
        let raw = page_id.unwrap_or(PageId::INVALID);
        self.page_id.store(raw.0, Ordering::Relaxed);
    }

    /// Check if the frame is empty (no page loaded).
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.page_id().is_none()
    }

    // ========================================================================
    // Pin count
    // ========================================================================

    /// Increment the pin count. Returns the new pin count.
    #[inline]
    pub(crate) fn pin(&self) -> u32 {
        self.pin_count.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Decrement the pin count. Returns the new pin count.
    ///
    /// # Panics
    /// Panics if pin count is already 0.
    #[inline]
    pub(crate) fn unpin(&self) -> u32 {
        let old = self.pin_count.fetch_sub(1, Ordering::Relaxed);
        assert!(old > 0, "pin count underflow on {}", self.frame_id);
        old - 1
    }

    /// Get the current pin count.
    #[inline]
    pub fn pin_count(&self) -> u32 {
        self.pin_count.load(Ordering::Relaxed)
    }

    /// Check if the frame is currently pinned.
    #[inline]
    pub fn is_pinned(&self) -> bool {
        self.pin_count() > 0
    }

    // ========================================================================
    // Dirty flag
    // ========================================================================

    #[inline]
    pub(crate) fn mark_dirty(&self) {
        self.is_dirty.store(true, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn clear_dirty(&self) {
        self.is_dirty.store(false, Ordering::Relaxed);
    }

    /// Check if the frame is dirty.
    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.is_dirty.load(Ordering::Relaxed)
    }
}
