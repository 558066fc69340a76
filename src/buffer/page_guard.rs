//! RAII guards for page access.
//!
//! Every guard owns exactly one pin on one frame:
//! - [`BasicPageGuard`] - pinned, no latch
//! - [`PageReadGuard`] - pinned + shared latch
//! - [`PageWriteGuard`] - pinned + exclusive latch, marks the page dirty
//!
//! Releasing a guard (drop or [`drop_guard`](PageReadGuard::drop_guard))
//! unlatches first and then unpins, exactly once. A released guard, or one
//! whose obligation was moved out with `take()`, is *inert*: content
//! accessors return [`Error::GuardInvalidated`] and releasing it again does
//! nothing. Guards borrow the [`BufferPoolManager`], so none can outlive it.

use parking_lot::{RwLockReadGuard, RwLockWriteGuard};

use crate::common::{Error, FrameId, PageId, Result};
use crate::storage::page::Page;

use super::buffer_pool_manager::BufferPoolManager;

/// Latch mode requested from [`BufferPoolManager::fetch_page`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    Read,
    Write,
}

// ============================================================================
// BasicPageGuard
// ============================================================================

/// A pin without a latch.
///
/// Keeps the page resident. Content access goes through short-lived latches
/// ([`with_data`](Self::with_data)) or an upgrade to a read/write guard.
pub struct BasicPageGuard<'a> {
    bpm: &'a BufferPoolManager,
    frame_id: FrameId,
    page_id: PageId,
    pinned: bool,
}

impl<'a> BasicPageGuard<'a> {
    pub(crate) fn new(bpm: &'a BufferPoolManager, frame_id: FrameId, page_id: PageId) -> Self {
        Self {
            bpm,
            frame_id,
            page_id,
            pinned: true,
        }
    }

    /// The guarded page, or `PageId::INVALID` once inert.
    #[inline]
    pub fn page_id(&self) -> PageId {
        if self.pinned {
            self.page_id
        } else {
            PageId::INVALID
        }
    }

    /// Frame holding the page.
    #[inline]
    pub fn frame_id(&self) -> FrameId {
        self.frame_id
    }

    /// Whether this guard still holds its pin.
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.pinned
    }

    /// Run `f` over the page bytes under a shared latch.
    pub fn with_data<R>(&self, f: impl FnOnce(&[u8]) -> R) -> Result<R> {
        if !self.pinned {
            return Err(Error::GuardInvalidated);
        }
        let page = self.bpm.frame(self.frame_id).page();
        Ok(f(page.as_slice()))
    }

    /// Run `f` over the page bytes under an exclusive latch and mark the page dirty.
    pub fn with_data_mut<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> Result<R> {
        if !self.pinned {
            return Err(Error::GuardInvalidated);
        }
        let frame = self.bpm.frame(self.frame_id);
        let mut page = frame.page_mut();
        frame.mark_dirty();
        Ok(f(page.as_mut_slice()))
    }

    /// Latch the page in shared mode, transferring the pin.
    pub fn upgrade_read(mut self) -> Result<PageReadGuard<'a>> {
        if !self.pinned {
            return Err(Error::GuardInvalidated);
        }
        let latch = self.bpm.frame(self.frame_id).page();
        self.pinned = false;
        Ok(PageReadGuard::new(self.bpm, self.frame_id, self.page_id, latch))
    }

    /// Latch the page in exclusive mode, transferring the pin.
    pub fn upgrade_write(mut self) -> Result<PageWriteGuard<'a>> {
        if !self.pinned {
            return Err(Error::GuardInvalidated);
        }
        let latch = self.bpm.frame(self.frame_id).page_mut();
        self.pinned = false;
        Ok(PageWriteGuard::new(self.bpm, self.frame_id, self.page_id, latch))
    }

    /// Move the pin into a new guard, leaving this one inert.
    pub fn take(&mut self) -> Self {
        let pinned = std::mem::replace(&mut self.pinned, false);
        Self {
            bpm: self.bpm,
            frame_id: self.frame_id,
            page_id: self.page_id,
            pinned,
        }
    }

    /// Release the pin now. Further calls have no effect.
    pub fn drop_guard(&mut self) {
        if std::mem::replace(&mut self.pinned, false) {
            self.bpm.unpin_frame(self.frame_id);
        }
    }
}

impl Drop for BasicPageGuard<'_> {
    fn drop(&mut self) {
        self.drop_guard();
    }
}

// ============================================================================
// PageReadGuard
// ============================================================================

/// Guard for read-only page access.
///
/// Multiple `PageReadGuard`s can exist for the same page simultaneously.
///
/// # Example
/// ```ignore
/// let guard = bpm.fetch_page_read(page_id)?;
/// let first = guard.data()?[0];
/// // guard drops here: latch released, then page unpinned
/// ```
pub struct PageReadGuard<'a> {
    bpm: &'a BufferPoolManager,
    frame_id: FrameId,
    page_id: PageId,
    /// `None` once the guard is inert.
    latch: Option<RwLockReadGuard<'a, Page>>,
}

impl<'a> PageReadGuard<'a> {
    pub(crate) fn new(
        bpm: &'a BufferPoolManager,
        frame_id: FrameId,
        page_id: PageId,
        latch: RwLockReadGuard<'a, Page>,
    ) -> Self {
        Self {
            bpm,
            frame_id,
            page_id,
            latch: Some(latch),
        }
    }

    /// The guarded page, or `PageId::INVALID` once inert.
    #[inline]
    pub fn page_id(&self) -> PageId {
        if self.latch.is_some() {
            self.page_id
        } else {
            PageId::INVALID
        }
    }

    /// Frame holding the page.
    #[inline]
    pub fn frame_id(&self) -> FrameId {
        self.frame_id
    }

    /// Whether this guard still holds its pin and latch.
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.latch.is_some()
    }

    /// The page.
    pub fn page(&self) -> Result<&Page> {
        self.latch.as_deref().ok_or(Error::GuardInvalidated)
    }

    /// The page bytes.
    pub fn data(&self) -> Result<&[u8]> {
        self.page().map(Page::as_slice)
    }

    /// Whether the page has unflushed modifications.
    pub fn is_dirty(&self) -> bool {
        self.is_valid() && self.bpm.frame(self.frame_id).is_dirty()
    }

    /// Write the page to disk through the held latch and clear the dirty flag.
    pub fn flush(&self) -> Result<()> {
        let page = self.page()?;
        self.bpm.write_back(self.frame_id, self.page_id, page)
    }

    /// Release the latch but keep the pin.
    pub fn into_basic(mut self) -> BasicPageGuard<'a> {
        let pinned = self.latch.take().is_some();
        BasicPageGuard {
            bpm: self.bpm,
            frame_id: self.frame_id,
            page_id: self.page_id,
            pinned,
        }
    }

    /// Move the pin and latch into a new guard, leaving this one inert.
    pub fn take(&mut self) -> Self {
        Self {
            bpm: self.bpm,
            frame_id: self.frame_id,
            page_id: self.page_id,
            latch: self.latch.take(),
        }
    }

    /// Unlatch and unpin now. Further calls have no effect.
    pub fn drop_guard(&mut self) {
        if let Some(latch) = self.latch.take() {
            drop(latch);
            self.bpm.unpin_frame(self.frame_id);
        }
    }
}

impl Drop for PageReadGuard<'_> {
    fn drop(&mut self) {
        self.drop_guard();
    }
}

// ============================================================================
// PageWriteGuard
// ============================================================================

/// Guard for exclusive write access to a page.
///
/// Only one `PageWriteGuard` can exist for a page at a time. The page is
/// marked dirty on any use of a mutable accessor and again on release.
///
/// # Example
/// ```ignore
/// let mut guard = bpm.fetch_page_write(page_id)?;
/// guard.data_mut()?[0] = 0xFF;
/// // guard drops here: page marked dirty, latch released, page unpinned
/// ```
pub struct PageWriteGuard<'a> {
    bpm: &'a BufferPoolManager,
    frame_id: FrameId,
    page_id: PageId,
    /// `None` once the guard is inert.
    latch: Option<RwLockWriteGuard<'a, Page>>,
}

impl<'a> PageWriteGuard<'a> {
    pub(crate) fn new(
        bpm: &'a BufferPoolManager,
        frame_id: FrameId,
        page_id: PageId,
        latch: RwLockWriteGuard<'a, Page>,
    ) -> Self {
        Self {
            bpm,
            frame_id,
            page_id,
            latch: Some(latch),
        }
    }

    /// The guarded page, or `PageId::INVALID` once inert.
    #[inline]
    pub fn page_id(&self) -> PageId {
        if self.latch.is_some() {
            self.page_id
        } else {
            PageId::INVALID
        }
    }

    /// Frame holding the page.
    #[inline]
    pub fn frame_id(&self) -> FrameId {
        self.frame_id
    }

    /// Whether this guard still holds its pin and latch.
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.latch.is_some()
    }

    /// The page.
    pub fn page(&self) -> Result<&Page> {
        self.latch.as_deref().ok_or(Error::GuardInvalidated)
    }

    /// The page bytes.
    pub fn data(&self) -> Result<&[u8]> {
        self.page().map(Page::as_slice)
    }

    /// The page, mutably. Marks the page dirty.
    pub fn page_mut(&mut self) -> Result<&mut Page> {
        let page = self.latch.as_deref_mut().ok_or(Error::GuardInvalidated)?;
        self.bpm.frame(self.frame_id).mark_dirty();
        Ok(page)
    }

    /// The page bytes, mutably. Marks the page dirty.
    pub fn data_mut(&mut self) -> Result<&mut [u8]> {
        self.page_mut().map(Page::as_mut_slice)
    }

    /// Whether the page has unflushed modifications.
    pub fn is_dirty(&self) -> bool {
        self.is_valid() && self.bpm.frame(self.frame_id).is_dirty()
    }

    /// Write the page to disk through the held latch and clear the dirty flag.
    pub fn flush(&self) -> Result<()> {
        let page = self.page()?;
        self.bpm.write_back(self.frame_id, self.page_id, page)
    }

    /// Trade the exclusive latch for a shared one without unlatching in between.
    pub fn downgrade(mut self) -> PageReadGuard<'a> {
        let latch = self.latch.take().map(|latch| {
            self.bpm.frame(self.frame_id).mark_dirty();
            RwLockWriteGuard::downgrade(latch)
        });
        PageReadGuard {
            bpm: self.bpm,
            frame_id: self.frame_id,
            page_id: self.page_id,
            latch,
        }
    }

    /// Release the latch but keep the pin.
    pub fn into_basic(mut self) -> BasicPageGuard<'a> {
        let pinned = match self.latch.take() {
            Some(latch) => {
                self.bpm.frame(self.frame_id).mark_dirty();
                drop(latch);
                true
            }
            None => false,
        };
        BasicPageGuard {
            bpm: self.bpm,
            frame_id: self.frame_id,
            page_id: self.page_id,
            pinned,
        }
    }

    /// Move the pin and latch into a new guard, leaving this one inert.
    pub fn take(&mut self) -> Self {
        Self {
            bpm: self.bpm,
            frame_id: self.frame_id,
            page_id: self.page_id,
            latch: self.latch.take(),
        }
    }

    /// Mark dirty, unlatch and unpin now. Further calls have no effect.
    pub fn drop_guard(&mut self) {
        if let Some(latch) = self.latch.take() {
            // Dirty before unlatching, so a flush that latches next sees it.
            self.bpm.frame(self.frame_id).mark_dirty();
            drop(latch);
            self.bpm.unpin_frame(self.frame_id);
        }
    }
}

impl Drop for PageWriteGuard<'_> {
    fn drop(&mut self) {
        self.drop_guard();
    }
}

// ============================================================================
// PageGuard
// ============================================================================

/// A read or write guard, as returned by [`BufferPoolManager::fetch_page`].
pub enum PageGuard<'a> {
    Read(PageReadGuard<'a>),
    Write(PageWriteGuard<'a>),
}

impl<'a> PageGuard<'a> {
    /// Latch mode held by this guard.
    pub fn mode(&self) -> AccessMode {
        match self {
            PageGuard::Read(_) => AccessMode::Read,
            PageGuard::Write(_) => AccessMode::Write,
        }
    }

    /// The guarded page, or `PageId::INVALID` once inert.
    pub fn page_id(&self) -> PageId {
        match self {
            PageGuard::Read(g) => g.page_id(),
            PageGuard::Write(g) => g.page_id(),
        }
    }

    /// Whether this guard still holds its pin and latch.
    pub fn is_valid(&self) -> bool {
        match self {
            PageGuard::Read(g) => g.is_valid(),
            PageGuard::Write(g) => g.is_valid(),
        }
    }

    /// The page bytes.
    pub fn data(&self) -> Result<&[u8]> {
        match self {
            PageGuard::Read(g) => g.data(),
            PageGuard::Write(g) => g.data(),
        }
    }

    /// The read guard, if this is one.
    pub fn into_read(self) -> Option<PageReadGuard<'a>> {
        match self {
            PageGuard::Read(g) => Some(g),
            PageGuard::Write(_) => None,
        }
    }

    /// The write guard, if this is one.
    pub fn into_write(self) -> Option<PageWriteGuard<'a>> {
        match self {
            PageGuard::Write(g) => Some(g),
            PageGuard::Read(_) => None,
        }
    }

    /// Release now. Further calls have no effect.
    pub fn drop_guard(&mut self) {
        match self {
            PageGuard::Read(g) => g.drop_guard(),
            PageGuard::Write(g) => g.drop_guard(),
        }
    }
}
