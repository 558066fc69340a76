//! Buffer Pool Manager - the core page caching layer.
//!
//! The [`BufferPoolManager`] provides:
//! - Page caching between disk and memory
//! - Pin-based reference counting through RAII page guards
//! - LRU-K victim selection with write-back of dirty victims
//! - Page id allocation, deletion and reuse

use std::collections::{BTreeSet, HashMap, VecDeque};

use parking_lot::{Mutex, MutexGuard, RwLockWriteGuard};
use tracing::{debug, info, warn};

use crate::buffer::page_guard::{
    AccessMode, BasicPageGuard, PageGuard, PageReadGuard, PageWriteGuard,
};
use crate::buffer::replacer::LruKReplacer;
use crate::buffer::{BufferPoolStats, Frame};
use crate::common::config::MAX_PAGES;
use crate::common::{BufferPoolConfig, Error, FrameId, PageId, Result};
use crate::storage::page::Page;
use crate::storage::{DiskManager, DiskScheduler, IoTicket};

/// Manages a pool of buffer frames for caching disk pages.
///
/// # Architecture
/// ```text
/// ┌──────────────────────────────────────────────────────────────┐
/// │                     BufferPoolManager                        │
/// │  ┌───────────── state: Mutex<PoolState> ──────────────┐      │
/// │  │ page_table  free_list  replacer  page id allocator │      │
/// │  └────────────────────────────────────────────────────┘      │
/// │  ┌───────────────────────────────────┐  ┌───────────────┐    │
/// │  │        frames: Vec<Frame>         │  │ DiskScheduler │──▶ worker ──▶ file
/// │  │  [Frame0] [Frame1] [Frame2] ...   │  └───────────────┘    │
/// │  └───────────────────────────────────┘                       │
/// └──────────────────────────────────────────────────────────────┘
/// ```
///
/// # Thread Safety
/// - `state`: one mutex over the mapping, free list, replacer and allocator.
///   Held only for bookkeeping and request submission, never across a wait
///   on disk I/O or a blocking latch acquisition.
/// - `frames`: fixed size; each frame latch guards its page bytes.
/// - `stats`: atomic counters.
///
/// A thread may take the pool mutex while holding a frame latch, never the
/// other way round (frames reclaimed under the mutex are latched with
/// `try_write`, which cannot block).
///
/// # Usage
/// ```ignore
/// let dm = DiskManager::create("test.db")?;
/// let bpm = BufferPoolManager::new(10, dm)?;
///
/// // Allocate a new page
/// let mut guard = bpm.new_page()?;
/// let page_id = guard.page_id();
/// guard.data_mut()?[0] = 0xAB;
/// drop(guard);
///
/// // Fetch it again for reading
/// let guard = bpm.fetch_page_read(page_id)?;
/// assert_eq!(guard.data()?[0], 0xAB);
/// ```
///
/// Flushing a page while the same thread holds its write guard deadlocks;
/// use [`PageWriteGuard::flush`] instead.
pub struct BufferPoolManager {
    /// Fixed pool of frames allocated at startup.
    frames: Vec<Frame>,

    state: Mutex<PoolState>,

    /// Owns the disk manager; all page I/O goes through its worker.
    scheduler: DiskScheduler,

    stats: BufferPoolStats,
}

/// Everything guarded by the pool-wide mutex.
struct PoolState {
    /// Resident pages.
    page_table: HashMap<PageId, FrameId>,

    /// Frames holding no page, handed out front to back.
    free_list: VecDeque<FrameId>,

    replacer: LruKReplacer,

    /// Next never-used page id.
    next_page_id: u32,

    /// Deleted ids below `next_page_id`, reused lowest first.
    free_page_ids: BTreeSet<PageId>,
}

impl PoolState {
    fn is_allocated(&self, page_id: PageId) -> bool {
        page_id.is_valid()
            && page_id.0 < self.next_page_id
            && !self.free_page_ids.contains(&page_id)
    }

    fn allocate_page_id(&mut self) -> Result<PageId> {
        if let Some(page_id) = self.free_page_ids.pop_first() {
            return Ok(page_id);
        }
        let page_id = PageId::new(self.next_page_id);
        if u64::from(page_id.0) >= MAX_PAGES {
            return Err(Error::InvalidPage(page_id));
        }
        self.next_page_id += 1;
        Ok(page_id)
    }
}

/// Outcome of pinning a page.
enum Pinned<'a> {
    /// Already resident. The caller still has to latch and re-check residency.
    Hit(FrameId),
    /// Loaded by this call; the frame is still write-latched.
    Loaded(FrameId, RwLockWriteGuard<'a, Page>),
}

impl BufferPoolManager {
    /// Create a buffer pool of `pool_size` frames with the default K.
    ///
    /// # Errors
    /// - `Error::InvalidConfig` if `pool_size` is 0
    /// - I/O error if the disk worker thread cannot be spawned
    pub fn new(pool_size: usize, disk_manager: DiskManager) -> Result<Self> {
        Self::with_config(BufferPoolConfig::new(pool_size), disk_manager)
    }

    /// Create a buffer pool from an explicit configuration.
    ///
    /// Page ids continue after the last page already in the backing file.
    pub fn with_config(config: BufferPoolConfig, disk_manager: DiskManager) -> Result<Self> {
        config.validate()?;

        let next_page_id = disk_manager.page_count();
        let scheduler = DiskScheduler::new(disk_manager)?;

        let frames: Vec<Frame> = (0..config.pool_size)
            .map(|i| Frame::new(FrameId::new(i)))
            .collect();

        let state = PoolState {
            page_table: HashMap::with_capacity(config.pool_size),
            free_list: (0..config.pool_size).map(FrameId::new).collect(),
            replacer: LruKReplacer::new(config.pool_size, config.replacer_k),
            next_page_id,
            free_page_ids: BTreeSet::new(),
        };

        info!(
            pool_size = config.pool_size,
            k = config.replacer_k,
            next_page_id,
            "buffer.open"
        );

        Ok(Self {
            frames,
            state: Mutex::new(state),
            scheduler,
            stats: BufferPoolStats::new(),
        })
    }

    // ========================================================================
    // Public API: Fetch pages
    // ========================================================================

    /// Fetch a page for reading (shared access).
    ///
    /// If the page is already in the buffer pool, returns once the shared
    /// latch is granted. Otherwise loads it from disk, possibly evicting
    /// another page.
    ///
    /// # Errors
    /// - `Error::InvalidPage` if the page was never allocated or was deleted
    /// - `Error::PoolExhausted` if every frame is pinned
    /// - `Error::ShortRead` / `Error::Io` if loading the page fails
    pub fn fetch_page_read(&self, page_id: PageId) -> Result<PageReadGuard<'_>> {
        loop {
            match self.pin_page(page_id)? {
                Pinned::Loaded(frame_id, latch) => {
                    let latch = RwLockWriteGuard::downgrade(latch);
                    return Ok(PageReadGuard::new(self, frame_id, page_id, latch));
                }
                Pinned::Hit(frame_id) => {
                    let frame = self.frame(frame_id);
                    let latch = frame.page();
                    if frame.page_id() == Some(page_id) {
                        return Ok(PageReadGuard::new(self, frame_id, page_id, latch));
                    }
                    // The load we waited on failed.
                    drop(latch);
                    self.unpin_frame(frame_id);
                }
            }
        }
    }

    /// Fetch a page for writing (exclusive access).
    ///
    /// Same as `fetch_page_read`, but blocks until every other latch holder
    /// has released. The page is marked dirty when the guard drops.
    pub fn fetch_page_write(&self, page_id: PageId) -> Result<PageWriteGuard<'_>> {
        loop {
            match self.pin_page(page_id)? {
                Pinned::Loaded(frame_id, latch) => {
                    return Ok(PageWriteGuard::new(self, frame_id, page_id, latch));
                }
                Pinned::Hit(frame_id) => {
                    let frame = self.frame(frame_id);
                    let latch = frame.page_mut();
                    if frame.page_id() == Some(page_id) {
                        return Ok(PageWriteGuard::new(self, frame_id, page_id, latch));
                    }
                    drop(latch);
                    self.unpin_frame(frame_id);
                }
            }
        }
    }

    /// Fetch a page pinned but unlatched.
    pub fn fetch_page_basic(&self, page_id: PageId) -> Result<BasicPageGuard<'_>> {
        loop {
            match self.pin_page(page_id)? {
                Pinned::Loaded(frame_id, latch) => {
                    drop(latch);
                    return Ok(BasicPageGuard::new(self, frame_id, page_id));
                }
                Pinned::Hit(frame_id) => {
                    let frame = self.frame(frame_id);
                    // Wait out an in-flight load before handing out the pin.
                    let resident = {
                        let _latch = frame.page();
                        frame.page_id() == Some(page_id)
                    };
                    if resident {
                        return Ok(BasicPageGuard::new(self, frame_id, page_id));
                    }
                    self.unpin_frame(frame_id);
                }
            }
        }
    }

    /// Fetch a page in the given latch mode.
    pub fn fetch_page(&self, page_id: PageId, mode: AccessMode) -> Result<PageGuard<'_>> {
        match mode {
            AccessMode::Read => self.fetch_page_read(page_id).map(PageGuard::Read),
            AccessMode::Write => self.fetch_page_write(page_id).map(PageGuard::Write),
        }
    }

    /// [`fetch_page_read`](Self::fetch_page_read), with any failure as `None`.
    pub fn checked_read_page(&self, page_id: PageId) -> Option<PageReadGuard<'_>> {
        self.fetch_page_read(page_id).ok()
    }

    /// [`fetch_page_write`](Self::fetch_page_write), with any failure as `None`.
    pub fn checked_write_page(&self, page_id: PageId) -> Option<PageWriteGuard<'_>> {
        self.fetch_page_write(page_id).ok()
    }

    // ========================================================================
    // Public API: Create and delete pages
    // ========================================================================

    /// Allocate a new zeroed page and pin it in the buffer pool.
    ///
    /// Returns a write guard for the new page. Deleted page ids are reused,
    /// lowest first, before fresh ones are handed out.
    ///
    /// # Errors
    /// - `Error::PoolExhausted` if all frames are pinned
    /// - I/O errors from writing back a dirty victim
    pub fn new_page(&self) -> Result<PageWriteGuard<'_>> {
        let mut state = self.state.lock();
        let (frame_id, mut latch) = self.claim_frame(&mut state)?;

        let page_id = match state.allocate_page_id() {
            Ok(page_id) => page_id,
            Err(e) => {
                state.free_list.push_back(frame_id);
                return Err(e);
            }
        };

        latch.reset();
        self.install(&mut state, frame_id, page_id);
        // Never written yet: make sure eviction persists it.
        self.frame(frame_id).mark_dirty();
        drop(state);

        debug!(page = %page_id, frame = %frame_id, "buffer.new_page");
        Ok(PageWriteGuard::new(self, frame_id, page_id, latch))
    }

    /// Delete a page.
    ///
    /// Drops the page from the pool without writing it back and releases
    /// its id for reuse. Deleting an id that is not allocated succeeds.
    ///
    /// # Errors
    /// - `Error::PagePinned` if a guard still holds the page. This is also
    ///   reported, transiently, while the page is being written back as an
    ///   eviction victim; the write holds its own pin until it completes.
    pub fn delete_page(&self, page_id: PageId) -> Result<()> {
        let mut state = self.state.lock();

        if !state.is_allocated(page_id) {
            return Ok(());
        }

        if let Some(&frame_id) = state.page_table.get(&page_id) {
            let frame = self.frame(frame_id);
            if frame.is_pinned() {
                return Err(Error::PagePinned(page_id));
            }

            state.page_table.remove(&page_id);
            state.replacer.remove(frame_id);
            frame.set_page_id(None);
            frame.clear_dirty();
            state.free_list.push_back(frame_id);
        }

        state.free_page_ids.insert(page_id);
        debug!(page = %page_id, "buffer.delete");
        Ok(())
    }

    // ========================================================================
    // Public API: Flush pages
    // ========================================================================

    /// Write a resident page to disk, dirty or not, and clear its dirty flag.
    ///
    /// A page that is allocated but not resident is already on disk, so
    /// this is a no-op for it.
    ///
    /// # Errors
    /// - `Error::InvalidPage` if the page was never allocated or was deleted
    /// - I/O errors from the write
    pub fn flush_page(&self, page_id: PageId) -> Result<()> {
        let frame_id = {
            let mut state = self.state.lock();
            if !state.is_allocated(page_id) {
                return Err(Error::InvalidPage(page_id));
            }
            let Some(&frame_id) = state.page_table.get(&page_id) else {
                return Ok(());
            };
            self.frame(frame_id).pin();
            state.replacer.set_evictable(frame_id, false);
            frame_id
        };

        let frame = self.frame(frame_id);
        let result = {
            let latch = frame.page();
            if frame.page_id() == Some(page_id) {
                self.write_back(frame_id, page_id, &latch)
            } else {
                Ok(())
            }
        };

        self.unpin_frame(frame_id);
        result
    }

    /// Flush every resident page.
    ///
    /// Keeps going past individual failures.
    ///
    /// # Errors
    /// - `Error::FlushFailed` listing each page that could not be written
    pub fn flush_all_pages(&self) -> Result<()> {
        let mut page_ids: Vec<PageId> = self.state.lock().page_table.keys().copied().collect();
        page_ids.sort_unstable();

        let failures: Vec<(PageId, Error)> = page_ids
            .into_iter()
            .filter_map(|page_id| match self.flush_page(page_id) {
                // Deleted since the snapshot.
                Ok(()) | Err(Error::InvalidPage(_)) => None,
                Err(e) => Some((page_id, e)),
            })
            .collect();

        if failures.is_empty() {
            Ok(())
        } else {
            warn!(failed = failures.len(), "buffer.flush_all_failed");
            Err(Error::FlushFailed(failures))
        }
    }

    // ========================================================================
    // Public API: Stats and info
    // ========================================================================

    /// Get buffer pool statistics.
    pub fn stats(&self) -> &BufferPoolStats {
        &self.stats
    }

    /// Number of frames in the pool.
    pub fn pool_size(&self) -> usize {
        self.frames.len()
    }

    /// Number of frames holding no page.
    pub fn free_frame_count(&self) -> usize {
        self.state.lock().free_list.len()
    }

    /// Number of resident pages.
    pub fn page_count(&self) -> usize {
        self.state.lock().page_table.len()
    }

    /// Number of resident pages that could be evicted right now.
    pub fn evictable_count(&self) -> usize {
        self.state.lock().replacer.size()
    }

    /// Whether `page_id` is resident.
    pub fn contains_page(&self, page_id: PageId) -> bool {
        self.state.lock().page_table.contains_key(&page_id)
    }

    /// Pin count of a resident page, `None` if not resident.
    pub fn get_pin_count(&self, page_id: PageId) -> Option<u32> {
        let state = self.state.lock();
        state
            .page_table
            .get(&page_id)
            .map(|&frame_id| self.frame(frame_id).pin_count())
    }

    // ========================================================================
    // Internal: Called by page guards
    // ========================================================================

    #[inline]
    pub(crate) fn frame(&self, frame_id: FrameId) -> &Frame {
        &self.frames[frame_id.0]
    }

    /// Drop one pin. The caller must already have released its latch.
    ///
    /// At zero pins a resident frame becomes evictable; an empty one (its
    /// load failed) goes back to the free list.
    pub(crate) fn unpin_frame(&self, frame_id: FrameId) {
        let frame = self.frame(frame_id);
        let mut state = self.state.lock();

        if frame.unpin() == 0 {
            if frame.page_id().is_some() {
                state.replacer.set_evictable(frame_id, true);
            } else {
                state.replacer.remove(frame_id);
                state.free_list.push_back(frame_id);
            }
        }
    }

    /// Write `page` (latched by the caller) to disk and clear the dirty flag.
    pub(crate) fn write_back(&self, frame_id: FrameId, page_id: PageId, page: &Page) -> Result<()> {
        self.scheduler
            .schedule_write(page_id, page.boxed_copy())?
            .wait()?;

        self.frame(frame_id).clear_dirty();
        self.stats.record_page_written();
        debug!(page = %page_id, frame = %frame_id, "buffer.flush");
        Ok(())
    }

    // ========================================================================
    // Internal: Core fetch logic
    // ========================================================================

    /// Pin `page_id`, loading it on a miss.
    fn pin_page(&self, page_id: PageId) -> Result<Pinned<'_>> {
        let mut state = self.state.lock();

        let (frame_id, mut latch) = loop {
            if !state.is_allocated(page_id) {
                return Err(Error::InvalidPage(page_id));
            }

            if let Some(&frame_id) = state.page_table.get(&page_id) {
                self.frame(frame_id).pin();
                state.replacer.record_access(frame_id);
                state.replacer.set_evictable(frame_id, false);
                self.stats.record_hit();
                return Ok(Pinned::Hit(frame_id));
            }

            let (frame_id, latch) = self.claim_frame(&mut state)?;
            if state.is_allocated(page_id) && !state.page_table.contains_key(&page_id) {
                break (frame_id, latch);
            }

            // Loaded or deleted by someone else while a victim was written back.
            drop(latch);
            state.free_list.push_front(frame_id);
        };

        self.stats.record_miss();
        self.install(&mut state, frame_id, page_id);

        // Submitted under the mutex so a later write-back of this page
        // cannot overtake the read.
        let ticket = self.scheduler.schedule_read(page_id);
        drop(state);

        match ticket.and_then(IoTicket::wait) {
            Ok(data) => {
                latch.copy_from(&data);
                self.stats.record_page_read();
                Ok(Pinned::Loaded(frame_id, latch))
            }
            Err(e) => {
                warn!(page = %page_id, frame = %frame_id, error = %e, "buffer.load_failed");
                self.abandon_load(frame_id, page_id, latch);
                Err(e)
            }
        }
    }

    /// Map `page_id` into a freshly claimed frame and pin it once.
    fn install(&self, state: &mut PoolState, frame_id: FrameId, page_id: PageId) {
        let frame = self.frame(frame_id);
        frame.set_page_id(Some(page_id));
        frame.clear_dirty();
        frame.pin();

        state.page_table.insert(page_id, frame_id);
        state.replacer.record_access(frame_id);
        state.replacer.set_evictable(frame_id, false);
    }

    /// Undo `install` after a failed read.
    ///
    /// Threads that pinned the page while it was loading see an empty frame
    /// once they get the latch and retry; the last pin out frees the frame.
    fn abandon_load(&self, frame_id: FrameId, page_id: PageId, mut latch: RwLockWriteGuard<'_, Page>) {
        let frame = self.frame(frame_id);
        let mut state = self.state.lock();

        state.page_table.remove(&page_id);
        frame.set_page_id(None);
        latch.reset();
        drop(latch);

        if frame.unpin() == 0 {
            state.replacer.remove(frame_id);
            state.free_list.push_back(frame_id);
        }
    }

    // ========================================================================
    // Internal: Frame allocation and eviction
    // ========================================================================

    /// Get an empty, write-latched frame: from the free list, else by eviction.
    ///
    /// The evicted page (if any) is un-mapped. May release and re-take the
    /// pool mutex while writing back a dirty victim.
    fn claim_frame<'a>(
        &'a self,
        state: &mut MutexGuard<'a, PoolState>,
    ) -> Result<(FrameId, RwLockWriteGuard<'a, Page>)> {
        let (frame_id, latch) = self.find_victim(state)?;
        let frame = self.frame(frame_id);

        // A fetch during the write-back may have re-registered it.
        state.replacer.remove(frame_id);

        if let Some(old) = frame.page_id() {
            state.page_table.remove(&old);
            self.stats.record_eviction();
            debug!(page = %old, frame = %frame_id, "buffer.evict");
        }
        frame.set_page_id(None);
        frame.clear_dirty();

        Ok((frame_id, latch))
    }

    fn find_victim<'a>(
        &'a self,
        state: &mut MutexGuard<'a, PoolState>,
    ) -> Result<(FrameId, RwLockWriteGuard<'a, Page>)> {
        // Free frames have no pins, hence no latch holders.
        if let Some(frame_id) = state.free_list.pop_front() {
            if let Some(latch) = self.frame(frame_id).try_page_mut() {
                return Ok((frame_id, latch));
            }
            state.free_list.push_back(frame_id);
        }

        // Candidates already looked at in this call. They stay in the
        // replacer with their history unless actually reclaimed.
        let mut tried = Vec::new();
        let mut last_err = None;

        while let Some(frame_id) = state.replacer.peek_victim(&tried) {
            tried.push(frame_id);
            let frame = self.frame(frame_id);

            let Some(latch) = frame.try_page_mut() else {
                continue;
            };

            let old = match frame.page_id() {
                Some(old) if frame.is_dirty() => old,
                _ => return Ok((frame_id, latch)),
            };

            // Pinned and not evictable for the duration of the write, so it
            // can be neither deleted nor picked by another evicting thread.
            frame.pin();
            state.replacer.set_evictable(frame_id, false);
            let written = self
                .scheduler
                .schedule_write(old, latch.boxed_copy())
                .and_then(|ticket| MutexGuard::unlocked(state, || ticket.wait()));
            let remaining = frame.unpin();

            match written {
                Ok(()) => {
                    frame.clear_dirty();
                    self.stats.record_page_written();
                    self.stats.record_dirty_writeback();
                    debug!(page = %old, frame = %frame_id, "buffer.write_back");
                    if remaining == 0 {
                        return Ok((frame_id, latch));
                    }
                    // Fetched again while we were writing; its last unpin
                    // makes it evictable again.
                }
                Err(e) => {
                    warn!(page = %old, frame = %frame_id, error = %e, "buffer.write_back_failed");
                    // Still resident and dirty. Nobody else holds it, so it
                    // goes back to being a candidate with its history intact.
                    if remaining == 0 {
                        state.replacer.set_evictable(frame_id, true);
                    }
                    last_err = Some(e);
                }
            }
            drop(latch);
        }

        Err(last_err.unwrap_or(Error::PoolExhausted))
    }
}
