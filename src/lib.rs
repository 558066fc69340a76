//! pagepool - a disk-backed buffer pool.
//!
//! A fixed set of in-memory frames stands in for a much larger file of
//! fixed-size pages. Callers get pages through scoped guards that pin and
//! latch them; the pool loads, evicts (LRU-K) and writes pages back behind
//! their backs.
//!
//! # Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │        callers (indexes, heap files, executor)                  │
//! │                              ↓                                  │
//! │  ┌─────────────────────────────────────────────────────────┐   │
//! │  │                 Buffer Pool (buffer/)                    │   │
//! │  │   BufferPoolManager + Frame + PageGuards + Statistics    │   │
//! │  │            LruKReplacer (victim selection)               │   │
//! │  └─────────────────────────────────────────────────────────┘   │
//! │                              ↓                                  │
//! │  ┌─────────────────────────────────────────────────────────┐   │
//! │  │                Storage Layer (storage/)                  │   │
//! │  │      DiskScheduler (I/O worker) → DiskManager + Page     │   │
//! │  └─────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//! - [`common`] - Shared primitives (PageId, FrameId, Error, config)
//! - [`buffer`] - Buffer pool management and eviction
//! - [`storage`] - Disk I/O and the page buffer
//!
//! # Quick Start
//! ```no_run
//! use pagepool::{BufferPoolManager, DiskManager};
//!
//! # fn main() -> pagepool::Result<()> {
//! let dm = DiskManager::open_or_create("my_database.db")?;
//! let bpm = BufferPoolManager::new(64, dm)?;
//!
//! let page_id = {
//!     let mut guard = bpm.new_page()?;
//!     guard.data_mut()?[..5].copy_from_slice(b"hello");
//!     guard.page_id()
//! };
//!
//! let guard = bpm.fetch_page_read(page_id)?;
//! assert_eq!(&guard.data()?[..5], b"hello");
//! drop(guard);
//!
//! bpm.flush_all_pages()?;
//! # Ok(())
//! # }
//! ```

pub mod buffer;
pub mod common;
pub mod storage;

// Re-export commonly used items at crate root for convenience
pub use common::config::PAGE_SIZE;
pub use common::{BufferPoolConfig, Error, FrameId, PageId, Result};

pub use buffer::{
    AccessMode, BasicPageGuard, BufferPoolManager, BufferPoolStats, Frame, PageGuard,
    PageReadGuard, PageWriteGuard, StatsSnapshot,
};
pub use storage::page::Page;
pub use storage::{DiskManager, DiskScheduler};
