//! Error types for the buffer pool.

use thiserror::Error;

use super::PageId;

/// Convenient Result type alias.
///
/// Instead of writing `Result<T, Error>` everywhere, we can write `Result<T>`.
pub type Result<T> = std::result::Result<T, Error>;

/// All errors the buffer pool and its storage layer can report.
///
/// Every fallible operation returns one of these; nothing in the crate
/// aborts the process on a storage fault. Callers decide what is fatal.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error from the backing file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The backing file holds fewer than a full page at the page's offset.
    ///
    /// Signals corruption or a read beyond the allocated extent.
    #[error("short read of {page_id}: expected {expected} bytes, got {actual}")]
    ShortRead {
        page_id: PageId,
        expected: usize,
        actual: usize,
    },

    /// The page id was never allocated, or has been deleted.
    #[error("invalid page: {0}")]
    InvalidPage(PageId),

    /// Delete attempted while the page is still pinned by a guard.
    #[error("{0} is pinned")]
    PagePinned(PageId),

    /// No free frame and every resident frame is pinned.
    #[error("buffer pool exhausted: every frame is pinned")]
    PoolExhausted,

    /// The guard was released or moved from.
    #[error("page guard has been invalidated")]
    GuardInvalidated,

    /// The replacer has no evictable frame.
    ///
    /// Internal signal; the buffer pool converts it to [`Error::PoolExhausted`].
    #[error("no evictable frame")]
    NoVictim,

    /// The disk scheduler's worker is no longer accepting requests.
    #[error("disk scheduler is closed")]
    SchedulerClosed,

    /// A configuration value is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// One or more pages failed to flush during a flush-all.
    #[error("failed to flush {} page(s)", .0.len())]
    FlushFailed(Vec<(PageId, Error)>),
}

impl Error {
    /// Whether the error originated in the storage layer.
    pub fn is_io(&self) -> bool {
        matches!(
            self,
            Error::Io(_) | Error::ShortRead { .. } | Error::SchedulerClosed
        )
    }
}
