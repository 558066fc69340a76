//! Disk Manager - synchronous byte I/O for database pages.
//!
//! The [`DiskManager`] is the persistent page store: it maps a [`PageId`]
//! to a byte range of one backing file and nothing more.

use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::Path;

use tracing::trace;

use crate::common::config::PAGE_SIZE;
use crate::common::{Error, PageId, Result};
use crate::storage::page::Page;

/// Reads and writes whole pages of a single database file.
///
/// # File Layout
/// The database is stored as a single file with pages laid out sequentially:
/// ```text
/// ┌─────────┬─────────┬─────────┬─────────┬─────────┐
/// │ Page 0  │ Page 1  │ Page 2  │  ...    │ Page N  │
/// │ (4KB)   │ (4KB)   │ (4KB)   │         │ (4KB)   │
/// └─────────┴─────────┴─────────┴─────────┴─────────┘
/// Offset:  0      4096     8192    ...    N×4096
/// ```
///
/// There is no file header. Writing page N extends the file as needed;
/// any skipped pages read back as zeros.
///
/// # Thread Safety
/// `DiskManager` is **single-threaded**. It is owned by the
/// [`DiskScheduler`](crate::storage::DiskScheduler) worker, which serializes
/// all access.
///
/// # Durability
/// By default every write is followed by `fdatasync`, see
/// [`DiskManager::with_sync_on_write`].
pub struct DiskManager {
    file: File,
    /// Current length of the file in bytes.
    len: u64,
    sync_on_write: bool,
    /// Writes to this page or beyond fail, to exercise error paths.
    #[cfg(test)]
    fail_writes_from: Option<PageId>,
}

impl DiskManager {
    /// Create a new database file.
    ///
    /// # Errors
    /// Returns an error if the file already exists or cannot be created.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;

        Ok(Self {
            file,
            len: 0,
            sync_on_write: true,
            #[cfg(test)]
            fail_writes_from: None,
        })
    }

    /// Open an existing database file.
    ///
    /// # Errors
    /// Returns an error if the file doesn't exist or cannot be opened.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        let len = file.metadata()?.len();

        Ok(Self {
            file,
            len,
            sync_on_write: true,
            #[cfg(test)]
            fail_writes_from: None,
        })
    }

    /// Open an existing database file, or create if it doesn't exist.
    pub fn open_or_create<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            Self::open(path)
        } else {
            Self::create(path)
        }
    }

    /// Toggle the `fdatasync` after each page write.
    #[must_use]
    pub fn with_sync_on_write(mut self, sync: bool) -> Self {
        self.sync_on_write = sync;
        self
    }

    /// Reject every write to `first` or any later page.
    #[cfg(test)]
    pub(crate) fn with_failing_writes_from(mut self, first: PageId) -> Self {
        self.fail_writes_from = Some(first);
        self
    }

    /// Read a page into `page`.
    ///
    /// # Errors
    /// - `Error::ShortRead` if fewer than `PAGE_SIZE` bytes exist at the
    ///   page's offset
    /// - `Error::InvalidPage` for the INVALID sentinel
    pub fn read_page(&mut self, page_id: PageId, page: &mut Page) -> Result<()> {
        if !page_id.is_valid() {
            return Err(Error::InvalidPage(page_id));
        }

        let offset = page_id.file_offset();
        let available = self.len.saturating_sub(offset);
        if available < PAGE_SIZE as u64 {
            return Err(Error::ShortRead {
                page_id,
                expected: PAGE_SIZE,
                actual: available as usize,
            });
        }

        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(page.as_mut_slice()).map_err(|e| {
            if e.kind() == ErrorKind::UnexpectedEof {
                // File shrank underneath us.
                Error::ShortRead {
                    page_id,
                    expected: PAGE_SIZE,
                    actual: 0,
                }
            } else {
                Error::Io(e)
            }
        })?;

        trace!(page = %page_id, "disk.read");
        Ok(())
    }

    /// Write a page, extending the file if needed.
    ///
    /// Rewriting identical bytes leaves the file unchanged.
    pub fn write_page(&mut self, page_id: PageId, page: &Page) -> Result<()> {
        if !page_id.is_valid() {
            return Err(Error::InvalidPage(page_id));
        }

        #[cfg(test)]
        if self.fail_writes_from.is_some_and(|first| page_id.0 >= first.0) {
            return Err(Error::Io(std::io::Error::other("write rejected")));
        }

        let offset = page_id.file_offset();
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(page.as_slice())?;
        if self.sync_on_write {
            self.file.sync_data()?;
        }

        self.len = self.len.max(offset + PAGE_SIZE as u64);
        trace!(page = %page_id, "disk.write");
        Ok(())
    }

    /// Force all written data to stable storage.
    pub fn sync(&mut self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }

    /// Number of pages the file spans.
    ///
    /// A trailing partial page counts, so it is addressable and reports
    /// `ShortRead` rather than disappearing.
    #[inline]
    pub fn page_count(&self) -> u32 {
        self.len.div_ceil(PAGE_SIZE as u64) as u32
    }

    /// Get the total size of the database file in bytes.
    #[inline]
    pub fn file_size(&self) -> u64 {
        self.len
    }
}
