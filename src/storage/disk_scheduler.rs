//! Disk Scheduler - a single worker thread in front of the [`DiskManager`].
//!
//! Callers submit [`DiskRequest`]s and get an [`IoTicket`] back. The worker
//! services requests strictly in submission order, which gives the
//! per-page ordering the buffer pool relies on: a write of page P submitted
//! before a read of P is always serviced first.

use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};

use tracing::{debug, warn};

use crate::common::{Error, PageId, Result};
use crate::storage::page::Page;
use crate::storage::DiskManager;

/// A single I/O request for the worker.
///
/// Buffers are owned: a read hands back a freshly filled page, a write takes
/// the bytes to persist. Each request carries the sender half of its
/// completion channel.
pub enum DiskRequest {
    /// Read `page_id` and send the page bytes back.
    Read {
        page_id: PageId,
        done: Sender<Result<Box<Page>>>,
    },
    /// Write `data` to `page_id` and acknowledge.
    Write {
        page_id: PageId,
        data: Box<Page>,
        done: Sender<Result<()>>,
    },
}

impl DiskRequest {
    /// Page this request targets.
    pub fn page_id(&self) -> PageId {
        match self {
            DiskRequest::Read { page_id, .. } | DiskRequest::Write { page_id, .. } => *page_id,
        }
    }
}

/// Completion handle for a scheduled request.
///
/// Submission never blocks; [`IoTicket::wait`] blocks until the worker has
/// serviced the request.
#[must_use = "an IoTicket must be waited on to observe the I/O result"]
pub struct IoTicket<T> {
    rx: Receiver<Result<T>>,
}

impl<T> IoTicket<T> {
    /// Block until the request completes.
    ///
    /// # Errors
    /// The request's own I/O error, or `Error::SchedulerClosed` if the
    /// worker went away without answering.
    pub fn wait(self) -> Result<T> {
        self.rx.recv().map_err(|_| Error::SchedulerClosed)?
    }
}

/// Serializes page I/O onto one background thread.
///
/// Dropping the scheduler closes the queue; the worker drains every request
/// already submitted and then exits, and the drop joins it.
pub struct DiskScheduler {
    tx: Option<Sender<DiskRequest>>,
    worker: Option<JoinHandle<()>>,
}

impl DiskScheduler {
    /// Spawn the worker thread, handing it ownership of `disk_manager`.
    pub fn new(disk_manager: DiskManager) -> Result<Self> {
        let (tx, rx) = mpsc::channel();

        let worker = thread::Builder::new()
            .name("disk-scheduler".into())
            .spawn(move || run_worker(disk_manager, rx))?;

        Ok(Self {
            tx: Some(tx),
            worker: Some(worker),
        })
    }

    /// Queue a request.
    ///
    /// # Errors
    /// `Error::SchedulerClosed` if the worker has exited.
    pub fn schedule(&self, request: DiskRequest) -> Result<()> {
        let tx = self.tx.as_ref().ok_or(Error::SchedulerClosed)?;
        tx.send(request).map_err(|_| Error::SchedulerClosed)
    }

    /// Queue a read of `page_id`.
    pub fn schedule_read(&self, page_id: PageId) -> Result<IoTicket<Box<Page>>> {
        let (done, rx) = mpsc::channel();
        self.schedule(DiskRequest::Read { page_id, done })?;
        Ok(IoTicket { rx })
    }

    /// Queue a write of `data` to `page_id`.
    pub fn schedule_write(&self, page_id: PageId, data: Box<Page>) -> Result<IoTicket<()>> {
        let (done, rx) = mpsc::channel();
        self.schedule(DiskRequest::Write {
            page_id,
            data,
            done,
        })?;
        Ok(IoTicket { rx })
    }
}

impl Drop for DiskScheduler {
    fn drop(&mut self) {
        // Closing the channel ends the worker loop once the queue is empty.
        self.tx.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("disk.worker_panicked");
            }
        }
    }
}

fn run_worker(mut disk_manager: DiskManager, rx: Receiver<DiskRequest>) {
    debug!("disk.worker_started");

    while let Ok(request) = rx.recv() {
        match request {
            DiskRequest::Read { page_id, done } => {
                let mut page = Page::new_boxed();
                let result = disk_manager
                    .read_page(page_id, &mut page)
                    .map(|()| page);
                if let Err(e) = &result {
                    warn!(page = %page_id, error = %e, "disk.read_failed");
                }
                // The requester may have given up; that is not our error.
                let _ = done.send(result);
            }
            DiskRequest::Write {
                page_id,
                data,
                done,
            } => {
                let result = disk_manager.write_page(page_id, &data);
                if let Err(e) = &result {
                    warn!(page = %page_id, error = %e, "disk.write_failed");
                }
                let _ = done.send(result);
            }
        }
    }

    debug!("disk.worker_stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn create_scheduler() -> (DiskScheduler, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let dm = DiskManager::create(dir.path().join("test.db"))
            .unwrap()
            .with_sync_on_write(false);
        (DiskScheduler::new(dm).unwrap(), dir)
    }

    fn page_with(byte: u8) -> Box<Page> {
        let mut page = Page::new_boxed();
        page.as_mut_slice().fill(byte);
        page
    }

    #[test]
    fn test_write_then_read() {
        let (scheduler, _dir) = create_scheduler();

        scheduler
            .schedule_write(PageId::new(0), page_with(0xAB))
            .unwrap()
            .wait()
            .unwrap();

        let page = scheduler
            .schedule_read(PageId::new(0))
            .unwrap()
            .wait()
            .unwrap();
        assert!(page.as_slice().iter().all(|&b| b == 0xAB));
    }

    #[test]
    fn test_write_then_read_same_page_not_reordered() {
        let (scheduler, _dir) = create_scheduler();

        // Submit both before waiting on either.
        let write = scheduler
            .schedule_write(PageId::new(2), page_with(0x11))
            .unwrap();
        let read = scheduler.schedule_read(PageId::new(2)).unwrap();

        let page = read.wait().unwrap();
        write.wait().unwrap();
        assert_eq!(page.as_slice()[0], 0x11);
    }

    #[test]
    fn test_many_queued_requests_serviced_in_order() {
        let (scheduler, _dir) = create_scheduler();

        let writes: Vec<_> = (0u8..16)
            .map(|i| {
                scheduler
                    .schedule_write(PageId::new(0), page_with(i))
                    .unwrap()
            })
            .collect();
        let read = scheduler.schedule_read(PageId::new(0)).unwrap();

        for w in writes {
            w.wait().unwrap();
        }
        assert_eq!(read.wait().unwrap().as_slice()[0], 15);
    }

    #[test]
    fn test_read_error_is_delivered() {
        let (scheduler, _dir) = create_scheduler();

        let result = scheduler.schedule_read(PageId::new(7)).unwrap().wait();
        assert!(matches!(result, Err(Error::ShortRead { .. })));

        // The worker survives a failed request.
        scheduler
            .schedule_write(PageId::new(7), page_with(1))
            .unwrap()
            .wait()
            .unwrap();
    }

    #[test]
    fn test_raw_request() {
        let (scheduler, _dir) = create_scheduler();
        let (done, rx) = mpsc::channel();

        let request = DiskRequest::Write {
            page_id: PageId::new(1),
            data: page_with(3),
            done,
        };
        assert_eq!(request.page_id(), PageId::new(1));
        scheduler.schedule(request).unwrap();

        rx.recv().unwrap().unwrap();
    }

    #[test]
    fn test_drop_drains_queue() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");

        {
            let dm = DiskManager::create(&path).unwrap();
            let scheduler = DiskScheduler::new(dm).unwrap();
            for i in 0..8u32 {
                // Tickets dropped unobserved; the writes still happen.
                let _ = scheduler.schedule_write(PageId::new(i), page_with(i as u8));
            }
        }

        let dm = DiskManager::open(&path).unwrap();
        assert_eq!(dm.page_count(), 8);
    }

    #[test]
    fn test_concurrent_submitters() {
        use std::sync::Arc;

        let (scheduler, _dir) = create_scheduler();
        let scheduler = Arc::new(scheduler);

        let handles: Vec<_> = (0..4u32)
            .map(|t| {
                let scheduler = Arc::clone(&scheduler);
                thread::spawn(move || {
                    for round in 0..10u8 {
                        let pid = PageId::new(t);
                        scheduler
                            .schedule_write(pid, page_with(round))
                            .unwrap()
                            .wait()
                            .unwrap();
                        let page = scheduler.schedule_read(pid).unwrap().wait().unwrap();
                        assert_eq!(page.as_slice()[0], round);
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }
    }
}
