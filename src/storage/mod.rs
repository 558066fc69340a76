//! Storage layer - disk I/O and the page container.
//!
//! - [`DiskManager`] - Synchronous page reads/writes against one file
//! - [`DiskScheduler`] - Background worker that serializes requests to it
//! - [`page`] - The raw page buffer

mod disk_manager;
mod disk_scheduler;
pub mod page;

pub use disk_manager::DiskManager;
pub use disk_scheduler::{DiskRequest, DiskScheduler, IoTicket};
