//! Page type.
//!
//! [`Page`] is the raw 4KB data container. The on-disk layout carries no
//! header; every byte belongs to the caller.

#[allow(clippy::module_inception)]
mod page;

pub use page::Page;
