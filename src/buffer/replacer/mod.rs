//! Eviction policy (replacer).
//!
//! - [`LruKReplacer`] - backward k-distance ranking, LRU among frames with
//!   fewer than K accesses

mod lru_k;

pub use lru_k::{KDistance, LruKReplacer};
