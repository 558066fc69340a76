//! Frame identifier type.

use std::fmt;

/// Index of a fixed memory slot in the buffer pool, in `[0, pool_size)`.
///
/// Frames live in a `Vec<Frame>` allocated once at construction, so the id
/// is used directly as an index: `frames[frame_id.0]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameId(pub usize);

impl FrameId {
    /// Create a new FrameId.
    #[inline]
    pub fn new(id: usize) -> Self {
        FrameId(id)
    }
}

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Frame({})", self.0)
    }
}
