//! LRU-K replacement policy.
//!
//! Ranks frames by *backward k-distance*: the gap between the current
//! logical time and a frame's k-th most recent access. Frames with fewer than
//! K recorded accesses have infinite distance and are evicted first.

use std::collections::VecDeque;

use crate::common::{Error, FrameId, Result};

/// Backward k-distance of a tracked frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KDistance {
    /// Fewer than K accesses recorded.
    Infinite,
    /// `now - timestamp of the k-th most recent access`.
    Finite(u64),
}

/// Per-frame bookkeeping.
#[derive(Debug)]
struct LruKNode {
    /// Most recent K access timestamps, oldest at the front.
    history: VecDeque<u64>,
    is_evictable: bool,
}

impl LruKNode {
    fn new(k: usize) -> Self {
        Self {
            history: VecDeque::with_capacity(k),
            is_evictable: false,
        }
    }
}

/// Victim ordering key; the smallest key is evicted.
///
/// Infinite-distance frames sort first, ordered by most recent access
/// (never-accessed frames before all others). Finite-distance frames follow,
/// ordered by their k-th most recent access, earliest first. Timestamps are
/// unique, and the frame id settles anything left.
type VictimKey = (u8, Option<u64>, FrameId);

/// LRU-K replacer over a fixed range of frame ids.
///
/// Not internally synchronized: the buffer pool keeps it inside its
/// pool-wide mutex together with the page table and free list.
///
/// # Example
/// ```
/// use pagepool::buffer::replacer::LruKReplacer;
/// use pagepool::FrameId;
///
/// let mut replacer = LruKReplacer::new(3, 2);
/// replacer.record_access(FrameId::new(0));
/// replacer.record_access(FrameId::new(1));
/// replacer.record_access(FrameId::new(0));
/// replacer.set_evictable(FrameId::new(0), true);
/// replacer.set_evictable(FrameId::new(1), true);
///
/// // Frame 1 has a single access, so its k-distance is infinite.
/// assert_eq!(replacer.evict().unwrap(), FrameId::new(1));
/// ```
#[derive(Debug)]
pub struct LruKReplacer {
    /// Indexed by frame id; `None` for untracked frames.
    nodes: Vec<Option<LruKNode>>,
    /// Logical clock, advanced on every recorded access.
    current_timestamp: u64,
    k: usize,
    /// Number of tracked frames that are evictable.
    evictable_count: usize,
}

impl LruKReplacer {
    /// Create a replacer for frame ids in `[0, capacity)`.
    ///
    /// # Panics
    /// Panics if `k` is 0.
    pub fn new(capacity: usize, k: usize) -> Self {
        assert!(k > 0, "k must be > 0");
        Self {
            nodes: (0..capacity).map(|_| None).collect(),
            current_timestamp: 0,
            k,
            evictable_count: 0,
        }
    }

    /// Record an access to `frame_id` at the current logical time.
    ///
    /// Starts tracking the frame (as non-evictable) if it was untracked.
    /// Only the last K timestamps are kept.
    ///
    /// # Panics
    /// Panics if `frame_id` is out of range.
    pub fn record_access(&mut self, frame_id: FrameId) {
        let k = self.k;
        let timestamp = self.current_timestamp;
        self.current_timestamp += 1;

        let node = self.slot(frame_id).get_or_insert_with(|| LruKNode::new(k));
        node.history.push_back(timestamp);
        if node.history.len() > k {
            node.history.pop_front();
        }
    }

    /// Mark a frame evictable or not.
    ///
    /// The buffer pool calls this on pin-count transitions to and from zero.
    /// Making an untracked frame evictable starts tracking it with an empty
    /// history. Making an untracked frame non-evictable does nothing.
    ///
    /// # Panics
    /// Panics if `frame_id` is out of range.
    pub fn set_evictable(&mut self, frame_id: FrameId, evictable: bool) {
        let k = self.k;
        let slot = self.slot(frame_id);

        if slot.is_none() && !evictable {
            return;
        }
        let node = slot.get_or_insert_with(|| LruKNode::new(k));

        let was_evictable = node.is_evictable;
        node.is_evictable = evictable;
        match (was_evictable, evictable) {
            (false, true) => self.evictable_count += 1,
            (true, false) => self.evictable_count -= 1,
            _ => {}
        }
    }

    /// Evict the evictable frame with the largest backward k-distance.
    ///
    /// The frame's history is dropped; it is untracked afterwards.
    ///
    /// # Errors
    /// `Error::NoVictim` if no frame is evictable.
    pub fn evict(&mut self) -> Result<FrameId> {
        let victim = self.peek_victim(&[]).ok_or(Error::NoVictim)?;
        self.nodes[victim.0] = None;
        self.evictable_count -= 1;
        Ok(victim)
    }

    /// The frame [`evict`](Self::evict) would pick, passing over `skip`.
    ///
    /// Leaves the replacer untouched, so a candidate that turns out not to
    /// be reclaimable keeps its history and its place in the order.
    pub fn peek_victim(&self, skip: &[FrameId]) -> Option<FrameId> {
        self.nodes
            .iter()
            .enumerate()
            .filter_map(|(idx, slot)| match slot {
                Some(node) if node.is_evictable && !skip.contains(&FrameId(idx)) => {
                    Some(self.victim_key(FrameId(idx), node))
                }
                _ => None,
            })
            .min()
            .map(|(_, _, frame_id)| frame_id)
    }

    /// Drop a frame's history without evicting it.
    ///
    /// Used when a page is deleted. Untracked frames are ignored.
    ///
    /// # Panics
    /// Panics if `frame_id` is out of range.
    pub fn remove(&mut self, frame_id: FrameId) {
        if let Some(node) = self.slot(frame_id).take() {
            if node.is_evictable {
                self.evictable_count -= 1;
            }
        }
    }

    /// Backward k-distance of a tracked frame, `None` if untracked.
    pub fn k_distance(&self, frame_id: FrameId) -> Option<KDistance> {
        let node = self.nodes.get(frame_id.0)?.as_ref()?;
        if node.history.len() < self.k {
            Some(KDistance::Infinite)
        } else {
            node.history
                .front()
                .map(|&kth| KDistance::Finite(self.current_timestamp - kth))
        }
    }

    /// Whether `frame_id` is tracked and evictable.
    pub fn is_evictable(&self, frame_id: FrameId) -> bool {
        matches!(self.nodes.get(frame_id.0), Some(Some(node)) if node.is_evictable)
    }

    /// Number of evictable frames.
    pub fn size(&self) -> usize {
        self.evictable_count
    }

    /// Number of frame ids this replacer covers.
    pub fn capacity(&self) -> usize {
        self.nodes.len()
    }

    /// History depth.
    pub fn k(&self) -> usize {
        self.k
    }

    fn victim_key(&self, frame_id: FrameId, node: &LruKNode) -> VictimKey {
        if node.history.len() < self.k {
            (0, node.history.back().copied(), frame_id)
        } else {
            (1, node.history.front().copied(), frame_id)
        }
    }

    fn slot(&mut self, frame_id: FrameId) -> &mut Option<LruKNode> {
        let capacity = self.nodes.len();
        assert!(
            frame_id.0 < capacity,
            "{} out of range for replacer of {} frames",
            frame_id,
            capacity
        );
        &mut self.nodes[frame_id.0]
    }
}
