//! LRU (Least-Recently-Used) replacement policy.

use std::collections::{BTreeMap, HashMap};

use crate::common::FrameId;

/// Tracks the recency of every occupied frame.
///
/// Each access stamps the frame with the next value of a logical clock, so
/// "oldest access" is exact and independent of wall-clock resolution.
/// Reads and writes both count as accesses: recency reflects use, not just
/// mutation.
///
/// Pin state is *not* tracked here. The pool passes a predicate to
/// [`victim`](Self::victim) so that a frame pinned an instant ago is never
/// chosen from stale bookkeeping.
#[derive(Debug, Default)]
pub struct LruReplacer {
    /// Logical clock, bumped on every access.
    clock: u64,
    /// Access stamp → frame, oldest first.
    by_stamp: BTreeMap<u64, FrameId>,
    /// Frame → its current access stamp.
    stamps: HashMap<FrameId, u64>,
}

impl LruReplacer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that a frame was accessed now.
    pub fn record_access(&mut self, frame_id: FrameId) {
        self.clock += 1;
        if let Some(old) = self.stamps.insert(frame_id, self.clock) {
            self.by_stamp.remove(&old);
        }
        self.by_stamp.insert(self.clock, frame_id);
    }

    /// The frame's last access stamp, if tracked.
    pub fn last_access(&self, frame_id: FrameId) -> Option<u64> {
        self.stamps.get(&frame_id).copied()
    }

    /// Pick and forget the least-recently-used frame accepted by
    /// `evictable`, or `None` if no tracked frame qualifies.
    pub fn victim(&mut self, evictable: impl Fn(FrameId) -> bool) -> Option<FrameId> {
        let (stamp, frame_id) = self
            .by_stamp
            .iter()
            .find(|&(_, &fid)| evictable(fid))
            .map(|(&stamp, &fid)| (stamp, fid))?;

        self.by_stamp.remove(&stamp);
        self.stamps.remove(&frame_id);
        Some(frame_id)
    }

    /// Stop tracking a frame (its block left the pool).
    pub fn remove(&mut self, frame_id: FrameId) {
        if let Some(stamp) = self.stamps.remove(&frame_id) {
            self.by_stamp.remove(&stamp);
        }
    }

    /// Number of tracked frames.
    pub fn len(&self) -> usize {
        self.stamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stamps.is_empty()
    }
}
