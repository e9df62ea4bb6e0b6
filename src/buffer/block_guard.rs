//! RAII guard for pinned block access.
//!
//! [`PinnedBlock`] is what [`BufferPool::get_block`] hands out: the block is
//! pinned for as long as the guard lives and unpinned when it drops, on
//! every exit path including `?` and panics.

use std::fmt;

use parking_lot::{MappedRwLockReadGuard, RwLockReadGuard};

use crate::common::{BlockId, FrameId, Result};

use super::buffer_pool::BufferPool;

/// A pinned block in the buffer pool.
///
/// Several guards may pin the same block at once; they all see the one
/// cached copy.
///
/// # Example
/// ```ignore
/// let block = pool.get_block(&file, 0)?;
/// let header = block.read()[..8].to_vec();
/// block.write(&new_bytes, false)?;
/// // block drops here, pin released
/// ```
pub struct PinnedBlock<'a> {
    pool: &'a BufferPool,
    frame_id: FrameId,
    block_id: BlockId,
}

impl<'a> PinnedBlock<'a> {
    /// Called by `BufferPool::get_block()` after pinning the frame.
    pub(crate) fn new(pool: &'a BufferPool, frame_id: FrameId, block_id: BlockId) -> Self {
        Self {
            pool,
            frame_id,
            block_id,
        }
    }

    #[inline]
    pub fn id(&self) -> &BlockId {
        &self.block_id
    }

    /// Block offset within its file.
    #[inline]
    pub fn offset(&self) -> u32 {
        self.block_id.offset
    }

    #[inline]
    pub fn frame_id(&self) -> FrameId {
        self.frame_id
    }

    /// The block's meaningful bytes (`effective_bytes` of them).
    ///
    /// Counts as an access for LRU. Drop the returned guard before calling
    /// [`write`](Self::write) on the same block.
    pub fn read(&self) -> MappedRwLockReadGuard<'_, [u8]> {
        self.pool.touch(self.frame_id);
        RwLockReadGuard::map(self.pool.frame(self.frame_id).data(), |data| data.read())
    }

    /// Replace the block's contents, marking it dirty.
    ///
    /// # Errors
    /// `Error::OversizedWrite` if `data` exceeds the block size and
    /// `allow_truncate` is false.
    pub fn write(&self, data: &[u8], allow_truncate: bool) -> Result<()> {
        let frame = self.pool.frame(self.frame_id);
        frame.data_mut().write(data, allow_truncate)?;
        frame.mark_dirty();
        self.pool.touch(self.frame_id);
        Ok(())
    }

    pub fn effective_bytes(&self) -> usize {
        self.pool.frame(self.frame_id).data().effective_bytes()
    }

    pub fn is_dirty(&self) -> bool {
        self.pool.frame(self.frame_id).is_dirty()
    }

    pub fn pin_count(&self) -> u32 {
        self.pool.frame(self.frame_id).pin_count()
    }
}

impl fmt::Debug for PinnedBlock<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PinnedBlock")
            .field("block_id", &self.block_id)
            .field("frame_id", &self.frame_id)
            .finish()
    }
}

impl Drop for PinnedBlock<'_> {
    fn drop(&mut self) {
        // The guard owns exactly one pin, so this cannot underflow unless
        // someone unpinned through the pool behind the guard's back.
        if let Err(e) = self.pool.unpin_frame(self.frame_id, &self.block_id) {
            tracing::warn!(block = %self.block_id, error = %e, "pin released twice");
        }
    }
}
