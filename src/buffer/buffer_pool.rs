//! Buffer Pool - the block caching layer.
//!
//! The [`BufferPool`] provides:
//! - One cached copy per `(file, block offset)`
//! - Pin-based reference counting
//! - True LRU eviction over unpinned blocks, with dirty write-back
//! - Detaching a file's blocks when the file is dropped

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::buffer::replacer::LruReplacer;
use crate::buffer::{BufferPoolStats, Frame, PinnedBlock};
use crate::common::{BlockId, Error, FileId, FrameId, Result, StorageConfig};
use crate::storage::BlockStore;

/// Mapping and free-frame bookkeeping, guarded together so that lookup,
/// load and eviction of a block happen as one step.
struct PoolState {
    block_table: HashMap<BlockId, FrameId>,
    free_list: Vec<FrameId>,
    /// Frames whose file was detached while they were still pinned.
    detached: Vec<FrameId>,
}

/// Caches blocks of any number of files in a bounded set of frames.
///
/// # Architecture
/// ```text
/// ┌─────────────────────────────────────────────────────────────┐
/// │                        BufferPool                           │
/// │  ┌──────────────┐  ┌───────────────────────────────────┐    │
/// │  │ block_table  │  │        frames: Vec<Frame>         │    │
/// │  │BlockId → Fid │─▶│  [Frame0] [Frame1] [Frame2] ...   │    │
/// │  └──────────────┘  └───────────────────────────────────┘    │
/// │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐       │
/// │  │  free_list   │  │   replacer   │  │ block_store  │       │
/// │  │ Vec<FrameId> │  │ LruReplacer  │  │              │       │
/// │  └──────────────┘  └──────────────┘  └──────────────┘       │
/// └─────────────────────────────────────────────────────────────┘
/// ```
///
/// One pool is built at process start and shared (`Arc<BufferPool>`) by
/// every record file and index tree, which keeps the one-copy-per-block
/// invariant without global state.
///
/// # Thread Safety
/// The pool itself is `Sync`. It does not serialize writers of the same
/// file: callers must ensure one logical writer per table/index file.
pub struct BufferPool {
    /// Fixed pool of frames allocated at startup.
    frames: Vec<Frame>,

    state: Mutex<PoolState>,

    /// Recency of every occupied frame. Lock order: `state` → `replacer`.
    replacer: Mutex<LruReplacer>,

    store: BlockStore,

    stats: BufferPoolStats,

    capacity: usize,
}

impl BufferPool {
    /// Create a pool of `capacity` blocks over `store`.
    ///
    /// # Panics
    /// Panics if `capacity` is 0.
    pub fn new(capacity: usize, store: BlockStore) -> Self {
        assert!(capacity > 0, "capacity must be > 0");

        let block_size = store.block_size();
        let frames: Vec<Frame> = (0..capacity).map(|_| Frame::new(block_size)).collect();

        // Reversed so that frame 0 is handed out first.
        let free_list: Vec<FrameId> = (0..capacity).rev().map(FrameId).collect();

        Self {
            frames,
            state: Mutex::new(PoolState {
                block_table: HashMap::new(),
                free_list,
                detached: Vec::new(),
            }),
            replacer: Mutex::new(LruReplacer::new()),
            store,
            stats: BufferPoolStats::new(),
            capacity,
        }
    }

    /// Create a pool sized by `config`.
    pub fn from_config(config: &StorageConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::new(
            config.pool_blocks,
            BlockStore::new(config.block_size),
        ))
    }

    // ========================================================================
    // Public API: block access
    // ========================================================================

    /// Fetch block `offset` of `file`, pinned for the life of the guard.
    ///
    /// A cached block is returned as is. Otherwise it is loaded (zero-filled
    /// past the end of the file) into a free frame, evicting the least
    /// recently used unpinned block if the pool is full.
    ///
    /// # Errors
    /// - `Error::BufferExhausted` if every cached block is pinned
    /// - I/O errors loading the block or writing back the victim,
    ///   including `NotFound` if `file` doesn't exist
    pub fn get_block(&self, file: &FileId, offset: u32) -> Result<PinnedBlock<'_>> {
        let id = BlockId::new(file.clone(), offset);
        let frame_id = self.fetch_frame(&id)?;
        Ok(PinnedBlock::new(self, frame_id, id))
    }

    /// Add a pin to a block without a guard, loading it if needed.
    ///
    /// Must be balanced by [`unpin`](Self::unpin). Returns the new count.
    pub fn pin(&self, id: &BlockId) -> Result<u32> {
        let frame_id = self.fetch_frame(id)?;
        Ok(self.frames[frame_id.0].pin_count())
    }

    /// Remove one pin from a block. Returns the new count.
    ///
    /// A block whose file was detached while pinned is still found here,
    /// so its pin can be released and its frame recycled.
    ///
    /// # Errors
    /// `Error::UnpinUnderflow` if the block is not pinned (or not cached).
    pub fn unpin(&self, id: &BlockId) -> Result<u32> {
        let frame_id = {
            let state = self.state.lock();
            state.block_table.get(id).copied().or_else(|| {
                state
                    .detached
                    .iter()
                    .copied()
                    .find(|fid| self.frames[fid.0].block_id().as_ref() == Some(id))
            })
        };
        let frame_id = frame_id.ok_or_else(|| Error::UnpinUnderflow(id.clone()))?;
        self.unpin_frame(frame_id, id)
    }

    // ========================================================================
    // Public API: write-back and detach
    // ========================================================================

    /// Write back one block if it is cached and dirty.
    pub fn flush_block(&self, id: &BlockId) -> Result<()> {
        let state = self.state.lock();
        if let Some(&frame_id) = state.block_table.get(id) {
            self.flush_frame(frame_id, id)?;
        }
        Ok(())
    }

    /// Write back every dirty block, without evicting anything.
    pub fn flush_all(&self) -> Result<()> {
        let state = self.state.lock();
        for (id, &frame_id) in state.block_table.iter() {
            self.flush_frame(frame_id, id)?;
        }
        Ok(())
    }

    /// Drop every cached block of `file` without writing it back.
    ///
    /// Used when the file itself is being removed. A block still pinned by
    /// a guard leaves the table immediately; its frame is recycled when the
    /// last pin goes, and writes made through it until then are discarded.
    pub fn detach(&self, file: &FileId) {
        let mut state = self.state.lock();
        let doomed: Vec<(BlockId, FrameId)> = state
            .block_table
            .iter()
            .filter(|(id, _)| id.file == *file)
            .map(|(id, &fid)| (id.clone(), fid))
            .collect();

        for (id, frame_id) in &doomed {
            state.block_table.remove(id);
            let frame = &self.frames[frame_id.0];
            frame.clear_dirty();
            if frame.is_pinned() {
                frame.mark_detached();
                state.detached.push(*frame_id);
            } else {
                frame.reset();
                self.replacer.lock().remove(*frame_id);
                state.free_list.push(*frame_id);
            }
        }

        tracing::debug!(file = %file, blocks = doomed.len(), "detached file from buffer pool");
    }

    /// Detach `file` and delete it from disk.
    pub fn remove_file(&self, file: &FileId) -> Result<()> {
        self.detach(file);
        self.store.remove_file(file)
    }

    // ========================================================================
    // Public API: stats and info
    // ========================================================================

    pub fn stats(&self) -> &BufferPoolStats {
        &self.stats
    }

    /// Maximum number of cached blocks.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn block_size(&self) -> usize {
        self.store.block_size()
    }

    /// The underlying block I/O component.
    pub fn store(&self) -> &BlockStore {
        &self.store
    }

    /// Number of blocks currently cached.
    pub fn cached_blocks(&self) -> usize {
        self.state.lock().block_table.len()
    }

    pub fn free_frame_count(&self) -> usize {
        self.state.lock().free_list.len()
    }

    pub fn contains(&self, id: &BlockId) -> bool {
        self.state.lock().block_table.contains_key(id)
    }

    /// Pin count of a cached block, or `None` if it isn't cached.
    pub fn pin_count(&self, id: &BlockId) -> Option<u32> {
        let state = self.state.lock();
        state
            .block_table
            .get(id)
            .map(|fid| self.frames[fid.0].pin_count())
    }

    // ========================================================================
    // Internal: used by PinnedBlock
    // ========================================================================

    #[inline]
    pub(crate) fn frame(&self, frame_id: FrameId) -> &Frame {
        &self.frames[frame_id.0]
    }

    /// Record an access for LRU.
    pub(crate) fn touch(&self, frame_id: FrameId) {
        self.replacer.lock().record_access(frame_id);
    }

    /// Release one pin. Recycles the frame if its file was detached and
    /// this was the last pin.
    pub(crate) fn unpin_frame(&self, frame_id: FrameId, id: &BlockId) -> Result<u32> {
        let frame = &self.frames[frame_id.0];
        let remaining = frame
            .unpin()
            .ok_or_else(|| Error::UnpinUnderflow(id.clone()))?;

        if remaining == 0 && frame.is_detached() {
            let mut state = self.state.lock();
            if frame.is_detached() && !frame.is_pinned() {
                frame.reset();
                self.replacer.lock().remove(frame_id);
                state.detached.retain(|&fid| fid != frame_id);
                state.free_list.push(frame_id);
            }
        }
        Ok(remaining)
    }

    // ========================================================================
    // Internal: core fetch logic
    // ========================================================================

    /// Find or load `id` and pin its frame.
    fn fetch_frame(&self, id: &BlockId) -> Result<FrameId> {
        let frame_id = {
            let mut state = self.state.lock();
            if let Some(&frame_id) = state.block_table.get(id) {
                self.frames[frame_id.0].pin();
                BufferPoolStats::bump(&self.stats.cache_hits);
                frame_id
            } else {
                BufferPoolStats::bump(&self.stats.cache_misses);
                let frame_id = self.take_frame(&mut state)?;
                if let Err(e) = self.load(frame_id, id) {
                    self.frames[frame_id.0].reset();
                    state.free_list.push(frame_id);
                    return Err(e);
                }
                state.block_table.insert(id.clone(), frame_id);
                frame_id
            }
        };

        self.touch(frame_id);
        Ok(frame_id)
    }

    /// Read `id` from disk into an unoccupied frame and pin it.
    fn load(&self, frame_id: FrameId, id: &BlockId) -> Result<()> {
        let frame = &self.frames[frame_id.0];
        {
            let mut data = frame.data_mut();
            let n = self.store.read_block(id, data.buffer_mut())?;
            data.set_effective(n);
        }
        frame.set_block_id(Some(id.clone()));
        frame.pin();
        BufferPoolStats::bump(&self.stats.blocks_read);
        Ok(())
    }

    /// Get a free frame, evicting if necessary.
    fn take_frame(&self, state: &mut PoolState) -> Result<FrameId> {
        if let Some(frame_id) = state.free_list.pop() {
            return Ok(frame_id);
        }

        let victim = self
            .replacer
            .lock()
            .victim(|fid| self.frames[fid.0].is_evictable())
            .ok_or(Error::BufferExhausted {
                capacity: self.capacity,
            })?;

        let frame = &self.frames[victim.0];
        if let Some(old_id) = frame.block_id() {
            if let Err(e) = self.flush_frame(victim, &old_id) {
                // Keep the victim cached; it is still dirty.
                self.replacer.lock().record_access(victim);
                return Err(e);
            }
            state.block_table.remove(&old_id);
            tracing::debug!(block = %old_id, frame = %victim, "evicted block");
        }

        frame.reset();
        BufferPoolStats::bump(&self.stats.evictions);
        Ok(victim)
    }

    /// Write a frame back to disk if dirty.
    fn flush_frame(&self, frame_id: FrameId, id: &BlockId) -> Result<()> {
        let frame = &self.frames[frame_id.0];
        if !frame.is_dirty() {
            return Ok(());
        }

        let written = {
            let data = frame.data();
            self.store.write_block(id, data.read())?
        };
        frame.clear_dirty();

        if written {
            BufferPoolStats::bump(&self.stats.blocks_written);
        } else {
            BufferPoolStats::bump(&self.stats.discarded_flushes);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::{tempdir, TempDir};

    const BS: usize = 64;

    /// A pool over one freshly created, empty file.
    fn create_test_pool(capacity: usize) -> (BufferPool, FileId, TempDir) {
        let dir = tempdir().unwrap();
        let file = FileId::new(dir.path().join("test.table"));
        let pool = BufferPool::new(capacity, BlockStore::new(BS));
        pool.store().create_file(&file, &[]).unwrap();
        (pool, file, dir)
    }

    #[test]
    fn test_get_block_zero_filled_past_eof() {
        let (pool, file, _dir) = create_test_pool(4);

        let block = pool.get_block(&file, 3).unwrap();
        assert_eq!(block.effective_bytes(), 0);
        assert!(block.read().is_empty());
        assert_eq!(block.pin_count(), 1);
    }

    #[test]
    fn test_single_copy_per_block() {
        let (pool, file, _dir) = create_test_pool(4);

        let a = pool.get_block(&file, 0).unwrap();
        let b = pool.get_block(&file, 0).unwrap();
        assert_eq!(a.frame_id(), b.frame_id());
        assert_eq!(b.pin_count(), 2);

        a.write(b"shared", false).unwrap();
        assert_eq!(&*b.read(), b"shared");
        assert_eq!(pool.cached_blocks(), 1);
    }

    #[test]
    fn test_guard_unpins_on_drop() {
        let (pool, file, _dir) = create_test_pool(4);
        let id = BlockId::new(file.clone(), 0);

        {
            let _block = pool.get_block(&file, 0).unwrap();
            assert_eq!(pool.pin_count(&id), Some(1));
        }
        assert_eq!(pool.pin_count(&id), Some(0));
    }

    #[test]
    fn test_guard_unpins_on_error_path() {
        let (pool, file, _dir) = create_test_pool(4);
        let id = BlockId::new(file.clone(), 0);

        let attempt = || -> Result<()> {
            let block = pool.get_block(&file, 0)?;
            block.write(&[0u8; BS + 1], false)?;
            Ok(())
        };
        assert!(matches!(attempt(), Err(Error::OversizedWrite { .. })));
        assert_eq!(pool.pin_count(&id), Some(0));
    }

    #[test]
    fn test_manual_pin_unpin() {
        let (pool, file, _dir) = create_test_pool(4);
        let id = BlockId::new(file, 2);

        assert_eq!(pool.pin(&id).unwrap(), 1);
        assert_eq!(pool.pin(&id).unwrap(), 2);
        assert_eq!(pool.unpin(&id).unwrap(), 1);
        assert_eq!(pool.unpin(&id).unwrap(), 0);
        assert!(matches!(pool.unpin(&id), Err(Error::UnpinUnderflow(_))));
    }

    #[test]
    fn test_unpin_after_detach_recycles_frame() {
        let (pool, file, _dir) = create_test_pool(2);
        let id = BlockId::new(file.clone(), 0);

        pool.pin(&id).unwrap();
        pool.pin(&id).unwrap();
        pool.detach(&file);
        assert_eq!(pool.unpin(&id).unwrap(), 1);
        assert_eq!(pool.free_frame_count(), 1);
        assert_eq!(pool.unpin(&id).unwrap(), 0);
        assert_eq!(pool.free_frame_count(), 2);
    }

    #[test]
    fn test_unpin_uncached_block_underflows() {
        let (pool, file, _dir) = create_test_pool(4);
        let id = BlockId::new(file, 0);
        assert!(matches!(pool.unpin(&id), Err(Error::UnpinUnderflow(_))));
    }

    #[test]
    fn test_lru_evicts_least_recently_touched() {
        let (pool, file, _dir) = create_test_pool(3);

        for offset in 0..3 {
            drop(pool.get_block(&file, offset).unwrap());
        }
        // Refresh block 0; block 1 is now the least recently used.
        drop(pool.get_block(&file, 0).unwrap());
        drop(pool.get_block(&file, 3).unwrap());

        assert!(pool.contains(&BlockId::new(file.clone(), 0)));
        assert!(!pool.contains(&BlockId::new(file.clone(), 1)));
        assert!(pool.contains(&BlockId::new(file.clone(), 2)));
        assert!(pool.contains(&BlockId::new(file, 3)));
        assert_eq!(pool.stats().snapshot().evictions, 1);
    }

    #[test]
    fn test_reads_and_writes_refresh_recency() {
        let (pool, file, _dir) = create_test_pool(2);

        let b0 = pool.get_block(&file, 0).unwrap();
        let b1 = pool.get_block(&file, 1).unwrap();
        drop(b1.read());
        drop(b0.read());
        drop(b0);
        drop(b1);

        // Block 0 was touched last.
        drop(pool.get_block(&file, 2).unwrap());
        assert!(pool.contains(&BlockId::new(file.clone(), 0)));
        assert!(!pool.contains(&BlockId::new(file, 1)));
    }

    #[test]
    fn test_pinned_blocks_are_never_evicted() {
        let (pool, file, _dir) = create_test_pool(2);

        let _b0 = pool.get_block(&file, 0).unwrap();
        let b1 = pool.get_block(&file, 1).unwrap();

        let result = pool.get_block(&file, 2);
        assert!(matches!(result, Err(Error::BufferExhausted { capacity: 2 })));

        drop(b1);
        let b2 = pool.get_block(&file, 2).unwrap();
        assert_eq!(b2.offset(), 2);
        assert!(pool.contains(&BlockId::new(file, 0)));
    }

    #[test]
    fn test_dirty_block_flushed_on_eviction() {
        let (pool, file, _dir) = create_test_pool(1);

        pool.get_block(&file, 0)
            .unwrap()
            .write(b"persisted", false)
            .unwrap();

        // Evicts block 0, which must be written back first.
        drop(pool.get_block(&file, 1).unwrap());

        let block = pool.get_block(&file, 0).unwrap();
        assert_eq!(&*block.read(), b"persisted");
        assert_eq!(pool.stats().snapshot().blocks_written, 1);
    }

    #[test]
    fn test_flush_all_keeps_blocks_cached() {
        let (pool, file, _dir) = create_test_pool(4);

        for offset in 0..3u32 {
            let block = pool.get_block(&file, offset).unwrap();
            block.write(&[offset as u8 + 1; BS], false).unwrap();
        }
        pool.flush_all().unwrap();

        assert_eq!(pool.cached_blocks(), 3);
        assert_eq!(pool.stats().snapshot().blocks_written, 3);
        assert_eq!(pool.store().block_count(&file).unwrap(), 3);

        // Nothing dirty left.
        pool.flush_all().unwrap();
        assert_eq!(pool.stats().snapshot().blocks_written, 3);
    }

    #[test]
    fn test_detach_drops_without_flushing() {
        let (pool, file, _dir) = create_test_pool(4);

        pool.get_block(&file, 0)
            .unwrap()
            .write(b"never written", false)
            .unwrap();
        pool.detach(&file);

        assert_eq!(pool.cached_blocks(), 0);
        assert_eq!(pool.free_frame_count(), 4);
        pool.flush_all().unwrap();
        assert_eq!(std::fs::metadata(file.path()).unwrap().len(), 0);
    }

    #[test]
    fn test_detach_while_pinned_discards_later_writes() {
        let (pool, file, _dir) = create_test_pool(2);

        let block = pool.get_block(&file, 0).unwrap();
        pool.detach(&file);
        block.write(b"late", false).unwrap();
        assert_eq!(pool.free_frame_count(), 1);
        drop(block);

        assert_eq!(pool.free_frame_count(), 2);
        pool.flush_all().unwrap();
        assert_eq!(std::fs::metadata(file.path()).unwrap().len(), 0);
    }

    #[test]
    fn test_flush_to_removed_file_is_silent() {
        let (pool, file, _dir) = create_test_pool(1);

        pool.get_block(&file, 0)
            .unwrap()
            .write(b"orphan", false)
            .unwrap();
        std::fs::remove_file(file.path()).unwrap();

        pool.flush_all().unwrap();
        assert!(!file.path().exists());
        assert_eq!(pool.stats().snapshot().discarded_flushes, 1);
    }

    #[test]
    fn test_missing_file_load_fails_and_frees_frame() {
        let (pool, _file, dir) = create_test_pool(1);
        let missing = FileId::new(dir.path().join("missing.index"));

        let err = pool.get_block(&missing, 0).unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(pool.free_frame_count(), 1);
    }

    #[test]
    fn test_from_config_validates() {
        let bad = StorageConfig::builder().pool_blocks(0).build();
        assert!(matches!(BufferPool::from_config(&bad), Err(Error::Config(_))));

        let good = StorageConfig::builder().block_size(128).pool_blocks(8).build();
        let pool = BufferPool::from_config(&good).unwrap();
        assert_eq!(pool.capacity(), 8);
        assert_eq!(pool.block_size(), 128);
    }
}
