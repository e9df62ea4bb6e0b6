//! Frame - a slot in the buffer pool.
//!
//! A [`Frame`] holds one cached block plus the metadata needed to manage it:
//! - Which block is loaded (if any)
//! - Pin count for reference counting
//! - Dirty flag for write-back tracking
//! - How many of its bytes are meaningful ([`BlockData::effective_bytes`])

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::common::{BlockId, Error, Result};

/// The bytes of one cached block.
///
/// The tail block of a file may be only partially present on disk;
/// `effective` records how many leading bytes are meaningful, and it is
/// exactly that prefix which [`read`](Self::read) exposes and a flush
/// writes back.
pub struct BlockData {
    bytes: Vec<u8>,
    effective: usize,
}

impl BlockData {
    fn new(block_size: usize) -> Self {
        Self {
            bytes: vec![0u8; block_size],
            effective: 0,
        }
    }

    /// The meaningful bytes of the block (never garbage past the logical end).
    #[inline]
    pub fn read(&self) -> &[u8] {
        &self.bytes[..self.effective]
    }

    #[inline]
    pub fn effective_bytes(&self) -> usize {
        self.effective
    }

    #[inline]
    pub fn block_size(&self) -> usize {
        self.bytes.len()
    }

    /// Replace the block's contents with `data`.
    ///
    /// Always sets `effective_bytes = min(data.len(), block_size)`.
    ///
    /// # Errors
    /// `Error::OversizedWrite` if `data` is larger than the block and
    /// `allow_truncate` is false; nothing is written in that case.
    pub fn write(&mut self, data: &[u8], allow_truncate: bool) -> Result<()> {
        let block_size = self.bytes.len();
        if data.len() > block_size && !allow_truncate {
            return Err(Error::OversizedWrite {
                len: data.len(),
                block_size,
            });
        }
        let n = data.len().min(block_size);
        self.bytes[..n].copy_from_slice(&data[..n]);
        self.effective = n;
        Ok(())
    }

    /// Whole backing buffer, for loading from disk.
    pub(crate) fn buffer_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    pub(crate) fn set_effective(&mut self, n: usize) {
        self.effective = n.min(self.bytes.len());
    }

    fn reset(&mut self) {
        self.bytes.fill(0);
        self.effective = 0;
    }
}

/// A frame in the buffer pool.
///
/// The pool allocates a fixed number of frames at startup; each can hold
/// one block at a time.
///
/// # Thread Safety
/// All fields use interior mutability:
/// - `data`: `RwLock` for read/write synchronization
/// - `block_id`: `Mutex` for safe updates
/// - `pin_count`: `AtomicU32` for lock-free reference counting
/// - `is_dirty` / `detached`: `AtomicBool`
pub struct Frame {
    data: RwLock<BlockData>,
    block_id: Mutex<Option<BlockId>>,
    pin_count: AtomicU32,
    is_dirty: AtomicBool,
    /// Set when the block's file was detached while the block was pinned;
    /// the frame is recycled when the last pin goes away.
    detached: AtomicBool,
}

impl Frame {
    /// Create a new empty frame for blocks of `block_size` bytes.
    pub fn new(block_size: usize) -> Self {
        Self {
            data: RwLock::new(BlockData::new(block_size)),
            block_id: Mutex::new(None),
            pin_count: AtomicU32::new(0),
            is_dirty: AtomicBool::new(false),
            detached: AtomicBool::new(false),
        }
    }

    // ========================================================================
    // Block data access (RwLock)
    // ========================================================================

    #[inline]
    pub fn data(&self) -> RwLockReadGuard<'_, BlockData> {
        self.data.read()
    }

    #[inline]
    pub fn data_mut(&self) -> RwLockWriteGuard<'_, BlockData> {
        self.data.write()
    }

    // ========================================================================
    // Block ID management
    // ========================================================================

    #[inline]
    pub fn block_id(&self) -> Option<BlockId> {
        self.block_id.lock().clone()
    }

    #[inline]
    pub fn set_block_id(&self, block_id: Option<BlockId>) {
        *self.block_id.lock() = block_id;
    }

    // ========================================================================
    // Pin count operations (Atomic)
    // ========================================================================

    /// Increment the pin count. Returns the new pin count.
    #[inline]
    pub fn pin(&self) -> u32 {
        self.pin_count.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Decrement the pin count. Returns the new pin count, or `None` if
    /// the count was already 0 (in which case it stays 0).
    #[inline]
    pub fn unpin(&self) -> Option<u32> {
        self.pin_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| c.checked_sub(1))
            .ok()
            .map(|old| old - 1)
    }

    #[inline]
    pub fn pin_count(&self) -> u32 {
        self.pin_count.load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_pinned(&self) -> bool {
        self.pin_count() > 0
    }

    // ========================================================================
    // Dirty / detached flags (Atomic)
    // ========================================================================

    #[inline]
    pub fn mark_dirty(&self) {
        self.is_dirty.store(true, Ordering::Release);
    }

    #[inline]
    pub fn clear_dirty(&self) {
        self.is_dirty.store(false, Ordering::Release);
    }

    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.is_dirty.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn mark_detached(&self) {
        self.detached.store(true, Ordering::Release);
    }

    #[inline]
    pub fn is_detached(&self) -> bool {
        self.detached.load(Ordering::Acquire)
    }

    // ========================================================================
    // Frame state queries
    // ========================================================================

    /// Check if the frame is empty (no block loaded).
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.block_id.lock().is_none()
    }

    /// Check if the frame holds a block that may be evicted.
    #[inline]
    pub fn is_evictable(&self) -> bool {
        !self.is_empty() && !self.is_pinned() && !self.is_detached()
    }

    /// Reset the frame to empty state, ready for reuse.
    pub fn reset(&self) {
        self.data_mut().reset();
        self.set_block_id(None);
        self.pin_count.store(0, Ordering::Release);
        self.is_dirty.store(false, Ordering::Release);
        self.detached.store(false, Ordering::Release);
    }
}
