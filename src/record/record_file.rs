//! Record File - fixed-format records in free-list slotted storage.
//!
//! # File Layout
//! ```text
//! Block 0:  ┌────────────┬───────────┬───────┬───────┬─────┐
//!           │ first_free │ rec_tail  │ slot0 │ slot1 │ ... │
//!           │    i32     │    i32    │       │       │     │
//!           └────────────┴───────────┴───────┴───────┴─────┘
//! Block k:  ┌───────┬───────┬─────┐
//!           │ slotN │ ...   │     │     (no header; slots from byte 0)
//!           └───────┴───────┴─────┘
//!
//! Slot:     ┌──────────────────────┬────────┬───────────┐
//!           │ fields (per format)  │ valid  │ next_free │
//!           │                      │ u8 1/0 │    i32    │
//!           └──────────────────────┴────────┴───────────┘
//! ```
//!
//! Deleted slots form a LIFO free list threaded through `next_free` and
//! headed by `first_free` (`-1` = empty). `rec_tail` is the highest logical
//! offset ever allocated (`-1` = no records yet). A slot never straddles a
//! block boundary: unused bytes at the end of a block stay unused.

use std::path::Path;
use std::sync::Arc;

use crate::buffer::{BufferPool, PinnedBlock};
use crate::common::{Error, FileId, Layout, Result, Row, Value};

use super::Predicate;

/// Size of the `(first_free, rec_tail)` header at the start of block 0.
pub const RECORD_HEADER_SIZE: usize = 8;

/// Width of the hidden `valid` + `next_free` suffix of every slot.
const SLOT_SUFFIX_SIZE: usize = 5;

const VALID: u8 = 1;
const INVALID: u8 = 0;

/// The two integers at the start of block 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    /// Head of the free-slot list, or `-1`.
    pub first_free: i32,
    /// Highest logical offset ever allocated, or `-1`.
    pub rec_tail: i32,
}

impl RecordHeader {
    const EMPTY: RecordHeader = RecordHeader {
        first_free: -1,
        rec_tail: -1,
    };

    fn to_bytes(self) -> [u8; RECORD_HEADER_SIZE] {
        let mut buf = [0u8; RECORD_HEADER_SIZE];
        buf[..4].copy_from_slice(&self.first_free.to_le_bytes());
        buf[4..].copy_from_slice(&self.rec_tail.to_le_bytes());
        buf
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < RECORD_HEADER_SIZE {
            return Err(Error::Corrupted(format!(
                "record file header needs {}B, block 0 has {}B",
                RECORD_HEADER_SIZE,
                bytes.len()
            )));
        }
        Ok(Self {
            first_free: read_i32(bytes, 0),
            rec_tail: read_i32(bytes, 4),
        })
    }
}

/// Decoded hidden fields of one slot.
struct SlotState {
    valid: bool,
    next_free: i32,
}

/// A table's record file, accessed through the shared buffer pool.
///
/// Every operation re-reads the header from block 0, so several
/// `RecordFile` handles on the same path stay consistent as long as only
/// one of them writes at a time.
pub struct RecordFile {
    pool: Arc<BufferPool>,
    file: FileId,
    layout: Layout,
    /// Record width plus the hidden suffix.
    slot_size: usize,
    /// Slots in block 0, which shares its space with the header.
    first_block_slots: usize,
    /// Slots in every other block.
    slots_per_block: usize,
}

impl RecordFile {
    /// Create a new, empty record file.
    ///
    /// # Errors
    /// Fails if the file already exists, or if one record doesn't fit in
    /// block 0 next to the header.
    pub fn create(pool: Arc<BufferPool>, path: impl AsRef<Path>, format: &str) -> Result<Self> {
        let file = FileId::new(path);
        let records = Self::with_layout(pool, file, Layout::parse(format)?)?;
        records
            .pool
            .store()
            .create_file(&records.file, &RecordHeader::EMPTY.to_bytes())?;
        Ok(records)
    }

    /// Open an existing record file.
    ///
    /// # Errors
    /// `NotFound` I/O error if the file doesn't exist.
    pub fn open(pool: Arc<BufferPool>, path: impl AsRef<Path>, format: &str) -> Result<Self> {
        let file = FileId::new(path);
        let records = Self::with_layout(pool, file, Layout::parse(format)?)?;
        records.header()?;
        Ok(records)
    }

    fn with_layout(pool: Arc<BufferPool>, file: FileId, layout: Layout) -> Result<Self> {
        let block_size = pool.block_size();
        let slot_size = layout.size() + SLOT_SUFFIX_SIZE;
        let first_block_slots = block_size.saturating_sub(RECORD_HEADER_SIZE) / slot_size;
        if first_block_slots == 0 {
            return Err(Error::Format(format!(
                "records of {}B do not fit a {}B block",
                slot_size, block_size
            )));
        }
        Ok(Self {
            pool,
            file,
            layout,
            slot_size,
            first_block_slots,
            slots_per_block: block_size / slot_size,
        })
    }

    pub fn file_id(&self) -> &FileId {
        &self.file
    }

    /// Layout of the visible record fields.
    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Full on-disk width of one slot.
    pub fn slot_size(&self) -> usize {
        self.slot_size
    }

    /// Current header, read through the pool.
    pub fn header(&self) -> Result<RecordHeader> {
        let block = self.block(0)?;
        let data = block.read();
        RecordHeader::from_bytes(&data)
    }

    // ========================================================================
    // Single-record operations
    // ========================================================================

    /// Store a record, reusing the most recently freed slot if there is
    /// one. Returns its logical offset.
    pub fn insert(&self, values: &[Value]) -> Result<i32> {
        let record = self.layout.encode(values)?;
        let mut header = self.header()?;

        let offset = if header.first_free >= 0 {
            let offset = header.first_free;
            let state = self.slot_state(offset, header.rec_tail)?.ok_or_else(|| {
                Error::Corrupted(format!("free list points past the tail at {}", offset))
            })?;
            if state.valid {
                return Err(Error::Corrupted(format!(
                    "free list points at live record {}",
                    offset
                )));
            }
            header.first_free = state.next_free;
            offset
        } else {
            header.rec_tail += 1;
            header.rec_tail
        };

        self.write_slot(offset, &record, VALID, -1)?;
        self.write_header(header)?;
        tracing::trace!(file = %self.file, offset, "inserted record");
        Ok(offset)
    }

    /// Free the slot at `offset`, pushing it onto the free list.
    ///
    /// # Errors
    /// `Error::EmptySlot` if there is no live record at `offset`.
    pub fn remove(&self, offset: i32) -> Result<()> {
        let mut header = self.header()?;
        self.live_slot(offset, header.rec_tail)?;

        self.write_flags(offset, INVALID, header.first_free)?;
        header.first_free = offset;
        self.write_header(header)
    }

    /// Overwrite the live record at `offset` in place.
    ///
    /// # Errors
    /// `Error::EmptySlot` if there is no live record at `offset`.
    pub fn modify(&self, values: &[Value], offset: i32) -> Result<()> {
        let record = self.layout.encode(values)?;
        let header = self.header()?;
        self.live_slot(offset, header.rec_tail)?;
        self.write_slot(offset, &record, VALID, -1)
    }

    /// The live record at `offset`.
    ///
    /// # Errors
    /// `Error::EmptySlot` if there is no live record at `offset`.
    pub fn read(&self, offset: i32) -> Result<Row> {
        let header = self.header()?;
        self.live_slot(offset, header.rec_tail)?;

        let (block_offset, pos) = self.locate(offset);
        let block = self.block(block_offset)?;
        let data = block.read();
        self.layout.decode(&data[pos..pos + self.layout.size()])
    }

    // ========================================================================
    // Scans
    // ========================================================================

    /// Every live record matching `predicate`, with its offset, in offset
    /// order.
    pub fn scan(&self, predicate: &Predicate) -> Result<Vec<(i32, Row)>> {
        self.check_predicate(predicate)?;
        let header = self.header()?;
        let mut hits = Vec::new();

        for block_offset in 0..=self.last_block(header.rec_tail) {
            let block = self.block(block_offset)?;
            let data = block.read();
            for (offset, pos) in self.slots_in(block_offset, header.rec_tail, data.len()) {
                if data[pos + self.layout.size()] != VALID {
                    continue;
                }
                let row = self.layout.decode(&data[pos..])?;
                if predicate.matches(&row) {
                    hits.push((offset, row));
                }
            }
        }
        Ok(hits)
    }

    /// Every live record matching `predicate`, in offset order.
    pub fn scan_select(&self, predicate: &Predicate) -> Result<Vec<Row>> {
        Ok(self
            .scan(predicate)?
            .into_iter()
            .map(|(_, row)| row)
            .collect())
    }

    /// Free every live record matching `predicate` in one pass over the
    /// file. Returns the removed records with their offsets.
    ///
    /// Freed slots are threaded onto the free list by their true logical
    /// offset, so later inserts reuse exactly these slots, the last one
    /// freed first.
    pub fn scan_delete(&self, predicate: &Predicate) -> Result<Vec<(i32, Row)>> {
        let flags = self.layout.size();
        self.rewrite_matching(predicate, |header, offset, slot| {
            slot[flags] = INVALID;
            slot[flags + 1..].copy_from_slice(&header.first_free.to_le_bytes());
            header.first_free = offset;
        })
    }

    /// Overwrite every live record matching `predicate` with `values`.
    /// Returns the replaced records with their offsets.
    pub fn scan_update(&self, predicate: &Predicate, values: &[Value]) -> Result<Vec<(i32, Row)>> {
        let record = self.layout.encode(values)?;
        let flags = self.layout.size();
        self.rewrite_matching(predicate, |_, _, slot| {
            slot[..flags].copy_from_slice(&record);
            slot[flags] = VALID;
            slot[flags + 1..].copy_from_slice(&(-1i32).to_le_bytes());
        })
    }

    /// Shared pass of `scan_delete` and `scan_update`: each block is read
    /// once, patched in memory and written back once if anything matched.
    fn rewrite_matching(
        &self,
        predicate: &Predicate,
        mut patch: impl FnMut(&mut RecordHeader, i32, &mut [u8]),
    ) -> Result<Vec<(i32, Row)>> {
        self.check_predicate(predicate)?;
        let mut header = self.header()?;
        let flags = self.layout.size();
        let mut hits = Vec::new();

        for block_offset in 0..=self.last_block(header.rec_tail) {
            let block = self.block(block_offset)?;
            let mut data = block.read().to_vec();
            let mut changed = false;

            for (offset, pos) in self.slots_in(block_offset, header.rec_tail, data.len()) {
                let slot = &mut data[pos..pos + self.slot_size];
                if slot[flags] != VALID {
                    continue;
                }
                let row = self.layout.decode(slot)?;
                if !predicate.matches(&row) {
                    continue;
                }
                patch(&mut header, offset, slot);
                hits.push((offset, row));
                changed = true;
            }

            if changed {
                block.write(&data, false)?;
            }
        }

        // Block 0 may have been rewritten above with the old header bytes.
        if !hits.is_empty() {
            self.write_header(header)?;
        }
        tracing::trace!(file = %self.file, records = hits.len(), "rewrote matching records");
        Ok(hits)
    }

    // ========================================================================
    // Slot addressing
    // ========================================================================

    /// Logical offset → (block offset, byte position of the slot).
    fn locate(&self, offset: i32) -> (u32, usize) {
        let offset = offset as usize;
        if offset < self.first_block_slots {
            (0, RECORD_HEADER_SIZE + offset * self.slot_size)
        } else {
            let rest = offset - self.first_block_slots;
            let block = rest / self.slots_per_block + 1;
            let slot = rest % self.slots_per_block;
            (block as u32, slot * self.slot_size)
        }
    }

    /// Block holding the tail record (0 for an empty file).
    fn last_block(&self, rec_tail: i32) -> u32 {
        if rec_tail < 0 {
            0
        } else {
            self.locate(rec_tail).0
        }
    }

    /// (logical offset, byte position) of every allocated slot in a block
    /// whose effective length is `len`.
    fn slots_in(&self, block_offset: u32, rec_tail: i32, len: usize) -> Vec<(i32, usize)> {
        let (first_offset, start, count) = if block_offset == 0 {
            (0, RECORD_HEADER_SIZE, self.first_block_slots)
        } else {
            let first = self.first_block_slots + (block_offset as usize - 1) * self.slots_per_block;
            (first, 0, self.slots_per_block)
        };

        (0..count)
            .map(|i| ((first_offset + i) as i32, start + i * self.slot_size))
            .take_while(|&(offset, pos)| offset <= rec_tail && pos + self.slot_size <= len)
            .collect()
    }

    // ========================================================================
    // Block I/O helpers (each pins its block for the duration)
    // ========================================================================

    fn block(&self, block_offset: u32) -> Result<PinnedBlock<'_>> {
        self.pool.get_block(&self.file, block_offset)
    }

    fn check_predicate(&self, predicate: &Predicate) -> Result<()> {
        match predicate.max_column() {
            Some(col) if col >= self.layout.len() => Err(Error::Format(format!(
                "predicate on column {} of a {}-column record",
                col,
                self.layout.len()
            ))),
            _ => Ok(()),
        }
    }

    /// Hidden fields of the slot at `offset`, or `None` if the slot was
    /// never allocated.
    fn slot_state(&self, offset: i32, rec_tail: i32) -> Result<Option<SlotState>> {
        if offset < 0 || offset > rec_tail {
            return Ok(None);
        }
        let (block_offset, pos) = self.locate(offset);
        let block = self.block(block_offset)?;
        let data = block.read();
        if pos + self.slot_size > data.len() {
            return Ok(None);
        }
        let flags = pos + self.layout.size();
        Ok(Some(SlotState {
            valid: data[flags] == VALID,
            next_free: read_i32(&data, flags + 1),
        }))
    }

    fn live_slot(&self, offset: i32, rec_tail: i32) -> Result<()> {
        match self.slot_state(offset, rec_tail)? {
            Some(state) if state.valid => Ok(()),
            _ => Err(Error::EmptySlot(offset)),
        }
    }

    fn write_slot(&self, offset: i32, record: &[u8], valid: u8, next_free: i32) -> Result<()> {
        let mut slot = Vec::with_capacity(self.slot_size);
        slot.extend_from_slice(record);
        slot.push(valid);
        slot.extend_from_slice(&next_free.to_le_bytes());

        let (block_offset, pos) = self.locate(offset);
        self.patch(block_offset, pos, &slot)
    }

    fn write_flags(&self, offset: i32, valid: u8, next_free: i32) -> Result<()> {
        let mut flags = [0u8; SLOT_SUFFIX_SIZE];
        flags[0] = valid;
        flags[1..].copy_from_slice(&next_free.to_le_bytes());

        let (block_offset, pos) = self.locate(offset);
        self.patch(block_offset, pos + self.layout.size(), &flags)
    }

    fn write_header(&self, header: RecordHeader) -> Result<()> {
        self.patch(0, 0, &header.to_bytes())
    }

    /// Overwrite `bytes` at `pos` in a block, growing its effective length
    /// if needed.
    fn patch(&self, block_offset: u32, pos: usize, bytes: &[u8]) -> Result<()> {
        let block = self.block(block_offset)?;
        let mut data = block.read().to_vec();
        let end = pos + bytes.len();
        if data.len() < end {
            data.resize(end, 0);
        }
        data[pos..end].copy_from_slice(bytes);
        block.write(&data, false)
    }
}

fn read_i32(bytes: &[u8], at: usize) -> i32 {
    i32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}
