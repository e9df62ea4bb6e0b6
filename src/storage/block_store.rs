//! Block Store - low-level block-granular file I/O.
//!
//! The [`BlockStore`] handles all direct file operations:
//! - Reading and writing blocks by offset
//! - Creating and removing backing files
//!
//! It knows nothing about caching; the buffer pool is its only caller on
//! the hot path.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};

use crate::common::{BlockId, FileId, Result};

/// Reads and writes fixed-size blocks of any number of backing files.
///
/// # File Layout
/// Every file is viewed as a sequence of blocks:
/// ```text
/// ┌─────────┬─────────┬─────────┬─────────┐
/// │ Block 0 │ Block 1 │  ...    │ Block N │  (the tail block may be short)
/// └─────────┴─────────┴─────────┴─────────┘
/// Offset:  0     bs      ...      N×bs
/// ```
///
/// Files are opened per call. Tables and indexes can be dropped (and their
/// files deleted) while stale blocks are still cached, so holding handles
/// open would only keep deleted files alive.
#[derive(Debug, Clone)]
pub struct BlockStore {
    block_size: usize,
}

impl BlockStore {
    pub fn new(block_size: usize) -> Self {
        Self { block_size }
    }

    #[inline]
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Read one block into `buf` (which must be `block_size` long).
    ///
    /// Returns how many bytes were really present in the file. The rest of
    /// `buf` is zero-filled, so reading past the end of a file yields an
    /// all-zero block with 0 effective bytes.
    ///
    /// # Errors
    /// I/O errors, including `NotFound` if the file doesn't exist.
    pub fn read_block(&self, id: &BlockId, buf: &mut [u8]) -> Result<usize> {
        debug_assert_eq!(buf.len(), self.block_size);

        let mut file = File::open(id.file.path())?;
        file.seek(SeekFrom::Start(self.byte_offset(id)))?;

        let mut filled = 0;
        while filled < buf.len() {
            match file.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        buf[filled..].fill(0);

        tracing::trace!(block = %id, bytes = filled, "read block");
        Ok(filled)
    }

    /// Write `data` at the start of block `id`.
    ///
    /// Returns `Ok(false)` without writing anything if the file no longer
    /// exists: a table or index dropped while one of its blocks was still
    /// cached is the expected end of that block's life, not an error.
    ///
    /// # Errors
    /// Any other I/O error (permissions, disk full, ...).
    pub fn write_block(&self, id: &BlockId, data: &[u8]) -> Result<bool> {
        debug_assert!(data.len() <= self.block_size);

        let mut file = match OpenOptions::new().write(true).open(id.file.path()) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::debug!(block = %id, "discarding write to removed file");
                return Ok(false);
            }
            Err(e) => return Err(e.into()),
        };

        file.seek(SeekFrom::Start(self.byte_offset(id)))?;
        file.write_all(data)?;
        file.flush()?;

        tracing::trace!(block = %id, bytes = data.len(), "wrote block");
        Ok(true)
    }

    /// Create a new file holding `initial` bytes.
    ///
    /// # Errors
    /// Fails if the file already exists or cannot be created.
    pub fn create_file(&self, file: &FileId, initial: &[u8]) -> Result<()> {
        let mut handle = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(file.path())?;
        handle.write_all(initial)?;
        handle.sync_all()?;

        tracing::debug!(file = %file, "created file");
        Ok(())
    }

    /// Delete a file. A file that is already gone is not an error.
    pub fn remove_file(&self, file: &FileId) -> Result<()> {
        match fs::remove_file(file.path()) {
            Ok(()) => {
                tracing::debug!(file = %file, "removed file");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Number of blocks needed to cover the file, counting a short tail.
    pub fn block_count(&self, file: &FileId) -> Result<u64> {
        let len = fs::metadata(file.path())?.len();
        Ok(len.div_ceil(self.block_size as u64))
    }

    fn byte_offset(&self, id: &BlockId) -> u64 {
        id.offset as u64 * self.block_size as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const BS: usize = 128;

    #[test]
    fn test_create_existing_fails() {
        let dir = tempdir().unwrap();
        let file = FileId::new(dir.path().join("t.table"));
        let store = BlockStore::new(BS);

        store.create_file(&file, b"abc").unwrap();
        assert!(store.create_file(&file, b"abc").is_err());
    }

    #[test]
    fn test_read_short_tail_is_zero_filled() {
        let dir = tempdir().unwrap();
        let file = FileId::new(dir.path().join("t.table"));
        let store = BlockStore::new(BS);
        store.create_file(&file, &[0xAB; 10]).unwrap();

        let mut buf = vec![0xFFu8; BS];
        let n = store.read_block(&BlockId::new(file.clone(), 0), &mut buf).unwrap();
        assert_eq!(n, 10);
        assert_eq!(buf[9], 0xAB);
        assert!(buf[10..].iter().all(|&b| b == 0));

        // Entirely past the end of the file.
        let n = store.read_block(&BlockId::new(file, 5), &mut buf).unwrap();
        assert_eq!(n, 0);
        assert!(buf.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_read_missing_file_is_not_found() {
        let dir = tempdir().unwrap();
        let file = FileId::new(dir.path().join("missing.table"));
        let store = BlockStore::new(BS);

        let mut buf = vec![0u8; BS];
        let err = store.read_block(&BlockId::new(file, 0), &mut buf).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_write_and_read_blocks() {
        let dir = tempdir().unwrap();
        let file = FileId::new(dir.path().join("t.index"));
        let store = BlockStore::new(BS);
        store.create_file(&file, &[]).unwrap();

        for i in 0..4u8 {
            let data = vec![i + 1; BS];
            assert!(store.write_block(&BlockId::new(file.clone(), i as u32), &data).unwrap());
        }
        assert_eq!(store.block_count(&file).unwrap(), 4);

        let mut buf = vec![0u8; BS];
        for i in 0..4u8 {
            let n = store.read_block(&BlockId::new(file.clone(), i as u32), &mut buf).unwrap();
            assert_eq!(n, BS);
            assert!(buf.iter().all(|&b| b == i + 1));
        }
    }

    #[test]
    fn test_write_to_removed_file_is_discarded() {
        let dir = tempdir().unwrap();
        let file = FileId::new(dir.path().join("gone.table"));
        let store = BlockStore::new(BS);
        store.create_file(&file, &[]).unwrap();
        store.remove_file(&file).unwrap();

        let written = store.write_block(&BlockId::new(file.clone(), 0), &[1, 2, 3]).unwrap();
        assert!(!written);
        assert!(!file.path().exists());

        // Removing twice is fine too.
        store.remove_file(&file).unwrap();
    }
}
