//! Error types for tablestore.

use thiserror::Error;

use super::{BlockId, FileId};

/// Convenient Result type alias.
///
/// Instead of writing `Result<T, Error>` everywhere, we can write `Result<T>`.
pub type Result<T> = std::result::Result<T, Error>;

/// All possible errors in tablestore.
///
/// None of these are retried inside the storage engine. Retrying, if any,
/// belongs to whoever drives it.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error from file operations.
    ///
    /// A missing file during flush is *not* reported here; see
    /// [`BlockStore::write_block`](crate::storage::BlockStore::write_block).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Every cached block is pinned and a new one was requested.
    #[error("buffer pool exhausted: all {capacity} blocks are pinned")]
    BufferExhausted { capacity: usize },

    /// A block write larger than the block without truncation permission.
    #[error("data size ({len}B) is larger than block size ({block_size}B)")]
    OversizedWrite { len: usize, block_size: usize },

    /// Unpin without a matching pin.
    ///
    /// This indicates a bug in the caller.
    #[error("{0} is already unpinned")]
    UnpinUnderflow(BlockId),

    /// Read/modify/remove on a record slot that holds no live record.
    #[error("record slot {0} is empty")]
    EmptySlot(i32),

    /// Insert of a key already present in an index.
    #[error("duplicate key {0}")]
    DuplicateKey(String),

    /// Delete of a key that is absent from an index.
    #[error("index has no such key {0}")]
    KeyNotFound(String),

    /// Lookup or iteration on an index with no root.
    #[error("index {0} is empty")]
    EmptyIndex(FileId),

    /// Malformed format string, or values that do not fit a layout.
    #[error("format error: {0}")]
    Format(String),

    /// Unknown or conflicting schema object.
    #[error("catalog error: {0}")]
    Catalog(String),

    /// Persisted bytes that cannot be trusted.
    #[error("corrupted data: {0}")]
    Corrupted(String),

    /// Invalid storage configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// True when the error is an I/O `NotFound`.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Io(e) if e.kind() == std::io::ErrorKind::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::BufferExhausted { capacity: 8 };
        assert_eq!(err.to_string(), "buffer pool exhausted: all 8 blocks are pinned");

        let err = Error::OversizedWrite {
            len: 5000,
            block_size: 4096,
        };
        assert_eq!(
            err.to_string(),
            "data size (5000B) is larger than block size (4096B)"
        );

        assert_eq!(Error::EmptySlot(3).to_string(), "record slot 3 is empty");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();

        assert!(err.is_not_found());
        match err {
            Error::Io(_) => {}
            _ => panic!("Expected Io error"),
        }
    }

    #[test]
    fn test_unpin_underflow_names_block() {
        let id = BlockId::new(FileId::new("/tmp/t.table"), 7);
        let msg = Error::UnpinUnderflow(id).to_string();
        assert!(msg.contains("7"));
        assert!(msg.contains("t.table"));
    }
}
