//! Configuration for tablestore.

use std::path::PathBuf;

use super::{Error, Result};

/// Default size of a block in bytes (4KB).
///
/// Matches the OS page size on most systems, so one block is one page of
/// the kernel's cache.
pub const DEFAULT_BLOCK_SIZE: usize = 4096;

/// Default number of blocks the buffer pool may hold (4MB with 4KB blocks).
pub const DEFAULT_POOL_BLOCKS: usize = 1024;

/// Smallest block size accepted.
///
/// A block must hold the 16-byte index header plus at least a couple of
/// narrow keys, and the record file header plus one record.
pub const MIN_BLOCK_SIZE: usize = 64;

/// Storage engine configuration.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Root directory for the catalog and all table/index files.
    ///   {data_dir}/
    ///     ├── catalog.bin
    ///     └── tables/{table}/{table}.table, {index}.index
    pub data_dir: PathBuf,

    /// Size of one block in bytes; the unit of caching and file I/O.
    pub block_size: usize,

    /// Maximum number of blocks held by the buffer pool.
    pub pool_blocks: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./tablestore_data"),
            block_size: DEFAULT_BLOCK_SIZE,
            pool_blocks: DEFAULT_POOL_BLOCKS,
        }
    }
}

impl StorageConfig {
    /// Create a new config builder.
    pub fn builder() -> StorageConfigBuilder {
        StorageConfigBuilder::default()
    }

    /// Check the values are usable.
    pub fn validate(&self) -> Result<()> {
        if self.pool_blocks == 0 {
            return Err(Error::Config("pool_blocks must be > 0".to_string()));
        }
        if self.block_size < MIN_BLOCK_SIZE {
            return Err(Error::Config(format!(
                "block_size must be at least {} bytes, got {}",
                MIN_BLOCK_SIZE, self.block_size
            )));
        }
        Ok(())
    }
}

/// Builder for [`StorageConfig`].
#[derive(Default)]
pub struct StorageConfigBuilder {
    config: StorageConfig,
}

impl StorageConfigBuilder {
    /// Set the data directory.
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    /// Set the block size (in bytes).
    pub fn block_size(mut self, size: usize) -> Self {
        self.config.block_size = size;
        self
    }

    /// Set the buffer pool capacity (in blocks).
    pub fn pool_blocks(mut self, count: usize) -> Self {
        self.config.pool_blocks = count;
        self
    }

    pub fn build(self) -> StorageConfig {
        self.config
    }
}
