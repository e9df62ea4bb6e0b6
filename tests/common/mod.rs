//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::path::Path;
use std::sync::{Arc, Once};

use tablestore::{BlockStore, BufferPool, Database, StorageConfig};
use tempfile::TempDir;
use tracing_subscriber::EnvFilter;

static TRACING: Once = Once::new();

/// Route `tracing` output through the test harness. `RUST_LOG` picks the
/// level (default `warn`).
pub fn init_tracing() {
    TRACING.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .init();
    });
}

/// A pool of `capacity` blocks of `block_size` bytes, plus a scratch dir.
pub fn pool(capacity: usize, block_size: usize) -> (Arc<BufferPool>, TempDir) {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    (Arc::new(BufferPool::new(capacity, BlockStore::new(block_size))), dir)
}

pub fn config(path: &Path, block_size: usize, pool_blocks: usize) -> StorageConfig {
    StorageConfig::builder()
        .data_dir(path)
        .block_size(block_size)
        .pool_blocks(pool_blocks)
        .build()
}

/// A database in a fresh scratch dir.
pub fn database(block_size: usize, pool_blocks: usize) -> (Database, TempDir) {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let db = Database::open(config(dir.path(), block_size, pool_blocks)).unwrap();
    (db, dir)
}
