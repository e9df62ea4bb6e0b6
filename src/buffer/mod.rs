//! Buffer pool management.
//!
//! The buffer pool is the in-memory cache layer between the record and
//! index files and disk. It manages a fixed pool of frames, each holding
//! one block.
//!
//! # Components
//! - [`BufferPool`] - The main block cache
//! - [`Frame`] - A slot in the buffer pool holding a block + metadata
//! - [`PinnedBlock`] - RAII guard for pinned block access
//! - [`BufferPoolStats`] - Performance statistics
//! - [`replacer`] - Eviction policy

mod block_guard;
mod buffer_pool;
mod frame;
pub mod replacer;
mod stats;

pub use block_guard::PinnedBlock;
pub use buffer_pool::BufferPool;
pub use frame::{BlockData, Frame};
pub use stats::{BufferPoolStats, StatsSnapshot};
