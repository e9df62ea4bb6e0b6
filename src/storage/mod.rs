//! Storage layer - block-granular file I/O.
//!
//! - [`BlockStore`] - reads and writes fixed-size blocks by offset; not
//!   cache-aware

mod block_store;

pub use block_store::BlockStore;
