//! tablestore - record files and B+ tree indexes behind one shared buffer pool.
//!
//! # Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          tablestore                             │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────────────────────────────────────────────┐   │
//! │  │              Engine (engine/)                            │   │
//! │  │     Database: DDL + insert/select/delete/update          │   │
//! │  │     names resolved through the Catalog (catalog/)        │   │
//! │  └─────────────────────────────────────────────────────────┘   │
//! │                 ↓                            ↓                  │
//! │  ┌──────────────────────────┐  ┌──────────────────────────┐   │
//! │  │   Records (record/)      │  │   Indexes (index/)       │   │
//! │  │   RecordFile + Predicate │  │   IndexTree (B+ tree)    │   │
//! │  │   free-list slots        │  │   leaf chain iteration   │   │
//! │  └──────────────────────────┘  └──────────────────────────┘   │
//! │                 ↓                            ↓                  │
//! │  ┌─────────────────────────────────────────────────────────┐   │
//! │  │             Buffer Pool (buffer/)                        │   │
//! │  │   BufferPool + Frame + PinnedBlock + LruReplacer         │   │
//! │  └─────────────────────────────────────────────────────────┘   │
//! │                              ↓                                  │
//! │  ┌─────────────────────────────────────────────────────────┐   │
//! │  │             Storage (storage/)                           │   │
//! │  │     BlockStore: fixed-size blocks of many files          │   │
//! │  └─────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//! - [`common`] - Shared primitives (ids, Error, config, values, layouts)
//! - [`storage`] - Block-granular file I/O
//! - [`buffer`] - Block cache with pinning and LRU eviction
//! - [`record`] - Fixed-format record files
//! - [`index`] - B+ tree indexes
//! - [`catalog`] - Table and index definitions
//! - [`engine`] - Statement handling over all of the above
//!
//! # Quick Start
//! ```no_run
//! use std::sync::Arc;
//! use tablestore::{BufferPool, IndexTree, RecordFile, StorageConfig, Value};
//!
//! let config = StorageConfig::builder().data_dir("./data").build();
//! let pool = Arc::new(BufferPool::from_config(&config).unwrap());
//!
//! let records = RecordFile::create(Arc::clone(&pool), "./data/t.table", "<i5s").unwrap();
//! let offset = records.insert(&[Value::Int(1), Value::from("ab")]).unwrap();
//!
//! let mut index = IndexTree::create(Arc::clone(&pool), "./data/t.index", "<i").unwrap();
//! index.insert(&[Value::Int(1)], offset).unwrap();
//! index.persist_header().unwrap();
//! pool.flush_all().unwrap();
//! ```

pub mod buffer;
pub mod catalog;
pub mod common;
pub mod engine;
pub mod index;
pub mod record;
pub mod storage;

// Re-export commonly used items at crate root for convenience
pub use common::config::{DEFAULT_BLOCK_SIZE, DEFAULT_POOL_BLOCKS};
pub use common::{BlockId, Error, FileId, FrameId, Layout, Result, Row, StorageConfig, Value};

pub use buffer::{BufferPool, BufferPoolStats, Frame, PinnedBlock, StatsSnapshot};
pub use engine::Database;
pub use index::{IndexTree, LeafIter, TreeShape};
pub use record::{CompareOp, Predicate, RecordFile};
pub use storage::BlockStore;
