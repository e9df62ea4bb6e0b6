//! Eviction policy implementations (replacers).
//!
//! - [`LruReplacer`] - true LRU over unpinned blocks

mod lru;

pub use lru::LruReplacer;
