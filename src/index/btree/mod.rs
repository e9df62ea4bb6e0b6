//! B+ tree index stored in its own file.
//!
//! Every node occupies one block. Leaves hold `(key, record offset)` pairs
//! and are chained left to right; internal nodes hold separators. Keys are
//! packed with a [`Layout`](crate::common::Layout), so every node of a tree
//! has the same capacity.

mod iter;
mod node;
mod tree;

pub use iter::LeafIter;
pub use node::{max_keys, Node, NODE_META_SIZE};
pub use tree::{IndexHeader, IndexTree, TreeShape, INDEX_HEADER_SIZE};
