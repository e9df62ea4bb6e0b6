//! Secondary and primary key indexes.

pub mod btree;

pub use btree::{IndexTree, LeafIter, TreeShape};
