//! Disk-resident B+ tree over the shared buffer pool.
//!
//! # File Layout
//! ```text
//! Block 0:  ┌──────────────┬───────────────┬──────┬────────────┬─────────┐
//!           │ total_blocks │ first_deleted │ root │ first_leaf │ 0 pad   │
//!           │     i32      │      i32      │ i32  │    i32     │         │
//!           └──────────────┴───────────────┴──────┴────────────┴─────────┘
//! Block k:  one node (see `node.rs`), or a freed block on the free list
//! ```
//!
//! Block 0 is never a node, so `0` doubles as "none" for `root`,
//! `first_leaf`, `first_deleted` and the end of the leaf chain.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use crate::buffer::BufferPool;
use crate::common::value::display_row;
use crate::common::{Error, FileId, Layout, Result, Row, Value};

use super::iter::LeafIter;
use super::node::{max_keys, Node};

/// Size of the four-integer header at the start of block 0.
pub const INDEX_HEADER_SIZE: usize = 16;

/// Tree-wide bookkeeping persisted in block 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexHeader {
    /// Blocks ever allocated, header included. Never shrinks.
    pub total_blocks: i32,
    /// Head of the freed-block list, or `0`.
    pub first_deleted: i32,
    /// Root node block, or `0` for an empty tree.
    pub root: i32,
    /// Leftmost leaf block, or `0` for an empty tree.
    pub first_leaf: i32,
}

impl IndexHeader {
    const EMPTY: IndexHeader = IndexHeader {
        total_blocks: 1,
        first_deleted: 0,
        root: 0,
        first_leaf: 0,
    };

    fn to_bytes(self, block_size: usize) -> Vec<u8> {
        let mut buf = vec![0u8; block_size];
        for (i, field) in [self.total_blocks, self.first_deleted, self.root, self.first_leaf]
            .iter()
            .enumerate()
        {
            buf[i * 4..i * 4 + 4].copy_from_slice(&field.to_le_bytes());
        }
        buf
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < INDEX_HEADER_SIZE {
            return Err(Error::Corrupted(format!(
                "index header needs {}B, block 0 has {}B",
                INDEX_HEADER_SIZE,
                bytes.len()
            )));
        }
        let field = |i: usize| {
            i32::from_le_bytes([bytes[i * 4], bytes[i * 4 + 1], bytes[i * 4 + 2], bytes[i * 4 + 3]])
        };
        Ok(Self {
            total_blocks: field(0),
            first_deleted: field(1),
            root: field(2),
            first_leaf: field(3),
        })
    }
}

/// One step of a root-to-leaf descent: an internal node and the child
/// slot that was followed.
#[derive(Debug, Clone, Copy)]
struct PathStep {
    block: u32,
    child: usize,
}

/// Summary of a successful [`IndexTree::verify`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TreeShape {
    /// Levels from root to leaves (0 for an empty tree).
    pub depth: usize,
    pub nodes: usize,
    pub keys: usize,
}

/// An index mapping composite keys to record offsets.
///
/// The header lives in memory while the tree is open; nodes are read and
/// written through the pool on every operation. Call
/// [`persist_header`](Self::persist_header) before the pool is flushed for
/// the last time, or allocations since the last call are lost.
///
/// At most one `IndexTree` may be open per file.
pub struct IndexTree {
    pool: Arc<BufferPool>,
    file: FileId,
    layout: Layout,
    header: IndexHeader,
    /// Maximum keys per node.
    n: usize,
}

impl IndexTree {
    /// Create a new, empty index file for keys of `key_format`.
    ///
    /// # Errors
    /// Fails if the file already exists or the keys are too wide.
    pub fn create(pool: Arc<BufferPool>, path: impl AsRef<Path>, key_format: &str) -> Result<Self> {
        let mut tree = Self::with_layout(pool, FileId::new(path), key_format)?;
        tree.header = IndexHeader::EMPTY;
        let bytes = tree.header.to_bytes(tree.pool.block_size());
        tree.pool.store().create_file(&tree.file, &bytes)?;
        Ok(tree)
    }

    /// Open an existing index file.
    ///
    /// # Errors
    /// `NotFound` I/O error if the file doesn't exist.
    pub fn open(pool: Arc<BufferPool>, path: impl AsRef<Path>, key_format: &str) -> Result<Self> {
        let mut tree = Self::with_layout(pool, FileId::new(path), key_format)?;
        let block = tree.pool.get_block(&tree.file, 0)?;
        let header = IndexHeader::from_bytes(&block.read())?;
        drop(block);
        tree.header = header;
        Ok(tree)
    }

    /// Open the index file, creating it first if it doesn't exist.
    pub fn open_or_create(
        pool: Arc<BufferPool>,
        path: impl AsRef<Path>,
        key_format: &str,
    ) -> Result<Self> {
        match Self::open(Arc::clone(&pool), path.as_ref(), key_format) {
            Err(e) if e.is_not_found() => Self::create(pool, path, key_format),
            other => other,
        }
    }

    fn with_layout(pool: Arc<BufferPool>, file: FileId, key_format: &str) -> Result<Self> {
        let layout = Layout::parse(key_format)?;
        let n = max_keys(pool.block_size(), layout.size())?;
        Ok(Self {
            pool,
            file,
            layout,
            header: IndexHeader::EMPTY,
            n,
        })
    }

    pub fn file_id(&self) -> &FileId {
        &self.file
    }

    pub fn key_layout(&self) -> &Layout {
        &self.layout
    }

    /// The in-memory header (possibly ahead of block 0).
    pub fn header(&self) -> IndexHeader {
        self.header
    }

    /// Maximum keys per node.
    pub fn max_keys(&self) -> usize {
        self.n
    }

    /// Minimum keys per non-root node.
    pub fn min_keys(&self) -> usize {
        self.n.div_ceil(2)
    }

    pub fn is_empty(&self) -> bool {
        self.header.root == 0
    }

    /// Write the in-memory header to block 0.
    pub fn persist_header(&self) -> Result<()> {
        let block = self.pool.get_block(&self.file, 0)?;
        block.write(&self.header.to_bytes(self.pool.block_size()), false)
    }

    // ========================================================================
    // Public API: lookups
    // ========================================================================

    /// Iterate from the smallest key `>= key` to the end of the index.
    ///
    /// `key` may be a leading prefix of the key columns: a prefix sorts
    /// before every full key that starts with it, so iteration begins at
    /// the first entry carrying that prefix.
    ///
    /// # Errors
    /// `Error::EmptyIndex` if the tree has no root, `Error::Format` for an
    /// empty key or one with more values than the key has columns.
    pub fn find(&self, key: &[Value]) -> Result<LeafIter<'_>> {
        if self.is_empty() {
            return Err(Error::EmptyIndex(self.file.clone()));
        }
        let key = self.normalize_lookup_key(key)?;
        let (_, leaf, _) = self.find_leaf(&key)?;
        let pos = leaf.keys.partition_point(|k| *k < key);
        Ok(LeafIter::new(self, leaf, pos))
    }

    /// Iterate over every entry in ascending key order.
    ///
    /// # Errors
    /// `Error::EmptyIndex` if the tree has no leaves.
    pub fn iter_leaves(&self) -> Result<LeafIter<'_>> {
        if self.header.first_leaf == 0 {
            return Err(Error::EmptyIndex(self.file.clone()));
        }
        let first = self.read_node(self.header.first_leaf as u32)?;
        Ok(LeafIter::new(self, first, 0))
    }

    /// The record offset stored under exactly `key`, if any.
    pub fn get(&self, key: &[Value]) -> Result<Option<i32>> {
        if self.is_empty() {
            return Ok(None);
        }
        let key = self.normalize(key)?;
        let (_, leaf, _) = self.find_leaf(&key)?;
        Ok(leaf
            .keys
            .binary_search(&key)
            .ok()
            .map(|pos| leaf.children[pos]))
    }

    // ========================================================================
    // Public API: insert
    // ========================================================================

    /// Map `key` to `value`.
    ///
    /// # Errors
    /// `Error::DuplicateKey` if `key` is already present; nothing changes
    /// in that case.
    pub fn insert(&mut self, key: &[Value], value: i32) -> Result<()> {
        let key = self.normalize(key)?;

        if self.is_empty() {
            let block = self.allocate_block()?;
            self.write_node(block, &Node::leaf(vec![key], vec![value], 0))?;
            self.header.root = block as i32;
            self.header.first_leaf = block as i32;
            return Ok(());
        }

        let (block, mut leaf, path) = self.find_leaf(&key)?;
        let pos = match leaf.keys.binary_search(&key) {
            Ok(_) => return Err(Error::DuplicateKey(display_row(&key))),
            Err(pos) => pos,
        };
        leaf.keys.insert(pos, key);
        leaf.children.insert(pos, value);

        if leaf.keys.len() <= self.n {
            return self.write_node(block, &leaf);
        }
        self.split_upward(block, leaf, path)
    }

    /// Split an overflowing node and push separators up until a parent
    /// has room, growing a new root if the old one splits.
    fn split_upward(&mut self, mut block: u32, mut node: Node, mut path: Vec<PathStep>) -> Result<()> {
        loop {
            let right_block = self.allocate_block()?;
            let (right, separator) = node.split(self.n, right_block as i32);
            self.write_node(block, &node)?;
            self.write_node(right_block, &right)?;
            tracing::debug!(
                file = %self.file,
                left = block,
                right = right_block,
                leaf = node.is_leaf,
                "split index node"
            );

            let Some(step) = path.pop() else {
                let root_block = self.allocate_block()?;
                let root = Node::internal(vec![separator], vec![block as i32, right_block as i32]);
                self.write_node(root_block, &root)?;
                self.header.root = root_block as i32;
                tracing::debug!(file = %self.file, root = root_block, "index grew a level");
                return Ok(());
            };

            let mut parent = self.read_node(step.block)?;
            parent.keys.insert(step.child, separator);
            parent.children.insert(step.child + 1, right_block as i32);
            if parent.keys.len() <= self.n {
                return self.write_node(step.block, &parent);
            }
            block = step.block;
            node = parent;
        }
    }

    // ========================================================================
    // Public API: delete
    // ========================================================================

    /// Remove `key` and its value.
    ///
    /// # Errors
    /// `Error::KeyNotFound` if `key` is absent (including from an empty
    /// tree).
    pub fn delete(&mut self, key: &[Value]) -> Result<()> {
        let key = self.normalize(key)?;
        if self.is_empty() {
            return Err(Error::KeyNotFound(display_row(&key)));
        }

        let (block, mut leaf, path) = self.find_leaf(&key)?;
        let pos = leaf
            .keys
            .binary_search(&key)
            .map_err(|_| Error::KeyNotFound(display_row(&key)))?;
        leaf.keys.remove(pos);
        leaf.children.remove(pos);

        if !path.is_empty() && leaf.keys.len() >= self.min_keys() {
            return self.write_node(block, &leaf);
        }
        self.rebalance(block, leaf, path)
    }

    /// Fix an underflowing node, then its parent, and so on up.
    ///
    /// Tries, in order: borrow from the left sibling, borrow from the right
    /// sibling, fuse into the left sibling, fuse the right sibling in. A
    /// fusion always frees the right-hand block of the pair. The root may
    /// hold any number of keys; once it has none it is replaced by its
    /// only child, or the tree becomes empty.
    fn rebalance(&mut self, mut block: u32, mut node: Node, mut path: Vec<PathStep>) -> Result<()> {
        let min = self.min_keys();
        loop {
            let Some(step) = path.pop() else {
                return self.settle_root(block, node);
            };

            let mut parent = self.read_node(step.block)?;
            let idx = step.child;

            let mut left = None;
            if idx > 0 {
                let left_block = child_block(&parent, idx - 1)?;
                let mut sibling = self.read_node(left_block)?;
                if sibling.keys.len() > min {
                    node.transfer_from_left(&mut sibling, &mut parent, idx - 1);
                    self.write_node(block, &node)?;
                    self.write_node(left_block, &sibling)?;
                    return self.write_node(step.block, &parent);
                }
                left = Some((left_block, sibling));
            }

            let mut right = None;
            if idx < parent.keys.len() {
                let right_block = child_block(&parent, idx + 1)?;
                let mut sibling = self.read_node(right_block)?;
                if sibling.keys.len() > min {
                    node.transfer_from_right(&mut sibling, &mut parent, idx);
                    self.write_node(block, &node)?;
                    self.write_node(right_block, &sibling)?;
                    return self.write_node(step.block, &parent);
                }
                right = Some((right_block, sibling));
            }

            match (left, right) {
                (Some((left_block, mut sibling)), _) => {
                    sibling.fuse_with(node, &mut parent, idx - 1);
                    self.write_node(left_block, &sibling)?;
                    self.free_block(block)?;
                    tracing::debug!(file = %self.file, kept = left_block, freed = block, "fused index nodes");
                }
                (None, Some((right_block, sibling))) => {
                    node.fuse_with(sibling, &mut parent, idx);
                    self.write_node(block, &node)?;
                    self.free_block(right_block)?;
                    tracing::debug!(file = %self.file, kept = block, freed = right_block, "fused index nodes");
                }
                (None, None) => {
                    return Err(Error::Corrupted(format!(
                        "index node {} has no siblings under {}",
                        block, step.block
                    )));
                }
            }

            if !path.is_empty() && parent.keys.len() >= min {
                return self.write_node(step.block, &parent);
            }
            block = step.block;
            node = parent;
        }
    }

    fn settle_root(&mut self, block: u32, root: Node) -> Result<()> {
        if !root.keys.is_empty() {
            return self.write_node(block, &root);
        }
        if root.is_leaf {
            self.header.root = 0;
            self.header.first_leaf = 0;
        } else {
            self.header.root = root.children[0];
        }
        tracing::debug!(file = %self.file, old_root = block, new_root = self.header.root, "index lost a level");
        self.free_block(block)
    }

    // ========================================================================
    // Diagnostics
    // ========================================================================

    /// Check every structural invariant and report the tree's shape.
    ///
    /// # Errors
    /// `Error::Corrupted` naming the first violation found: unsorted or
    /// out-of-range keys, node occupancy outside `[ceil(n/2), n]` (the root
    /// only needs one key), uneven leaf depth, or a leaf chain that
    /// doesn't visit every leaf in order.
    pub fn verify(&self) -> Result<TreeShape> {
        if self.is_empty() {
            if self.header.first_leaf != 0 {
                return Err(Error::Corrupted("empty index with a first leaf".to_string()));
            }
            return Ok(TreeShape::default());
        }

        let mut walk = Walk::default();
        self.verify_node(self.header.root as u32, None, None, 1, true, &mut walk)?;

        // The chain must visit exactly the leaves found by the walk.
        let mut chain = Vec::with_capacity(walk.leaves.len());
        let mut next = self.header.first_leaf;
        while next != 0 {
            if chain.len() > walk.leaves.len() {
                return Err(Error::Corrupted("leaf chain is longer than the tree".to_string()));
            }
            chain.push(next as u32);
            next = self.read_node(next as u32)?.next_leaf();
        }
        if chain != walk.leaves {
            return Err(Error::Corrupted(format!(
                "leaf chain {:?} does not match leaves {:?}",
                chain, walk.leaves
            )));
        }

        Ok(TreeShape {
            depth: walk.depth.unwrap_or(0),
            nodes: walk.nodes,
            keys: walk.keys,
        })
    }

    fn verify_node(
        &self,
        block: u32,
        lower: Option<&Row>,
        upper: Option<&Row>,
        depth: usize,
        is_root: bool,
        walk: &mut Walk,
    ) -> Result<()> {
        let node = self.read_node(block)?;
        walk.nodes += 1;
        let count = node.keys.len();
        if count > self.n || count == 0 || (!is_root && count < self.min_keys()) {
            return Err(corrupt(
                block,
                format!("{} keys outside [{}, {}]", count, self.min_keys(), self.n),
            ));
        }
        if node.children.len() != count + 1 {
            return Err(corrupt(block, "children count is not keys + 1"));
        }
        if node.keys.windows(2).any(|w| w[0] >= w[1]) {
            return Err(corrupt(block, "keys out of order"));
        }
        let first = &node.keys[0];
        let last = &node.keys[count - 1];
        if lower.is_some_and(|lo| first < lo) || upper.is_some_and(|hi| last >= hi) {
            return Err(corrupt(block, "keys outside the parent's separators"));
        }

        if node.is_leaf {
            walk.keys += count;
            walk.leaves.push(block);
            match walk.depth {
                None => walk.depth = Some(depth),
                Some(d) if d != depth => return Err(corrupt(block, "leaves at different depths")),
                Some(_) => {}
            }
            return Ok(());
        }

        for i in 0..=count {
            let lo = if i == 0 { lower } else { Some(&node.keys[i - 1]) };
            let hi = if i == count { upper } else { Some(&node.keys[i]) };
            self.verify_node(child_block(&node, i)?, lo, hi, depth + 1, false, walk)?;
        }
        Ok(())
    }

    // ========================================================================
    // Internal: descent, block allocation and node I/O
    // ========================================================================

    /// Descend to the leaf whose range covers `key`.
    ///
    /// Follows the child after the last separator `<= key`, so a key equal
    /// to a separator goes right.
    fn find_leaf(&self, key: &Row) -> Result<(u32, Node, Vec<PathStep>)> {
        let mut block = self.header.root as u32;
        let mut path = Vec::new();
        loop {
            let node = self.read_node(block)?;
            if node.is_leaf {
                return Ok((block, node, path));
            }
            let child = node.keys.partition_point(|k| k <= key);
            path.push(PathStep { block, child });
            block = child_block(&node, child)?;
        }
    }

    /// Take a block off the free list, or append one.
    fn allocate_block(&mut self) -> Result<u32> {
        if self.header.first_deleted > 0 {
            let block = self.header.first_deleted as u32;
            self.header.first_deleted = self.read_node(block)?.next_deleted;
            return Ok(block);
        }
        let block = self.header.total_blocks as u32;
        self.header.total_blocks += 1;
        Ok(block)
    }

    /// Push a node block onto the free list.
    fn free_block(&mut self, block: u32) -> Result<()> {
        self.write_node(block, &Node::freed(self.header.first_deleted))?;
        self.header.first_deleted = block as i32;
        Ok(())
    }

    pub(crate) fn read_node(&self, block: u32) -> Result<Node> {
        let pinned = self.pool.get_block(&self.file, block)?;
        let data = pinned.read();
        Node::from_bytes(&data, &self.layout)
    }

    fn write_node(&self, block: u32, node: &Node) -> Result<()> {
        let bytes = node.to_bytes(&self.layout, self.pool.block_size())?;
        self.pool.get_block(&self.file, block)?.write(&bytes, false)
    }

    /// Round-trip a caller's key through the key layout, so that stored
    /// and lookup keys compare the same way (and over-wide keys fail
    /// before anything is modified).
    fn normalize(&self, key: &[Value]) -> Result<Row> {
        self.layout.decode(&self.layout.encode(key)?)
    }

    /// Like [`normalize`](Self::normalize), but a shorter prefix is
    /// accepted as-is.
    fn normalize_lookup_key(&self, key: &[Value]) -> Result<Row> {
        if key.is_empty() || key.len() > self.layout.len() {
            return Err(Error::Format(format!(
                "lookup key has {} values, key has {} columns",
                key.len(),
                self.layout.len()
            )));
        }
        if key.len() == self.layout.len() {
            return self.normalize(key);
        }
        Ok(key.to_vec())
    }
}

#[derive(Default)]
struct Walk {
    depth: Option<usize>,
    nodes: usize,
    keys: usize,
    leaves: Vec<u32>,
}

fn corrupt(block: u32, what: impl fmt::Display) -> Error {
    Error::Corrupted(format!("index node {}: {}", block, what))
}

fn child_block(node: &Node, i: usize) -> Result<u32> {
    node.children
        .get(i)
        .and_then(|&c| u32::try_from(c).ok())
        .filter(|&c| c != 0)
        .ok_or_else(|| Error::Corrupted(format!("bad child pointer at slot {}", i)))
}
