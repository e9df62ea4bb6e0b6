//! B+ tree node: in-memory form, block encoding and the local
//! split/transfer/fuse steps of tree maintenance.
//!
//! # Block Layout
//! ```text
//! ┌──────────────┬─────────┬───────────┬──────────────────┬──────────────────────┬─────────┐
//! │ next_deleted │ is_leaf │ key_count │ keys[key_count]  │ children[count + 1]  │ 0 pad   │
//! │     i32      │   i32   │    i32    │ packed per key   │        i32           │         │
//! └──────────────┴─────────┴───────────┴──────────────────┴──────────────────────┴─────────┘
//! ```
//!
//! Every node stores `key_count + 1` children. For an internal node they
//! are child block offsets; for a leaf, `children[i]` is the record offset
//! of `keys[i]` and the trailing entry is the next leaf's block offset
//! (`0` ends the chain).

use crate::common::{Error, Layout, Result, Row};

/// Size of the `(next_deleted, is_leaf, key_count)` prefix.
pub const NODE_META_SIZE: usize = 12;

/// Bytes of one index file block reserved outside the keys.
///
/// Three meta integers plus the one child pointer that a node has in
/// excess of its key count.
const NODE_OVERHEAD: usize = NODE_META_SIZE + 4;

/// Maximum keys per node for `key_size`-byte keys in `block_size`-byte
/// blocks.
///
/// Rounded down to an even number so that both halves of a split, and the
/// result of any fusion, stay within `[n / 2, n]` keys.
///
/// # Errors
/// `Error::Format` if fewer than two keys fit.
pub fn max_keys(block_size: usize, key_size: usize) -> Result<usize> {
    let n = block_size.saturating_sub(NODE_OVERHEAD) / (key_size + 4);
    let n = n - n % 2;
    if n < 2 {
        return Err(Error::Format(format!(
            "keys of {}B leave room for fewer than 2 per {}B block",
            key_size, block_size
        )));
    }
    Ok(n)
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub is_leaf: bool,
    pub keys: Vec<Row>,
    pub children: Vec<i32>,
    /// Free-list link, meaningful only once the node's block is freed.
    pub next_deleted: i32,
}

impl Node {
    /// A leaf holding `keys` → `values`, chained to `next_leaf`.
    pub fn leaf(keys: Vec<Row>, values: Vec<i32>, next_leaf: i32) -> Self {
        let mut children = values;
        children.push(next_leaf);
        Self {
            is_leaf: true,
            keys,
            children,
            next_deleted: 0,
        }
    }

    pub fn internal(keys: Vec<Row>, children: Vec<i32>) -> Self {
        Self {
            is_leaf: false,
            keys,
            children,
            next_deleted: 0,
        }
    }

    /// Contents of a block on the free list.
    pub fn freed(next_deleted: i32) -> Self {
        Self {
            is_leaf: false,
            keys: Vec::new(),
            children: vec![0],
            next_deleted,
        }
    }

    /// Next leaf in the chain (leaves only).
    #[inline]
    pub fn next_leaf(&self) -> i32 {
        self.children.last().copied().unwrap_or(0)
    }

    // ========================================================================
    // Encoding
    // ========================================================================

    /// Encode into exactly `block_size` bytes.
    pub fn to_bytes(&self, layout: &Layout, block_size: usize) -> Result<Vec<u8>> {
        let needed = self.encoded_len(layout);
        if needed > block_size {
            return Err(Error::OversizedWrite {
                len: needed,
                block_size,
            });
        }

        let mut buf = vec![0u8; block_size];
        buf[0..4].copy_from_slice(&self.next_deleted.to_le_bytes());
        buf[4..8].copy_from_slice(&(self.is_leaf as i32).to_le_bytes());
        buf[8..12].copy_from_slice(&(self.keys.len() as i32).to_le_bytes());

        let mut pos = NODE_META_SIZE;
        for key in &self.keys {
            layout.encode_into(key, &mut buf[pos..pos + layout.size()])?;
            pos += layout.size();
        }
        for child in &self.children {
            buf[pos..pos + 4].copy_from_slice(&child.to_le_bytes());
            pos += 4;
        }
        Ok(buf)
    }

    /// Decode a node block.
    ///
    /// # Errors
    /// `Error::Corrupted` if the key count is negative or the node would
    /// extend past the end of `bytes`.
    pub fn from_bytes(bytes: &[u8], layout: &Layout) -> Result<Self> {
        if bytes.len() < NODE_META_SIZE {
            return Err(Error::Corrupted(format!(
                "index node needs {}B of metadata, block has {}B",
                NODE_META_SIZE,
                bytes.len()
            )));
        }
        let next_deleted = read_i32(bytes, 0);
        let is_leaf = read_i32(bytes, 4) != 0;
        let key_count = usize::try_from(read_i32(bytes, 8))
            .map_err(|_| Error::Corrupted("negative key count in index node".to_string()))?;

        let end = NODE_META_SIZE + key_count * layout.size() + (key_count + 1) * 4;
        if end > bytes.len() {
            return Err(Error::Corrupted(format!(
                "index node with {} keys overruns its {}B block",
                key_count,
                bytes.len()
            )));
        }

        let mut pos = NODE_META_SIZE;
        let mut keys = Vec::with_capacity(key_count);
        for _ in 0..key_count {
            keys.push(layout.decode(&bytes[pos..pos + layout.size()])?);
            pos += layout.size();
        }
        let children = (0..=key_count)
            .map(|i| read_i32(bytes, pos + i * 4))
            .collect();

        Ok(Self {
            is_leaf,
            keys,
            children,
            next_deleted,
        })
    }

    fn encoded_len(&self, layout: &Layout) -> usize {
        NODE_META_SIZE + self.keys.len() * layout.size() + self.children.len() * 4
    }

    // ========================================================================
    // Local restructuring
    // ========================================================================

    /// Split an overflowing node (`n + 1` keys) in two.
    ///
    /// `self` keeps the lower half and the returned node takes the upper
    /// half. Also returns the separator to insert into the parent: for a
    /// leaf, a copy of the right half's first key (and `self` is relinked
    /// to `right_block`); for an internal node, the middle key, which moves
    /// up and is removed from both halves.
    pub fn split(&mut self, n: usize, right_block: i32) -> (Node, Row) {
        let at = n / 2 + 1;
        let right_keys = self.keys.split_off(at);
        let right_children = self.children.split_off(at);

        if self.is_leaf {
            // right_children carries the old next-leaf link along.
            self.children.push(right_block);
            let separator = right_keys[0].clone();
            (Node::leaf_from_parts(right_keys, right_children), separator)
        } else {
            let separator = self.keys.pop().unwrap_or_default();
            (Node::internal(right_keys, right_children), separator)
        }
    }

    fn leaf_from_parts(keys: Vec<Row>, children: Vec<i32>) -> Self {
        Self {
            is_leaf: true,
            keys,
            children,
            next_deleted: 0,
        }
    }

    /// Move the last entry of `left` into the front of `self`, where
    /// `parent.keys[divide]` separates the two.
    pub fn transfer_from_left(&mut self, left: &mut Node, parent: &mut Node, divide: usize) {
        if self.is_leaf {
            let len = left.children.len();
            let value = left.children.remove(len - 2);
            if let Some(key) = left.keys.pop() {
                self.keys.insert(0, key);
                self.children.insert(0, value);
            }
            parent.keys[divide] = self.keys[0].clone();
        } else if let (Some(key), Some(child)) = (left.keys.pop(), left.children.pop()) {
            let separator = std::mem::replace(&mut parent.keys[divide], key);
            self.keys.insert(0, separator);
            self.children.insert(0, child);
        }
    }

    /// Move the first entry of `right` onto the end of `self`, where
    /// `parent.keys[divide]` separates the two.
    pub fn transfer_from_right(&mut self, right: &mut Node, parent: &mut Node, divide: usize) {
        let key = right.keys.remove(0);
        let child = right.children.remove(0);
        if self.is_leaf {
            self.keys.push(key);
            let len = self.children.len();
            self.children.insert(len - 1, child);
            parent.keys[divide] = right.keys[0].clone();
        } else {
            let separator = std::mem::replace(&mut parent.keys[divide], key);
            self.keys.push(separator);
            self.children.push(child);
        }
    }

    /// Absorb `right`, the sibling after `self` under `parent.keys[divide]`,
    /// and drop that separator and the pointer to `right` from the parent.
    pub fn fuse_with(&mut self, right: Node, parent: &mut Node, divide: usize) {
        let separator = parent.keys.remove(divide);
        parent.children.remove(divide + 1);

        if self.is_leaf {
            // Our next-leaf link pointed at `right`; take over its link.
            self.children.pop();
        } else {
            self.keys.push(separator);
        }
        self.keys.extend(right.keys);
        self.children.extend(right.children);
    }
}

fn read_i32(bytes: &[u8], at: usize) -> i32 {
    i32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}
