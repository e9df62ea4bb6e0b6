//! Forward iteration along the leaf chain.

use crate::common::{Result, Row};

use super::node::Node;
use super::tree::IndexTree;

/// Ascending `(key, record offset)` pairs, starting at some position in a
/// leaf and following the chain to its end.
///
/// Each leaf is decoded once when the iterator reaches it, so a leaf that
/// is already behind the iterator may change without affecting it. Don't
/// mutate the tree while iterating (the borrow checker enforces this).
pub struct LeafIter<'a> {
    tree: &'a IndexTree,
    node: Node,
    pos: usize,
    done: bool,
}

impl<'a> LeafIter<'a> {
    pub(crate) fn new(tree: &'a IndexTree, node: Node, pos: usize) -> Self {
        Self {
            tree,
            node,
            pos,
            done: false,
        }
    }
}

impl Iterator for LeafIter<'_> {
    type Item = Result<(Row, i32)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.done {
                return None;
            }
            if self.pos < self.node.keys.len() {
                let item = (self.node.keys[self.pos].clone(), self.node.children[self.pos]);
                self.pos += 1;
                return Some(Ok(item));
            }

            let next = self.node.next_leaf();
            if next <= 0 {
                self.done = true;
                return None;
            }
            match self.tree.read_node(next as u32) {
                Ok(node) => {
                    self.node = node;
                    self.pos = 0;
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
    }
}
