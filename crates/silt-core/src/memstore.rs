//! In-memory ordered key/value storage.
//!
//! The [`MemoryStore`] trait is the engine's sorted-map contract. It is used
//! in two places with very different lifetimes: as the volatile write buffer
//! that absorbs every mutation until it is flushed into a segment, and as the
//! in-memory representation of a segment's sparse index.
//!
//! [`Tree`] is the standard implementation: a plain binary search tree,
//! unbalanced under incremental inserts and bulk-balanced when built from a
//! pre-sorted slice (which is how segment indexes are loaded).

use silt_common::types::Pair;

use crate::error::{Error, Result};

/// An ordered in-memory store of pairs.
///
/// Iteration order is ascending by key. Deletion is logical: `delete` records
/// a tombstone pair so the deletion survives a flush and can mask older
/// segments.
pub trait MemoryStore: Send {
    /// Inserts a pair, replacing any pair with the same key.
    fn put(&mut self, pair: Pair);

    /// Records a tombstone for `key`.
    fn delete(&mut self, key: &str);

    /// Returns the pair stored under `key`, tombstones included.
    fn get(&self, key: &str) -> Result<Pair>;

    /// Returns the pair with the smallest key, if any.
    fn min(&self) -> Option<Pair>;

    /// Returns the pair with the largest key, if any.
    fn max(&self) -> Option<Pair>;

    /// Returns all pairs in ascending key order.
    fn pairs(&self) -> Vec<Pair>;

    /// Returns the neighbors bracketing `key`.
    ///
    /// For a store holding keys `k1 < … < kn`:
    /// - `key < k1` or `key > kn` fails with [`Error::OutOfRange`];
    /// - `key == k1` yields `(None, successor)`, `key == kn` yields
    ///   `(predecessor, None)`, and both at once yield `(None, None)`;
    /// - otherwise the strictly-smaller and strictly-greater neighbors.
    ///
    /// The `None` sides are what lets a segment lookup clamp its scan window
    /// to the full data region when the key sits on the index boundary.
    fn range(&self, key: &str) -> Result<(Option<Pair>, Option<Pair>)>;

    /// Bulk-loads pairs already sorted ascending by key.
    ///
    /// Implementations may exploit the ordering; the default is a plain
    /// insert loop.
    fn extend_sorted(&mut self, pairs: Vec<Pair>) {
        for pair in pairs {
            self.put(pair);
        }
    }

    /// Number of resident pairs (tombstones count).
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Produces fresh, empty memory stores.
///
/// Handed to the segment backend so every loaded segment gets its own sparse
/// index store, and to the engine so a flush can swap in a new write buffer.
pub type StoreFactory = fn() -> Box<dyn MemoryStore>;

struct Node {
    pair: Pair,
    left: Option<Box<Node>>,
    right: Option<Box<Node>>,
}

impl Node {
    fn new(pair: Pair) -> Self {
        Self {
            pair,
            left: None,
            right: None,
        }
    }

    /// Inserts or replaces; returns `true` when the tree grew.
    fn put(&mut self, pair: Pair) -> bool {
        use std::cmp::Ordering::*;
        match pair.key().cmp(self.pair.key()) {
            Less => match &mut self.left {
                Some(node) => node.put(pair),
                None => {
                    self.left = Some(Box::new(Node::new(pair)));
                    true
                }
            },
            Greater => match &mut self.right {
                Some(node) => node.put(pair),
                None => {
                    self.right = Some(Box::new(Node::new(pair)));
                    true
                }
            },
            Equal => {
                self.pair = pair;
                false
            }
        }
    }

    fn collect(&self, out: &mut Vec<Pair>) {
        if let Some(left) = &self.left {
            left.collect(out);
        }
        out.push(self.pair.clone());
        if let Some(right) = &self.right {
            right.collect(out);
        }
    }

    /// Builds a balanced subtree from a pre-sorted run of pairs.
    fn from_sorted(mut pairs: Vec<Pair>) -> Option<Box<Node>> {
        if pairs.is_empty() {
            return None;
        }

        // Midpoint pivot; everything after it becomes the right subtree.
        let mid = pairs.len() / 2;
        let right = pairs.split_off(mid + 1);
        let pair = pairs.pop().expect("pivot present");

        let mut node = Box::new(Node::new(pair));
        node.left = Node::from_sorted(pairs);
        node.right = Node::from_sorted(right);
        Some(node)
    }
}

/// A binary-search-tree [`MemoryStore`].
#[derive(Default)]
pub struct Tree {
    root: Option<Box<Node>>,
    size: usize,
}

impl Tree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a balanced tree from pairs already sorted ascending by key.
    ///
    /// The segment reader uses this when it loads a sparse index, whose
    /// entries come off the stream in key order.
    pub fn from_sorted(pairs: Vec<Pair>) -> Self {
        let size = pairs.len();
        Self {
            root: Node::from_sorted(pairs),
            size,
        }
    }

    /// Greatest pair with key strictly less than `key`.
    fn predecessor(&self, key: &str) -> Option<Pair> {
        let mut best = None;
        let mut cur = self.root.as_deref();
        while let Some(node) = cur {
            if node.pair.key() < key {
                best = Some(node.pair.clone());
                cur = node.right.as_deref();
            } else {
                cur = node.left.as_deref();
            }
        }
        best
    }

    /// Smallest pair with key strictly greater than `key`.
    fn successor(&self, key: &str) -> Option<Pair> {
        let mut best = None;
        let mut cur = self.root.as_deref();
        while let Some(node) = cur {
            if node.pair.key() > key {
                best = Some(node.pair.clone());
                cur = node.left.as_deref();
            } else {
                cur = node.right.as_deref();
            }
        }
        best
    }
}

impl MemoryStore for Tree {
    fn put(&mut self, pair: Pair) {
        match &mut self.root {
            Some(root) => {
                if root.put(pair) {
                    self.size += 1;
                }
            }
            None => {
                self.root = Some(Box::new(Node::new(pair)));
                self.size = 1;
            }
        }
    }

    fn delete(&mut self, key: &str) {
        self.put(Pair::tombstone(key));
    }

    fn get(&self, key: &str) -> Result<Pair> {
        let mut cur = self.root.as_deref();
        while let Some(node) = cur {
            use std::cmp::Ordering::*;
            cur = match key.cmp(node.pair.key()) {
                Equal => return Ok(node.pair.clone()),
                Less => node.left.as_deref(),
                Greater => node.right.as_deref(),
            };
        }

        Err(Error::NoSuchKey)
    }

    fn min(&self) -> Option<Pair> {
        let mut node = self.root.as_deref()?;
        while let Some(left) = node.left.as_deref() {
            node = left;
        }
        Some(node.pair.clone())
    }

    fn max(&self) -> Option<Pair> {
        let mut node = self.root.as_deref()?;
        while let Some(right) = node.right.as_deref() {
            node = right;
        }
        Some(node.pair.clone())
    }

    fn pairs(&self) -> Vec<Pair> {
        let mut out = Vec::with_capacity(self.size);
        if let Some(root) = &self.root {
            root.collect(&mut out);
        }
        out
    }

    fn extend_sorted(&mut self, pairs: Vec<Pair>) {
        if self.root.is_none() {
            // Empty tree: rebuild balanced around the midpoint pivots.
            *self = Tree::from_sorted(pairs);
            return;
        }

        for pair in pairs {
            self.put(pair);
        }
    }

    fn range(&self, key: &str) -> Result<(Option<Pair>, Option<Pair>)> {
        let (min, max) = match (self.min(), self.max()) {
            (Some(min), Some(max)) => (min, max),
            _ => return Err(Error::OutOfRange),
        };

        if key < min.key() || key > max.key() {
            return Err(Error::OutOfRange);
        }

        let left = if key == min.key() {
            None
        } else {
            self.predecessor(key)
        };
        let right = if key == max.key() {
            None
        } else {
            self.successor(key)
        };

        Ok((left, right))
    }

    fn len(&self) -> usize {
        self.size
    }
}
