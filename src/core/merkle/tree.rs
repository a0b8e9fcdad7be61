// Copyright (c) 2026 Quorumcast
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Append-only binary Merkle tree over 32-byte leaves.
//!
//! Leaves append along the right spine: when the leaf count is a power
//! of two the tree grows a level (old root becomes the left child of a
//! new root), otherwise the append descends right children to the first
//! subtree of power-of-two size and joins there. Every insertion yields
//! the leaf's authentication path — the left-sibling hash of each node
//! touched on the way up. node hash = SHA-256(left ‖ right).

use ring::digest;

use crate::core::types::Hash32;

/// SHA-256 of `left ‖ right`.
pub fn hash_pair(left: &Hash32, right: &Hash32) -> Hash32 {
    let mut buf = [0u8; 64];
    buf[..32].copy_from_slice(left);
    buf[32..].copy_from_slice(right);
    let d = digest::digest(&digest::SHA256, &buf);
    let mut out = [0u8; 32];
    out.copy_from_slice(d.as_ref());
    out
}

/// Recompute a root from a leaf and its authentication path.
pub fn fold_path(leaf: &Hash32, path: &[Hash32]) -> Hash32 {
    let mut acc = *leaf;
    for sibling in path {
        acc = hash_pair(sibling, &acc);
    }
    acc
}

/// The `(root, leaf, path)` triple produced by one insertion, handed to
/// the signer pool.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProofWork {
    /// Tree root at the time of insertion.
    pub root: Hash32,
    /// The inserted leaf hash.
    pub leaf: Hash32,
    /// Left-sibling hashes from the leaf up to the root.
    pub path: Vec<Hash32>,
}

struct NodeSlot {
    left: Option<usize>,
    right: Option<usize>,
    hash: Hash32,
}

/// Append-only Merkle tree. Nodes live in an index arena; the root
/// moves as the tree grows.
pub struct MerkleTree {
    nodes: Vec<NodeSlot>,
    root: Option<usize>,
    leaf_count: usize,
}

impl Default for MerkleTree {
    fn default() -> Self {
        Self::new()
    }
}

impl MerkleTree {
    /// An empty tree.
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            root: None,
            leaf_count: 0,
        }
    }

    /// Number of appended leaves.
    pub fn leaf_count(&self) -> usize {
        self.leaf_count
    }

    /// Current root hash; `None` while empty.
    pub fn root_hash(&self) -> Option<Hash32> {
        self.root.map(|i| self.nodes[i].hash)
    }

    /// Append a leaf, returning its proof work item.
    pub fn append(&mut self, leaf: Hash32) -> ProofWork {
        let leaf_idx = self.alloc(None, None, leaf);

        let Some(root) = self.root else {
            // First leaf is the root; its path is empty.
            self.root = Some(leaf_idx);
            self.leaf_count = 1;
            return ProofWork {
                root: leaf,
                leaf,
                path: Vec::new(),
            };
        };

        // Walk down the right spine to the join point: the first node
        // (from the root) whose subtree holds a power-of-two number of
        // leaves. `attach_height` is 0 when the whole tree is full, in
        // which case the join creates a new root.
        let height = attach_height(self.leaf_count);
        let mut spine = Vec::with_capacity(height);
        let mut cur = root;
        for _ in 0..height {
            spine.push(cur);
            cur = self.nodes[cur].right.unwrap_or(cur);
        }

        let mut path = Vec::with_capacity(height + 1);
        let join_hash = self.nodes[cur].hash;
        let joined = self.alloc(Some(cur), Some(leaf_idx), hash_pair(&join_hash, &leaf));
        path.push(join_hash);

        if let Some(&deepest) = spine.last() {
            self.nodes[deepest].right = Some(joined);
        } else {
            self.root = Some(joined);
        }

        // Recompute hashes back up, collecting each left sibling.
        for &idx in spine.iter().rev() {
            let (l, r) = (self.nodes[idx].left, self.nodes[idx].right);
            let (Some(l), Some(r)) = (l, r) else { continue };
            self.nodes[idx].hash = hash_pair(&self.nodes[l].hash, &self.nodes[r].hash);
            path.push(self.nodes[l].hash);
        }

        self.leaf_count += 1;
        ProofWork {
            root: self.root_hash().unwrap_or(leaf),
            leaf,
            path,
        }
    }

    fn alloc(&mut self, left: Option<usize>, right: Option<usize>, hash: Hash32) -> usize {
        self.nodes.push(NodeSlot { left, right, hash });
        self.nodes.len() - 1
    }
}

/// Number of right-spine levels to descend before joining a new leaf
/// into a tree of `leaf_count` leaves: the leading power-of-two
/// components of the count's binary decomposition.
fn attach_height(leaf_count: usize) -> usize {
    debug_assert!(leaf_count > 0);
    let mut rem = leaf_count;
    let mut height = 0;
    loop {
        let top = prev_power_of_two(rem);
        if rem == top {
            return height;
        }
        rem -= top;
        height += 1;
    }
}

fn prev_power_of_two(x: usize) -> usize {
    debug_assert!(x > 0);
    1 << (usize::BITS - 1 - x.leading_zeros())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(fill: u8) -> Hash32 {
        [fill; 32]
    }

    #[test]
    fn first_leaf_is_root_with_empty_path() {
        let mut t = MerkleTree::new();
        let w = t.append(leaf(1));
        assert!(w.path.is_empty());
        assert_eq!(w.root, w.leaf);
        assert_eq!(t.root_hash(), Some(leaf(1)));
    }

    #[test]
    fn power_of_two_grows_a_level() {
        let mut t = MerkleTree::new();
        t.append(leaf(1));
        let w = t.append(leaf(2));
        assert_eq!(w.path, vec![leaf(1)]);
        assert_eq!(w.root, hash_pair(&leaf(1), &leaf(2)));
        assert_eq!(t.leaf_count(), 2);
    }

    #[test]
    fn attach_heights_follow_binary_decomposition() {
        assert_eq!(attach_height(1), 0);
        assert_eq!(attach_height(2), 0);
        assert_eq!(attach_height(3), 1);
        assert_eq!(attach_height(4), 0);
        assert_eq!(attach_height(5), 1);
        assert_eq!(attach_height(6), 1);
        assert_eq!(attach_height(7), 2);
        assert_eq!(attach_height(8), 0);
    }

    #[test]
    fn every_work_item_folds_to_its_root() {
        let mut t = MerkleTree::new();
        for i in 0..100u8 {
            let w = t.append(leaf(i));
            assert_eq!(fold_path(&w.leaf, &w.path), w.root, "leaf {i}");
            assert_eq!(t.root_hash(), Some(w.root));
        }
        assert_eq!(t.leaf_count(), 100);
    }

    #[test]
    fn four_leaves_match_hand_hashing() {
        let mut t = MerkleTree::new();
        for i in 1..=4u8 {
            t.append(leaf(i));
        }
        let l12 = hash_pair(&leaf(1), &leaf(2));
        let l34 = hash_pair(&leaf(3), &leaf(4));
        assert_eq!(t.root_hash(), Some(hash_pair(&l12, &l34)));
    }
}
