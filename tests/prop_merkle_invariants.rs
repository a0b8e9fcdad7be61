// Copyright (c) 2026 Quorumcast
// Licensed under the Apache License, Version 2.0

#![forbid(unsafe_code)]

use proptest::prelude::*;

use quorumcast::core::merkle::tree::{fold_path, hash_pair, MerkleTree};

proptest! {
    /// Every authentication path folds back to the root recorded at its
    /// insertion, for any leaf sequence.
    #[test]
    fn every_insertion_proves_its_root(
        leaves in proptest::collection::vec(any::<[u8; 32]>(), 1..200)
    ) {
        let mut tree = MerkleTree::new();
        for (i, leaf) in leaves.iter().enumerate() {
            let work = tree.append(*leaf);
            prop_assert_eq!(work.leaf, *leaf);
            prop_assert_eq!(fold_path(&work.leaf, &work.path), work.root, "leaf {}", i);
            prop_assert_eq!(tree.root_hash(), Some(work.root));
        }
        prop_assert_eq!(tree.leaf_count(), leaves.len());
    }

    /// Appending to a power-of-two tree grows one level: the old root
    /// becomes the head of the new leaf's path.
    #[test]
    fn growth_keeps_old_root_as_sibling(
        leaves in proptest::collection::vec(any::<[u8; 32]>(), 1..64),
        extra in any::<[u8; 32]>(),
    ) {
        let mut tree = MerkleTree::new();
        for leaf in &leaves {
            tree.append(*leaf);
        }
        let count = tree.leaf_count();
        prop_assume!(count.is_power_of_two());

        let old_root = tree.root_hash().expect("non-empty");
        let work = tree.append(extra);
        prop_assert_eq!(work.path.first(), Some(&old_root));
        prop_assert_eq!(work.root, hash_pair(&old_root, &extra));
    }

    /// A corrupted path never folds back to the recorded root.
    #[test]
    fn corrupted_path_fails(
        leaves in proptest::collection::vec(any::<[u8; 32]>(), 2..64),
        flip in any::<u8>(),
    ) {
        let mut tree = MerkleTree::new();
        let mut last = None;
        for leaf in &leaves {
            last = Some(tree.append(*leaf));
        }
        let mut work = last.expect("non-empty");
        prop_assume!(!work.path.is_empty());

        let i = (flip as usize) % work.path.len();
        work.path[i][0] ^= 0x01;
        prop_assert_ne!(fold_path(&work.leaf, &work.path), work.root);
    }
}
