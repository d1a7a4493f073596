//! Property-based tests for allocator correctness
//!
//! Uses proptest to verify allocator and hole-tree invariants hold across
//! many random alloc/free schedules.

use blocktable::{BlockAllocator, BlockPair, BlockTableConfig, Hole, HoleTree};
use proptest::prelude::*;

fn config() -> BlockTableConfig {
    BlockTableConfig::default()
}

proptest! {
    #[test]
    fn prop_extents_never_overlap(
        sizes in prop::collection::vec(1u64..256 * 1024, 1..40)
    ) {
        let mut alloc = BlockAllocator::new(&config());
        let mut live: Vec<BlockPair> = Vec::new();

        for size in sizes {
            let offset = alloc.alloc_block(size).unwrap();
            for pair in &live {
                prop_assert!(
                    offset + size <= pair.offset || pair.end() <= offset,
                    "extent [{}, {}) overlaps [{}, {})",
                    offset, offset + size, pair.offset, pair.end()
                );
            }
            live.push(BlockPair::new(offset, size));
        }
        alloc.validate();
    }

    #[test]
    fn prop_alloc_free_conserves_space(
        schedule in prop::collection::vec((1u64..128 * 1024, any::<bool>()), 1..60)
    ) {
        let mut alloc = BlockAllocator::new(&config());
        let mut live: Vec<BlockPair> = Vec::new();

        for (size, free_one) in schedule {
            if free_one && !live.is_empty() {
                let pair = live.swap_remove(size as usize % live.len());
                alloc.free_block(pair.offset, pair.size);
            } else {
                let offset = alloc.alloc_block(size).unwrap();
                live.push(BlockPair::new(offset, size));
            }
            alloc.validate();
            prop_assert_eq!(alloc.block_count(), live.len() as u64);
            prop_assert_eq!(
                alloc.bytes_in_use(),
                8192 + live.iter().map(|p| p.size).sum::<u64>()
            );
        }
    }

    #[test]
    fn prop_free_everything_restores_one_hole(
        sizes in prop::collection::vec(1u64..64 * 1024, 1..30),
        free_order in prop::collection::vec(any::<u64>(), 30)
    ) {
        let mut alloc = BlockAllocator::new(&config());
        let mut live: Vec<BlockPair> = Vec::new();
        for size in sizes {
            let offset = alloc.alloc_block(size).unwrap();
            live.push(BlockPair::new(offset, size));
        }

        // free in a shuffled order so coalescing is exercised in every pattern
        let mut i = 0;
        while !live.is_empty() {
            let pair = live.swap_remove(free_order[i % free_order.len()] as usize % live.len());
            alloc.free_block(pair.offset, pair.size);
            alloc.validate();
            i += 1;
        }

        let holes = alloc.holes_in_order();
        prop_assert_eq!(holes.len(), 1, "holes failed to coalesce: {:?}", holes);
        prop_assert_eq!(holes[0].offset, 8192);
        prop_assert_eq!(alloc.block_count(), 0);
        prop_assert_eq!(alloc.bytes_in_use(), 8192);
    }

    #[test]
    fn prop_allocations_are_aligned(
        sizes in prop::collection::vec(1u64..100_000, 1..40)
    ) {
        let mut alloc = BlockAllocator::new(&config());
        for size in sizes {
            let offset = alloc.alloc_block(size).unwrap();
            prop_assert_eq!(offset % 4096, 0, "offset {} is not aligned", offset);
            prop_assert!(offset >= 8192, "offset {} is inside the reserved region", offset);
        }
    }

    #[test]
    fn prop_rebuild_from_pairs_matches_live_allocator(
        schedule in prop::collection::vec((1u64..64 * 1024, any::<bool>()), 1..50)
    ) {
        let mut alloc = BlockAllocator::new(&config());
        let mut live: Vec<BlockPair> = Vec::new();

        for (size, free_one) in schedule {
            if free_one && !live.is_empty() {
                let pair = live.swap_remove(size as usize % live.len());
                alloc.free_block(pair.offset, pair.size);
            } else {
                let offset = alloc.alloc_block(size).unwrap();
                live.push(BlockPair::new(offset, size));
            }
        }

        // a fresh allocator rebuilt from the live extents sees the same holes
        let rebuilt = BlockAllocator::from_block_pairs(&config(), &live);
        prop_assert_eq!(rebuilt.holes_in_order(), alloc.holes_in_order());
        prop_assert_eq!(rebuilt.block_count(), alloc.block_count());
        prop_assert_eq!(rebuilt.bytes_in_use(), alloc.bytes_in_use());
    }

    #[test]
    fn prop_tree_invariants_under_churn(
        sizes in prop::collection::vec(1u64..50, 1..80),
        removes in prop::collection::vec(1u64..40, 0..60)
    ) {
        // insert disjoint, non-abutting holes spaced far apart, then carve
        // pieces out; the tree must stay balanced with truthful labels
        let mut tree = HoleTree::new(1);
        for (i, size) in sizes.iter().enumerate() {
            tree.insert(Hole::new(i as u64 * 128, *size));
        }
        tree.validate();

        for size in removes {
            tree.remove(size);
            tree.validate();
        }
    }
}
