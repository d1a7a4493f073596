//! Variable-size block allocator over one file
//!
//! Owns a single [`HoleTree`] describing all free space past the reserved
//! header region, plus the bookkeeping counters (`n_blocks`,
//! `n_bytes_in_use`). Allocation is first-fit in ascending offset order with
//! alignment-aware placement; freeing merges the extent back into adjacent
//! holes.
//!
//! The allocator is not internally thread-safe: the owning translation table
//! serializes access under its own mutex.

use crate::config::BlockTableConfig;
use crate::error::{BlockError, Result};
use crate::hole_tree::{Hole, HoleTree};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// A physical `(offset, size)` extent handed out by the allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockPair {
    pub offset: u64,
    pub size: u64,
}

impl BlockPair {
    pub fn new(offset: u64, size: u64) -> Self {
        BlockPair { offset, size }
    }

    pub fn end(&self) -> u64 {
        self.offset + self.size
    }
}

/// Fragmentation / usage report filled by an O(n) tree walk.
///
/// Only produced for diagnostics and checkpoints, never on the allocation
/// hot path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocatorStats {
    /// Reserved header bytes plus the sum of allocated extent sizes.
    pub data_bytes: u64,
    /// Number of allocated extents (excluding the reserved region).
    pub data_blocks: u64,
    /// Sum of free hole sizes.
    pub unused_bytes: u64,
    /// Number of free holes.
    pub unused_blocks: u64,
    /// Largest single free hole.
    pub largest_unused_block: u64,
}

/// First-fit block allocator backed by the augmented hole tree.
#[derive(Debug, Clone)]
pub struct BlockAllocator {
    tree: HoleTree,
    reserve_at_beginning: u64,
    alignment: u64,
    n_blocks: u64,
    n_bytes_in_use: u64,
}

impl BlockAllocator {
    /// Create an allocator for a fresh file: one hole spanning everything
    /// past the reserved region.
    pub fn new(config: &BlockTableConfig) -> Self {
        config.validate_alignment();
        let mut tree = HoleTree::new(config.alignment);
        tree.insert(Hole::new(
            config.reserve_at_beginning,
            u64::MAX - config.reserve_at_beginning,
        ));
        BlockAllocator {
            tree,
            reserve_at_beginning: config.reserve_at_beginning,
            alignment: config.alignment,
            n_blocks: 0,
            n_bytes_in_use: config.reserve_at_beginning,
        }
    }

    /// Rebuild allocator state from the in-use extents recorded in a
    /// persisted translation table (the reopen path).
    ///
    /// Pairs are sorted by offset; the gap before the first pair and each
    /// inter-pair gap become holes. Two exactly adjacent pairs produce no
    /// hole.
    pub fn from_block_pairs(config: &BlockTableConfig, pairs: &[BlockPair]) -> Self {
        config.validate_alignment();
        let mut sorted: Vec<BlockPair> = pairs.to_vec();
        sorted.sort_by_key(|p| p.offset);

        let mut tree = HoleTree::new(config.alignment);
        let mut in_use = 0u64;
        let mut cursor = config.reserve_at_beginning;
        for pair in &sorted {
            assert!(
                pair.offset >= cursor,
                "persisted extents overlap: [{}, {}) begins before {}",
                pair.offset,
                pair.end(),
                cursor
            );
            if pair.offset > cursor {
                tree.insert(Hole::new(cursor, pair.offset - cursor));
            }
            in_use += pair.size;
            cursor = pair.end();
        }
        tree.insert(Hole::new(cursor, u64::MAX - cursor));

        BlockAllocator {
            tree,
            reserve_at_beginning: config.reserve_at_beginning,
            alignment: config.alignment,
            n_blocks: sorted.len() as u64,
            n_bytes_in_use: config.reserve_at_beginning + in_use,
        }
    }

    /// Allocate `size` bytes at an aligned offset.
    ///
    /// Size 0 is a programming error (the hole tree cannot represent a
    /// zero-sized extent safely given the merge logic). Exhaustion is a
    /// typed error and leaves the tree untouched.
    pub fn alloc_block(&mut self, size: u64) -> Result<u64> {
        assert!(size > 0, "zero-sized allocations are not supported");
        let offset = self.tree.remove(size).ok_or(BlockError::OutOfSpace)?;
        self.n_bytes_in_use += size;
        self.n_blocks += 1;
        debug!(offset, size, "allocated block");
        Ok(offset)
    }

    /// Return an extent to the free tree.
    ///
    /// `size` must be the exact size previously allocated at `offset`; the
    /// allocator keeps no independent record of sizes, and a mismatch
    /// corrupts the hole tree (the overlap assertion inside [`HoleTree`]
    /// catches the growing-overlap half of that mistake).
    pub fn free_block(&mut self, offset: u64, size: u64) {
        assert!(size > 0, "zero-sized frees are not supported");
        assert!(
            offset >= self.reserve_at_beginning,
            "cannot free inside the reserved region"
        );
        self.tree.insert(Hole::new(offset, size));
        self.n_bytes_in_use -= size;
        self.n_blocks -= 1;
        debug!(offset, size, "freed block");
    }

    /// The `n`-th contiguous used extent in ascending offset order, where
    /// extent 0 is the reserved header region. Used by tests and tools.
    pub fn nth_block_in_layout_order(&self, n: u64) -> Option<BlockPair> {
        if n == 0 {
            return Some(BlockPair::new(0, self.reserve_at_beginning));
        }
        let mut remaining = n;
        let mut cursor = self.reserve_at_beginning;
        let mut id = self.tree.min_node();
        while let Some(node) = id {
            let hole = self.tree.hole(node);
            if hole.offset > cursor {
                remaining -= 1;
                if remaining == 0 {
                    return Some(BlockPair::new(cursor, hole.offset - cursor));
                }
            }
            cursor = hole.end();
            id = self.tree.successor(node);
        }
        // the trailing hole reaches u64::MAX, so every used extent sits
        // before some hole and the walk above covers them all
        None
    }

    /// Usage and fragmentation report. O(n) walk over the tree.
    pub fn statistics(&self) -> AllocatorStats {
        let mut stats = AllocatorStats {
            data_bytes: self.n_bytes_in_use,
            data_blocks: self.n_blocks,
            ..Default::default()
        };
        self.unused_statistics_into(&mut stats);
        stats
    }

    /// Fill only the free-space side of the report.
    pub fn unused_statistics(&self) -> AllocatorStats {
        let mut stats = AllocatorStats::default();
        self.unused_statistics_into(&mut stats);
        stats
    }

    fn unused_statistics_into(&self, stats: &mut AllocatorStats) {
        // the trailing hole runs to u64::MAX and does not describe real file
        // space, so it only contributes up to the allocated limit
        let limit = self.allocated_limit();
        self.tree.in_order_visit(|hole, _| {
            let size = if hole.end() > limit {
                limit.saturating_sub(hole.offset)
            } else {
                hole.size
            };
            if size > 0 {
                stats.unused_bytes += size;
                stats.unused_blocks += 1;
                stats.largest_unused_block = stats.largest_unused_block.max(size);
            }
        });
    }

    /// One byte past the highest allocated extent; the file never needs to
    /// be longer than this.
    pub fn allocated_limit(&self) -> u64 {
        // the maximal hole is always the trailing one reaching u64::MAX, so
        // its offset is exactly the end of the last used extent
        match self.tree.max_node() {
            Some(id) => self.tree.hole(id).offset,
            None => u64::MAX,
        }
    }

    pub fn block_count(&self) -> u64 {
        self.n_blocks
    }

    pub fn bytes_in_use(&self) -> u64 {
        self.n_bytes_in_use
    }

    pub fn reserve_at_beginning(&self) -> u64 {
        self.reserve_at_beginning
    }

    pub fn alignment(&self) -> u64 {
        self.alignment
    }

    /// All holes in ascending offset order (diagnostics and tests).
    pub fn holes_in_order(&self) -> Vec<Hole> {
        self.tree.holes_in_order()
    }

    /// Full O(n) consistency check: tree balance, label correctness, and
    /// conservation of bytes (`used + free == addressable range`). Debug
    /// builds and tests only.
    pub fn validate(&self) {
        self.tree.validate();
        let free = self.tree.total_free();
        assert_eq!(
            self.n_bytes_in_use.wrapping_add(free),
            u64::MAX,
            "byte conservation violated: {} in use, {} free",
            self.n_bytes_in_use,
            free
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(reserve: u64, alignment: u64) -> BlockTableConfig {
        BlockTableConfig {
            reserve_at_beginning: reserve,
            alignment,
            ..Default::default()
        }
    }

    #[test]
    fn test_end_to_end_layout() {
        let mut ba = BlockAllocator::new(&config(4096, 4096));
        assert_eq!(ba.alloc_block(8192).unwrap(), 4096);
        assert_eq!(ba.alloc_block(4096).unwrap(), 12288);
        ba.free_block(4096, 8192);
        // first-fit reuses the freed hole
        assert_eq!(ba.alloc_block(4096).unwrap(), 4096);
        // the 4096-byte remainder of the freed hole cannot hold 8192
        assert_eq!(ba.alloc_block(8192).unwrap(), 16384);
        ba.validate();
    }

    #[test]
    fn test_counters() {
        let mut ba = BlockAllocator::new(&config(4096, 4096));
        assert_eq!(ba.bytes_in_use(), 4096);
        assert_eq!(ba.block_count(), 0);
        let off = ba.alloc_block(8192).unwrap();
        assert_eq!(ba.bytes_in_use(), 4096 + 8192);
        assert_eq!(ba.block_count(), 1);
        ba.free_block(off, 8192);
        assert_eq!(ba.bytes_in_use(), 4096);
        assert_eq!(ba.block_count(), 0);
        ba.validate();
    }

    #[test]
    #[should_panic(expected = "zero-sized")]
    fn test_alloc_zero_panics() {
        let mut ba = BlockAllocator::new(&config(4096, 4096));
        let _ = ba.alloc_block(0);
    }

    #[test]
    #[should_panic(expected = "reserved region")]
    fn test_free_in_reserve_panics() {
        let mut ba = BlockAllocator::new(&config(4096, 4096));
        ba.free_block(0, 4096);
    }

    #[test]
    fn test_from_block_pairs_round_trip() {
        let cfg = config(4096, 4096);
        let pairs = vec![
            BlockPair::new(16384, 4096),
            BlockPair::new(4096, 8192),
            BlockPair::new(28672, 4096),
        ];
        let ba = BlockAllocator::from_block_pairs(&cfg, &pairs);
        ba.validate();

        let stats = ba.statistics();
        assert_eq!(stats.data_bytes, 4096 + 4096 + 8192 + 4096);
        assert_eq!(stats.data_blocks, 3);

        // holes: none before 4096..12288 (adjacent to reserve), gap at
        // 12288..16384, gap at 20480..28672, trailing hole at 32768
        let holes = ba.holes_in_order();
        assert_eq!(holes.len(), 3);
        assert_eq!(holes[0].offset, 12288);
        assert_eq!(holes[0].size, 4096);
        assert_eq!(holes[1].offset, 20480);
        assert_eq!(holes[1].size, 8192);
        assert_eq!(holes[2].offset, 32768);

        // a directly built allocator with the same alloc pattern is
        // indistinguishable by in-order dump
        let mut direct = BlockAllocator::new(&cfg);
        direct.alloc_block(8192).unwrap(); // 4096
        direct.alloc_block(4096).unwrap(); // 12288
        direct.alloc_block(4096).unwrap(); // 16384
        direct.alloc_block(4096).unwrap(); // 20480
        direct.alloc_block(4096).unwrap(); // 24576
        direct.alloc_block(4096).unwrap(); // 28672
        direct.free_block(12288, 4096);
        direct.free_block(20480, 4096);
        direct.free_block(24576, 4096);
        assert_eq!(direct.holes_in_order(), holes);
    }

    #[test]
    fn test_from_block_pairs_zero_gap() {
        let cfg = config(4096, 4096);
        let pairs = vec![BlockPair::new(4096, 4096), BlockPair::new(8192, 4096)];
        let ba = BlockAllocator::from_block_pairs(&cfg, &pairs);
        // adjacent pairs leave no hole between them
        let holes = ba.holes_in_order();
        assert_eq!(holes.len(), 1);
        assert_eq!(holes[0].offset, 12288);
        ba.validate();
    }

    #[test]
    fn test_nth_block_in_layout_order() {
        let mut ba = BlockAllocator::new(&config(4096, 4096));
        let a = ba.alloc_block(8192).unwrap();
        let b = ba.alloc_block(4096).unwrap();
        let c = ba.alloc_block(4096).unwrap();
        ba.free_block(b, 4096);

        assert_eq!(ba.nth_block_in_layout_order(0), Some(BlockPair::new(0, 4096)));
        assert_eq!(ba.nth_block_in_layout_order(1), Some(BlockPair::new(a, 8192)));
        assert_eq!(ba.nth_block_in_layout_order(2), Some(BlockPair::new(c, 4096)));
        assert_eq!(ba.nth_block_in_layout_order(3), None);
    }

    #[test]
    fn test_statistics_fragmentation() {
        let mut ba = BlockAllocator::new(&config(4096, 4096));
        let a = ba.alloc_block(4096).unwrap();
        let _b = ba.alloc_block(4096).unwrap();
        let c = ba.alloc_block(4096).unwrap();
        let _d = ba.alloc_block(4096).unwrap();
        ba.free_block(a, 4096);
        ba.free_block(c, 4096);

        let stats = ba.statistics();
        assert_eq!(stats.unused_blocks, 2);
        assert_eq!(stats.unused_bytes, 8192);
        assert_eq!(stats.largest_unused_block, 4096);
        assert_eq!(stats.data_blocks, 2);
    }

    #[test]
    fn test_allocated_limit() {
        let mut ba = BlockAllocator::new(&config(4096, 4096));
        assert_eq!(ba.allocated_limit(), 4096);
        let a = ba.alloc_block(8192).unwrap();
        assert_eq!(ba.allocated_limit(), a + 8192);
        let b = ba.alloc_block(4096).unwrap();
        assert_eq!(ba.allocated_limit(), b + 4096);
        ba.free_block(b, 4096);
        assert_eq!(ba.allocated_limit(), a + 8192);
    }

    #[test]
    fn test_out_of_space_is_typed_and_non_mutating() {
        // constrain space by reconstructing from pairs that pin the tail
        let cfg = config(4096, 4096);
        let mut ba = BlockAllocator::new(&cfg);
        let holes_before = ba.holes_in_order();
        // the fresh tree spans to u64::MAX, so only an absurd request fails
        let err = ba.alloc_block(u64::MAX - 1).unwrap_err();
        assert!(matches!(err, BlockError::OutOfSpace));
        assert_eq!(ba.holes_in_order(), holes_before);
        ba.validate();
    }
}
