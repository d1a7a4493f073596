//! Block allocation and translation core for a fractal-tree storage engine
//!
//! This crate manages the *extents* of a single backing file. It never
//! interprets block contents; it decides where blocks live, tracks free
//! space, and keeps the logical-to-physical mapping crash-consistent across
//! checkpoints.
//!
//! ## Components
//!
//! - [`hole_tree`] — augmented red-black tree over free intervals, with
//!   per-subtree max-hole-size labels for O(log n) first-fit search
//! - [`allocator`] — variable-size block allocator: first-fit, alignment
//!   aware, with usage counters and fragmentation statistics
//! - [`translation`] — blocknum -> (offset, size) mapping in three
//!   generations (current / in-progress / checkpointed) with deferred frees
//! - [`checkpoint`] — sequences begin/end checkpoint under the
//!   multi-operation and checkpoint-safe locks
//! - [`header`] — two crash-safe header copies at the front of the file
//! - [`io`] — positioned reads/writes, fsync, truncate
//!
//! ## Data flow
//!
//! ```text
//! client: "allocate N bytes for blocknum B"
//!     └─> BlockTable::realloc_on_disk(B, N)
//!            └─> BlockAllocator::alloc_block(N)
//!                   └─> HoleTree::remove(N)   (first-fit, label-pruned)
//!            current[B] = (offset, N); old extent freed or deferred
//! ```
//!
//! On checkpoint begin the current translation is snapshotted into
//! `inprogress` under the multi-operation write lock; ordinary traffic then
//! resumes while the snapshot is serialized, written, and fsynced. An extent
//! superseded in `current` returns to the allocator only once no other
//! generation references it.
//!
//! ## Example
//!
//! ```rust,no_run
//! use blocktable::{BlockFile, BlockTable, BlockTableConfig, CheckpointCoordinator};
//!
//! let mut file = BlockFile::create("data.ft").unwrap();
//! let table = BlockTable::new(BlockTableConfig::default());
//! let coordinator = CheckpointCoordinator::new();
//!
//! let b = table.allocate_blocknum();
//! let offset = table.realloc_on_disk(b, 8192, false).unwrap();
//! file.write_at(offset, &vec![0u8; 8192]).unwrap();
//!
//! coordinator.checkpoint(&table, &mut file).unwrap();
//!
//! let extent = table.translate_blocknum_to_offset_size(b).unwrap();
//! let bytes = file.read_at(extent.offset, extent.size as usize).unwrap();
//! ```
//!
//! ## Failure semantics
//!
//! Invariant violations (double free, overlapping holes, bad alignment,
//! zero-sized allocation) panic immediately: a corrupted allocator tree
//! risks data loss, so the crate fails fast and loud. Only environmental
//! conditions — out of space, I/O errors, corrupt persisted state — surface
//! as [`BlockError`].

pub mod allocator;
pub mod checkpoint;
pub mod config;
pub mod error;
pub mod header;
pub mod hole_tree;
pub mod io;
pub mod translation;

pub use allocator::{AllocatorStats, BlockAllocator, BlockPair};
pub use checkpoint::{CheckpointCoordinator, ClientOpGuard};
pub use config::BlockTableConfig;
pub use error::{BlockError, Result};
pub use header::Header;
pub use hole_tree::{Hole, HoleTree};
pub use io::BlockFile;
pub use translation::{
    BlockNum, BlockTable, GenerationKind, Slot, Translation, RESERVED_BLOCKNUM_DESCRIPTOR,
    RESERVED_BLOCKNUM_NULL, RESERVED_BLOCKNUM_TRANSLATION,
};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
