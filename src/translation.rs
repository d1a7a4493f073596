//! Three-generation block translation table
//!
//! Maps logical block numbers to physical `(offset, size)` extents. Three
//! generations of the mapping coexist:
//!
//! - `current` — the only generation client threads mutate
//! - `inprogress` — an immutable snapshot of `current` taken at checkpoint
//!   begin, alive only between `note_start_checkpoint_unlocked` and
//!   `note_end_checkpoint`
//! - `checkpointed` — the last durable mapping, replaced wholesale when a
//!   checkpoint completes, and the only generation ever read back from disk
//!
//! The single safety-critical rule lives in [`TableInner::can_free`]: a
//! physical extent is returned to the allocator only when no non-current
//! generation still references it. Extents the rule vetoes sit on a pending
//! list until the blocking checkpoint completes or is skipped.

use crate::allocator::{AllocatorStats, BlockAllocator, BlockPair};
use crate::config::BlockTableConfig;
use crate::error::{BlockError, Result};
use crate::io::BlockFile;
use parking_lot::Mutex;
use tracing::{debug, info};

/// Stable logical identifier for a block, indirected through the table.
pub type BlockNum = u64;

/// Reserved blocknum 0: the null blocknum, also the freelist terminator on
/// the wire.
pub const RESERVED_BLOCKNUM_NULL: BlockNum = 0;
/// Reserved blocknum 1: the translation table's own on-disk extent.
pub const RESERVED_BLOCKNUM_TRANSLATION: BlockNum = 1;
/// Reserved blocknum 2: the dictionary descriptor.
pub const RESERVED_BLOCKNUM_DESCRIPTOR: BlockNum = 2;
/// Number of reserved blocknums at the front of every translation.
pub const RESERVED_BLOCKNUMS: u64 = 3;

/// One translation slot. The on-disk `size == -1` sentinel convention is
/// confined to (de)serialization; in memory the states are explicit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    /// Allocated blocknum backed by a physical extent.
    Used { offset: u64, size: u64 },
    /// Allocated blocknum that has not been written yet.
    Unset,
    /// Recycled blocknum linked into the freelist.
    Free { next: Option<BlockNum> },
}

/// Which snapshot a [`Translation`] represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationKind {
    Current,
    InProgress,
    Checkpointed,
    /// Detached copies made by consistency checks and tests.
    Debug,
}

/// One generation of the blocknum -> extent mapping.
#[derive(Debug, Clone)]
pub struct Translation {
    kind: GenerationKind,
    slots: Vec<Slot>,
    /// Every blocknum ever handed out is below this bound.
    smallest_never_used: BlockNum,
    freelist_head: Option<BlockNum>,
}

impl Translation {
    fn new_empty(kind: GenerationKind) -> Self {
        Translation {
            kind,
            slots: vec![Slot::Unset; RESERVED_BLOCKNUMS as usize],
            smallest_never_used: RESERVED_BLOCKNUMS,
            freelist_head: None,
        }
    }

    fn snapshot(&self, kind: GenerationKind) -> Translation {
        let mut copy = self.clone();
        copy.kind = kind;
        copy
    }

    /// Detached copy for offline inspection.
    pub fn to_debug_snapshot(&self) -> Translation {
        self.snapshot(GenerationKind::Debug)
    }

    pub fn kind(&self) -> GenerationKind {
        self.kind
    }

    pub fn smallest_never_used(&self) -> BlockNum {
        self.smallest_never_used
    }

    pub fn slot(&self, b: BlockNum) -> Slot {
        self.slots[b as usize]
    }

    fn references(&self, b: BlockNum, extent: BlockPair) -> bool {
        if b >= self.slots.len() as u64 {
            return false;
        }
        matches!(
            self.slots[b as usize],
            Slot::Used { offset, size } if offset == extent.offset && size == extent.size
        )
    }

    /// Every extent this generation references, unsorted.
    pub fn used_pairs(&self) -> Vec<BlockPair> {
        self.slots
            .iter()
            .filter_map(|slot| match slot {
                Slot::Used { offset, size } => Some(BlockPair::new(*offset, *size)),
                _ => None,
            })
            .collect()
    }

    // ---- wire format ----
    //
    // smallest_never_used (u64 LE), freelist_head (u64 LE, 0 = none), then
    // one (diskoff i64, size i64) pair per blocknum: size > 0 is a used
    // extent, size == 0 with diskoff == -1 is an unset slot, size == -1 is a
    // free slot whose diskoff holds the next freelist link. A CRC32 of the
    // preceding bytes closes the buffer.

    pub fn serialized_size(&self) -> u64 {
        8 + 8 + 16 * self.slots.len() as u64 + 4
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.serialized_size() as usize);
        buf.extend_from_slice(&self.smallest_never_used.to_le_bytes());
        buf.extend_from_slice(
            &self
                .freelist_head
                .unwrap_or(RESERVED_BLOCKNUM_NULL)
                .to_le_bytes(),
        );
        for slot in &self.slots {
            let (diskoff, size): (i64, i64) = match *slot {
                Slot::Used { offset, size } => (offset as i64, size as i64),
                Slot::Unset => (-1, 0),
                Slot::Free { next } => (next.unwrap_or(RESERVED_BLOCKNUM_NULL) as i64, -1),
            };
            buf.extend_from_slice(&diskoff.to_le_bytes());
            buf.extend_from_slice(&size.to_le_bytes());
        }
        let checksum = crc32fast::hash(&buf);
        buf.extend_from_slice(&checksum.to_le_bytes());
        buf
    }

    pub fn deserialize(buf: &[u8], kind: GenerationKind) -> Result<Translation> {
        if buf.len() < 20 {
            return Err(BlockError::CorruptTranslation(format!(
                "buffer too short: {} bytes",
                buf.len()
            )));
        }
        let (body, tail) = buf.split_at(buf.len() - 4);
        let stored = u32::from_le_bytes(tail.try_into().unwrap());
        if crc32fast::hash(body) != stored {
            return Err(BlockError::ChecksumMismatch);
        }

        let read_u64 = |at: usize| u64::from_le_bytes(body[at..at + 8].try_into().unwrap());
        let read_i64 = |at: usize| i64::from_le_bytes(body[at..at + 8].try_into().unwrap());

        let smallest_never_used = read_u64(0);
        let freelist_raw = read_u64(8);
        let expected = 16 + 16 * smallest_never_used as usize;
        if body.len() != expected {
            return Err(BlockError::CorruptTranslation(format!(
                "expected {} body bytes for {} blocknums, got {}",
                expected,
                smallest_never_used,
                body.len()
            )));
        }
        if smallest_never_used < RESERVED_BLOCKNUMS {
            return Err(BlockError::CorruptTranslation(format!(
                "blocknum bound {smallest_never_used} below the reserved range"
            )));
        }

        let mut slots = Vec::with_capacity(smallest_never_used as usize);
        for b in 0..smallest_never_used {
            let at = 16 + 16 * b as usize;
            let diskoff = read_i64(at);
            let size = read_i64(at + 8);
            let slot = match size {
                s if s > 0 => {
                    if diskoff < 0 {
                        return Err(BlockError::CorruptTranslation(format!(
                            "blocknum {b}: used slot with negative offset {diskoff}"
                        )));
                    }
                    Slot::Used {
                        offset: diskoff as u64,
                        size: s as u64,
                    }
                }
                0 => Slot::Unset,
                -1 => Slot::Free {
                    next: match diskoff {
                        0 => None,
                        n if n > 0 && (n as u64) < smallest_never_used => Some(n as u64),
                        n => {
                            return Err(BlockError::CorruptTranslation(format!(
                                "blocknum {b}: bad freelist link {n}"
                            )))
                        }
                    },
                },
                s => {
                    return Err(BlockError::CorruptTranslation(format!(
                        "blocknum {b}: bad slot size {s}"
                    )))
                }
            };
            slots.push(slot);
        }

        let freelist_head = match freelist_raw {
            0 => None,
            n if n < smallest_never_used => Some(n),
            n => {
                return Err(BlockError::CorruptTranslation(format!(
                    "freelist head {n} out of range"
                )))
            }
        };

        Ok(Translation {
            kind,
            slots,
            smallest_never_used,
            freelist_head,
        })
    }
}

/// An extent that outlived its `current` reference but is still needed by a
/// checkpoint generation.
#[derive(Debug, Clone, Copy)]
struct PendingFree {
    blocknum: BlockNum,
    extent: BlockPair,
}

#[derive(Debug)]
struct TableInner {
    config: BlockTableConfig,
    allocator: BlockAllocator,
    current: Translation,
    inprogress: Option<Translation>,
    checkpointed: Translation,
    /// Extents deferred by [`Self::can_free`], drained when the blocking
    /// checkpoint resolves.
    pending_frees: Vec<PendingFree>,
}

impl TableInner {
    /// The central correctness rule of the subsystem: an extent may return
    /// to the allocator only if neither the in-progress nor the checkpointed
    /// generation still maps `b` to it.
    fn can_free(&self, b: BlockNum, extent: BlockPair) -> bool {
        if let Some(inprogress) = &self.inprogress {
            if inprogress.references(b, extent) {
                return false;
            }
        }
        !self.checkpointed.references(b, extent)
    }

    fn dispose_extent(&mut self, b: BlockNum, extent: BlockPair) {
        if self.can_free(b, extent) {
            self.allocator.free_block(extent.offset, extent.size);
        } else {
            debug!(
                blocknum = b,
                offset = extent.offset,
                size = extent.size,
                "deferring free until checkpoint completes"
            );
            self.pending_frees.push(PendingFree { blocknum: b, extent });
        }
    }
}

/// The block translation table: one per open file, shared by all client
/// threads of that file under its internal mutex.
#[derive(Debug)]
pub struct BlockTable {
    inner: Mutex<TableInner>,
}

impl BlockTable {
    /// Table for a freshly created file: reserved blocknums only, allocator
    /// spanning everything past the reserved header region.
    pub fn new(config: BlockTableConfig) -> Self {
        let allocator = BlockAllocator::new(&config);
        BlockTable {
            inner: Mutex::new(TableInner {
                config,
                allocator,
                current: Translation::new_empty(GenerationKind::Current),
                inprogress: None,
                checkpointed: Translation::new_empty(GenerationKind::Checkpointed),
                pending_frees: Vec::new(),
            }),
        }
    }

    /// Reopen path: read the durable translation through the header, rebuild
    /// the allocator from its in-use extents, and shrink the file if it is
    /// over-allocated.
    pub fn open(file: &mut BlockFile, config: BlockTableConfig) -> Result<Self> {
        let header = crate::header::Header::read_best(file)?;
        let mut config = config;
        config.alignment = header.alignment;
        config.validate_alignment();

        let buf = file.read_at(header.translation.offset, header.translation.size as usize)?;
        let checkpointed = Translation::deserialize(&buf, GenerationKind::Checkpointed)?;
        let current = checkpointed.snapshot(GenerationKind::Current);
        let allocator = BlockAllocator::from_block_pairs(&config, &checkpointed.used_pairs());
        info!(
            blocknums = checkpointed.smallest_never_used,
            bytes_in_use = allocator.bytes_in_use(),
            "opened block table"
        );

        let table = BlockTable {
            inner: Mutex::new(TableInner {
                config,
                allocator,
                current,
                inprogress: None,
                checkpointed,
                pending_frees: Vec::new(),
            }),
        };
        table.maybe_truncate_file_on_open(file)?;
        Ok(table)
    }

    // ---- blocknum bookkeeping ----

    /// Hand out a blocknum: pop the freelist, else mint a fresh one. Pure
    /// bookkeeping; no disk space is consumed until `realloc_on_disk`.
    pub fn allocate_blocknum(&self) -> BlockNum {
        let mut inner = self.inner.lock();
        let t = &mut inner.current;
        match t.freelist_head {
            Some(b) => {
                let Slot::Free { next } = t.slots[b as usize] else {
                    panic!("freelist head {b} does not point at a free slot");
                };
                t.freelist_head = next;
                t.slots[b as usize] = Slot::Unset;
                b
            }
            None => {
                let b = t.smallest_never_used;
                t.smallest_never_used += 1;
                t.slots.push(Slot::Unset);
                b
            }
        }
    }

    /// Replace `b`'s extent with a fresh one of `new_size` and return the
    /// new offset. The old extent (if any) is freed immediately when safe,
    /// otherwise deferred until the blocking checkpoint resolves.
    ///
    /// `for_checkpoint` marks mutations that race a live checkpoint; the
    /// actual free/defer decision is always made by the reference check.
    pub fn realloc_on_disk(
        &self,
        b: BlockNum,
        new_size: u64,
        for_checkpoint: bool,
    ) -> Result<u64> {
        let mut inner = self.inner.lock();
        debug_assert!(
            !for_checkpoint || inner.inprogress.is_some(),
            "for_checkpoint realloc outside a checkpoint window"
        );
        let old = match inner.current.slots[b as usize] {
            Slot::Used { offset, size } => Some(BlockPair::new(offset, size)),
            Slot::Unset => None,
            Slot::Free { .. } => panic!("realloc of unallocated blocknum {b}"),
        };

        // allocate before releasing the old extent so a failed attempt
        // leaves the table untouched
        let new_offset = inner.allocator.alloc_block(new_size)?;
        inner.current.slots[b as usize] = Slot::Used {
            offset: new_offset,
            size: new_size,
        };
        if let Some(old) = old {
            inner.dispose_extent(b, old);
        }
        Ok(new_offset)
    }

    /// Recycle `b`: its slot joins the freelist and its extent is freed (or
    /// deferred, same rule as `realloc_on_disk`).
    pub fn free_blocknum(&self, b: BlockNum, for_checkpoint: bool) {
        assert!(
            b >= RESERVED_BLOCKNUMS,
            "reserved blocknum {b} cannot be freed"
        );
        let mut inner = self.inner.lock();
        debug_assert!(
            !for_checkpoint || inner.inprogress.is_some(),
            "for_checkpoint free outside a checkpoint window"
        );
        let old = match inner.current.slots[b as usize] {
            Slot::Used { offset, size } => Some(BlockPair::new(offset, size)),
            Slot::Unset => None,
            Slot::Free { .. } => panic!("double free of blocknum {b}"),
        };
        if let Some(old) = old {
            inner.dispose_extent(b, old);
        }
        let head = inner.current.freelist_head;
        inner.current.slots[b as usize] = Slot::Free { next: head };
        inner.current.freelist_head = Some(b);
    }

    /// Pure lookup of `b`'s extent in the current generation. `None` for a
    /// blocknum that has never been written; panics for a recycled blocknum
    /// (a read through a freed blocknum is a caller bug).
    pub fn translate_blocknum_to_offset_size(&self, b: BlockNum) -> Option<BlockPair> {
        let inner = self.inner.lock();
        match inner.current.slots[b as usize] {
            Slot::Used { offset, size } => Some(BlockPair::new(offset, size)),
            Slot::Unset => None,
            Slot::Free { .. } => panic!("translate of freed blocknum {b}"),
        }
    }

    // ---- checkpoint protocol ----

    /// Snapshot `current` into `inprogress`. The caller must hold the
    /// multi-operation write lock so no `current`-mutating call is in
    /// flight.
    pub fn note_start_checkpoint_unlocked(&self) {
        let mut inner = self.inner.lock();
        assert!(
            inner.inprogress.is_none(),
            "checkpoint already in progress"
        );
        inner.inprogress = Some(inner.current.snapshot(GenerationKind::InProgress));
        debug!("checkpoint begin: translation snapshotted");
    }

    /// Allocate an extent for the in-progress translation, record it in the
    /// table's own slot (in both `inprogress` and `current`), and return the
    /// serialized bytes with their destination offset. The caller writes and
    /// fsyncs them before `note_end_checkpoint`.
    pub fn serialize_checkpoint(&self) -> Result<(u64, Vec<u8>)> {
        let mut inner = self.inner.lock();
        assert!(
            inner.inprogress.is_some(),
            "serialize_checkpoint outside a checkpoint window"
        );

        let size = inner.inprogress.as_ref().unwrap().serialized_size();
        let offset = inner.allocator.alloc_block(size)?;
        let new_slot = Slot::Used { offset, size };

        let old = match inner.current.slots[RESERVED_BLOCKNUM_TRANSLATION as usize] {
            Slot::Used { offset, size } => Some(BlockPair::new(offset, size)),
            _ => None,
        };
        inner.current.slots[RESERVED_BLOCKNUM_TRANSLATION as usize] = new_slot;
        inner.inprogress.as_mut().unwrap().slots[RESERVED_BLOCKNUM_TRANSLATION as usize] =
            new_slot;
        if let Some(old) = old {
            // the previous checkpoint's translation extent; the checkpointed
            // generation still points at it, so this defers
            inner.dispose_extent(RESERVED_BLOCKNUM_TRANSLATION, old);
        }

        let bytes = inner.inprogress.as_ref().unwrap().serialize();
        debug_assert_eq!(bytes.len() as u64, size);
        Ok((offset, bytes))
    }

    /// Promote `inprogress` to `checkpointed`, release every deferred
    /// extent whose blocking checkpoint this was, and shrink the file if it
    /// is over-allocated.
    pub fn note_end_checkpoint(&self, file: &mut BlockFile) -> Result<()> {
        let mut inner = self.inner.lock();
        let inprogress = inner
            .inprogress
            .take()
            .expect("note_end_checkpoint without a checkpoint in progress");
        inner.checkpointed = inprogress.snapshot(GenerationKind::Checkpointed);

        // the generations that vetoed these frees are gone; anything the
        // current generation no longer maps is reclaimable
        let pending = std::mem::take(&mut inner.pending_frees);
        for p in pending {
            if inner.current.references(p.blocknum, p.extent) {
                inner.pending_frees.push(p);
            } else {
                inner
                    .allocator
                    .free_block(p.extent.offset, p.extent.size);
            }
        }
        info!("checkpoint complete");
        drop(inner);
        self.maybe_truncate_file(file)
    }

    /// A checkpoint began but will not complete (shutdown, error upstream).
    /// Drop the snapshot and release whatever it alone was blocking; the
    /// checkpointed generation is not superseded, so its references still
    /// veto.
    pub fn note_skipped_checkpoint(&self) {
        let mut inner = self.inner.lock();
        assert!(
            inner.inprogress.take().is_some(),
            "note_skipped_checkpoint without a checkpoint in progress"
        );
        let pending = std::mem::take(&mut inner.pending_frees);
        for p in pending {
            if inner.can_free(p.blocknum, p.extent)
                && !inner.current.references(p.blocknum, p.extent)
            {
                inner
                    .allocator
                    .free_block(p.extent.offset, p.extent.size);
            } else {
                inner.pending_frees.push(p);
            }
        }
        debug!("checkpoint skipped");
    }

    // ---- file sizing ----

    /// Shrink the backing file when it is over-allocated by at least the
    /// configured threshold. An optimization, never a correctness
    /// requirement.
    pub fn maybe_truncate_file(&self, file: &mut BlockFile) -> Result<()> {
        let (limit, threshold, alignment) = {
            let inner = self.inner.lock();
            (
                inner.allocator.allocated_limit(),
                inner.config.truncate_threshold,
                inner.config.alignment,
            )
        };
        let needed = limit.div_ceil(alignment) * alignment;
        let actual = file.len()?;
        if actual > needed && actual - needed >= threshold {
            info!(from = actual, to = needed, "truncating over-allocated file");
            file.truncate(needed)?;
        }
        Ok(())
    }

    pub fn maybe_truncate_file_on_open(&self, file: &mut BlockFile) -> Result<()> {
        self.maybe_truncate_file(file)
    }

    // ---- introspection ----

    pub fn statistics(&self) -> AllocatorStats {
        self.inner.lock().allocator.statistics()
    }

    pub fn alignment(&self) -> u64 {
        self.inner.lock().config.alignment
    }

    pub fn checkpoint_in_progress(&self) -> bool {
        self.inner.lock().inprogress.is_some()
    }

    /// Holes currently tracked by the allocator, for tests and tools.
    pub fn free_holes(&self) -> Vec<crate::hole_tree::Hole> {
        self.inner.lock().allocator.holes_in_order()
    }

    /// Detached copy of a generation for inspection.
    pub fn debug_translation(&self, kind: GenerationKind) -> Option<Translation> {
        let inner = self.inner.lock();
        match kind {
            GenerationKind::Current => Some(inner.current.to_debug_snapshot()),
            GenerationKind::InProgress => {
                inner.inprogress.as_ref().map(|t| t.to_debug_snapshot())
            }
            GenerationKind::Checkpointed => Some(inner.checkpointed.to_debug_snapshot()),
            GenerationKind::Debug => None,
        }
    }

    /// Full consistency check (allocator invariants plus generation/slot
    /// sanity). O(n); tests and debug builds only.
    pub fn validate(&self) {
        let inner = self.inner.lock();
        inner.allocator.validate();
        assert_eq!(inner.current.kind, GenerationKind::Current);
        assert_eq!(inner.checkpointed.kind, GenerationKind::Checkpointed);
        assert_eq!(
            inner.current.slots.len() as u64,
            inner.current.smallest_never_used
        );
        // every freelist entry is a free slot below the bound
        let mut link = inner.current.freelist_head;
        while let Some(b) = link {
            assert!(b < inner.current.smallest_never_used);
            match inner.current.slots[b as usize] {
                Slot::Free { next } => link = next,
                other => panic!("freelist entry {b} is {other:?}"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::BlockFile;
    use tempfile::NamedTempFile;

    fn config() -> BlockTableConfig {
        BlockTableConfig::default()
    }

    fn scratch_file() -> (NamedTempFile, BlockFile) {
        let tmp = NamedTempFile::new().unwrap();
        let file = BlockFile::create(tmp.path()).unwrap();
        (tmp, file)
    }

    #[test]
    fn test_allocate_blocknum_mints_and_recycles() {
        let table = BlockTable::new(config());
        let a = table.allocate_blocknum();
        let b = table.allocate_blocknum();
        assert_eq!(a, RESERVED_BLOCKNUMS);
        assert_eq!(b, RESERVED_BLOCKNUMS + 1);

        table.free_blocknum(a, false);
        // recycled before minting a new one
        assert_eq!(table.allocate_blocknum(), a);
        assert_eq!(table.allocate_blocknum(), RESERVED_BLOCKNUMS + 2);
        table.validate();
    }

    #[test]
    fn test_realloc_and_translate() {
        let table = BlockTable::new(config());
        let b = table.allocate_blocknum();
        assert_eq!(table.translate_blocknum_to_offset_size(b), None);

        let off = table.realloc_on_disk(b, 4096, false).unwrap();
        assert_eq!(
            table.translate_blocknum_to_offset_size(b),
            Some(BlockPair::new(off, 4096))
        );

        let off2 = table.realloc_on_disk(b, 8192, false).unwrap();
        assert_ne!(off, off2);
        assert_eq!(
            table.translate_blocknum_to_offset_size(b),
            Some(BlockPair::new(off2, 8192))
        );
        // no checkpoint live: the old extent went straight back
        assert_eq!(table.statistics().data_blocks, 1);
        table.validate();
    }

    #[test]
    #[should_panic(expected = "double free")]
    fn test_double_free_blocknum_panics() {
        let table = BlockTable::new(config());
        let b = table.allocate_blocknum();
        table.free_blocknum(b, false);
        table.free_blocknum(b, false);
    }

    #[test]
    #[should_panic(expected = "freed blocknum")]
    fn test_translate_freed_blocknum_panics() {
        let table = BlockTable::new(config());
        let b = table.allocate_blocknum();
        table.free_blocknum(b, false);
        table.translate_blocknum_to_offset_size(b);
    }

    #[test]
    fn test_deferred_free_across_checkpoint() {
        let (_tmp, mut file) = scratch_file();
        let table = BlockTable::new(config());
        let b = table.allocate_blocknum();
        let old = table.realloc_on_disk(b, 4096, false).unwrap();

        table.note_start_checkpoint_unlocked();
        let new = table.realloc_on_disk(b, 4096, true).unwrap();
        assert_ne!(old, new);

        // the in-progress snapshot still references the old extent: it must
        // not be in the free tree yet
        assert!(
            !table
                .free_holes()
                .iter()
                .any(|h| h.offset <= old && old < h.end()),
            "old extent returned to the allocator while a checkpoint needs it"
        );

        let (off, bytes) = table.serialize_checkpoint().unwrap();
        file.write_at(off, &bytes).unwrap();
        table.note_end_checkpoint(&mut file).unwrap();

        // checkpoint resolved: the old extent is free again
        assert!(
            table
                .free_holes()
                .iter()
                .any(|h| h.offset <= old && old + 4096 <= h.end()),
            "old extent still unavailable after the checkpoint completed"
        );
        table.validate();
    }

    #[test]
    fn test_free_blocknum_during_checkpoint_defers() {
        let (_tmp, mut file) = scratch_file();
        let table = BlockTable::new(config());
        let b = table.allocate_blocknum();
        let off = table.realloc_on_disk(b, 4096, false).unwrap();

        table.note_start_checkpoint_unlocked();
        table.free_blocknum(b, true);
        assert!(!table
            .free_holes()
            .iter()
            .any(|h| h.offset <= off && off < h.end()));

        let (toff, bytes) = table.serialize_checkpoint().unwrap();
        file.write_at(toff, &bytes).unwrap();
        table.note_end_checkpoint(&mut file).unwrap();
        assert!(table
            .free_holes()
            .iter()
            .any(|h| h.offset <= off && off + 4096 <= h.end()));
        table.validate();
    }

    #[test]
    fn test_skipped_checkpoint_releases_only_unblocked() {
        let table = BlockTable::new(config());
        let b = table.allocate_blocknum();
        let old = table.realloc_on_disk(b, 4096, false).unwrap();

        table.note_start_checkpoint_unlocked();
        table.realloc_on_disk(b, 4096, true).unwrap();
        table.note_skipped_checkpoint();

        // nothing checkpointed ever referenced the old extent, so skipping
        // the checkpoint releases it
        assert!(table
            .free_holes()
            .iter()
            .any(|h| h.offset <= old && old + 4096 <= h.end()));
        table.validate();
    }

    #[test]
    fn test_serialize_round_trip() {
        let table = BlockTable::new(config());
        let a = table.allocate_blocknum();
        let b = table.allocate_blocknum();
        let c = table.allocate_blocknum();
        table.realloc_on_disk(a, 4096, false).unwrap();
        table.realloc_on_disk(b, 8192, false).unwrap();
        table.free_blocknum(c, false);

        let current = table.debug_translation(GenerationKind::Current).unwrap();
        let bytes = current.serialize();
        let parsed = Translation::deserialize(&bytes, GenerationKind::Checkpointed).unwrap();
        assert_eq!(parsed.smallest_never_used(), current.smallest_never_used());
        for i in 0..parsed.smallest_never_used() {
            assert_eq!(parsed.slot(i), current.slot(i), "slot {i}");
        }
    }

    #[test]
    fn test_deserialize_rejects_corruption() {
        let table = BlockTable::new(config());
        let bytes = table
            .debug_translation(GenerationKind::Current)
            .unwrap()
            .serialize();

        let mut flipped = bytes.clone();
        flipped[3] ^= 0xff;
        assert!(matches!(
            Translation::deserialize(&flipped, GenerationKind::Checkpointed),
            Err(BlockError::ChecksumMismatch)
        ));

        assert!(matches!(
            Translation::deserialize(&bytes[..10], GenerationKind::Checkpointed),
            Err(BlockError::CorruptTranslation(_))
        ));
    }

    #[test]
    fn test_checkpoint_state_machine() {
        let (_tmp, mut file) = scratch_file();
        let table = BlockTable::new(config());
        assert!(!table.checkpoint_in_progress());

        table.note_start_checkpoint_unlocked();
        assert!(table.checkpoint_in_progress());

        let (off, bytes) = table.serialize_checkpoint().unwrap();
        file.write_at(off, &bytes).unwrap();
        table.note_end_checkpoint(&mut file).unwrap();
        assert!(!table.checkpoint_in_progress());

        let checkpointed = table
            .debug_translation(GenerationKind::Checkpointed)
            .unwrap();
        // the table's own extent is recorded in its reserved slot
        assert!(matches!(
            checkpointed.slot(RESERVED_BLOCKNUM_TRANSLATION),
            Slot::Used { .. }
        ));
        table.validate();
    }

    #[test]
    #[should_panic(expected = "already in progress")]
    fn test_double_begin_checkpoint_panics() {
        let table = BlockTable::new(config());
        table.note_start_checkpoint_unlocked();
        table.note_start_checkpoint_unlocked();
    }
}
