//! Checkpoint coordination
//!
//! Sequences the begin/end checkpoint protocol over a [`BlockTable`] so
//! concurrent writers never observe a torn translation:
//!
//! 1. take the checkpoint-safe lock (one checkpoint at a time)
//! 2. take the multi-operation write lock, snapshot the translation, drop
//!    the write lock — the only window of true mutual exclusion, bounded by
//!    the translation array size
//! 3. serialize the in-progress translation and write + fsync it, then
//!    publish both header copies pointing at it
//! 4. `note_end_checkpoint`: promote the snapshot and release deferred frees
//!
//! Ordinary client mutations hold the multi-operation lock for read through
//! [`CheckpointCoordinator::client_op`], so step 2 cannot race them.

use crate::allocator::BlockPair;
use crate::error::Result;
use crate::header::Header;
use crate::io::BlockFile;
use crate::translation::BlockTable;
use parking_lot::{Mutex, RwLock, RwLockReadGuard};
use tracing::{debug, info};

/// RAII guard for one client operation that may mutate the current
/// translation. Checkpoint begin waits for all of these to drain.
pub struct ClientOpGuard<'a> {
    _guard: RwLockReadGuard<'a, ()>,
}

/// Owns the checkpoint locks for one open file.
#[derive(Default)]
pub struct CheckpointCoordinator {
    /// Readers: ordinary operations. Writer: checkpoint begin.
    multi_operation: RwLock<()>,
    /// Excludes concurrent checkpoints.
    checkpoint_safe: Mutex<()>,
}

impl CheckpointCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enter a client operation window. Hold the guard across any sequence
    /// of table calls that must not straddle a checkpoint snapshot.
    pub fn client_op(&self) -> ClientOpGuard<'_> {
        ClientOpGuard {
            _guard: self.multi_operation.read(),
        }
    }

    /// Run one full checkpoint of `table` into `file`.
    ///
    /// On an I/O failure before the snapshot is promoted, the checkpoint is
    /// noted as skipped so deferred frees are not stranded.
    pub fn checkpoint(&self, table: &BlockTable, file: &mut BlockFile) -> Result<()> {
        let _safe = self.checkpoint_safe.lock();

        {
            let _write = self.multi_operation.write();
            table.note_start_checkpoint_unlocked();
        }
        debug!("checkpoint snapshot taken, client traffic resumed");

        let result = self.write_and_commit(table, file);
        if result.is_err() && table.checkpoint_in_progress() {
            table.note_skipped_checkpoint();
        }
        result
    }

    fn write_and_commit(&self, table: &BlockTable, file: &mut BlockFile) -> Result<()> {
        let (offset, bytes) = table.serialize_checkpoint()?;
        let size = bytes.len() as u64;
        file.write_at(offset, &bytes)?;
        file.sync()?;

        // only after the translation is durable may the headers point at it
        Header::new(table.alignment(), BlockPair::new(offset, size)).write_both(file)?;
        table.note_end_checkpoint(file)?;
        info!(offset, size, "checkpoint committed");
        Ok(())
    }
}
