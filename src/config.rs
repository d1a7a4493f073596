//! Construction-time configuration
//!
//! All tunables are passed explicitly at construction; the crate keeps no
//! module-level mutable state.

use serde::{Deserialize, Serialize};

/// Default extent alignment: O_DIRECT-compatible 4 KiB.
pub const DEFAULT_ALIGNMENT: u64 = 4096;

/// Two 4 KiB header copies at the start of the file.
pub const DEFAULT_RESERVE: u64 = 2 * 4096;

/// Shrink the backing file only when over-allocated by at least this much.
pub const DEFAULT_TRUNCATE_THRESHOLD: u64 = 32 * 1024 * 1024;

/// Configuration for a block table and its allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockTableConfig {
    /// Extent alignment. Must be >= 512 and a multiple of 512 (direct-I/O
    /// requirement); violations are programming errors and assert.
    pub alignment: u64,
    /// Immovable header region at the start of the file, never allocated or
    /// freed.
    pub reserve_at_beginning: u64,
    /// Minimum over-allocation before `maybe_truncate_file` shrinks the
    /// backing file.
    pub truncate_threshold: u64,
}

impl Default for BlockTableConfig {
    fn default() -> Self {
        BlockTableConfig {
            alignment: DEFAULT_ALIGNMENT,
            reserve_at_beginning: DEFAULT_RESERVE,
            truncate_threshold: DEFAULT_TRUNCATE_THRESHOLD,
        }
    }
}

impl BlockTableConfig {
    pub fn validate_alignment(&self) {
        assert!(
            self.alignment >= 512 && self.alignment % 512 == 0,
            "alignment {} must be >= 512 and a multiple of 512",
            self.alignment
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = BlockTableConfig::default();
        assert_eq!(cfg.alignment, 4096);
        assert_eq!(cfg.reserve_at_beginning, 8192);
        cfg.validate_alignment();
    }

    #[test]
    #[should_panic(expected = "multiple of 512")]
    fn test_bad_alignment_panics() {
        let cfg = BlockTableConfig {
            alignment: 1000,
            ..Default::default()
        };
        cfg.validate_alignment();
    }

    #[test]
    #[should_panic(expected = "must be >= 512")]
    fn test_small_alignment_panics() {
        let cfg = BlockTableConfig {
            alignment: 256,
            ..Default::default()
        };
        cfg.validate_alignment();
    }
}
