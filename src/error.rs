use thiserror::Error;

/// Environmental failures surfaced to callers.
///
/// Invariant violations (overlapping free intervals, double frees, bad
/// alignment, zero-sized allocations) are programming errors and panic
/// instead: continuing past one risks silent on-disk corruption.
#[derive(Error, Debug)]
pub enum BlockError {
    #[error("Out of space: no free hole large enough")]
    OutOfSpace,

    #[error("Invalid magic number in header")]
    InvalidMagic,

    #[error("Unsupported format version: {major}.{minor}")]
    UnsupportedVersion { major: u16, minor: u16 },

    #[error("Checksum verification failed")]
    ChecksumMismatch,

    #[error("Corrupt translation table: {0}")]
    CorruptTranslation(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, BlockError>;
