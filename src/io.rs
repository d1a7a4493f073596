//! Raw file I/O for the block layer
//!
//! The rest of the crate treats the backing file as an opaque byte range:
//! positioned reads and writes, fsync, truncate, and size queries. Block
//! contents are never interpreted here.

use crate::error::Result;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// A read/write handle on the backing file.
pub struct BlockFile {
    file: File,
    path: PathBuf,
}

impl BlockFile {
    /// Create (or truncate) the backing file.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        Ok(BlockFile {
            file,
            path: path.as_ref().to_path_buf(),
        })
    }

    /// Open an existing backing file.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        Ok(BlockFile {
            file,
            path: path.as_ref().to_path_buf(),
        })
    }

    /// Read exactly `len` bytes starting at `offset`.
    pub fn read_at(&mut self, offset: u64, len: usize) -> Result<Vec<u8>> {
        self.file.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; len];
        self.file.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Write `bytes` starting at `offset`, extending the file if needed.
    pub fn write_at(&mut self, offset: u64, bytes: &[u8]) -> Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(bytes)?;
        Ok(())
    }

    /// Flush file contents and metadata to stable storage.
    pub fn sync(&mut self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }

    /// Shrink (or grow) the file to `len` bytes.
    pub fn truncate(&mut self, len: u64) -> Result<()> {
        self.file.set_len(len)?;
        Ok(())
    }

    /// Current file length in bytes.
    pub fn len(&mut self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    pub fn is_empty(&mut self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_write_read_at_offset() {
        let tmp = NamedTempFile::new().unwrap();
        let mut file = BlockFile::create(tmp.path()).unwrap();

        file.write_at(8192, b"hole tree").unwrap();
        let buf = file.read_at(8192, 9).unwrap();
        assert_eq!(&buf, b"hole tree");
        assert_eq!(file.len().unwrap(), 8192 + 9);
    }

    #[test]
    fn test_truncate() {
        let tmp = NamedTempFile::new().unwrap();
        let mut file = BlockFile::create(tmp.path()).unwrap();
        file.write_at(0, &[7u8; 65536]).unwrap();
        file.truncate(4096).unwrap();
        assert_eq!(file.len().unwrap(), 4096);
    }

    #[test]
    fn test_reopen() {
        let tmp = NamedTempFile::new().unwrap();
        {
            let mut file = BlockFile::create(tmp.path()).unwrap();
            file.write_at(0, b"persist").unwrap();
            file.sync().unwrap();
        }
        let mut file = BlockFile::open(tmp.path()).unwrap();
        assert_eq!(file.read_at(0, 7).unwrap(), b"persist");
    }
}
