//! Random-access block source: the only abstraction a
//! table reader needs over its backing storage.

use crate::error::{ReftableError, Result};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Mutex;

/// A random-access byte source a table reader pulls blocks from.
///
/// `read` may return fewer bytes than requested iff it hit end-of-file;
/// callers (the block reader) must tolerate a short final block, since
/// the last block in a file omits trailing alignment padding.
pub trait BlockSource: Send + Sync {
    /// Reads up to `len` bytes starting at `pos`.
    fn read(&self, pos: u64, len: usize) -> Result<Vec<u8>>;

    /// Total size of the underlying storage, in bytes.
    fn size(&self) -> Result<u64>;

    /// Best-effort read-ahead hint for the byte range `[start, end)`.
    /// Implementations may treat this as a no-op.
    fn advise_sequential(&self, _start: u64, _end: u64) {}
}

/// A [`BlockSource`] backed by an open file, following the same
/// persistent-handle-behind-a-mutex shape the teacher's SSTable reader
/// uses for concurrent point lookups.
pub struct FileBlockSource {
    file: Mutex<File>,
    size: u64,
}

impl FileBlockSource {
    /// Opens `path` for random-access reads.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        let size = file.metadata()?.len();
        Ok(Self {
            file: Mutex::new(file),
            size,
        })
    }
}

impl BlockSource for FileBlockSource {
    fn read(&self, pos: u64, len: usize) -> Result<Vec<u8>> {
        let mut file = self
            .file
            .lock()
            .map_err(|_| ReftableError::InvalidBlock("block source lock poisoned".into()))?;
        file.seek(SeekFrom::Start(pos))?;
        let mut buf = vec![0u8; len];
        let mut filled = 0;
        loop {
            match file.read(&mut buf[filled..])? {
                0 => break,
                n => {
                    filled += n;
                    if filled == len {
                        break;
                    }
                }
            }
        }
        buf.truncate(filled);
        Ok(buf)
    }

    fn size(&self) -> Result<u64> {
        Ok(self.size)
    }
}

/// A [`BlockSource`] over an in-memory byte buffer. Used by tests and by
/// callers that already hold the whole table in memory.
pub struct MemoryBlockSource {
    data: Vec<u8>,
}

impl MemoryBlockSource {
    /// Wraps `data` as a block source.
    #[must_use]
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }
}

impl BlockSource for MemoryBlockSource {
    fn read(&self, pos: u64, len: usize) -> Result<Vec<u8>> {
        let pos = pos as usize;
        if pos >= self.data.len() {
            return Ok(Vec::new());
        }
        let end = (pos + len).min(self.data.len());
        Ok(self.data[pos..end].to_vec())
    }

    fn size(&self) -> Result<u64> {
        Ok(self.data.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_source_short_read_at_eof() {
        let src = MemoryBlockSource::new(vec![1, 2, 3, 4, 5]);
        assert_eq!(src.read(3, 10).unwrap(), vec![4, 5]);
        assert_eq!(src.read(10, 10).unwrap(), Vec::<u8>::new());
        assert_eq!(src.size().unwrap(), 5);
    }

    #[test]
    fn file_source_roundtrip() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        use std::io::Write as _;
        tmp.write_all(b"hello reftable").unwrap();
        let src = FileBlockSource::open(tmp.path()).unwrap();
        assert_eq!(src.size().unwrap(), 14);
        assert_eq!(src.read(6, 8).unwrap(), b"reftable");
        assert_eq!(src.read(10, 100).unwrap(), b"able");
    }
}
