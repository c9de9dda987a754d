use std::fs::OpenOptions;
use std::path::Path;

use memmap2::{Mmap, MmapOptions};

use crate::{Error, Result};

/// Random-access view over an index file's bytes.
pub trait ByteSlice {
    fn len(&self) -> usize;

    /// Returns `start..end`. Callers stay within `0..=len()`.
    fn range(&self, start: usize, end: usize) -> &[u8];

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn checked_range(&self, start: usize, end: usize) -> Result<&[u8]> {
        if start > end || end > self.len() {
            return Err(Error::corrupt(format!(
                "range {start}..{end} out of bounds for {} bytes",
                self.len()
            )));
        }
        Ok(self.range(start, end))
    }
}

impl ByteSlice for Vec<u8> {
    fn len(&self) -> usize {
        self.as_slice().len()
    }

    fn range(&self, start: usize, end: usize) -> &[u8] {
        &self[start..end]
    }
}

impl ByteSlice for &[u8] {
    fn len(&self) -> usize {
        <[u8]>::len(self)
    }

    fn range(&self, start: usize, end: usize) -> &[u8] {
        &self[start..end]
    }
}

/// Read-only memory map of a whole file.
pub struct MmapFile {
    map: Mmap,
    len: usize,
}

impl MmapFile {
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new().read(true).open(path)?;
        let len = usize::try_from(file.metadata()?.len())
            .map_err(|_| Error::SizeLimitExceeded("file exceeds addressable range".into()))?;
        if len == 0 {
            return Err(Error::corrupt(format!("cannot map empty file {}", path.display())));
        }
        // SAFETY: index files are immutable once written; the writer only maps
        // ranges it has already flushed and never truncates them.
        let map = unsafe { MmapOptions::new().len(len).map(&file)? };
        Ok(Self { map, len })
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.map
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl ByteSlice for MmapFile {
    fn len(&self) -> usize {
        self.len
    }

    fn range(&self, start: usize, end: usize) -> &[u8] {
        &self.map[start..end]
    }
}
