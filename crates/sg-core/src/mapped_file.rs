use std::fs::File;
use std::path::Path;

use anyhow::{Context, Result};
use memmap2::Mmap;

use crate::types::FileRegion;

/// A memory-mapped file providing zero-copy byte slices.
///
/// This is the synchronous read primitive used inside workers. It is never
/// touched from the UI thread.
pub struct MappedFile {
    /// `None` for empty files, which cannot be mapped on every platform.
    mmap: Option<Mmap>,
    len: u64,
}

impl MappedFile {
    /// Open and memory-map a file.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("failed to open {}", path.display()))?;

        let metadata = file.metadata()
            .with_context(|| format!("failed to read metadata for {}", path.display()))?;

        let len = metadata.len();
        if len == 0 {
            return Ok(Self { mmap: None, len });
        }

        // SAFETY: The file must not be modified externally while mapped.
        let mmap = unsafe { Mmap::map(&file) }
            .with_context(|| format!("failed to mmap {}", path.display()))?;

        Ok(Self { mmap: Some(mmap), len })
    }

    /// Total file size in bytes.
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Returns true if the file is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Get a zero-copy byte slice for the given region.
    /// Returns an empty slice if the region is out of bounds.
    pub fn slice(&self, region: FileRegion) -> &[u8] {
        let Some(mmap) = &self.mmap else {
            return &[];
        };
        let start = region.offset as usize;
        let end = region.end().min(self.len) as usize;

        if start >= mmap.len() || start >= end {
            return &[];
        }

        &mmap[start..end]
    }

    /// Get a byte slice starting at `offset` with at most `len` bytes.
    pub fn slice_at(&self, offset: u64, len: u64) -> &[u8] {
        self.slice(FileRegion::new(offset, len))
    }

    /// The whole file as one slice.
    pub fn as_slice(&self) -> &[u8] {
        self.slice_at(0, self.len)
    }

    /// Copy `length` bytes at `offset` into an owned buffer. Fails if the
    /// file is shorter than requested, e.g. after it was truncated on disk.
    pub fn read_exact_at(&self, offset: u64, length: u64) -> Result<Vec<u8>> {
        let bytes = self.slice_at(offset, length);
        anyhow::ensure!(
            bytes.len() as u64 == length,
            "short read at 0x{:X}: wanted {} bytes, file has {}",
            offset,
            length,
            bytes.len()
        );
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_fixture(data: &[u8]) -> NamedTempFile {
        let mut f = NamedTempFile::new().expect("failed to create temp file");
        f.write_all(data).expect("failed to write fixture");
        f.flush().expect("failed to flush");
        f
    }

    #[test]
    fn open_and_read_small_file() {
        let data = b"Hello, Spyglass!";
        let f = create_fixture(data);

        let mf = MappedFile::open(f.path()).unwrap();
        assert_eq!(mf.len(), data.len() as u64);
        assert_eq!(mf.as_slice(), data);
    }

    #[test]
    fn slice_past_eof_is_truncated() {
        let f = create_fixture(b"short");
        let mf = MappedFile::open(f.path()).unwrap();

        assert_eq!(mf.slice(FileRegion::new(3, 100)), b"rt");
        assert!(mf.slice(FileRegion::new(100, 10)).is_empty());
    }

    #[test]
    fn empty_file_maps_to_empty_slices() {
        let f = create_fixture(b"");
        let mf = MappedFile::open(f.path()).unwrap();

        assert!(mf.is_empty());
        assert!(mf.as_slice().is_empty());
        assert!(mf.read_exact_at(0, 0).unwrap().is_empty());
    }

    #[test]
    fn read_exact_rejects_short_reads() {
        let f = create_fixture(b"0123456789");
        let mf = MappedFile::open(f.path()).unwrap();

        assert_eq!(mf.read_exact_at(2, 3).unwrap(), b"234");
        let err = mf.read_exact_at(8, 4).unwrap_err();
        assert!(err.to_string().contains("short read"));
    }

    #[test]
    fn missing_file_reports_path() {
        let err = MappedFile::open(Path::new("/definitely/not/here.bin")).err().unwrap();
        assert!(format!("{:#}", err).contains("not/here.bin"));
    }
}
