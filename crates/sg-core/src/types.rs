use std::fmt;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Default chunk size: 1 MiB.
pub const DEFAULT_CHUNK_SIZE: u64 = 1024 * 1024;

/// A byte range within a file, defined by offset and length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileRegion {
    pub offset: u64,
    pub length: u64,
}

impl FileRegion {
    pub fn new(offset: u64, length: u64) -> Self {
        Self { offset, length }
    }

    /// Returns the exclusive end offset of this region.
    pub fn end(&self) -> u64 {
        self.offset.saturating_add(self.length)
    }
}

/// Identifies one open tab. Search results are cached per tab.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TabId(pub u64);

impl fmt::Display for TabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tab#{}", self.0)
    }
}

/// The (name, size, last-modified) tuple that defines file identity.
/// A cache built for one identity is never reused for another.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileIdentity {
    pub name: String,
    pub size: u64,
    pub last_modified_ms: u64,
}

impl FileIdentity {
    /// Read the identity of a file from its metadata.
    pub fn from_path(path: &Path) -> Result<Self> {
        let metadata = std::fs::metadata(path)
            .with_context(|| format!("failed to read metadata for {}", path.display()))?;

        let last_modified_ms = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map_or(0, |d| d.as_millis() as u64);

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        Ok(Self {
            name,
            size: metadata.len(),
            last_modified_ms,
        })
    }
}

/// A serializable handle to a file on disk. Workers reopen the file
/// themselves; only the path and identity cross the worker boundary.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileRef {
    pub path: PathBuf,
    pub identity: FileIdentity,
}

impl FileRef {
    pub fn open(path: &Path) -> Result<Self> {
        let identity = FileIdentity::from_path(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            identity,
        })
    }

    pub fn size(&self) -> u64 {
        self.identity.size
    }
}

/// An immutable, chunk-aligned slice of the source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub offset: u64,
    pub bytes: Vec<u8>,
}

impl Chunk {
    pub fn new(offset: u64, bytes: Vec<u8>) -> Self {
        Self { offset, bytes }
    }

    pub fn length(&self) -> u32 {
        self.bytes.len() as u32
    }

    /// Exclusive end offset.
    pub fn end(&self) -> u64 {
        self.offset + self.bytes.len() as u64
    }

    /// Byte at an absolute file position, if this chunk holds it.
    pub fn get(&self, absolute: u64) -> Option<u8> {
        absolute
            .checked_sub(self.offset)
            .and_then(|rel| self.bytes.get(rel as usize).copied())
    }
}

/// Maps absolute file positions onto chunk offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkGeometry {
    pub chunk_size: u64,
    pub file_size: u64,
}

impl ChunkGeometry {
    pub fn new(chunk_size: u64, file_size: u64) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            file_size,
        }
    }

    /// Offset of the chunk holding `pos`.
    pub fn chunk_offset(&self, pos: u64) -> u64 {
        pos / self.chunk_size * self.chunk_size
    }

    /// Length of the chunk starting at `offset`: `min(chunk_size, file_size - offset)`.
    pub fn chunk_len(&self, offset: u64) -> u64 {
        self.chunk_size.min(self.file_size.saturating_sub(offset))
    }

    /// Chunk offsets covering the inclusive byte range `[start, end]`,
    /// clamped to the file. Empty when `start` is past the end of the file.
    pub fn offsets_covering(&self, start: u64, end: u64) -> impl Iterator<Item = u64> {
        let (first, last) = if self.file_size == 0 || start >= self.file_size || end < start {
            (1, 0)
        } else {
            let end = end.min(self.file_size - 1);
            (self.chunk_offset(start), self.chunk_offset(end))
        };
        (first..=last).step_by(self.chunk_size as usize)
    }
}

/// The currently visible window of rows. Derived from scroll position and
/// canvas height; never stored across files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Viewport {
    pub first_visible_row: u64,
    pub visible_row_count: u32,
}

impl Viewport {
    pub fn new(first_visible_row: u64, visible_row_count: u32) -> Self {
        Self {
            first_visible_row,
            visible_row_count,
        }
    }

    /// Rows needed to cover `canvas_height` pixels (the last one may be partial).
    pub fn rows_for_height(canvas_height: f32, row_height: f32) -> u32 {
        if canvas_height <= 0.0 || row_height <= 0.0 {
            return 0;
        }
        (canvas_height / row_height).ceil() as u32
    }

    /// Exclusive end row.
    pub fn end_row(&self) -> u64 {
        self.first_visible_row + self.visible_row_count as u64
    }

    pub fn contains_row(&self, row: u64) -> bool {
        row >= self.first_visible_row && row < self.end_row()
    }

    /// Keep `first_visible_row` inside `[0, total_rows - visible_row_count]`.
    pub fn clamp(&self, total_rows: u64) -> Viewport {
        let max_first = total_rows.saturating_sub(self.visible_row_count as u64);
        Viewport {
            first_visible_row: self.first_visible_row.min(max_first),
            visible_row_count: self.visible_row_count,
        }
    }

    /// Inclusive byte range painted for this viewport, including the partial
    /// row below the last full one. `None` for an empty file.
    pub fn byte_range(&self, bytes_per_row: u64, file_size: u64) -> Option<(u64, u64)> {
        let start = self.first_visible_row.saturating_mul(bytes_per_row);
        if file_size == 0 || start >= file_size {
            return None;
        }
        let end = (self.end_row() + 1)
            .saturating_mul(bytes_per_row)
            .saturating_sub(1)
            .min(file_size - 1);
        Some((start, end))
    }
}
