//! Per-file chunk cache.
//!
//! Invariants:
//! - an offset is either stored or requested, never both;
//! - at most one chunk per offset, always chunk-aligned with
//!   `length == min(chunk_size, file_size - offset)`;
//! - chunks overlapping the current viewport range are never evicted.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use sg_core::{Chunk, ChunkGeometry, EngineConfig, FileIdentity, FileRef, JobId};

/// Byte lookup over possibly-partial data.
pub trait ByteSource {
    /// `None` if the byte's chunk is not loaded or `index` is past the end.
    fn byte_at(&self, index: u64) -> Option<u8>;

    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A chunk read to issue. The offset is already marked requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchPlan {
    pub id: JobId,
    pub offset: u64,
    pub length: u32,
    /// Distance from the start of the requested range.
    pub priority: u64,
}

pub struct ChunkStore {
    file: FileRef,
    geometry: ChunkGeometry,
    chunks: HashMap<u64, Arc<Chunk>>,
    requested: HashMap<u64, JobId>,
    resident_bytes: u64,
    ceiling: u64,
    /// Inclusive byte range of the viewport; protected from eviction.
    focus: Option<(u64, u64)>,
    fetches_issued: u64,
    evicted: u64,
}

pub type SharedChunkStore = Arc<Mutex<ChunkStore>>;

impl ChunkStore {
    pub fn new(file: FileRef, chunk_size: u64, ceiling: u64) -> Self {
        let geometry = ChunkGeometry::new(chunk_size, file.size());
        Self {
            file,
            geometry,
            chunks: HashMap::new(),
            requested: HashMap::new(),
            resident_bytes: 0,
            ceiling,
            focus: None,
            fetches_issued: 0,
            evicted: 0,
        }
    }

    pub fn from_config(file: FileRef, config: &EngineConfig) -> Self {
        Self::new(file, config.chunk_size, config.cache_ceiling_bytes)
    }

    pub fn shared(self) -> SharedChunkStore {
        Arc::new(Mutex::new(self))
    }

    pub fn file(&self) -> &FileRef {
        &self.file
    }

    pub fn identity(&self) -> &FileIdentity {
        &self.file.identity
    }

    pub fn geometry(&self) -> ChunkGeometry {
        self.geometry
    }

    pub fn get_byte(&self, index: u64) -> Option<u8> {
        if index >= self.geometry.file_size {
            return None;
        }
        let offset = self.geometry.chunk_offset(index);
        self.chunks.get(&offset).and_then(|chunk| chunk.get(index))
    }

    pub fn chunk(&self, offset: u64) -> Option<Arc<Chunk>> {
        self.chunks.get(&offset).cloned()
    }

    /// First chunk of the file, if loaded. Used as the metadata header.
    pub fn header(&self) -> Option<Arc<Chunk>> {
        self.chunk(0)
    }

    pub fn is_stored(&self, offset: u64) -> bool {
        self.chunks.contains_key(&offset)
    }

    pub fn is_requested(&self, offset: u64) -> bool {
        self.requested.contains_key(&offset)
    }

    pub fn stored_offsets(&self) -> Vec<u64> {
        let mut offsets: Vec<u64> = self.chunks.keys().copied().collect();
        offsets.sort_unstable();
        offsets
    }

    pub fn requested_offsets(&self) -> Vec<u64> {
        let mut offsets: Vec<u64> = self.requested.keys().copied().collect();
        offsets.sort_unstable();
        offsets
    }

    /// Job ids of outstanding fetches.
    pub fn in_flight_jobs(&self) -> Vec<JobId> {
        self.requested.values().copied().collect()
    }

    pub fn loaded_chunks(&self) -> usize {
        self.chunks.len()
    }

    pub fn in_flight(&self) -> usize {
        self.requested.len()
    }

    pub fn resident_bytes(&self) -> u64 {
        self.resident_bytes
    }

    pub fn fetches_issued(&self) -> u64 {
        self.fetches_issued
    }

    pub fn evicted(&self) -> u64 {
        self.evicted
    }

    /// True once every byte of the inclusive range is resident.
    pub fn covers(&self, start: u64, end: u64) -> bool {
        self.geometry
            .offsets_covering(start, end)
            .all(|offset| self.chunks.contains_key(&offset))
    }

    pub fn set_focus(&mut self, start: u64, end: u64) {
        self.focus = Some((start, end));
    }

    /// Mark every chunk of `[start, end]` that is neither stored nor in
    /// flight as requested, and return the reads to issue, nearest first.
    pub fn plan_range(&mut self, start: u64, end: u64) -> Vec<FetchPlan> {
        self.set_focus(start, end);
        let geometry = self.geometry;
        let mut plans = Vec::new();

        for offset in geometry.offsets_covering(start, end) {
            if self.chunks.contains_key(&offset) || self.requested.contains_key(&offset) {
                continue;
            }
            let id = JobId::new();
            self.requested.insert(offset, id);
            self.fetches_issued += 1;
            plans.push(FetchPlan {
                id,
                offset,
                length: geometry.chunk_len(offset) as u32,
                priority: offset.abs_diff(start),
            });
        }

        plans.sort_by_key(|plan| plan.priority);
        plans
    }

    /// Store a fetched chunk. Returns false if the chunk was rejected as
    /// misaligned, wrongly sized, or a duplicate.
    pub fn resolve(&mut self, chunk: Chunk) -> bool {
        self.requested.remove(&chunk.offset);

        let expected = self.geometry.chunk_len(chunk.offset);
        if chunk.offset != self.geometry.chunk_offset(chunk.offset)
            || chunk.bytes.len() as u64 != expected
            || expected == 0
        {
            log::warn!(
                "Rejecting chunk at 0x{:X}: {} bytes, expected {}",
                chunk.offset,
                chunk.bytes.len(),
                expected
            );
            return false;
        }
        if self.chunks.contains_key(&chunk.offset) {
            return false;
        }

        self.resident_bytes += expected;
        self.chunks.insert(chunk.offset, Arc::new(chunk));
        self.evict_distant();
        true
    }

    /// Un-mark a failed or cancelled fetch so the next sweep retries it.
    pub fn fail(&mut self, offset: u64) -> bool {
        self.requested.remove(&offset).is_some()
    }

    /// Drop chunks farthest from the viewport centre until resident bytes
    /// fit under the ceiling. Returns the evicted offsets.
    pub fn evict_distant(&mut self) -> Vec<u64> {
        if self.resident_bytes <= self.ceiling {
            return Vec::new();
        }

        let geometry = self.geometry;
        let (center, protected_lo, protected_hi) = match self.focus {
            Some((start, end)) => (
                start / 2 + end / 2,
                geometry.chunk_offset(start),
                geometry.chunk_offset(end),
            ),
            // Empty protected range.
            None => (0, 1, 0),
        };

        let mut candidates: Vec<u64> = self
            .chunks
            .keys()
            .copied()
            .filter(|offset| !(protected_lo..=protected_hi).contains(offset))
            .collect();
        candidates.sort_by_key(|&offset| {
            std::cmp::Reverse((offset + geometry.chunk_len(offset) / 2).abs_diff(center))
        });

        let mut evicted = Vec::new();
        for offset in candidates {
            if self.resident_bytes <= self.ceiling {
                break;
            }
            if let Some(chunk) = self.chunks.remove(&offset) {
                self.resident_bytes -= chunk.bytes.len() as u64;
                evicted.push(offset);
            }
        }

        if !evicted.is_empty() {
            self.evicted += evicted.len() as u64;
            log::debug!(
                "Evicted {} chunks from {}, {} bytes resident",
                evicted.len(),
                self.file.identity.name,
                self.resident_bytes
            );
        }
        evicted
    }
}

impl ByteSource for ChunkStore {
    fn byte_at(&self, index: u64) -> Option<u8> {
        self.get_byte(index)
    }

    fn len(&self) -> u64 {
        self.geometry.file_size
    }
}

/// Fully resident data, e.g. a header buffer.
impl ByteSource for [u8] {
    fn byte_at(&self, index: u64) -> Option<u8> {
        usize::try_from(index).ok().and_then(|i| self.get(i).copied())
    }

    fn len(&self) -> u64 {
        <[u8]>::len(self) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, Rng, SeedableRng};
    use sg_core::FileIdentity;

    fn file(size: u64) -> FileRef {
        FileRef {
            path: "/tmp/store.bin".into(),
            identity: FileIdentity { name: "store.bin".into(), size, last_modified_ms: 1 },
        }
    }

    fn chunk_for(store: &ChunkStore, offset: u64, data: &[u8]) -> Chunk {
        let len = store.geometry().chunk_len(offset) as usize;
        Chunk::new(offset, data[offset as usize..offset as usize + len].to_vec())
    }

    fn assert_disjoint(store: &ChunkStore) {
        for offset in store.requested_offsets() {
            assert!(!store.is_stored(offset), "0x{offset:X} both stored and requested");
        }
    }

    #[test]
    fn plan_marks_missing_chunks_once() {
        let mut store = ChunkStore::new(file(10_000), 1024, u64::MAX);
        let plans = store.plan_range(1500, 4200);
        assert_eq!(plans.iter().map(|p| p.offset).collect::<Vec<_>>(), vec![1024, 2048, 3072, 4096]);
        assert!(store.plan_range(1500, 4200).is_empty());
        assert_eq!(store.fetches_issued(), 4);
        assert_eq!(store.in_flight_jobs().len(), 4);
    }

    #[test]
    fn last_chunk_is_short() {
        let mut store = ChunkStore::new(file(2500), 1024, u64::MAX);
        let plans = store.plan_range(0, 2499);
        assert_eq!(plans.last().map(|p| (p.offset, p.length)), Some((2048, 452)));
    }

    #[test]
    fn resolve_rejects_bad_chunks() {
        let mut store = ChunkStore::new(file(2500), 1024, u64::MAX);
        store.plan_range(0, 2499);
        assert!(!store.resolve(Chunk::new(10, vec![0; 1024])));
        assert!(!store.resolve(Chunk::new(2048, vec![0; 1024])));
        assert!(store.resolve(Chunk::new(0, vec![7; 1024])));
        assert!(!store.resolve(Chunk::new(0, vec![8; 1024])));
        assert_eq!(store.get_byte(5), Some(7));
        assert_eq!(store.resident_bytes(), 1024);
        assert!(!store.is_requested(2048));
        assert_disjoint(&store);
    }

    #[test]
    fn get_byte_matches_source_data() {
        let mut rng = StdRng::seed_from_u64(7);
        let data: Vec<u8> = (0..5000).map(|_| rng.gen()).collect();
        let mut store = ChunkStore::new(file(data.len() as u64), 1000, u64::MAX);

        for plan in store.plan_range(0, 4999) {
            let chunk = chunk_for(&store, plan.offset, &data);
            assert!(store.resolve(chunk));
            assert_disjoint(&store);
        }
        for _ in 0..500 {
            let index = rng.gen_range(0..data.len());
            assert_eq!(store.get_byte(index as u64), Some(data[index]));
        }
        assert_eq!(store.get_byte(5000), None);
        assert!(store.covers(0, 4999));
    }

    #[test]
    fn unloaded_bytes_are_none() {
        let store = ChunkStore::new(file(5000), 1000, u64::MAX);
        assert_eq!(store.byte_at(0), None);
        assert_eq!(ByteSource::len(&store), 5000);
    }

    #[test]
    fn fail_allows_retry() {
        let mut store = ChunkStore::new(file(4096), 1024, u64::MAX);
        store.plan_range(0, 100);
        assert!(store.fail(0));
        assert!(!store.fail(0));
        assert_eq!(store.plan_range(0, 100).len(), 1);
    }

    #[test]
    fn eviction_keeps_viewport_chunks() {
        let data = vec![0u8; 16 * 1024];
        let mut store = ChunkStore::new(file(data.len() as u64), 1024, 4 * 1024);

        // Load the far end first, then focus on the start.
        for plan in store.plan_range(8 * 1024, 16 * 1024 - 1) {
            let chunk = chunk_for(&store, plan.offset, &data);
            store.resolve(chunk);
        }
        assert!(store.resident_bytes() <= 4 * 1024 + 8 * 1024);

        for plan in store.plan_range(0, 2047) {
            let chunk = chunk_for(&store, plan.offset, &data);
            store.resolve(chunk);
        }

        assert!(store.resident_bytes() <= 4 * 1024);
        assert!(store.is_stored(0));
        assert!(store.is_stored(1024));
        // The farthest chunk went first.
        assert!(!store.is_stored(15 * 1024));
        assert!(store.evicted() > 0);
    }

    #[test]
    fn viewport_larger_than_ceiling_is_kept() {
        let data = vec![1u8; 8 * 1024];
        let mut store = ChunkStore::new(file(data.len() as u64), 1024, 2 * 1024);
        for plan in store.plan_range(0, 8 * 1024 - 1) {
            let chunk = chunk_for(&store, plan.offset, &data);
            store.resolve(chunk);
        }
        assert_eq!(store.loaded_chunks(), 8);
        assert!(store.covers(0, 8 * 1024 - 1));
    }
}
