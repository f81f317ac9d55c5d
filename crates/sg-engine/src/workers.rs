//! Built-in workers: chunk reads, pattern search plus metadata, and hashing.
//! All of them read through a small cache of memory-mapped files.

use std::collections::HashMap;
use std::ops::ControlFlow;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use sg_core::pattern::SCAN_WINDOW;
use sg_core::{
    parse_metadata, scan_windowed, EngineError, EngineResult, FileIdentity, FileRef,
    HashAlgorithm, HashStats, JobId, MappedFile, NormalizedPattern, ProgressThrottle, Request,
    Response, SearchKind, SearchStats, StreamingDigest, WorkerKind,
};

use crate::worker::{Halt, Worker, WorkerContext};

const MAX_OPEN_FILES: usize = 8;

/// Bytes fed to the digest between cancel checks.
pub const HASH_STEP: usize = 4 * 1024 * 1024;

/// Open mappings keyed by path, bounded to [`MAX_OPEN_FILES`] with the
/// least recently used mapping dropped first. A mapping is reused only while
/// the file's identity matches the request's.
#[derive(Default)]
struct FileCache {
    files: HashMap<PathBuf, CachedFile>,
    tick: u64,
}

struct CachedFile {
    identity: FileIdentity,
    mapped: Arc<MappedFile>,
    last_used: u64,
}

impl FileCache {
    fn open(&mut self, file: &FileRef) -> EngineResult<Arc<MappedFile>> {
        self.tick += 1;
        if let Some(cached) = self.files.get_mut(&file.path) {
            if cached.identity == file.identity {
                cached.last_used = self.tick;
                return Ok(Arc::clone(&cached.mapped));
            }
        }

        let mapped = MappedFile::open(&file.path)?;
        if mapped.len() != file.size() {
            return Err(EngineError::Io(format!(
                "{} changed on disk: expected {} bytes, found {}",
                file.path.display(),
                file.size(),
                mapped.len()
            )));
        }

        if !self.files.contains_key(&file.path) && self.files.len() >= MAX_OPEN_FILES {
            self.evict_oldest();
        }
        let mapped = Arc::new(mapped);
        self.files.insert(
            file.path.clone(),
            CachedFile {
                identity: file.identity.clone(),
                mapped: Arc::clone(&mapped),
                last_used: self.tick,
            },
        );
        Ok(mapped)
    }

    fn evict_oldest(&mut self) {
        let oldest = self
            .files
            .iter()
            .min_by_key(|(_, cached)| cached.last_used)
            .map(|(path, _)| path.clone());
        if let Some(path) = oldest {
            log::trace!("Unmapping {}", path.display());
            self.files.remove(&path);
        }
    }
}

fn unsupported(kind: WorkerKind, request: &Request) -> Halt {
    Halt::Failed(EngineError::Protocol(format!(
        "{} worker cannot handle {:?} requests",
        kind,
        request.job_kind()
    )))
}

/// Serves `READ_CHUNK`.
#[derive(Default)]
pub struct ChunkWorker {
    files: FileCache,
}

impl Worker for ChunkWorker {
    fn kind(&self) -> WorkerKind {
        WorkerKind::ChunkIo
    }

    fn handle(&mut self, _id: JobId, request: Request, _ctx: &mut WorkerContext) -> Result<Response, Halt> {
        match request {
            Request::ReadChunk { file, offset, length, .. } => {
                let mapped = self.files.open(&file)?;
                let buffer = mapped.read_exact_at(offset, length as u64)?;
                Ok(Response::ChunkData { offset, buffer })
            }
            other => Err(unsupported(self.kind(), &other)),
        }
    }
}

/// Serves pattern searches and metadata extraction.
pub struct AnalysisWorker {
    files: FileCache,
    window: usize,
}

impl Default for AnalysisWorker {
    fn default() -> Self {
        Self::with_window(SCAN_WINDOW)
    }
}

impl AnalysisWorker {
    /// Scan window between cancel checks and progress updates.
    pub fn with_window(window: usize) -> Self {
        Self { files: FileCache::default(), window: window.max(1) }
    }

    fn search(
        &mut self,
        id: JobId,
        file: FileRef,
        pattern: NormalizedPattern,
        ctx: &mut WorkerContext,
    ) -> Result<Response, Halt> {
        if pattern.bytes.is_empty() {
            return Err(EngineError::InvalidPattern("empty pattern".into()).into());
        }
        let mapped = self.files.open(&file)?;
        let data = mapped.as_slice();
        let start_time = Instant::now();
        let mut throttle = ProgressThrottle::new(data.len() as u64);

        let hits = scan_windowed(data, &pattern, self.window, |scanned| {
            if ctx.is_cancelled(id) {
                return ControlFlow::Break(());
            }
            if let Some(stats) = throttle.update(scanned) {
                ctx.report(id, stats);
            }
            ControlFlow::Continue(())
        });

        let Some(indices) = hits else {
            log::info!("Search {} cancelled", id);
            return Err(Halt::Cancelled);
        };

        let duration_ms = start_time.elapsed().as_secs_f64() * 1000.0;
        log::info!(
            "Search {}: {} matches in {:.1}ms over {}",
            id,
            indices.len(),
            duration_ms,
            file.identity.name
        );
        let stats = SearchStats {
            matches: indices.len() as u64,
            bytes_scanned: data.len() as u64,
            duration_ms,
        };
        Ok(Response::SearchResult { indices, stats })
    }
}

impl Worker for AnalysisWorker {
    fn kind(&self) -> WorkerKind {
        WorkerKind::Analysis
    }

    fn handle(&mut self, id: JobId, request: Request, ctx: &mut WorkerContext) -> Result<Response, Halt> {
        match request {
            Request::SearchHex { file, pattern } => {
                let pattern = NormalizedPattern { kind: SearchKind::Hex, bytes: pattern, ignore_case: false };
                self.search(id, file, pattern, ctx)
            }
            Request::SearchAscii { file, pattern, ignore_case } => {
                let pattern = NormalizedPattern { kind: SearchKind::Ascii, bytes: pattern, ignore_case };
                self.search(id, file, pattern, ctx)
            }
            Request::ProcessExif { image_buffer } => {
                let outcome = parse_metadata(&image_buffer)?;
                Ok(Response::ExifResult { outcome })
            }
            other => Err(unsupported(self.kind(), &other)),
        }
    }
}

/// Serves `PROCESS_HASH`, streaming the mapping through the digest.
pub struct HashWorker {
    files: FileCache,
    step: usize,
}

impl Default for HashWorker {
    fn default() -> Self {
        Self::with_step(HASH_STEP)
    }
}

impl HashWorker {
    pub fn with_step(step: usize) -> Self {
        Self { files: FileCache::default(), step: step.max(1) }
    }
}

impl Worker for HashWorker {
    fn kind(&self) -> WorkerKind {
        WorkerKind::Hash
    }

    fn handle(&mut self, id: JobId, request: Request, ctx: &mut WorkerContext) -> Result<Response, Halt> {
        let (file, hash_type) = match request {
            Request::ProcessHash { file, hash_type } => (file, hash_type),
            other => return Err(unsupported(self.kind(), &other)),
        };
        let algorithm: HashAlgorithm = hash_type.parse()?;
        let mapped = self.files.open(&file)?;
        let data = mapped.as_slice();

        let start_time = Instant::now();
        let mut throttle = ProgressThrottle::new(data.len() as u64);
        let mut digest = StreamingDigest::new(algorithm);
        let mut processed = 0u64;

        for piece in data.chunks(self.step) {
            if ctx.is_cancelled(id) {
                log::info!("Hash {} cancelled after {} bytes", id, processed);
                return Err(Halt::Cancelled);
            }
            digest.update(piece);
            processed += piece.len() as u64;
            if let Some(stats) = throttle.update(processed) {
                ctx.report(id, stats);
            }
        }

        let duration_ms = start_time.elapsed().as_secs_f64() * 1000.0;
        let stats = HashStats::new(processed, duration_ms);
        log::info!(
            "{} of {}: {:.1} MiB/s",
            algorithm,
            file.identity.name,
            stats.throughput_mib_s
        );
        Ok(Response::HashResult {
            hash: digest.finalize_hex(),
            hash_type: algorithm.name().to_string(),
            stats,
        })
    }
}

/// One of each built-in worker.
pub fn builtin_workers() -> Vec<Box<dyn Worker>> {
    vec![
        Box::new(ChunkWorker::default()),
        Box::new(AnalysisWorker::default()),
        Box::new(HashWorker::default()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn fixture(contents: &[u8]) -> (NamedTempFile, FileRef) {
        let mut tmp = NamedTempFile::new().unwrap();
        tmp.write_all(contents).unwrap();
        tmp.flush().unwrap();
        let file = FileRef::open(tmp.path()).unwrap();
        (tmp, file)
    }

    #[test]
    fn file_cache_drops_only_the_least_recently_used() {
        let fixtures: Vec<_> = (0..=MAX_OPEN_FILES).map(|i| fixture(&[i as u8; 4])).collect();
        let mut cache = FileCache::default();

        for (_, file) in &fixtures[..MAX_OPEN_FILES] {
            cache.open(file).unwrap();
        }
        // Touch the oldest so the second-oldest becomes the victim.
        let first = cache.open(&fixtures[0].1).unwrap();
        cache.open(&fixtures[MAX_OPEN_FILES].1).unwrap();

        assert_eq!(cache.files.len(), MAX_OPEN_FILES);
        assert!(!cache.files.contains_key(&fixtures[1].1.path));
        for (_, file) in fixtures.iter().filter(|(_, f)| f.path != fixtures[1].1.path) {
            assert!(cache.files.contains_key(&file.path), "{}", file.path.display());
        }
        assert!(Arc::ptr_eq(&first, &cache.open(&fixtures[0].1).unwrap()));
    }

    #[test]
    fn file_cache_remaps_when_identity_changes() {
        let (_tmp, file) = fixture(b"abcd");
        let mut cache = FileCache::default();
        let before = cache.open(&file).unwrap();

        let mut moved = file.clone();
        moved.identity.last_modified_ms += 1;
        let after = cache.open(&moved).unwrap();
        assert!(!Arc::ptr_eq(&before, &after));
        assert_eq!(cache.files.len(), 1);
    }
}
