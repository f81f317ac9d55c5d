//! Repaint coalescing and throttled host-state sync.
//!
//! Chunk arrivals go straight to [`PaintScheduler`], which asks the host for
//! exactly one repaint per frame no matter how many chunks land. Loading
//! indicators go through [`StateSync`] at a lower rate.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use sg_core::EngineError;
use sg_engine::{lock, ChunkObserver};

use crate::viewer::ViewerPhase;

/// Host hook that schedules the next frame. Callable from any thread.
pub trait RepaintRequester: Send + Sync {
    fn request_repaint(&self);
}

impl RepaintRequester for egui::Context {
    fn request_repaint(&self) {
        egui::Context::request_repaint(self);
    }
}

pub struct PaintScheduler {
    pending: AtomicBool,
    requester: Arc<dyn RepaintRequester>,
    requested: AtomicU64,
}

impl PaintScheduler {
    pub fn new(requester: Arc<dyn RepaintRequester>) -> Self {
        Self {
            pending: AtomicBool::new(false),
            requester,
            requested: AtomicU64::new(0),
        }
    }

    /// Ask for a paint. Returns true if this call issued the host request,
    /// false if one was already pending.
    pub fn schedule(&self) -> bool {
        if self.pending.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.requested.fetch_add(1, Ordering::Relaxed);
        self.requester.request_repaint();
        true
    }

    /// Called at the start of a frame's paint. Clears the pending flag so
    /// arrivals during this paint schedule the next one.
    pub fn begin_frame(&self) -> bool {
        self.pending.swap(false, Ordering::AcqRel)
    }

    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }

    /// Host repaint requests issued so far.
    pub fn repaints_requested(&self) -> u64 {
        self.requested.load(Ordering::Relaxed)
    }
}

impl ChunkObserver for PaintScheduler {
    fn on_chunk_arrived(&self, _offset: u64) {
        self.schedule();
    }

    fn on_chunk_failed(&self, offset: u64, error: &EngineError) {
        log::debug!("Chunk 0x{:X} unavailable, painting placeholders: {}", offset, error);
    }
}

/// Consecutive transient failures of one chunk before the user hears of it.
pub const REPEATED_FAILURE_LIMIT: u32 = 3;

/// Per-offset failure streaks. Transient read errors stay quiet until the
/// same chunk fails [`REPEATED_FAILURE_LIMIT`] times in a row; other errors
/// are reported on their first occurrence. Worker faults are left to the
/// dispatcher's own notices. An arrival ends the offset's streak.
#[derive(Default)]
pub struct FetchFailures {
    streaks: Mutex<HashMap<u64, u32>>,
    notices: Mutex<Vec<String>>,
}

impl FetchFailures {
    pub fn take_notices(&self) -> Vec<String> {
        std::mem::take(&mut *lock(&self.notices))
    }

    pub fn streak(&self, offset: u64) -> u32 {
        lock(&self.streaks).get(&offset).copied().unwrap_or(0)
    }
}

impl ChunkObserver for FetchFailures {
    fn on_chunk_arrived(&self, offset: u64) {
        lock(&self.streaks).remove(&offset);
    }

    fn on_chunk_failed(&self, offset: u64, error: &EngineError) {
        if matches!(error, EngineError::WorkerUnavailable(_) | EngineError::WorkerFault(_)) {
            return;
        }
        let streak = {
            let mut streaks = lock(&self.streaks);
            let streak = streaks.entry(offset).or_insert(0);
            *streak += 1;
            *streak
        };
        let limit = if error.is_transient() { REPEATED_FAILURE_LIMIT } else { 1 };
        if streak == limit {
            let notice = if streak > 1 {
                format!("Reading 0x{:X} failed {} times: {}", offset, streak, error)
            } else {
                format!("Reading 0x{:X} failed: {}", offset, error)
            };
            log::warn!("{}", notice);
            lock(&self.notices).push(notice);
        }
    }
}

/// What the host shows for the active tab's loading state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadingSnapshot {
    pub phase: ViewerPhase,
    pub loaded_chunks: usize,
    pub in_flight: usize,
}

impl LoadingSnapshot {
    pub fn is_loading(&self) -> bool {
        self.in_flight > 0
    }
}

pub struct StateSync {
    interval: Duration,
    last_publish: Option<Instant>,
    published: Option<LoadingSnapshot>,
}

impl StateSync {
    pub fn new(interval: Duration) -> Self {
        Self { interval, last_publish: None, published: None }
    }

    pub fn published(&self) -> Option<LoadingSnapshot> {
        self.published
    }

    /// Offer the current state. Published when it changed and either the
    /// interval has passed, the phase moved, or loading just finished.
    pub fn offer(&mut self, snapshot: LoadingSnapshot, now: Instant) -> Option<LoadingSnapshot> {
        if self.published == Some(snapshot) {
            return None;
        }
        let due = self
            .last_publish
            .map_or(true, |last| now.saturating_duration_since(last) >= self.interval);
        let urgent = match self.published {
            None => true,
            Some(prev) => prev.phase != snapshot.phase || (prev.is_loading() && !snapshot.is_loading()),
        };
        if !due && !urgent {
            return None;
        }
        self.published = Some(snapshot);
        self.last_publish = Some(now);
        Some(snapshot)
    }

    pub fn reset(&mut self) {
        self.published = None;
        self.last_publish = None;
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    #[derive(Default)]
    pub(crate) struct CountingRequester(pub AtomicU64);

    impl RepaintRequester for CountingRequester {
        fn request_repaint(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn arrivals_in_one_frame_coalesce() {
        let host = Arc::new(CountingRequester::default());
        let paint = PaintScheduler::new(host.clone());

        for offset in 0..10 {
            paint.on_chunk_arrived(offset * 1024);
        }
        assert_eq!(host.0.load(Ordering::SeqCst), 1);
        assert!(paint.begin_frame());
        assert!(!paint.begin_frame());

        paint.on_chunk_arrived(0);
        assert_eq!(host.0.load(Ordering::SeqCst), 2);
        assert_eq!(paint.repaints_requested(), 2);
    }

    #[test]
    fn transient_failures_surface_only_when_repeated() {
        let failures = FetchFailures::default();
        let io = EngineError::Io("device busy".into());

        failures.on_chunk_failed(0x400, &io);
        failures.on_chunk_failed(0x400, &io);
        failures.on_chunk_failed(0x800, &io);
        assert!(failures.take_notices().is_empty());

        failures.on_chunk_failed(0x400, &io);
        let notices = failures.take_notices();
        assert_eq!(notices.len(), 1);
        assert!(notices[0].contains("0x400") && notices[0].contains("3 times"), "{}", notices[0]);

        // Once per streak, and an arrival starts a new one.
        failures.on_chunk_failed(0x400, &io);
        assert!(failures.take_notices().is_empty());
        failures.on_chunk_arrived(0x400);
        assert_eq!(failures.streak(0x400), 0);
        failures.on_chunk_failed(0x400, &io);
        assert!(failures.take_notices().is_empty());
        assert_eq!(failures.streak(0x800), 1);
    }

    #[test]
    fn timeouts_surface_at_once_and_worker_faults_not_at_all() {
        let failures = FetchFailures::default();
        failures.on_chunk_failed(0, &EngineError::Timeout { timeout_ms: 750 });
        let notices = failures.take_notices();
        assert_eq!(notices.len(), 1);
        assert!(notices[0].contains("750 ms"), "{}", notices[0]);

        failures.on_chunk_failed(0x400, &EngineError::WorkerUnavailable("chunk".into()));
        failures.on_chunk_failed(0x400, &EngineError::WorkerFault("crashed".into()));
        assert!(failures.take_notices().is_empty());
        assert_eq!(failures.streak(0x400), 0);
    }

    fn snap(phase: ViewerPhase, loaded: usize, in_flight: usize) -> LoadingSnapshot {
        LoadingSnapshot { phase, loaded_chunks: loaded, in_flight }
    }

    #[test]
    fn state_sync_throttles_progress_but_not_transitions() {
        let mut sync = StateSync::new(Duration::from_millis(100));
        let t0 = Instant::now();

        assert!(sync.offer(snap(ViewerPhase::Loading, 0, 4), t0).is_some());
        assert!(sync.offer(snap(ViewerPhase::Loading, 0, 4), t0).is_none());
        // Progress inside the interval is held back.
        assert!(sync.offer(snap(ViewerPhase::Loading, 1, 3), t0 + Duration::from_millis(10)).is_none());
        // A phase change is not.
        assert!(sync.offer(snap(ViewerPhase::Ready, 1, 3), t0 + Duration::from_millis(20)).is_some());
        // Neither is the end of loading.
        assert!(sync.offer(snap(ViewerPhase::Ready, 4, 0), t0 + Duration::from_millis(30)).is_some());
        assert!(sync.offer(snap(ViewerPhase::Ready, 4, 2), t0 + Duration::from_millis(40)).is_none());
        assert!(sync.offer(snap(ViewerPhase::Ready, 4, 2), t0 + Duration::from_millis(140)).is_some());
        assert_eq!(sync.published(), Some(snap(ViewerPhase::Ready, 4, 2)));
    }
}
