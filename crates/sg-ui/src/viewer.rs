//! Per-tab viewer state: lifecycle phase, viewport, selection, and the
//! tab's analysis tasks.

use std::sync::Arc;

use sg_core::{
    FileRef, MetadataOutcome, ProgressStats, SearchQuery, SearchStats, TabId, Viewport,
};
use sg_engine::{HashDigest, JobHandle, JobOutcome, JobOutput, SearchHits, StoreHandle};

use crate::selection::{AutoScroll, SelectionModel};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewerPhase {
    Uninitialized,
    /// First chunk fetch in flight.
    Loading,
    Ready,
    /// Reactivated onto a retained store.
    Restoring,
    Disposed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseEvent {
    FetchStarted,
    ChunkAvailable,
    Reactivated,
    Disposed,
}

impl ViewerPhase {
    pub fn next(self, event: PhaseEvent) -> ViewerPhase {
        use PhaseEvent as E;
        use ViewerPhase as P;
        match (self, event) {
            (P::Disposed, _) | (_, E::Disposed) => P::Disposed,
            (P::Uninitialized, E::FetchStarted) => P::Loading,
            (P::Uninitialized | P::Loading | P::Restoring, E::ChunkAvailable) => P::Ready,
            (P::Loading | P::Ready, E::Reactivated) => P::Restoring,
            // A retained store with nothing resident loads like a fresh one.
            (P::Restoring, E::FetchStarted) => P::Loading,
            (phase, _) => phase,
        }
    }

    pub fn paints(self) -> bool {
        matches!(self, Self::Ready | Self::Restoring)
    }
}

/// Caller-side state of one analysis job.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskState<T> {
    Idle,
    Running { progress: Option<ProgressStats> },
    Done(T),
    Cancelled,
    Failed(String),
}

pub struct Task<T> {
    handle: Option<JobHandle<T>>,
    state: TaskState<T>,
}

impl<T> Default for Task<T> {
    fn default() -> Self {
        Self { handle: None, state: TaskState::Idle }
    }
}

impl<T: JobOutput> Task<T> {
    pub fn start(&mut self, handle: JobHandle<T>) {
        self.handle = Some(handle);
        self.state = TaskState::Running { progress: None };
    }

    pub fn finish(&mut self, value: T) {
        self.handle = None;
        self.state = TaskState::Done(value);
    }

    /// Drain progress and the outcome. Returns true once when the task
    /// reaches a terminal state.
    pub fn poll(&mut self) -> bool {
        let Some(handle) = self.handle.as_mut() else {
            return false;
        };
        if let Some(stats) = handle.progress() {
            self.state = TaskState::Running { progress: Some(stats) };
        }
        let Some(outcome) = handle.try_outcome() else {
            return false;
        };
        self.handle = None;
        self.state = match outcome {
            JobOutcome::Done(value) => TaskState::Done(value),
            JobOutcome::Cancelled => TaskState::Cancelled,
            JobOutcome::Failed(err) => TaskState::Failed(err.to_string()),
        };
        true
    }

    /// Forget the handle after the job was cancelled elsewhere.
    pub fn mark_cancelled(&mut self) {
        if self.handle.take().is_some() {
            self.state = TaskState::Cancelled;
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    pub fn state(&self) -> &TaskState<T> {
        &self.state
    }

    pub fn result(&self) -> Option<&T> {
        match &self.state {
            TaskState::Done(value) => Some(value),
            _ => None,
        }
    }
}

/// The tab's current search and the match the user is on.
pub struct SearchView {
    pub query: SearchQuery,
    pub pattern_len: u64,
    pub task: Task<SearchHits>,
    pub from_cache: bool,
    pub current: Option<usize>,
}

impl SearchView {
    pub fn new(query: SearchQuery, pattern_len: u64) -> Self {
        Self { query, pattern_len, task: Task::default(), from_cache: false, current: None }
    }

    pub fn cached(query: SearchQuery, pattern_len: u64, indices: Arc<Vec<u64>>) -> Self {
        let mut view = Self::new(query, pattern_len);
        let stats = SearchStats { matches: indices.len() as u64, bytes_scanned: 0, duration_ms: 0.0 };
        view.task.finish(SearchHits { indices: indices.as_ref().clone(), stats });
        view.from_cache = true;
        view
    }

    pub fn matches(&self) -> &[u64] {
        self.task.result().map_or(&[], |hits| hits.indices.as_slice())
    }

    /// Step to the next (`forward`) or previous match, wrapping around.
    pub fn step(&mut self, forward: bool) -> Option<u64> {
        let count = self.matches().len();
        if count == 0 {
            return None;
        }
        let next = match (self.current, forward) {
            (None, true) => 0,
            (None, false) => count - 1,
            (Some(i), true) => (i + 1) % count,
            (Some(i), false) => (i + count - 1) % count,
        };
        self.current = Some(next);
        self.matches().get(next).copied()
    }
}

/// One open file tab.
pub struct TabViewer {
    pub id: TabId,
    pub file: FileRef,
    pub store: StoreHandle,
    phase: ViewerPhase,
    pub viewport: Viewport,
    pub selection: SelectionModel,
    pub auto_scroll: AutoScroll,
    pub search: Option<SearchView>,
    pub hash: Task<HashDigest>,
    pub metadata: Task<MetadataOutcome>,
}

impl TabViewer {
    pub fn new(id: TabId, file: FileRef, store: StoreHandle, visible_rows: u32) -> Self {
        Self {
            id,
            file,
            store,
            phase: ViewerPhase::Uninitialized,
            viewport: Viewport::new(0, visible_rows),
            selection: SelectionModel::default(),
            auto_scroll: AutoScroll::default(),
            search: None,
            hash: Task::default(),
            metadata: Task::default(),
        }
    }

    pub fn phase(&self) -> ViewerPhase {
        self.phase
    }

    pub fn advance(&mut self, event: PhaseEvent) -> ViewerPhase {
        let next = self.phase.next(event);
        if next != self.phase {
            log::debug!("{} {:?} -> {:?}", self.id, self.phase, next);
            self.phase = next;
        }
        next
    }

    pub fn name(&self) -> &str {
        &self.file.identity.name
    }

    pub fn file_size(&self) -> u64 {
        self.file.size()
    }

    pub fn total_rows(&self, bytes_per_row: u64) -> u64 {
        self.file_size().div_ceil(bytes_per_row.max(1))
    }

    /// Move the viewport, keeping it inside the file.
    pub fn scroll_to_row(&mut self, row: u64, bytes_per_row: u64) {
        self.viewport = Viewport::new(row, self.viewport.visible_row_count).clamp(self.total_rows(bytes_per_row));
    }

    /// Drop per-job handles after the tab's jobs were cancelled.
    pub fn abandon_jobs(&mut self) {
        if let Some(search) = self.search.as_mut() {
            search.task.mark_cancelled();
        }
        self.hash.mark_cancelled();
        self.metadata.mark_cancelled();
    }

    /// Poll every task. Returns true if any finished.
    pub fn poll_tasks(&mut self) -> bool {
        let mut finished = false;
        if let Some(search) = self.search.as_mut() {
            finished |= search.task.poll();
        }
        finished |= self.hash.poll();
        finished |= self.metadata.poll();
        finished
    }
}
