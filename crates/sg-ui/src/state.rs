//! Application state: open tabs over a shared engine.
//!
//! `AppState` owns the dispatcher, the pool of chunk stores, the fetch
//! scheduler and the analysis jobs. Exactly one tab is active at a time;
//! its store is the one attached to the scheduler, and only it is painted.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context};
use egui::Pos2;
use sg_core::format::parse_offset;
use sg_core::{
    normalize, EngineConfig, EngineError, EngineResult, FileRef, SearchQuery, TabId, Viewport,
};
use sg_engine::{
    AnalysisJobs, ChunkFetchScheduler, ChunkStore, JobDispatcher, SharedChunkStore, StorePool,
};

use crate::paint_sync::{FetchFailures, LoadingSnapshot, PaintScheduler, RepaintRequester, StateSync};
use crate::renderer::{Canvas, GridLayout, Highlights, PaintStats, Theme, ViewportRenderer};
use crate::viewer::{PhaseEvent, SearchView, TabViewer, ViewerPhase};

pub struct AppState {
    config: EngineConfig,
    dispatcher: Arc<JobDispatcher>,
    pool: StorePool,
    scheduler: ChunkFetchScheduler,
    jobs: AnalysisJobs,
    paint: Arc<PaintScheduler>,
    failures: Arc<FetchFailures>,
    sync: StateSync,
    pub renderer: ViewportRenderer,
    tabs: Vec<TabViewer>,
    active: Option<TabId>,
    next_tab: u64,
    visible_rows: u32,
    notices: Vec<String>,
}

impl AppState {
    pub fn new(config: EngineConfig, dispatcher: Arc<JobDispatcher>, requester: Arc<dyn RepaintRequester>) -> Self {
        let scheduler = ChunkFetchScheduler::new(Arc::clone(&dispatcher));
        let paint = Arc::new(PaintScheduler::new(requester));
        scheduler.subscribe(paint.clone());
        let failures = Arc::new(FetchFailures::default());
        scheduler.subscribe(failures.clone());
        let jobs = AnalysisJobs::new(Arc::clone(&dispatcher), config.search_cache_capacity);

        Self {
            sync: StateSync::new(config.state_sync_interval()),
            renderer: ViewportRenderer::new(GridLayout::new(config.bytes_per_row), Theme::default()),
            config,
            dispatcher,
            pool: StorePool::new(),
            scheduler,
            jobs,
            paint,
            failures,
            tabs: Vec::new(),
            active: None,
            next_tab: 1,
            visible_rows: 0,
            notices: Vec::new(),
        }
    }

    /// Start the built-in chunk, analysis and hash workers.
    pub fn with_builtin_workers(config: EngineConfig, requester: Arc<dyn RepaintRequester>) -> EngineResult<Self> {
        let dispatcher = JobDispatcher::with_builtin_workers(&config)?;
        Ok(Self::new(config, Arc::new(dispatcher), requester))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &Arc<JobDispatcher> {
        &self.dispatcher
    }

    pub fn paint_scheduler(&self) -> &Arc<PaintScheduler> {
        &self.paint
    }

    /// Chunk reads issued since startup.
    pub fn chunk_requests(&self) -> u64 {
        self.scheduler.requests_sent()
    }

    pub fn retained_stores(&self) -> usize {
        self.pool.len()
    }

    pub fn tabs(&self) -> &[TabViewer] {
        &self.tabs
    }

    pub fn active_id(&self) -> Option<TabId> {
        self.active
    }

    pub fn active_tab(&self) -> Option<&TabViewer> {
        let id = self.active?;
        self.tabs.iter().find(|tab| tab.id == id)
    }

    fn active_tab_mut(&mut self) -> Option<&mut TabViewer> {
        let id = self.active?;
        self.tabs.iter_mut().find(|tab| tab.id == id)
    }

    fn active_index(&self) -> EngineResult<usize> {
        self.active
            .and_then(|id| self.tabs.iter().position(|tab| tab.id == id))
            .ok_or_else(|| EngineError::NotReady("no file open".into()))
    }

    fn tab_mut(&mut self, id: TabId) -> Option<&mut TabViewer> {
        self.tabs.iter_mut().find(|tab| tab.id == id)
    }

    /// The active tab's store.
    pub fn active_store(&self) -> Option<SharedChunkStore> {
        self.pool.get(self.active_tab()?.store)
    }

    pub fn take_notices(&mut self) -> Vec<String> {
        std::mem::take(&mut self.notices)
    }

    pub fn loading(&self) -> Option<LoadingSnapshot> {
        self.sync.published()
    }

    // ---- tab lifecycle ----

    /// Open `path` in a new tab and make it active. A file whose identity
    /// matches a retained store reuses that store.
    pub fn open_file(&mut self, path: &Path) -> anyhow::Result<TabId> {
        let file = FileRef::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
        let handle = match self.pool.find(&file.identity) {
            Some(handle) => {
                log::info!("Reusing retained store for {}", file.identity.name);
                handle
            }
            None => self.pool.insert(ChunkStore::from_config(file.clone(), &self.config)),
        };

        let id = TabId(self.next_tab);
        self.next_tab += 1;
        log::info!("Opened {} ({} bytes) as {}", path.display(), file.size(), id);
        self.tabs.push(TabViewer::new(id, file, handle, self.visible_rows));
        self.activate(id);
        Ok(id)
    }

    /// Switch to tab `id`. The tab that loses focus has its analysis jobs
    /// cancelled; its store stays retained for a reference-swap restore.
    pub fn activate(&mut self, id: TabId) -> bool {
        if self.active == Some(id) {
            return true;
        }
        let Some(handle) = self.tabs.iter().find(|tab| tab.id == id).map(|tab| tab.store) else {
            return false;
        };
        let Some(store) = self.pool.get(handle) else {
            log::warn!("{} has no store", id);
            return false;
        };

        if let Some(previous) = self.active {
            let cancelled = self.jobs.cancel_tab(previous);
            if let Some(tab) = self.tab_mut(previous) {
                tab.abandon_jobs();
            }
            log::debug!("Deactivated {} ({} jobs cancelled)", previous, cancelled);
        }

        self.scheduler.attach(store);
        self.active = Some(id);
        self.sync.reset();

        let visible_rows = self.visible_rows;
        let bpr = self.config.bytes_per_row;
        if let Some(tab) = self.tab_mut(id) {
            let size = tab.file_size();
            tab.viewport.visible_row_count = visible_rows;
            let first = tab.viewport.first_visible_row;
            tab.scroll_to_row(first, bpr);
            tab.advance(PhaseEvent::Reactivated);
            self.renderer.layout = self.renderer.layout.sized_for(size);
        }
        self.refresh();
        self.paint.schedule();
        true
    }

    /// Close tab `id`: cancel its jobs, forget its cached searches, and drop
    /// its store unless another tab shows the same file.
    pub fn close_tab(&mut self, id: TabId) -> bool {
        let Some(index) = self.tabs.iter().position(|tab| tab.id == id) else {
            return false;
        };
        let mut tab = self.tabs.remove(index);
        self.jobs.forget_tab(id);
        tab.abandon_jobs();
        tab.advance(PhaseEvent::Disposed);

        let shared = self.tabs.iter().any(|other| other.store == tab.store);
        if !shared {
            if let Some(store) = self.pool.remove(tab.store) {
                let cancelled = self.scheduler.cancel_fetches(&store);
                log::debug!("Disposed store of {} ({} fetches cancelled)", id, cancelled);
            }
        }

        if self.active == Some(id) {
            self.active = None;
            self.scheduler.detach();
            self.sync.reset();
            let next = self.tabs.get(index.min(self.tabs.len().saturating_sub(1))).map(|tab| tab.id);
            if let Some(next) = next {
                self.activate(next);
            }
        }
        true
    }

    // ---- viewport ----

    /// Lay the grid out at `origin` in a canvas `height` pixels tall.
    pub fn set_canvas(&mut self, origin: Pos2, height: f32) {
        self.renderer.layout.origin = origin;
        let rows = Viewport::rows_for_height(height, self.renderer.layout.row_height);
        if rows == self.visible_rows {
            return;
        }
        self.visible_rows = rows;
        let bpr = self.config.bytes_per_row;
        if let Some(tab) = self.active_tab_mut() {
            tab.viewport.visible_row_count = rows;
            let first = tab.viewport.first_visible_row;
            tab.scroll_to_row(first, bpr);
        }
        self.refresh();
    }

    pub fn set_char_width(&mut self, width: f32) {
        if width > 0.0 {
            self.renderer.layout.char_width = width;
        }
    }

    /// User scroll by `delta` rows.
    pub fn scroll_rows(&mut self, delta: i64) {
        let Some(tab) = self.active_tab() else {
            return;
        };
        let first = tab.viewport.first_visible_row.saturating_add_signed(delta);
        self.scroll_to_row(first);
    }

    /// User scroll to an absolute row.
    pub fn scroll_to_row(&mut self, row: u64) {
        let bpr = self.config.bytes_per_row;
        let Some(tab) = self.active_tab_mut() else {
            return;
        };
        tab.auto_scroll.on_manual_scroll();
        let before = tab.viewport;
        tab.scroll_to_row(row, bpr);
        if tab.viewport != before {
            self.refresh();
            self.paint.schedule();
        }
    }

    /// Fetch whatever the active viewport is missing and let the store
    /// evict around it.
    fn refresh(&mut self) {
        let bpr = self.config.bytes_per_row;
        let Some(tab) = self.active_tab() else {
            return;
        };
        let range = tab.viewport.byte_range(bpr, tab.file_size());
        let Some(store) = self.pool.get(tab.store) else {
            return;
        };

        let Some((start, end)) = range else {
            // Nothing to fetch for an empty file.
            if let Some(tab) = self.active_tab_mut() {
                tab.advance(PhaseEvent::ChunkAvailable);
            }
            return;
        };

        // Sampled before issuing, so a fast arrival cannot skip Loading.
        let loaded = sg_engine::lock(&store).loaded_chunks();
        let issued = self.scheduler.ensure_range(start, end);
        let evicted = sg_engine::lock(&store).evict_distant().len();
        if evicted > 0 {
            log::trace!("Scroll evicted {} chunks", evicted);
        }
        if let Some(tab) = self.active_tab_mut() {
            if issued > 0 && loaded == 0 {
                tab.advance(PhaseEvent::FetchStarted);
            } else if loaded > 0 && tab.phase() == ViewerPhase::Uninitialized {
                tab.advance(PhaseEvent::ChunkAvailable);
            }
        }
    }

    // ---- selection ----

    fn byte_under(&self, pos: Pos2) -> Option<u64> {
        let tab = self.active_tab()?;
        self.renderer
            .layout
            .sized_for(tab.file_size())
            .byte_at(pos, tab.viewport.first_visible_row, tab.file_size())
    }

    pub fn pointer_down(&mut self, pos: Pos2) {
        if let Some(index) = self.byte_under(pos) {
            if let Some(tab) = self.active_tab_mut() {
                tab.selection.begin_selection(index);
            }
            self.paint.schedule();
        }
    }

    pub fn pointer_drag(&mut self, pos: Pos2) {
        let Some(index) = self.byte_under(pos) else {
            return;
        };
        if let Some(tab) = self.active_tab_mut() {
            if tab.selection.is_dragging() {
                tab.selection.extend_selection(index);
                self.paint.schedule();
            }
        }
    }

    pub fn pointer_up(&mut self) {
        if let Some(tab) = self.active_tab_mut() {
            tab.selection.end_drag();
        }
    }

    /// Parse and jump to an offset, selecting that byte.
    pub fn jump_to_offset(&mut self, text: &str) -> anyhow::Result<u64> {
        let Some(offset) = parse_offset(text) else {
            bail!("Invalid offset: {:?}", text.trim());
        };
        let Some(tab) = self.active_tab_mut() else {
            bail!("No file open");
        };
        let size = tab.file_size();
        if size == 0 {
            bail!("{} is empty", tab.name());
        }
        let offset = offset.min(size - 1);
        tab.selection.set_selection(offset, offset);
        tab.auto_scroll.request(offset);
        self.paint.schedule();
        Ok(offset)
    }

    pub fn next_match(&mut self) -> Option<u64> {
        self.step_match(true)
    }

    pub fn previous_match(&mut self) -> Option<u64> {
        self.step_match(false)
    }

    fn step_match(&mut self, forward: bool) -> Option<u64> {
        let tab = self.active_tab_mut()?;
        let search = tab.search.as_mut()?;
        let start = search.step(forward)?;
        let end = start + search.pattern_len.max(1) - 1;
        tab.selection.set_selection(start, end);
        tab.auto_scroll.request(start);
        self.paint.schedule();
        Some(start)
    }

    // ---- analysis ----

    /// Search the active file. A repeated query is answered from the cache.
    pub fn search(&mut self, query: SearchQuery) -> EngineResult<()> {
        let pattern = normalize(&query)?;
        let index = self.active_index()?;
        let tab = &mut self.tabs[index];
        let pattern_len = pattern.bytes.len() as u64;
        let view = match self.jobs.search(tab.id, &tab.file, &query)? {
            sg_engine::SearchTicket::Cached(indices) => SearchView::cached(query, pattern_len, indices),
            sg_engine::SearchTicket::Pending(handle) => {
                let mut view = SearchView::new(query, pattern_len);
                view.task.start(handle);
                view
            }
        };
        tab.search = Some(view);
        Ok(())
    }

    pub fn hash(&mut self, hash_type: &str) -> EngineResult<()> {
        let index = self.active_index()?;
        let tab = &mut self.tabs[index];
        let handle = self.jobs.hash(tab.id, &tab.file, hash_type);
        tab.hash.start(handle);
        Ok(())
    }

    /// Parse the active file's header. Needs the first chunk resident; if it
    /// is not, it is requested and `NotReady` is returned.
    pub fn metadata(&mut self) -> EngineResult<()> {
        let store = self
            .active_store()
            .ok_or_else(|| EngineError::NotReady("no file open".into()))?;
        let header = sg_engine::lock(&store).header();
        let Some(chunk) = header else {
            self.scheduler.ensure_range(0, 0);
            return Err(EngineError::NotReady("file header is still loading".into()));
        };
        let len = chunk.bytes.len().min(self.config.metadata_header_len as usize);
        let bytes = chunk.bytes[..len].to_vec();

        let index = self.active_index()?;
        let tab = &mut self.tabs[index];
        let handle = self.jobs.metadata(tab.id, bytes);
        tab.metadata.start(handle);
        Ok(())
    }

    // ---- per frame ----

    /// Advance engine-driven state: worker notices, job results, pending
    /// auto-scroll, phase, and the throttled loading snapshot. Returns the
    /// snapshot when it should be pushed to the host.
    pub fn poll(&mut self, now: Instant) -> Option<LoadingSnapshot> {
        for notice in self.dispatcher.take_notices() {
            log::warn!("{}", notice);
            self.notices.push(notice.to_string());
        }
        self.notices.extend(self.failures.take_notices());

        let mut finished = false;
        for tab in &mut self.tabs {
            finished |= tab.poll_tasks();
        }
        if finished {
            self.paint.schedule();
        }

        let bpr = self.config.bytes_per_row;
        let scroll = self.active_tab_mut().and_then(|tab| {
            let row = tab.auto_scroll.resolve(tab.viewport, bpr)?;
            tab.scroll_to_row(row, bpr);
            Some(row)
        });
        if scroll.is_some() {
            self.refresh();
            self.paint.schedule();
        }

        let store = self.active_store()?;
        let (loaded, in_flight) = {
            let guard = sg_engine::lock(&store);
            (guard.loaded_chunks(), guard.in_flight())
        };
        let tab = self.active_tab_mut()?;
        if loaded > 0 {
            tab.advance(PhaseEvent::ChunkAvailable);
        }
        let snapshot = LoadingSnapshot { phase: tab.phase(), loaded_chunks: loaded, in_flight };
        self.sync.offer(snapshot, now)
    }

    /// Paint the active tab. Missing bytes are drawn as placeholders; the
    /// paint never waits for a fetch.
    pub fn paint<C: Canvas + ?Sized>(&self, canvas: &mut C) -> PaintStats {
        self.paint.begin_frame();
        let Some(tab) = self.active_tab() else {
            return PaintStats::default();
        };
        if !tab.phase().paints() {
            return PaintStats::default();
        }
        let Some(store) = self.pool.get(tab.store) else {
            return PaintStats::default();
        };

        let (matches, match_len) = tab
            .search
            .as_ref()
            .map_or((&[][..], 0), |search| (search.matches(), search.pattern_len));
        let highlights = Highlights {
            selection: tab.selection.range(),
            cursor: tab.selection.cursor(),
            matches,
            match_len,
        };
        let guard = sg_engine::lock(&store);
        self.renderer.paint(canvas, &*guard, tab.viewport, &highlights)
    }
}
