//! Per-tab analysis jobs: search, hash, and metadata.
//!
//! At most one job of each kind is live per tab. Starting a new one cancels
//! the previous one, and only the live job's search results reach the cache.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use sg_core::{
    normalize, EngineResult, FileRef, JobId, JobKind, MetadataOutcome, Request, SearchQuery,
    TabId,
};

use crate::dispatcher::{HashDigest, JobDispatcher, JobHandle, JobOutcome, JobOutput, SearchHits};
use crate::lock;
use crate::search_cache::{SearchKey, SearchResultCache};

type ActiveJobs = Arc<Mutex<HashMap<(TabId, JobKind), JobId>>>;

pub enum SearchTicket {
    /// Served from the cache; no job was started.
    Cached(Arc<Vec<u64>>),
    Pending(JobHandle<SearchHits>),
}

pub struct AnalysisJobs {
    dispatcher: Arc<JobDispatcher>,
    cache: Arc<Mutex<SearchResultCache>>,
    active: ActiveJobs,
}

impl AnalysisJobs {
    pub fn new(dispatcher: Arc<JobDispatcher>, cache_capacity: usize) -> Self {
        Self {
            dispatcher,
            cache: Arc::new(Mutex::new(SearchResultCache::new(cache_capacity))),
            active: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn dispatcher(&self) -> &Arc<JobDispatcher> {
        &self.dispatcher
    }

    pub fn search(&self, tab: TabId, file: &FileRef, query: &SearchQuery) -> EngineResult<SearchTicket> {
        let pattern = normalize(query)?;
        let key = SearchKey::new(tab, &pattern);

        let cached = lock(&self.cache).get(&key);
        if let Some(indices) = cached {
            log::debug!("Search cache hit for {} ({} matches)", tab, indices.len());
            return Ok(SearchTicket::Cached(indices));
        }

        let cache = Arc::clone(&self.cache);
        let handle = self.launch(tab, Request::search(file.clone(), &pattern), move |outcome: &JobOutcome<SearchHits>| {
            if let JobOutcome::Done(hits) = outcome {
                lock(&cache).insert(key, Arc::new(hits.indices.clone()));
            }
        });
        Ok(SearchTicket::Pending(handle))
    }

    pub fn hash(&self, tab: TabId, file: &FileRef, hash_type: &str) -> JobHandle<HashDigest> {
        let request = Request::ProcessHash { file: file.clone(), hash_type: hash_type.to_string() };
        self.launch(tab, request, |_: &JobOutcome<HashDigest>| {})
    }

    /// Parse the leading bytes of a file for structured metadata.
    pub fn metadata(&self, tab: TabId, header: Vec<u8>) -> JobHandle<MetadataOutcome> {
        self.launch(tab, Request::ProcessExif { image_buffer: header }, |_: &JobOutcome<MetadataOutcome>| {})
    }

    /// The live job of `kind` for `tab`, if any.
    pub fn active_job(&self, tab: TabId, kind: JobKind) -> Option<JobId> {
        lock(&self.active).get(&(tab, kind)).copied()
    }

    pub fn cancel(&self, tab: TabId, kind: JobKind) -> bool {
        let id = lock(&self.active).remove(&(tab, kind));
        id.is_some_and(|id| self.dispatcher.cancel(id))
    }

    /// Cancel every live job of `tab`. Returns how many were still running.
    pub fn cancel_tab(&self, tab: TabId) -> usize {
        let ids: Vec<JobId> = {
            let mut active = lock(&self.active);
            let keys: Vec<(TabId, JobKind)> = active.keys().filter(|(t, _)| *t == tab).copied().collect();
            keys.iter().filter_map(|key| active.remove(key)).collect()
        };
        ids.into_iter().filter(|id| self.dispatcher.cancel(*id)).count()
    }

    /// Cancel the tab's jobs and drop its cached results.
    pub fn forget_tab(&self, tab: TabId) {
        let cancelled = self.cancel_tab(tab);
        let dropped = lock(&self.cache).invalidate_tab(tab);
        log::debug!("Forgot {}: {} jobs cancelled, {} cached searches dropped", tab, cancelled, dropped);
    }

    pub fn cached_searches(&self) -> usize {
        lock(&self.cache).len()
    }

    fn launch<T, F>(&self, tab: TabId, request: Request, on_current: F) -> JobHandle<T>
    where
        T: JobOutput,
        F: FnOnce(&JobOutcome<T>) + Send + 'static,
    {
        let Some(kind) = request.job_kind() else {
            return self.dispatcher.execute(request);
        };
        let id = JobId::new();
        // Reserve the slot before submitting so a fast completion sees it.
        let previous = lock(&self.active).insert((tab, kind), id);
        if let Some(previous) = previous {
            if self.dispatcher.cancel(previous) {
                log::debug!("{:?} job {} superseded by {}", kind, previous, id);
            }
        }

        let active = Arc::clone(&self.active);
        self.dispatcher.execute_as(id, request, move |id, outcome| {
            let current = {
                let mut active = lock(&active);
                if active.get(&(tab, kind)) == Some(&id) {
                    active.remove(&(tab, kind));
                    true
                } else {
                    false
                }
            };
            if current {
                on_current(outcome);
            }
        })
    }
}
