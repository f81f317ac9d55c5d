//! Viewport-driven chunk fetching against the active store.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use sg_core::{Chunk, EngineError, Request};

use crate::chunk_store::SharedChunkStore;
use crate::dispatcher::{Completion, JobDispatcher, JobOutcome, JobOutput};
use crate::lock;

/// Notified after a chunk lands in (or fails to reach) a store. Called on
/// the dispatcher's router thread with no store lock held.
pub trait ChunkObserver: Send + Sync {
    fn on_chunk_arrived(&self, offset: u64);

    fn on_chunk_failed(&self, _offset: u64, _error: &EngineError) {}
}

type Observers = Arc<RwLock<Vec<Arc<dyn ChunkObserver>>>>;

pub struct ChunkFetchScheduler {
    dispatcher: Arc<JobDispatcher>,
    store: Option<SharedChunkStore>,
    observers: Observers,
    requests_sent: AtomicU64,
}

impl ChunkFetchScheduler {
    pub fn new(dispatcher: Arc<JobDispatcher>) -> Self {
        Self {
            dispatcher,
            store: None,
            observers: Arc::new(RwLock::new(Vec::new())),
            requests_sent: AtomicU64::new(0),
        }
    }

    pub fn subscribe(&self, observer: Arc<dyn ChunkObserver>) {
        self.observers
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(observer);
    }

    /// Make `store` the target of subsequent fetches. Returns the previous
    /// store; its in-flight fetches keep landing in it.
    pub fn attach(&mut self, store: SharedChunkStore) -> Option<SharedChunkStore> {
        self.store.replace(store)
    }

    pub fn detach(&mut self) -> Option<SharedChunkStore> {
        self.store.take()
    }

    pub fn store(&self) -> Option<&SharedChunkStore> {
        self.store.as_ref()
    }

    /// Total chunk reads submitted.
    pub fn requests_sent(&self) -> u64 {
        self.requests_sent.load(Ordering::Relaxed)
    }

    /// Request every chunk of the inclusive byte range that the attached
    /// store neither holds nor awaits. Returns the number of reads issued.
    pub fn ensure_range(&self, start: u64, end: u64) -> usize {
        let Some(store) = &self.store else {
            return 0;
        };

        let (file, plans) = {
            let mut guard = lock(store);
            let plans = guard.plan_range(start, end);
            (guard.file().clone(), plans)
        };

        for plan in &plans {
            let request = Request::ReadChunk {
                file: file.clone(),
                offset: plan.offset,
                length: plan.length,
                priority: plan.priority,
            };
            let completion = self.completion(Arc::clone(store), plan.offset);
            self.dispatcher.submit_as(plan.id, request, completion);
        }

        if !plans.is_empty() {
            self.requests_sent.fetch_add(plans.len() as u64, Ordering::Relaxed);
            log::trace!(
                "Requested {} chunks for 0x{:X}..=0x{:X}",
                plans.len(),
                start,
                end
            );
        }
        plans.len()
    }

    /// Cancel every outstanding fetch of `store`. Their offsets are
    /// un-marked by the completions.
    pub fn cancel_fetches(&self, store: &SharedChunkStore) -> usize {
        let jobs = lock(store).in_flight_jobs();
        jobs.into_iter()
            .filter(|id| self.dispatcher.cancel(*id))
            .count()
    }

    fn completion(&self, store: SharedChunkStore, offset: u64) -> Completion {
        let observers = Arc::clone(&self.observers);
        Box::new(move |outcome| {
            let result = match outcome {
                JobOutcome::Done(response) => Chunk::from_response(response).map(Some),
                JobOutcome::Cancelled => Ok(None),
                JobOutcome::Failed(err) => Err(err),
            };

            match result {
                Ok(Some(chunk)) => {
                    let stored = lock(&store).resolve(chunk);
                    if stored {
                        notify(&observers, |o| o.on_chunk_arrived(offset));
                    }
                }
                Ok(None) => {
                    lock(&store).fail(offset);
                }
                Err(err) => {
                    lock(&store).fail(offset);
                    log::warn!("Chunk 0x{:X} failed: {}", offset, err);
                    notify(&observers, |o| o.on_chunk_failed(offset, &err));
                }
            }
        })
    }
}

fn notify<F: Fn(&dyn ChunkObserver)>(observers: &Observers, f: F) {
    let observers = observers
        .read()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    for observer in observers.iter() {
        f(observer.as_ref());
    }
}
