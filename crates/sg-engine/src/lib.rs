//! Background execution for the viewer: worker threads, the job dispatcher,
//! and the chunk cache they feed.

pub mod worker;
pub mod workers;
pub mod dispatcher;
pub mod chunk_store;
pub mod store_pool;
pub mod scheduler;
pub mod search_cache;
pub mod jobs;

use std::sync::{Mutex, MutexGuard, PoisonError};

pub use chunk_store::{ByteSource, ChunkStore, FetchPlan, SharedChunkStore};
pub use dispatcher::{
    Completion, HashDigest, JobDispatcher, JobHandle, JobOutcome, JobOutput, JobSnapshot,
    JobStatus, Notice, SearchHits,
};
pub use jobs::{AnalysisJobs, SearchTicket};
pub use scheduler::{ChunkFetchScheduler, ChunkObserver};
pub use search_cache::{SearchKey, SearchResultCache};
pub use store_pool::{StoreHandle, StorePool};
pub use worker::{Halt, Worker, WorkerContext};
pub use workers::{builtin_workers, AnalysisWorker, ChunkWorker, HashWorker};

/// Lock a mutex, recovering the data if a previous holder panicked.
pub fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
