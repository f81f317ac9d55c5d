//! Job dispatcher: correlates requests with worker responses by id,
//! enforces per-job deadlines, and turns worker faults into job failures.
//!
//! A single router thread owns the receiving side of every worker's outbox.
//! Completions run on whichever thread resolves the job (router, caller on
//! `cancel`, or caller on an immediate rejection) and always with no
//! dispatcher lock held. Callers must not hold a lock that a completion takes
//! while calling [`JobDispatcher::submit`] or [`JobDispatcher::cancel`].

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use sg_core::{
    Chunk, EngineConfig, EngineError, EngineResult, ErrorPayload, HashStats, JobId, JobKind,
    MetadataOutcome, ProgressStats, Request, RequestEnvelope, Response, ResponseEnvelope,
    SearchStats, TimeoutPolicy, WorkerKind,
};

use crate::lock;
use crate::worker::{self, Routed, Worker};
use crate::workers::builtin_workers;

/// Upper bound on how long the router sleeps before re-checking deadlines.
const ROUTER_POLL: Duration = Duration::from_millis(25);

#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome<T> {
    Done(T),
    Cancelled,
    Failed(EngineError),
}

impl<T> JobOutcome<T> {
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done(_))
    }

    pub fn done(self) -> Option<T> {
        match self {
            Self::Done(value) => Some(value),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&EngineError> {
        match self {
            Self::Failed(err) => Some(err),
            _ => None,
        }
    }

    pub fn status(&self) -> JobStatus {
        match self {
            Self::Done(_) => JobStatus::Done,
            Self::Cancelled => JobStatus::Cancelled,
            Self::Failed(_) => JobStatus::Error,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    /// The worker has reported progress.
    Running,
    Done,
    Error,
    Cancelled,
}

/// Point-in-time view of a live job.
#[derive(Debug, Clone)]
pub struct JobSnapshot {
    pub id: JobId,
    pub kind: JobKind,
    pub status: JobStatus,
    pub progress: f32,
    pub created_at: Instant,
    pub timeout: Duration,
}

/// Typed view of a job's success response.
pub trait JobOutput: Sized + Send + 'static {
    fn from_response(response: Response) -> EngineResult<Self>;
}

fn unexpected(response: &Response, wanted: &str) -> EngineError {
    EngineError::Protocol(format!("expected {wanted}, got {}", response.type_name()))
}

impl JobOutput for Response {
    fn from_response(response: Response) -> EngineResult<Self> {
        Ok(response)
    }
}

impl JobOutput for Chunk {
    fn from_response(response: Response) -> EngineResult<Self> {
        match response {
            Response::ChunkData { offset, buffer } => Ok(Chunk::new(offset, buffer)),
            other => Err(unexpected(&other, "CHUNK_DATA")),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchHits {
    pub indices: Vec<u64>,
    pub stats: SearchStats,
}

impl JobOutput for SearchHits {
    fn from_response(response: Response) -> EngineResult<Self> {
        match response {
            Response::SearchResult { indices, stats } => Ok(Self { indices, stats }),
            other => Err(unexpected(&other, "SEARCH_RESULT")),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HashDigest {
    pub hash: String,
    pub hash_type: String,
    pub stats: HashStats,
}

impl JobOutput for HashDigest {
    fn from_response(response: Response) -> EngineResult<Self> {
        match response {
            Response::HashResult { hash, hash_type, stats } => Ok(Self { hash, hash_type, stats }),
            other => Err(unexpected(&other, "HASH_RESULT")),
        }
    }
}

impl JobOutput for MetadataOutcome {
    fn from_response(response: Response) -> EngineResult<Self> {
        match response {
            Response::ExifResult { outcome } => Ok(outcome),
            other => Err(unexpected(&other, "EXIF_RESULT")),
        }
    }
}

/// Called exactly once per job with its terminal outcome.
pub type Completion = Box<dyn FnOnce(JobOutcome<Response>) + Send>;

/// Host-facing notifications that are not tied to a single job.
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    WorkerUnavailable { worker: WorkerKind, reason: String },
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WorkerUnavailable { worker, reason } => {
                write!(f, "{worker} worker unavailable: {reason}")
            }
        }
    }
}

struct PendingJob {
    kind: JobKind,
    worker: WorkerKind,
    status: JobStatus,
    progress: f32,
    created_at: Instant,
    deadline: Instant,
    timeout: Duration,
    progress_tx: Option<Sender<ProgressStats>>,
    completion: Completion,
}

impl PendingJob {
    fn snapshot(&self, id: JobId) -> JobSnapshot {
        JobSnapshot {
            id,
            kind: self.kind,
            status: self.status,
            progress: self.progress,
            created_at: self.created_at,
            timeout: self.timeout,
        }
    }
}

struct WorkerSlot {
    inbox: Sender<RequestEnvelope>,
    available: bool,
}

struct Shared {
    jobs: Mutex<HashMap<JobId, PendingJob>>,
    workers: Mutex<HashMap<WorkerKind, WorkerSlot>>,
    notices: Mutex<Sender<Notice>>,
    shutdown: AtomicBool,
}

impl Shared {
    fn install(&self, worker: Box<dyn Worker>, outbox: Sender<Routed>) -> EngineResult<()> {
        let kind = worker.kind();
        let inbox = worker::spawn(worker, outbox)?;
        // Replacing a slot drops the old inbox, which stops the old thread.
        lock(&self.workers).insert(kind, WorkerSlot { inbox, available: true });
        log::debug!("{} worker installed", kind);
        Ok(())
    }

    fn inbox_for(&self, worker: WorkerKind) -> Option<Sender<RequestEnvelope>> {
        lock(&self.workers)
            .get(&worker)
            .filter(|slot| slot.available)
            .map(|slot| slot.inbox.clone())
    }

    /// Emits a notice only on the available -> unavailable transition.
    fn mark_unavailable(&self, worker: WorkerKind, reason: &str) {
        let mut workers = lock(&self.workers);
        let Some(slot) = workers.get_mut(&worker) else {
            return;
        };
        if !slot.available {
            return;
        }
        slot.available = false;
        drop(workers);

        log::error!("{} worker unavailable: {}", worker, reason);
        let _ = lock(&self.notices).send(Notice::WorkerUnavailable {
            worker,
            reason: reason.to_string(),
        });
    }

    fn send_cancel(&self, worker: WorkerKind, id: JobId) {
        if let Some(inbox) = self.inbox_for(worker) {
            let _ = inbox.send(RequestEnvelope { id, request: Request::Cancel {} });
        }
    }

    fn take_jobs<F>(&self, mut pick: F) -> Vec<(JobId, PendingJob)>
    where
        F: FnMut(&PendingJob) -> bool,
    {
        let mut jobs = lock(&self.jobs);
        let ids: Vec<JobId> = jobs
            .iter()
            .filter(|(_, job)| pick(job))
            .map(|(id, _)| *id)
            .collect();
        ids.into_iter()
            .filter_map(|id| jobs.remove(&id).map(|job| (id, job)))
            .collect()
    }

    fn next_deadline(&self) -> Option<Instant> {
        lock(&self.jobs).values().map(|job| job.deadline).min()
    }

    fn route(&self, routed: Routed) {
        let Routed { kind, envelope } = routed;
        let ResponseEnvelope { id, response } = envelope;

        let Some(id) = id else {
            let err = match response {
                Response::Error { error_code, error } => {
                    EngineError::from_payload(ErrorPayload { error_code, error })
                }
                other => EngineError::Protocol(format!("uncorrelated {}", other.type_name())),
            };
            self.mark_unavailable(kind, &err.to_string());
            for (job_id, job) in self.take_jobs(|job| job.worker == kind) {
                log::warn!("{:?} job {} rejected by {} fault", job.kind, job_id, kind);
                (job.completion)(JobOutcome::Failed(err.clone()));
            }
            return;
        };

        if let Response::Progress { stats } = response {
            let mut jobs = lock(&self.jobs);
            if let Some(job) = jobs.get_mut(&id) {
                job.status = JobStatus::Running;
                job.progress = stats.progress;
                if let Some(tx) = &job.progress_tx {
                    let _ = tx.send(stats);
                }
            }
            return;
        }

        let job = lock(&self.jobs).remove(&id);
        let Some(job) = job else {
            log::debug!("Dropping late {} for job {}", response.type_name(), id);
            return;
        };

        let outcome = match response {
            Response::Cancelled {} => JobOutcome::Cancelled,
            Response::Error { error_code, error } => {
                JobOutcome::Failed(EngineError::from_payload(ErrorPayload { error_code, error }))
            }
            other => JobOutcome::Done(other),
        };
        (job.completion)(outcome);
    }

    fn expire(&self, now: Instant) {
        for (id, job) in self.take_jobs(|job| job.deadline <= now) {
            let timeout_ms = job.timeout.as_millis() as u64;
            log::warn!("{:?} job {} timed out after {} ms", job.kind, id, timeout_ms);
            self.send_cancel(job.worker, id);
            (job.completion)(JobOutcome::Failed(EngineError::Timeout { timeout_ms }));
        }
    }
}

fn route_loop(shared: Arc<Shared>, outbox: Receiver<Routed>) {
    while !shared.shutdown.load(Ordering::Acquire) {
        let wait = shared
            .next_deadline()
            .map_or(ROUTER_POLL, |deadline| {
                deadline.saturating_duration_since(Instant::now()).min(ROUTER_POLL)
            });
        match outbox.recv_timeout(wait) {
            Ok(routed) => shared.route(routed),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
        shared.expire(Instant::now());
    }
    log::debug!("Dispatcher router stopped");
}

/// Owns the worker pool and every in-flight job.
pub struct JobDispatcher {
    shared: Arc<Shared>,
    outbox: Sender<Routed>,
    notices: Mutex<Receiver<Notice>>,
    policy: TimeoutPolicy,
    router: Option<JoinHandle<()>>,
}

impl JobDispatcher {
    pub fn new(policy: TimeoutPolicy, workers: Vec<Box<dyn Worker>>) -> EngineResult<Self> {
        let (outbox, outbox_rx) = mpsc::channel();
        let (notice_tx, notice_rx) = mpsc::channel();
        let shared = Arc::new(Shared {
            jobs: Mutex::new(HashMap::new()),
            workers: Mutex::new(HashMap::new()),
            notices: Mutex::new(notice_tx),
            shutdown: AtomicBool::new(false),
        });

        for worker in workers {
            shared.install(worker, outbox.clone())?;
        }

        let router_shared = Arc::clone(&shared);
        let router = thread::Builder::new()
            .name("sg-dispatch".into())
            .spawn(move || route_loop(router_shared, outbox_rx))?;

        Ok(Self {
            shared,
            outbox,
            notices: Mutex::new(notice_rx),
            policy,
            router: Some(router),
        })
    }

    pub fn with_builtin_workers(config: &EngineConfig) -> EngineResult<Self> {
        Self::new(config.timeouts, builtin_workers())
    }

    pub fn policy(&self) -> TimeoutPolicy {
        self.policy
    }

    /// Submit `request` and get a typed handle to its outcome.
    pub fn execute<T: JobOutput>(&self, request: Request) -> JobHandle<T> {
        self.execute_as(JobId::new(), request, |_, _| {})
    }

    /// Like [`execute`](Self::execute) with a caller-chosen id and an
    /// observer that sees the outcome before the handle does. The observer
    /// runs inside the completion, under the same no-lock rules.
    pub fn execute_as<T, F>(&self, id: JobId, request: Request, observer: F) -> JobHandle<T>
    where
        T: JobOutput,
        F: FnOnce(JobId, &JobOutcome<T>) + Send + 'static,
    {
        let (outcome_tx, outcome_rx) = mpsc::channel();
        let (progress_tx, progress_rx) = mpsc::channel();

        let completion: Completion = Box::new(move |outcome| {
            let typed = match outcome {
                JobOutcome::Done(response) => match T::from_response(response) {
                    Ok(value) => JobOutcome::Done(value),
                    Err(err) => JobOutcome::Failed(err),
                },
                JobOutcome::Cancelled => JobOutcome::Cancelled,
                JobOutcome::Failed(err) => JobOutcome::Failed(err),
            };
            observer(id, &typed);
            let _ = outcome_tx.send(typed);
        });

        self.dispatch(id, request, Some(progress_tx), completion);
        JobHandle::new(id, outcome_rx, progress_rx)
    }

    /// Submit with a raw completion callback.
    pub fn submit(&self, request: Request, completion: Completion) -> JobId {
        let id = JobId::new();
        self.submit_as(id, request, completion);
        id
    }

    pub fn submit_as(&self, id: JobId, request: Request, completion: Completion) {
        self.dispatch(id, request, None, completion);
    }

    fn dispatch(
        &self,
        id: JobId,
        request: Request,
        progress_tx: Option<Sender<ProgressStats>>,
        completion: Completion,
    ) {
        let Some(kind) = request.job_kind() else {
            completion(JobOutcome::Failed(EngineError::Protocol(
                "control messages cannot be submitted as jobs".into(),
            )));
            return;
        };
        let worker = kind.worker();
        let Some(inbox) = self.shared.inbox_for(worker) else {
            completion(JobOutcome::Failed(EngineError::WorkerUnavailable(worker.label().into())));
            return;
        };

        let timeout = self.policy.timeout_for(request.size_hint());
        let now = Instant::now();
        lock(&self.shared.jobs).insert(
            id,
            PendingJob {
                kind,
                worker,
                status: JobStatus::Pending,
                progress: 0.0,
                created_at: now,
                deadline: now + timeout,
                timeout,
                progress_tx,
                completion,
            },
        );

        if inbox.send(RequestEnvelope { id, request }).is_err() {
            self.shared.mark_unavailable(worker, "worker thread exited");
            let job = lock(&self.shared.jobs).remove(&id);
            if let Some(job) = job {
                (job.completion)(JobOutcome::Failed(EngineError::WorkerUnavailable(
                    worker.label().into(),
                )));
            }
        }
    }

    /// Resolve `id` as cancelled and tell its worker to stop. Returns false
    /// if the job already finished.
    pub fn cancel(&self, id: JobId) -> bool {
        let job = lock(&self.shared.jobs).remove(&id);
        let Some(job) = job else {
            return false;
        };
        self.shared.send_cancel(job.worker, id);
        log::debug!("{:?} job {} cancelled", job.kind, id);
        (job.completion)(JobOutcome::Cancelled);
        true
    }

    pub fn job(&self, id: JobId) -> Option<JobSnapshot> {
        lock(&self.shared.jobs).get(&id).map(|job| job.snapshot(id))
    }

    pub fn active_jobs(&self) -> Vec<JobSnapshot> {
        let mut jobs: Vec<JobSnapshot> = lock(&self.shared.jobs)
            .iter()
            .map(|(id, job)| job.snapshot(*id))
            .collect();
        jobs.sort_by_key(|job| job.created_at);
        jobs
    }

    pub fn is_available(&self, worker: WorkerKind) -> bool {
        lock(&self.shared.workers)
            .get(&worker)
            .is_some_and(|slot| slot.available)
    }

    /// Replace a worker, making its kind available again. Jobs still pending
    /// on the old instance keep their deadlines.
    pub fn respawn(&self, worker: Box<dyn Worker>) -> EngineResult<()> {
        let kind = worker.kind();
        self.shared.install(worker, self.outbox.clone())?;
        log::info!("{} worker respawned", kind);
        Ok(())
    }

    /// Notices emitted since the last call.
    pub fn take_notices(&self) -> Vec<Notice> {
        let notices = lock(&self.notices);
        std::iter::from_fn(|| notices.try_recv().ok()).collect()
    }
}

impl Drop for JobDispatcher {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::Release);
        for slot in lock(&self.shared.workers).values() {
            let _ = slot.inbox.send(RequestEnvelope { id: JobId::new(), request: Request::Shutdown {} });
        }
        if let Some(router) = self.router.take() {
            let _ = router.join();
        }
        for (_, job) in self.shared.take_jobs(|_| true) {
            (job.completion)(JobOutcome::Cancelled);
        }
    }
}

/// Caller-side view of one job. Polled from the UI thread each frame or
/// waited on from tests.
pub struct JobHandle<T> {
    id: JobId,
    outcome_rx: Receiver<JobOutcome<T>>,
    progress_rx: Receiver<ProgressStats>,
    progress: Option<ProgressStats>,
    outcome: Option<JobOutcome<T>>,
}

impl<T> JobHandle<T> {
    fn new(id: JobId, outcome_rx: Receiver<JobOutcome<T>>, progress_rx: Receiver<ProgressStats>) -> Self {
        Self { id, outcome_rx, progress_rx, progress: None, outcome: None }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    /// Latest progress reported by the worker.
    pub fn progress(&mut self) -> Option<ProgressStats> {
        while let Ok(stats) = self.progress_rx.try_recv() {
            self.progress = Some(stats);
        }
        self.progress
    }

    /// Non-blocking check for the outcome.
    pub fn poll(&mut self) -> Option<&JobOutcome<T>> {
        if self.outcome.is_none() {
            match self.outcome_rx.try_recv() {
                Ok(outcome) => self.outcome = Some(outcome),
                Err(TryRecvError::Empty) => {}
                Err(TryRecvError::Disconnected) => self.outcome = Some(Self::lost()),
            }
        }
        self.outcome.as_ref()
    }

    /// Take the outcome out of the handle once it is available.
    pub fn try_outcome(&mut self) -> Option<JobOutcome<T>> {
        self.poll();
        self.outcome.take()
    }

    pub fn wait(mut self) -> JobOutcome<T> {
        if let Some(outcome) = self.outcome.take() {
            return outcome;
        }
        self.outcome_rx.recv().unwrap_or_else(|_| Self::lost())
    }

    pub fn wait_timeout(&mut self, timeout: Duration) -> Option<JobOutcome<T>> {
        if let Some(outcome) = self.outcome.take() {
            return Some(outcome);
        }
        match self.outcome_rx.recv_timeout(timeout) {
            Ok(outcome) => Some(outcome),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(Self::lost()),
        }
    }

    fn lost() -> JobOutcome<T> {
        JobOutcome::Failed(EngineError::WorkerFault("job dropped without an outcome".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::{Halt, WorkerContext};
    use crate::workers::{AnalysisWorker, ChunkWorker, HashWorker};
    use sg_core::{ErrorCode, FileRef};
    use std::io::Write;
    use std::sync::atomic::AtomicUsize;
    use tempfile::NamedTempFile;

    const WAIT: Duration = Duration::from_secs(10);

    fn temp_file(data: &[u8]) -> (NamedTempFile, FileRef) {
        let mut tmp = NamedTempFile::new().unwrap();
        tmp.write_all(data).unwrap();
        tmp.flush().unwrap();
        let file = FileRef::open(tmp.path()).unwrap();
        (tmp, file)
    }

    fn exif(buffer: &[u8]) -> Request {
        Request::ProcessExif { image_buffer: buffer.to_vec() }
    }

    /// Sleeps in small steps until cancelled or `steps` run out.
    struct Sleeper {
        kind: WorkerKind,
        steps: u32,
        handled: Arc<AtomicUsize>,
    }

    impl Worker for Sleeper {
        fn kind(&self) -> WorkerKind {
            self.kind
        }

        fn handle(&mut self, id: JobId, request: Request, ctx: &mut WorkerContext) -> Result<Response, Halt> {
            self.handled.fetch_add(1, Ordering::SeqCst);
            for _ in 0..self.steps {
                if ctx.is_cancelled(id) {
                    return Err(Halt::Cancelled);
                }
                thread::sleep(Duration::from_millis(5));
            }
            match request {
                Request::ReadChunk { offset, length, .. } => {
                    Ok(Response::ChunkData { offset, buffer: vec![0xAB; length as usize] })
                }
                _ => Ok(Response::Cancelled {}),
            }
        }
    }

    fn sleeper(kind: WorkerKind, steps: u32) -> (Box<dyn Worker>, Arc<AtomicUsize>) {
        let handled = Arc::new(AtomicUsize::new(0));
        (Box::new(Sleeper { kind, steps, handled: Arc::clone(&handled) }), handled)
    }

    struct Crasher;

    impl Worker for Crasher {
        fn kind(&self) -> WorkerKind {
            WorkerKind::Analysis
        }

        fn handle(&mut self, _id: JobId, _request: Request, _ctx: &mut WorkerContext) -> Result<Response, Halt> {
            thread::sleep(Duration::from_millis(50));
            Err(Halt::Fatal(EngineError::Backend("device lost".into())))
        }
    }

    #[test]
    fn chunk_round_trip_through_builtin_worker() {
        let data: Vec<u8> = (0..=255u8).cycle().take(10_000).collect();
        let (_tmp, file) = temp_file(&data);
        let dispatcher = JobDispatcher::new(TimeoutPolicy::default(), vec![Box::new(ChunkWorker::default())]).unwrap();

        let handle = dispatcher.execute::<Chunk>(Request::ReadChunk { file, offset: 4096, length: 100, priority: 0 });
        let chunk = handle.wait().done().unwrap();
        assert_eq!(chunk.offset, 4096);
        assert_eq!(chunk.bytes, &data[4096..4196]);
        assert!(dispatcher.active_jobs().is_empty());
    }

    #[test]
    fn timeout_fails_job_with_duration_in_message() {
        let (worker, _) = sleeper(WorkerKind::ChunkIo, 400);
        let dispatcher = JobDispatcher::new(TimeoutPolicy::fixed(60), vec![worker]).unwrap();
        let (_tmp, file) = temp_file(&[0u8; 64]);

        let handle = dispatcher.execute::<Chunk>(Request::ReadChunk { file, offset: 0, length: 64, priority: 0 });
        let outcome = handle.wait();
        let err = outcome.error().unwrap();
        assert_eq!(err.code(), ErrorCode::Timeout);
        assert!(err.to_string().contains("60"), "{err}");
        assert!(dispatcher.active_jobs().is_empty());
    }

    #[test]
    fn cancel_resolves_once_and_drops_late_result() {
        let (worker, _) = sleeper(WorkerKind::ChunkIo, 40);
        let dispatcher = JobDispatcher::new(TimeoutPolicy::default(), vec![worker]).unwrap();
        let (_tmp, file) = temp_file(&[0u8; 16]);

        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let id = dispatcher.submit(
            Request::ReadChunk { file, offset: 0, length: 16, priority: 0 },
            Box::new(move |outcome| {
                assert_eq!(outcome, JobOutcome::Cancelled);
                seen.fetch_add(1, Ordering::SeqCst);
            }),
        );
        assert_eq!(dispatcher.job(id).map(|j| j.kind), Some(JobKind::Chunk));
        assert!(dispatcher.cancel(id));
        assert!(!dispatcher.cancel(id));

        thread::sleep(Duration::from_millis(300));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(dispatcher.job(id).is_none());
    }

    #[test]
    fn fatal_worker_rejects_pending_jobs_and_reports_once() {
        let dispatcher = JobDispatcher::new(TimeoutPolicy::default(), vec![Box::new(Crasher)]).unwrap();

        let first = dispatcher.execute::<MetadataOutcome>(exif(b"a"));
        let second = dispatcher.execute::<MetadataOutcome>(exif(b"b"));

        for handle in [first, second] {
            let outcome = handle.wait();
            assert_eq!(outcome.error().map(|e| e.code()), Some(ErrorCode::WorkerFault), "{outcome:?}");
        }

        // Later submissions short-circuit.
        let third = dispatcher.execute::<MetadataOutcome>(exif(b"c"));
        let outcome = third.wait();
        assert_eq!(outcome.error().map(|e| e.code()), Some(ErrorCode::WorkerUnavailable));

        let notices = dispatcher.take_notices();
        assert_eq!(notices.len(), 1);
        assert!(matches!(notices[0], Notice::WorkerUnavailable { worker: WorkerKind::Analysis, .. }));
        assert!(!dispatcher.is_available(WorkerKind::Analysis));

        dispatcher.respawn(Box::new(AnalysisWorker::default())).unwrap();
        assert!(dispatcher.is_available(WorkerKind::Analysis));
        let outcome = dispatcher.execute::<MetadataOutcome>(exif(b"plain text")).wait();
        assert_eq!(outcome, JobOutcome::Done(MetadataOutcome::NoStructuredData));
    }

    #[test]
    fn missing_worker_fails_immediately() {
        let dispatcher = JobDispatcher::new(TimeoutPolicy::default(), vec![]).unwrap();
        let mut handle = dispatcher.execute::<MetadataOutcome>(exif(b"x"));
        let outcome = handle.poll().cloned().unwrap();
        assert_eq!(outcome.error().map(|e| e.code()), Some(ErrorCode::WorkerUnavailable));
    }

    #[test]
    fn hash_reports_progress_and_matches_direct_digest() {
        use sha2::{Digest, Sha256};

        let data: Vec<u8> = (0..3_000_000u32).map(|i| (i % 253) as u8).collect();
        let (_tmp, file) = temp_file(&data);
        let dispatcher =
            JobDispatcher::new(TimeoutPolicy::default(), vec![Box::new(HashWorker::with_step(64 * 1024))]).unwrap();

        let mut handle = dispatcher.execute::<HashDigest>(Request::ProcessHash { file, hash_type: "SHA-256".into() });
        let outcome = handle.wait_timeout(WAIT).unwrap();
        let digest = outcome.done().unwrap();
        assert_eq!(digest.hash, hex::encode(Sha256::digest(&data)));
        assert_eq!(digest.hash_type, "sha256");
        assert_eq!(digest.stats.bytes, data.len() as u64);
        assert!(handle.progress().is_some());
    }

    #[test]
    fn empty_file_hashes_to_empty_digest() {
        let (_tmp, file) = temp_file(&[]);
        let dispatcher = JobDispatcher::new(TimeoutPolicy::default(), vec![Box::new(HashWorker::default())]).unwrap();
        let digest = dispatcher
            .execute::<HashDigest>(Request::ProcessHash { file, hash_type: "sha256".into() })
            .wait()
            .done()
            .unwrap();
        assert_eq!(digest.hash, "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855");
        assert_eq!(digest.stats.bytes, 0);
    }

    #[test]
    fn unknown_hash_type_is_an_error_response() {
        let (_tmp, file) = temp_file(b"abc");
        let dispatcher = JobDispatcher::new(TimeoutPolicy::default(), vec![Box::new(HashWorker::default())]).unwrap();
        let outcome = dispatcher
            .execute::<HashDigest>(Request::ProcessHash { file, hash_type: "md5".into() })
            .wait();
        assert_eq!(outcome.error().map(|e| e.code()), Some(ErrorCode::UnsupportedHash));
    }
}
