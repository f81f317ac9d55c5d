//! Worker runtime. Each worker owns one named thread, an inbox of request
//! envelopes, and a shared outbox back to the dispatcher's router.

use std::any::Any;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;

use sg_core::{
    EngineError, JobId, ProgressStats, Request, RequestEnvelope, Response, ResponseEnvelope,
    WorkerKind,
};

/// A response tagged with the worker that produced it.
pub(crate) struct Routed {
    pub kind: WorkerKind,
    pub envelope: ResponseEnvelope,
}

/// Why a job stopped without producing a response.
#[derive(Debug)]
pub enum Halt {
    /// The job observed a cancel request.
    Cancelled,
    /// The job failed; the worker keeps serving.
    Failed(EngineError),
    /// The worker can no longer serve anything. Every pending job on it is
    /// rejected and the worker is marked unavailable until respawned.
    Fatal(EngineError),
}

impl From<EngineError> for Halt {
    fn from(err: EngineError) -> Self {
        Halt::Failed(err)
    }
}

impl From<anyhow::Error> for Halt {
    fn from(err: anyhow::Error) -> Self {
        Halt::Failed(err.into())
    }
}

/// A background job executor. `handle` runs on the worker's own thread, one
/// job at a time.
pub trait Worker: Send + 'static {
    fn kind(&self) -> WorkerKind;

    fn handle(
        &mut self,
        id: JobId,
        request: Request,
        ctx: &mut WorkerContext,
    ) -> Result<Response, Halt>;
}

struct Queued {
    priority: u64,
    seq: u64,
    envelope: RequestEnvelope,
}

impl Queued {
    fn rank(&self) -> (u64, u64) {
        (self.priority, self.seq)
    }
}

impl PartialEq for Queued {
    fn eq(&self, other: &Self) -> bool {
        self.rank() == other.rank()
    }
}

impl Eq for Queued {}

impl PartialOrd for Queued {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Queued {
    // BinaryHeap is a max-heap; lowest (priority, seq) must pop first.
    fn cmp(&self, other: &Self) -> Ordering {
        other.rank().cmp(&self.rank())
    }
}

/// Per-thread state handed to [`Worker::handle`]: queued work, cancel marks,
/// and the channel for progress updates.
pub struct WorkerContext {
    kind: WorkerKind,
    inbox: Receiver<RequestEnvelope>,
    outbox: Sender<Routed>,
    queue: BinaryHeap<Queued>,
    cancelled: HashSet<JobId>,
    seq: u64,
    shutdown: bool,
}

impl WorkerContext {
    fn new(kind: WorkerKind, inbox: Receiver<RequestEnvelope>, outbox: Sender<Routed>) -> Self {
        Self {
            kind,
            inbox,
            outbox,
            queue: BinaryHeap::new(),
            cancelled: HashSet::new(),
            seq: 0,
            shutdown: false,
        }
    }

    pub fn kind(&self) -> WorkerKind {
        self.kind
    }

    /// Checks for a cancel of `id` that arrived while the job was running.
    /// Long jobs call this between units of work.
    pub fn is_cancelled(&mut self, id: JobId) -> bool {
        self.drain_inbox();
        self.shutdown || self.cancelled.contains(&id)
    }

    pub fn report(&self, id: JobId, stats: ProgressStats) {
        self.send(Some(id), Response::Progress { stats });
    }

    /// Jobs waiting behind the current one.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    fn send(&self, id: Option<JobId>, response: Response) -> bool {
        self.outbox
            .send(Routed { kind: self.kind, envelope: ResponseEnvelope { id, response } })
            .is_ok()
    }

    fn drain_inbox(&mut self) {
        while let Ok(envelope) = self.inbox.try_recv() {
            self.accept(envelope);
        }
    }

    fn accept(&mut self, envelope: RequestEnvelope) {
        match &envelope.request {
            Request::Cancel {} => {
                self.cancelled.insert(envelope.id);
            }
            Request::Shutdown {} => self.shutdown = true,
            request => {
                let priority = request.priority();
                self.seq += 1;
                self.queue.push(Queued { priority, seq: self.seq, envelope });
            }
        }
    }

    /// Blocks until there is a job to run. `None` on shutdown or when the
    /// dispatcher has dropped the inbox.
    fn next_job(&mut self) -> Option<RequestEnvelope> {
        loop {
            self.drain_inbox();
            if self.shutdown {
                return None;
            }
            if let Some(queued) = self.queue.pop() {
                return Some(queued.envelope);
            }
            // Idle: any remaining cancel marks belong to finished jobs.
            self.cancelled.clear();
            match self.inbox.recv() {
                Ok(envelope) => self.accept(envelope),
                Err(_) => return None,
            }
        }
    }
}

/// Start `worker` on its own thread. Returns the worker's inbox.
pub(crate) fn spawn(
    worker: Box<dyn Worker>,
    outbox: Sender<Routed>,
) -> std::io::Result<Sender<RequestEnvelope>> {
    let kind = worker.kind();
    let (inbox_tx, inbox_rx) = mpsc::channel();
    thread::Builder::new()
        .name(format!("sg-{}", kind.label()))
        .spawn(move || run(worker, WorkerContext::new(kind, inbox_rx, outbox)))?;
    Ok(inbox_tx)
}

fn run(mut worker: Box<dyn Worker>, mut ctx: WorkerContext) {
    log::debug!("{} worker started", ctx.kind);

    while let Some(envelope) = ctx.next_job() {
        let RequestEnvelope { id, request } = envelope;

        if ctx.cancelled.remove(&id) {
            ctx.send(Some(id), Response::Cancelled {});
            continue;
        }

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            worker.handle(id, request, &mut ctx)
        }));

        let response = match result {
            Ok(Ok(response)) => response,
            Ok(Err(Halt::Cancelled)) => Response::Cancelled {},
            Ok(Err(Halt::Failed(err))) => {
                log::warn!("{} job {} failed: {}", ctx.kind, id, err);
                Response::error(&err)
            }
            Ok(Err(Halt::Fatal(err))) => {
                log::error!("{} worker stopping after job {}: {}", ctx.kind, id, err);
                ctx.send(None, Response::error(&EngineError::WorkerFault(err.to_string())));
                return;
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                log::error!("{} job {} panicked: {}", ctx.kind, id, message);
                Response::error(&EngineError::WorkerFault(message))
            }
        };

        ctx.cancelled.remove(&id);
        if !ctx.send(Some(id), response) {
            break;
        }
    }

    log::debug!("{} worker stopped", ctx.kind);
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
