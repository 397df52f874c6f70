//! Per-collection job scheduler
//!
//! A single lock guards the collection queues. A job whose collection is idle
//! goes straight to the dispatcher through a channel; others wait in their
//! collection's FIFO until the running job completes. The dispatcher bounds
//! parallelism across collections with a semaphore.

use super::{Job, JobKind};
use crate::common::{Error, Result, UniqueId};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch, Semaphore};

struct Pending {
    job: Arc<dyn Job>,
    done: oneshot::Sender<Result<()>>,
}

#[derive(Default)]
struct CollectionQueue {
    running: bool,
    waiting: VecDeque<Pending>,
}

struct Inner {
    queues: Mutex<HashMap<UniqueId, CollectionQueue>>,
    ready_tx: mpsc::UnboundedSender<Pending>,
    stopped: AtomicBool,
}

impl Inner {
    /// Hand the next waiter of a collection to the dispatcher, or drop the queue.
    fn complete(&self, collection: UniqueId) {
        let mut queues = self.queues.lock();
        let Some(queue) = queues.get_mut(&collection) else {
            return;
        };
        match queue.waiting.pop_front() {
            Some(next) => {
                if let Err(mpsc::error::SendError(next)) = self.ready_tx.send(next) {
                    let _ = next.done.send(Err(stopped_error()));
                }
            }
            None => {
                queues.remove(&collection);
            }
        }
    }
}

fn stopped_error() -> Error {
    Error::Internal("job scheduler stopped".into())
}

/// Waits for the outcome of a submitted job.
pub struct JobHandle {
    collection_id: UniqueId,
    kind: JobKind,
    rx: oneshot::Receiver<Result<()>>,
}

impl JobHandle {
    pub fn collection_id(&self) -> UniqueId {
        self.collection_id
    }

    pub fn kind(&self) -> JobKind {
        self.kind
    }

    /// Suspend until the job is terminal. Dropping the handle instead leaves
    /// the job running; its result is discarded.
    pub async fn wait(self) -> Result<()> {
        self.rx.await.unwrap_or_else(|_| Err(stopped_error()))
    }
}

pub struct Scheduler {
    inner: Arc<Inner>,
    ready_rx: Mutex<Option<mpsc::UnboundedReceiver<Pending>>>,
    workers: usize,
    stop_tx: watch::Sender<bool>,
}

impl Scheduler {
    pub fn new(workers: usize) -> Self {
        let (ready_tx, ready_rx) = mpsc::unbounded_channel();
        let (stop_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                queues: Mutex::new(HashMap::new()),
                ready_tx,
                stopped: AtomicBool::new(false),
            }),
            ready_rx: Mutex::new(Some(ready_rx)),
            workers: workers.max(1),
            stop_tx,
        }
    }

    /// Spawn the dispatcher. Calling it twice is a no-op.
    pub fn start(&self) {
        let Some(mut ready_rx) = self.ready_rx.lock().take() else {
            return;
        };
        let inner = self.inner.clone();
        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut stop_rx = self.stop_tx.subscribe();

        tokio::spawn(async move {
            tracing::info!("job scheduler started with {} workers", semaphore.available_permits());
            loop {
                let pending = tokio::select! {
                    pending = ready_rx.recv() => match pending {
                        Some(pending) => pending,
                        None => break,
                    },
                    _ = stop_rx.changed() => break,
                };
                let permit = tokio::select! {
                    permit = semaphore.clone().acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => break,
                    },
                    _ = stop_rx.changed() => {
                        let _ = pending.done.send(Err(stopped_error()));
                        break;
                    }
                };
                let inner = inner.clone();
                tokio::spawn(async move {
                    let _permit = permit;
                    run(inner, pending).await;
                });
            }
            tracing::info!("job scheduler stopped");
        });
    }

    /// Enqueue a job behind earlier jobs of the same collection.
    pub fn add(&self, job: Arc<dyn Job>) -> JobHandle {
        let (done, rx) = oneshot::channel();
        let handle = JobHandle {
            collection_id: job.collection_id(),
            kind: job.kind(),
            rx,
        };
        if self.inner.stopped.load(Ordering::SeqCst) {
            let _ = done.send(Err(stopped_error()));
            return handle;
        }

        let collection = job.collection_id();
        let pending = Pending { job, done };
        let mut queues = self.inner.queues.lock();
        let queue = queues.entry(collection).or_default();
        if queue.running {
            queue.waiting.push_back(pending);
        } else {
            queue.running = true;
            if let Err(mpsc::error::SendError(pending)) = self.inner.ready_tx.send(pending) {
                let _ = pending.done.send(Err(stopped_error()));
            }
        }
        handle
    }

    /// Number of collections with a running or queued job.
    pub fn busy_collections(&self) -> usize {
        self.inner.queues.lock().len()
    }

    /// Stop dispatching. Running jobs finish; queued ones resolve to an error.
    pub fn stop(&self) {
        if self.inner.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.stop_tx.send(true);
        let mut queues = self.inner.queues.lock();
        for (_, queue) in queues.iter_mut() {
            for pending in queue.waiting.drain(..) {
                let _ = pending.done.send(Err(stopped_error()));
            }
        }
    }
}

async fn run(inner: Arc<Inner>, pending: Pending) {
    let Pending { job, done } = pending;
    let collection = job.collection_id();
    let kind = job.kind();

    let result = match tokio::spawn(execute(job)).await {
        Ok(result) => result,
        Err(e) => {
            tracing::error!(collection_id = collection, "{} job panicked: {}", kind, e);
            Err(Error::Internal(format!("{} job aborted: {}", kind, e)))
        }
    };
    if let Err(e) = &result {
        tracing::warn!(collection_id = collection, "{} job failed: {}", kind, e);
    }
    let _ = done.send(result);
    inner.complete(collection);
}

async fn execute(job: Arc<dyn Job>) -> Result<()> {
    job.pre_execute()?;
    let result = job.execute().await;
    job.post_execute(&result);
    result
}
