//! Meshline Worker Pool
//!
//! A fixed set of worker tasks sharing one bounded FIFO queue. The pool caps
//! how much background work (proxy updates, certificate rotations, ...) runs
//! concurrently so that a burst of events cannot flood the runtime with
//! tasks.
//!
//! - The queue capacity equals the worker count; [`WorkerPool::submit`]
//!   waits for room instead of dropping or growing.
//! - Jobs run to completion on the worker that picked them up. There is no
//!   preemption and no per-job timeout.
//! - Jobs signal their own completion through a [`JobDone`] receiver. The
//!   pool hands that receiver back on submission but never fires it.
//! - [`WorkerPool::stop`] is cooperative: running jobs finish, jobs still
//!   queued when a worker observes the stop signal are discarded.
//! - A panicking job is logged and dropped; its worker keeps serving the
//!   queue.
//!
//! Ordering is FIFO relative to a single producer only.

use std::any::Any;
use std::num::NonZeroUsize;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::FutureExt;
use tokio::sync::{Mutex, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Completion signal of a job, fired by the job itself.
///
/// Resolves with an error if the job is dropped without firing it, which is
/// also what happens to jobs discarded at stop.
pub type JobDone = oneshot::Receiver<()>;

/// Unit of work queued on a [`WorkerPool`]
#[async_trait]
pub trait Job: Send + 'static {
    /// Name of the job, for diagnostics only
    fn job_name(&self) -> &str;

    /// Execute the job. Implementations fire their completion sender here.
    async fn run(self: Box<Self>);

    /// Receiver half of the job's completion signal.
    ///
    /// Called exactly once by the pool, at submission.
    fn done_receiver(&mut self) -> JobDone;
}

/// Worker pool errors
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerPoolError {
    #[error("worker pool is stopped")]
    Stopped,
}

type JobQueue = Arc<Mutex<mpsc::Receiver<Box<dyn Job>>>>;

/// Bounded worker pool
pub struct WorkerPool {
    n_workers: usize,
    jobs: mpsc::Sender<Box<dyn Job>>,
    stop_tx: watch::Sender<bool>,
    /// Handles of workers not yet joined by `stop`
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Create a pool and start its workers.
    ///
    /// A worker count of 0 uses the available parallelism of the host.
    /// Must be called from within a tokio runtime.
    pub fn new(n_workers: usize) -> Self {
        let n_workers = if n_workers == 0 {
            default_worker_count()
        } else {
            n_workers
        };

        info!(workers = n_workers, "New worker pool setting up workers");

        let (jobs, rx) = mpsc::channel(n_workers);
        let queue: JobQueue = Arc::new(tokio::sync::Mutex::new(rx));
        let (stop_tx, _) = watch::channel(false);

        let workers = (0..n_workers)
            .map(|id| tokio::spawn(work(id, queue.clone(), stop_tx.subscribe())))
            .collect();

        Self {
            n_workers,
            jobs,
            stop_tx,
            workers: Mutex::new(workers),
        }
    }

    /// Queue a job, waiting while the queue is full.
    ///
    /// Returns the job's own completion signal.
    pub async fn submit<J: Job>(&self, mut job: J) -> Result<JobDone, WorkerPoolError> {
        if self.is_stopped() {
            return Err(WorkerPoolError::Stopped);
        }

        let done = job.done_receiver();
        self.jobs
            .send(Box::new(job))
            .await
            .map_err(|_| WorkerPoolError::Stopped)?;
        Ok(done)
    }

    /// Number of workers in the pool
    pub fn worker_count(&self) -> usize {
        self.n_workers
    }

    /// Whether the stop signal has been broadcast
    pub fn is_stopped(&self) -> bool {
        *self.stop_tx.borrow()
    }

    /// Broadcast the stop signal and wait for every worker to exit.
    ///
    /// Safe to call more than once and from several tasks; every caller
    /// returns once the workers are gone. A handle is only released after it
    /// has been joined, so a `stop` cancelled midway is finished by the next
    /// call.
    pub async fn stop(&self) {
        self.stop_tx.send_replace(true);

        let mut workers = self.workers.lock().await;
        if workers.is_empty() {
            return;
        }
        while let Some(handle) = workers.last_mut() {
            if let Err(e) = handle.await {
                warn!(worker = workers.len() - 1, error = %e, "Worker exited abnormally");
            }
            workers.pop();
        }

        info!(workers = self.n_workers, "Worker pool stopped");
    }
}

fn default_worker_count() -> usize {
    std::thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1)
}

async fn work(id: usize, queue: JobQueue, mut stop: watch::Receiver<bool>) {
    debug!(worker = id, "Worker running");

    loop {
        let job = tokio::select! {
            biased;
            _ = stop_signal(&mut stop) => None,
            job = next_job(&queue) => job,
        };

        let Some(job) = job else {
            debug!(worker = id, "Worker stopped");
            return;
        };

        let name = job.job_name().to_string();
        let started = Instant::now();
        debug!(worker = id, job = %name, "Starting job");

        if let Err(panic) = AssertUnwindSafe(job.run()).catch_unwind().await {
            error!(
                worker = id,
                job = %name,
                panic = %panic_message(panic.as_ref()),
                "Job panicked"
            );
            continue;
        }

        debug!(worker = id, job = %name, elapsed = ?started.elapsed(), "Finished job");
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        *message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.as_str()
    } else {
        "non-string panic payload"
    }
}

async fn stop_signal(stop: &mut watch::Receiver<bool>) {
    // a dropped sender counts as stop
    let _ = stop.wait_for(|stopped| *stopped).await;
}

async fn next_job(queue: &JobQueue) -> Option<Box<dyn Job>> {
    queue.lock().await.recv().await
}
