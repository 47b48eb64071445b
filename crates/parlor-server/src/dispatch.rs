//! Shared worker pool.
//!
//! A fixed set of OS threads consuming an unbounded job queue. Every inbound
//! transport event (connect, message, disconnect) becomes one unit of work
//! here, so transport callbacks never execute application logic themselves.
//!
//! `submit` never blocks the caller. A unit of work that panics is caught
//! and logged; the worker thread survives and moves on to the next job.
//! There is no priority, timeout, or cancellation: a job that blocks
//! indefinitely occupies its thread indefinitely.

use std::{
    io,
    panic::{AssertUnwindSafe, catch_unwind},
    thread,
};

use crossbeam_channel::{Receiver, Sender, unbounded};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Fixed-size pool of reusable worker threads.
///
/// Constructed by the embedder and injected into the server, so one pool can
/// be shared by several server instances or replaced by a single-worker pool
/// in tests. Dropping the dispatcher closes the queue, drains the jobs
/// already submitted, and joins the workers.
pub struct TaskDispatcher {
    queue: Option<Sender<Job>>,
    workers: Vec<thread::JoinHandle<()>>,
}

impl TaskDispatcher {
    /// Spawn a pool with one worker per available hardware thread.
    pub fn with_hardware_parallelism() -> io::Result<Self> {
        Self::spawn(num_cpus::get())
    }

    /// Spawn a pool with an explicit worker count (minimum one).
    pub fn spawn(workers: usize) -> io::Result<Self> {
        let workers = workers.max(1);
        let (queue, jobs) = unbounded::<Job>();

        let workers = (0..workers)
            .map(|index| {
                let jobs = jobs.clone();
                thread::Builder::new()
                    .name(format!("parlor-worker-{index}"))
                    .spawn(move || worker_loop(&jobs))
            })
            .collect::<io::Result<Vec<_>>>()?;

        Ok(Self { queue: Some(queue), workers })
    }

    /// Queue a unit of work. Never blocks; order of execution across workers
    /// is unspecified.
    pub fn submit(&self, job: impl FnOnce() + Send + 'static) {
        let Some(queue) = &self.queue else { return };

        if queue.send(Box::new(job)).is_err() {
            tracing::error!("dispatcher queue closed, dropping unit of work");
        }
    }

    /// Number of worker threads.
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }
}

impl Drop for TaskDispatcher {
    fn drop(&mut self) {
        // Closing the sender lets each worker drain what is left and exit.
        self.queue = None;
        let current = thread::current().id();
        for worker in self.workers.drain(..) {
            // A worker can end up dropping the last reference to the pool's
            // owner; joining itself would never return.
            if worker.thread().id() == current {
                continue;
            }
            if worker.join().is_err() {
                tracing::error!("worker thread terminated abnormally");
            }
        }
    }
}

impl std::fmt::Debug for TaskDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskDispatcher").field("workers", &self.workers.len()).finish()
    }
}

fn worker_loop(jobs: &Receiver<Job>) {
    for job in jobs {
        if catch_unwind(AssertUnwindSafe(job)).is_err() {
            tracing::error!("unit of work panicked; worker continues");
        }
    }
}
