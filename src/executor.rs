//! Executors that run producer work, and the glue wiring a producer's outcome
//! into a [`Promise`].
//!
//! The library never owns a thread pool of its own: every producer is submitted
//! to an executor the caller passes in and whose lifetime the caller controls.

use std::{
    num::NonZeroUsize,
    sync::{Arc, Condvar, Mutex, PoisonError},
    thread::{self, JoinHandle},
};

use crossbeam::channel::{self, Receiver, Sender};
use thiserror::Error;
use tracing::{debug, warn};

use crate::{error::catch_panic, Error, Promise};

/// A unit of work accepted by an [`Executor`].
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Something that runs jobs, typically on other threads.
pub trait Executor {
    /// Runs `job`, now or later, on a thread of the executor's choosing.
    fn execute(&self, job: Job);
}

impl<E: Executor + ?Sized> Executor for &E {
    fn execute(&self, job: Job) {
        (**self).execute(job)
    }
}

impl<E: Executor + ?Sized> Executor for Arc<E> {
    fn execute(&self, job: Job) {
        (**self).execute(job)
    }
}

impl<E: Executor + ?Sized> Executor for Box<E> {
    fn execute(&self, job: Job) {
        (**self).execute(job)
    }
}

/// Runs every job on a freshly spawned thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadPerTask;

impl Executor for ThreadPerTask {
    fn execute(&self, job: Job) {
        thread::spawn(job);
    }
}

/// Errors from building a [`ThreadPool`].
#[derive(Debug, Error)]
pub enum PoolError {
    /// A pool needs at least one worker.
    #[error("thread pool size must be greater than 0")]
    ZeroSize,
    /// The operating system refused to start a worker.
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Configures a [`ThreadPool`].
#[derive(Debug, Clone)]
pub struct Builder {
    size: usize,
    name_prefix: String,
}

impl Default for Builder {
    fn default() -> Self {
        Builder {
            size: thread::available_parallelism().map_or(1, NonZeroUsize::get),
            name_prefix: "promise-worker".to_string(),
        }
    }
}

impl Builder {
    /// Number of worker threads. Defaults to the available parallelism.
    pub fn size(mut self, size: usize) -> Self {
        self.size = size;
        self
    }

    /// Worker threads are named `{prefix}-{index}`.
    pub fn name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.name_prefix = prefix.into();
        self
    }

    /// Starts the workers.
    pub fn build(self) -> Result<ThreadPool, PoolError> {
        if self.size == 0 {
            return Err(PoolError::ZeroSize);
        }

        let (jtx, jrx) = channel::unbounded::<Job>();
        let mut pool = ThreadPool {
            jtx: Some(jtx),
            workers: Vec::with_capacity(self.size),
        };
        for index in 0..self.size {
            let jrx = jrx.clone();
            // On error, dropping `pool` shuts down the workers already started.
            let worker = thread::Builder::new()
                .name(format!("{}-{}", self.name_prefix, index))
                .spawn(move || work(jrx))?;
            pool.workers.push(worker);
        }
        debug!(size = self.size, prefix = %self.name_prefix, "thread pool started");
        Ok(pool)
    }
}

/// A fixed set of worker threads draining a shared job queue.
///
/// Dropping the pool closes the queue, lets the workers finish every job already
/// submitted, and joins them. If the pool is dropped on one of its own workers
/// (the last `Arc<ThreadPool>` released inside a job), that worker is not joined:
/// it exits on its own once the job returns.
///
/// # Example
/// ```
/// # use monadic_promise::{Promise, ThreadPool};
/// let pool = ThreadPool::new(2).unwrap();
/// let p = Promise::spawn(&pool, || Ok(40 + 2));
/// assert_eq!(p.wait().unwrap(), 42);
/// ```
#[derive(Debug)]
pub struct ThreadPool {
    jtx: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl ThreadPool {
    /// Starts a pool of `size` workers with default settings.
    pub fn new(size: usize) -> Result<ThreadPool, PoolError> {
        Self::builder().size(size).build()
    }

    /// Returns a [`Builder`] with default settings.
    pub fn builder() -> Builder {
        Builder::default()
    }

    /// Number of worker threads.
    pub fn size(&self) -> usize {
        self.workers.len()
    }
}

fn work(jrx: Receiver<Job>) {
    // Ends once every sender is gone and the queue is drained.
    for job in jrx {
        let _ = catch_panic("pool job", job);
    }
}

impl Executor for ThreadPool {
    fn execute(&self, job: Job) {
        if let Some(jtx) = &self.jtx {
            // Workers only hang up once `jtx` is gone, which is in `drop`.
            let _ = jtx.send(job);
        }
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        drop(self.jtx.take());
        let current = thread::current().id();
        for worker in self.workers.drain(..) {
            if worker.thread().id() == current {
                warn!("thread pool dropped on its own worker; not joining it");
                continue;
            }
            let _ = worker.join();
        }
        debug!("thread pool shut down");
    }
}

impl<T: Clone + Send + 'static> Promise<T> {
    /// Runs `func` on `executor` and returns a promise for its outcome.
    ///
    /// If `func` panics, the promise fails with a [`PromisePanic`](crate::PromisePanic) cause instead of
    /// staying pending forever.
    ///
    /// # Examples
    /// ```
    /// # use monadic_promise::{Error, Promise, ThreadPerTask};
    /// let p = Promise::spawn(&ThreadPerTask, || Ok(42));
    /// assert_eq!(p.wait().unwrap(), 42);
    ///
    /// let p = Promise::<()>::spawn(&ThreadPerTask, || Err(Error::msg("fail")));
    /// assert_eq!(p.wait().unwrap_err().to_string(), "fail");
    /// ```
    pub fn spawn<X, F>(executor: &X, func: F) -> Promise<T>
    where
        X: Executor + ?Sized,
        F: FnOnce() -> Result<T, Error> + Send + 'static,
    {
        let promise = Promise::pending();
        let resolver = promise.clone();
        executor.execute(Box::new(move || {
            let outcome = catch_panic("promise producer", func).and_then(|outcome| outcome);
            resolver.resolve(outcome);
        }));
        promise
    }
}

struct Semaphore {
    permits: Mutex<usize>,
    released: Condvar,
}

struct Permit<'a>(&'a Semaphore);

impl Semaphore {
    fn new(permits: usize) -> Self {
        Semaphore {
            permits: Mutex::new(permits),
            released: Condvar::new(),
        }
    }

    fn acquire(&self) -> Permit<'_> {
        let mut permits = self.permits.lock().unwrap_or_else(PoisonError::into_inner);
        while *permits == 0 {
            permits = self
                .released
                .wait(permits)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *permits -= 1;
        Permit(self)
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        *self.0.permits.lock().unwrap_or_else(PoisonError::into_inner) += 1;
        self.0.released.notify_one();
    }
}

/// Spawns one promise per producer, letting at most `limit` producers run at
/// the same time.
///
/// Producers over the limit wait inside their job for a permit, so they occupy
/// an executor thread while queued. The returned promises are in input order.
///
/// # Panics
/// Panics if `limit` is 0.
///
/// # Example
/// ```
/// # use monadic_promise::{lift_all, spawn_batch, ThreadPerTask};
/// let fetches = (1..=4).map(|i| move || Ok(i * i));
/// let promises = spawn_batch(&ThreadPerTask, 2, fetches);
/// let total = lift_all(|v: Vec<i32>| v.iter().sum::<i32>(), promises);
/// assert_eq!(total.wait().unwrap(), 30);
/// ```
pub fn spawn_batch<T, X, F, I>(executor: &X, limit: usize, producers: I) -> Vec<Promise<T>>
where
    T: Clone + Send + 'static,
    X: Executor + ?Sized,
    F: FnOnce() -> Result<T, Error> + Send + 'static,
    I: IntoIterator<Item = F>,
{
    assert!(limit > 0, "batch limit must be greater than 0");
    let semaphore = Arc::new(Semaphore::new(limit));
    producers
        .into_iter()
        .map(|producer| {
            let semaphore = Arc::clone(&semaphore);
            Promise::spawn(executor, move || {
                let _permit = semaphore.acquire();
                producer()
            })
        })
        .collect()
}
