use std::{
    cell::RefCell,
    collections::VecDeque,
    fmt, mem,
    sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError},
};

use tracing::{error, trace};

use crate::{error::catch_panic, AlreadyResolved, Error, Listener};

/// The observable state of a [`Promise`].
///
/// A promise moves at most once, from `Pending` to one of the two terminal states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    /// No outcome yet.
    Pending,
    /// Resolved with a value.
    Succeeded,
    /// Resolved with a failure cause.
    Failed,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            State::Pending => "pending",
            State::Succeeded => "succeeded",
            State::Failed => "failed",
        })
    }
}

enum Slot<T> {
    Pending(Vec<Listener<T>>),
    Succeeded(T),
    Failed(Error),
}

impl<T> Slot<T> {
    fn state(&self) -> State {
        match self {
            Slot::Pending(_) => State::Pending,
            Slot::Succeeded(_) => State::Succeeded,
            Slot::Failed(_) => State::Failed,
        }
    }
}

impl<T: Clone> Slot<T> {
    fn outcome(&self) -> Option<Result<T, Error>> {
        match self {
            Slot::Pending(_) => None,
            Slot::Succeeded(value) => Some(Ok(value.clone())),
            Slot::Failed(error) => Some(Err(error.clone())),
        }
    }
}

struct Inner<T> {
    slot: Mutex<Slot<T>>,
    resolved: Condvar,
}

/// A single-assignment value that becomes available asynchronously.
///
/// A `Promise` is a shared handle: cloning it is cheap and every clone observes
/// the same outcome. One party (usually a job on an [`Executor`](crate::Executor))
/// resolves it exactly once, while any number of others register listeners or
/// block in [`wait`](Self::wait).
///
/// # States
/// A promise is [`Pending`](State::Pending) until resolved, then
/// [`Succeeded`](State::Succeeded) with a value or [`Failed`](State::Failed) with an
/// [`Error`]. Resolving it a second time is a programming error: the plain
/// `resolve*` methods panic, the `try_resolve*` methods report [`AlreadyResolved`].
///
/// # Listeners
/// Listeners added while pending run later, in registration order, on the thread
/// that resolves the promise. Listeners added after resolution run immediately on
/// the calling thread. Listeners never run while the promise's lock is held, so
/// they are free to touch this or any other promise.
///
/// When a listener resolves another promise, that promise's listeners are queued
/// and run by the same thread once the current listener returns, rather than
/// nested inside it. A listener should therefore not block waiting on a promise
/// that only a later listener on its own thread would resolve.
///
/// A panicking listener is logged and skipped; the listeners after it still run.
///
/// # Example
/// ```
/// # use monadic_promise::{Promise, State};
/// # use std::thread;
/// let p = Promise::<String>::pending();
/// let producer = p.clone();
/// thread::spawn(move || producer.resolve_success("Hello world".to_string()));
/// assert_eq!(p.wait().unwrap(), "Hello world");
/// assert_eq!(p.state(), State::Succeeded);
/// ```
pub struct Promise<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Promise {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Promise<T> {
    fn with_slot(slot: Slot<T>) -> Self {
        Promise {
            inner: Arc::new(Inner {
                slot: Mutex::new(slot),
                resolved: Condvar::new(),
            }),
        }
    }

    // No user code runs under this lock, so a poisoned mutex still holds a
    // consistent slot.
    fn lock(&self) -> MutexGuard<'_, Slot<T>> {
        self.inner
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Creates an unresolved promise, to be resolved later by a producer.
    pub fn pending() -> Self {
        Self::with_slot(Slot::Pending(Vec::new()))
    }

    /// Lifts a value into an already succeeded promise.
    ///
    /// ```
    /// # use monadic_promise::Promise;
    /// assert_eq!(Promise::unit(123).wait().unwrap(), 123);
    /// ```
    pub fn unit(value: T) -> Self {
        Self::with_slot(Slot::Succeeded(value))
    }

    /// Lifts a failure cause into an already failed promise.
    ///
    /// ```
    /// # use monadic_promise::{Error, Promise};
    /// let p = Promise::<()>::failure(Error::msg("fail"));
    /// assert_eq!(p.wait().unwrap_err().to_string(), "fail");
    /// ```
    pub fn failure(error: impl Into<Error>) -> Self {
        Self::with_slot(Slot::Failed(error.into()))
    }

    /// Creates an already resolved promise from a `Result`.
    pub fn from_result(result: Result<T, Error>) -> Self {
        match result {
            Ok(value) => Self::unit(value),
            Err(error) => Self::failure(error),
        }
    }

    /// Returns the current state without blocking.
    ///
    /// The answer may be stale by the time it is used, unless it is terminal.
    pub fn state(&self) -> State {
        self.lock().state()
    }

    /// Returns `true` while no outcome has been stored.
    pub fn is_pending(&self) -> bool {
        self.state() == State::Pending
    }

    /// Returns `true` if both handles refer to the same promise.
    pub fn ptr_eq(&self, other: &Promise<T>) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Resolves the promise with `outcome`, or reports that it was already resolved.
    ///
    /// On success every queued listener is notified, in registration order, on the
    /// calling thread, and every blocked [`wait`](Self::wait) returns.
    ///
    /// ```
    /// # use monadic_promise::{AlreadyResolved, Promise, State};
    /// let p = Promise::pending();
    /// assert!(p.try_resolve(Ok(1)).is_ok());
    /// assert_eq!(p.try_resolve(Ok(2)), Err(AlreadyResolved { state: State::Succeeded }));
    /// assert_eq!(p.wait().unwrap(), 1);
    /// ```
    pub fn try_resolve(&self, outcome: Result<T, Error>) -> Result<(), AlreadyResolved>
    where
        T: Clone + 'static,
    {
        let listeners = {
            let mut slot = self.lock();
            let listeners = match &mut *slot {
                Slot::Pending(listeners) => mem::take(listeners),
                done => return Err(AlreadyResolved { state: done.state() }),
            };
            *slot = match &outcome {
                Ok(value) => Slot::Succeeded(value.clone()),
                Err(error) => Slot::Failed(error.clone()),
            };
            trace!(state = %slot.state(), listeners = listeners.len(), "promise resolved");
            self.inner.resolved.notify_all();
            listeners
        };

        if !listeners.is_empty() {
            schedule(Box::new(move || deliver(listeners, outcome)));
        }
        Ok(())
    }

    /// Like [`try_resolve`](Self::try_resolve) with a success value.
    pub fn try_resolve_success(&self, value: T) -> Result<(), AlreadyResolved>
    where
        T: Clone + 'static,
    {
        self.try_resolve(Ok(value))
    }

    /// Like [`try_resolve`](Self::try_resolve) with a failure cause.
    pub fn try_resolve_failure(&self, error: impl Into<Error>) -> Result<(), AlreadyResolved>
    where
        T: Clone + 'static,
    {
        self.try_resolve(Err(error.into()))
    }

    /// Resolves the promise with `outcome`.
    ///
    /// # Panics
    /// Panics if the promise is already resolved. Resolution is a happens-once
    /// event; use [`try_resolve`](Self::try_resolve) where several resolvers race.
    pub fn resolve(&self, outcome: Result<T, Error>)
    where
        T: Clone + 'static,
    {
        if let Err(violation) = self.try_resolve(outcome) {
            error!(state = %violation.state, "attempt to resolve a promise twice");
            panic!("{violation}");
        }
    }

    /// Resolves the promise with a value.
    ///
    /// # Panics
    /// Panics if the promise is already resolved.
    ///
    /// ```should_panic
    /// # use monadic_promise::Promise;
    /// let p = Promise::unit(1);
    /// p.resolve_success(2);
    /// ```
    pub fn resolve_success(&self, value: T)
    where
        T: Clone + 'static,
    {
        self.resolve(Ok(value))
    }

    /// Resolves the promise with a failure cause.
    ///
    /// # Panics
    /// Panics if the promise is already resolved.
    pub fn resolve_failure(&self, error: impl Into<Error>)
    where
        T: Clone + 'static,
    {
        self.resolve(Err(error.into()))
    }

    /// Registers a listener.
    ///
    /// If the promise is pending, the listener is queued and runs on the resolving
    /// thread. Otherwise it runs right away, on this thread, before this returns.
    pub fn add_listener(&self, listener: Listener<T>)
    where
        T: Clone + 'static,
    {
        let outcome = {
            let mut slot = self.lock();
            match &mut *slot {
                Slot::Pending(listeners) => {
                    listeners.push(listener);
                    return;
                }
                done => done.outcome(),
            }
        };

        if let Some(outcome) = outcome {
            listener.notify(outcome);
        }
    }

    /// Registers a closure receiving the outcome, see [`add_listener`](Self::add_listener).
    pub fn on_complete<F>(&self, callback: F)
    where
        T: Clone + 'static,
        F: FnOnce(Result<T, Error>) + Send + 'static,
    {
        self.add_listener(Listener::from_fn(callback))
    }

    /// Registers a closure that runs only if the promise succeeds.
    ///
    /// ```
    /// # use monadic_promise::Promise;
    /// # use std::sync::mpsc;
    /// let (tx, rx) = mpsc::channel();
    /// let fail_tx = tx.clone();
    /// Promise::unit("page")
    ///     .on_success(move |v| tx.send(v).unwrap())
    ///     .on_failure(move |_| fail_tx.send("failed").unwrap());
    /// assert_eq!(rx.recv(), Ok("page"));
    /// assert!(rx.try_recv().is_err());
    /// ```
    pub fn on_success<F>(&self, callback: F) -> &Self
    where
        T: Clone + 'static,
        F: FnOnce(T) + Send + 'static,
    {
        self.add_listener(Listener::new(callback, |_| {}));
        self
    }

    /// Registers a closure that runs only if the promise fails.
    pub fn on_failure<F>(&self, callback: F) -> &Self
    where
        T: Clone + 'static,
        F: FnOnce(Error) + Send + 'static,
    {
        self.add_listener(Listener::new(|_| {}, callback));
        self
    }

    /// Blocks the calling thread until the promise is resolved, then returns its
    /// outcome.
    ///
    /// Any number of threads may wait at the same time; each gets a clone of the
    /// value or of the failure cause.
    ///
    /// ```
    /// # use monadic_promise::{Error, Promise};
    /// assert_eq!(Promise::unit(1).wait().unwrap(), 1);
    /// assert!(Promise::<i32>::failure(Error::msg("fail")).wait().is_err());
    /// ```
    pub fn wait(&self) -> Result<T, Error>
    where
        T: Clone,
    {
        let mut slot = self.lock();
        loop {
            if let Some(outcome) = slot.outcome() {
                return outcome;
            }
            slot = self
                .inner
                .resolved
                .wait(slot)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Returns the outcome if the promise is resolved, without blocking.
    pub fn peek(&self) -> Option<Result<T, Error>>
    where
        T: Clone,
    {
        self.lock().outcome()
    }

    /// Forwards the outcome into a fresh `oneshot` channel.
    ///
    /// The receiver can be raced against a deadline with `recv_timeout`, or
    /// `.await`ed from async code. Dropping it is harmless.
    ///
    /// ```
    /// # use monadic_promise::Promise;
    /// # use std::time::Duration;
    /// let p = Promise::<u8>::pending();
    /// let rx = p.subscribe();
    /// assert!(rx.recv_timeout(Duration::from_millis(10)).is_err());
    ///
    /// let rx = p.subscribe();
    /// p.resolve_success(9);
    /// assert_eq!(rx.recv().unwrap().unwrap(), 9);
    /// ```
    pub fn subscribe(&self) -> oneshot::Receiver<Result<T, Error>>
    where
        T: Clone + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.on_complete(move |outcome| {
            let _ = tx.send(outcome);
        });
        rx
    }
}

type Delivery = Box<dyn FnOnce()>;

thread_local! {
    // `Some` while this thread is draining deliveries.
    static DELIVERIES: RefCell<Option<VecDeque<Delivery>>> = const { RefCell::new(None) };
}

struct Draining;

impl Drop for Draining {
    fn drop(&mut self) {
        DELIVERIES.with(|queue| queue.borrow_mut().take());
    }
}

/// Runs `delivery` now, or queues it if this thread is already delivering.
///
/// A listener that resolves another promise (every combinator does) only
/// queues that promise's listeners, so chains of any length resolve in
/// constant stack depth.
fn schedule(delivery: Delivery) {
    let delivery = DELIVERIES.with(|queue| match queue.borrow_mut().as_mut() {
        Some(queue) => {
            queue.push_back(delivery);
            None
        }
        None => Some(delivery),
    });
    let Some(delivery) = delivery else {
        return;
    };

    DELIVERIES.with(|queue| *queue.borrow_mut() = Some(VecDeque::new()));
    let _draining = Draining;
    let mut next = Some(delivery);
    while let Some(delivery) = next {
        delivery();
        next = DELIVERIES.with(|queue| queue.borrow_mut().as_mut().and_then(VecDeque::pop_front));
    }
}

fn deliver<T: Clone>(listeners: Vec<Listener<T>>, outcome: Result<T, Error>) {
    let last = listeners.len().saturating_sub(1);
    let mut outcome = Some(outcome);
    for (index, listener) in listeners.into_iter().enumerate() {
        let this = if index == last {
            outcome.take()
        } else {
            outcome.clone()
        };
        if let Some(this) = this {
            // A panicking listener is logged and must not starve the ones after it.
            let _ = catch_panic("promise listener", move || listener.notify(this));
        }
    }
}

impl<T> From<Result<T, Error>> for Promise<T> {
    fn from(result: Result<T, Error>) -> Self {
        Promise::from_result(result)
    }
}

impl<T> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
