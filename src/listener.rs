//! The callback a [`Promise`](crate::Promise) notifies once with its outcome.

use std::fmt;

use crate::Error;

type Callback<T> = Box<dyn FnOnce(Result<T, Error>) + Send + 'static>;

/// A two-case callback notified with the outcome of a [`Promise`](crate::Promise).
///
/// A listener is consumed when notified, so exactly one of its two cases runs,
/// at most once.
///
/// # Example
/// ```
/// # use monadic_promise::{Listener, Promise};
/// # use std::sync::mpsc;
/// let (tx, rx) = mpsc::channel();
/// let p = Promise::<i32>::pending();
/// p.add_listener(Listener::new(
///     move |v| tx.send(v).unwrap(),
///     |e| panic!("unexpected failure: {e}"),
/// ));
/// p.resolve_success(7);
/// assert_eq!(rx.recv(), Ok(7));
/// ```
pub struct Listener<T> {
    callback: Callback<T>,
}

impl<T: 'static> Listener<T> {
    /// Builds a listener from its success and failure cases.
    pub fn new<S, F>(on_success: S, on_failure: F) -> Self
    where
        S: FnOnce(T) + Send + 'static,
        F: FnOnce(Error) + Send + 'static,
    {
        Self::from_fn(move |outcome| match outcome {
            Ok(value) => on_success(value),
            Err(error) => on_failure(error),
        })
    }

    /// Builds a listener from a single closure receiving the whole outcome.
    pub fn from_fn<F>(callback: F) -> Self
    where
        F: FnOnce(Result<T, Error>) + Send + 'static,
    {
        Listener {
            callback: Box::new(callback),
        }
    }
}

impl<T> Listener<T> {
    /// Runs the success case.
    pub fn notify_success(self, value: T) {
        self.notify(Ok(value))
    }

    /// Runs the failure case.
    pub fn notify_failure(self, error: Error) {
        self.notify(Err(error))
    }

    /// Runs whichever case matches `outcome`.
    pub fn notify(self, outcome: Result<T, Error>) {
        (self.callback)(outcome)
    }
}

impl<T> fmt::Debug for Listener<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener").finish_non_exhaustive()
    }
}
