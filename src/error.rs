//! Failure causes and the library's own error types.

use std::{
    any::Any,
    error::Error as StdError,
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};

use thiserror::Error;
use tracing::warn;

use crate::State;

/// The opaque cause carried by a failed [`Promise`](crate::Promise).
///
/// Cloning an `Error` is cheap and keeps the identity of the cause: every
/// combinator forwards the *same* cause it observed, which can be checked with
/// [`ptr_eq`](Self::ptr_eq).
///
/// Any type implementing [`std::error::Error`] converts into an `Error`, so `?`
/// works inside producer closures.
///
/// # Example
/// ```
/// # use monadic_promise::Error;
/// let e = Error::msg("404 NOT FOUND");
/// let forwarded = e.clone();
/// assert!(e.ptr_eq(&forwarded));
/// assert_eq!(forwarded.to_string(), "404 NOT FOUND");
/// ```
#[derive(Clone)]
pub struct Error {
    inner: Arc<dyn StdError + Send + Sync + 'static>,
}

#[derive(Debug, Error)]
#[error("{0}")]
struct Message(String);

impl Error {
    /// Wraps an error value as a failure cause.
    pub fn new<E>(error: E) -> Error
    where
        E: StdError + Send + Sync + 'static,
    {
        Error {
            inner: Arc::new(error),
        }
    }

    /// Creates a failure cause from a plain message.
    pub fn msg(message: impl fmt::Display) -> Error {
        Error::new(Message(message.to_string()))
    }

    /// Returns `true` if the cause is of type `E`.
    pub fn is<E: StdError + 'static>(&self) -> bool {
        self.inner.is::<E>()
    }

    /// Returns a reference to the cause if it is of type `E`.
    ///
    /// ```
    /// # use monadic_promise::{Error, PromisePanic};
    /// let e = Error::new(PromisePanic::new("boom"));
    /// assert_eq!(e.downcast_ref::<PromisePanic>().unwrap().message(), "boom");
    /// ```
    pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
        self.inner.downcast_ref::<E>()
    }

    /// Returns `true` if both values share the same underlying cause.
    pub fn ptr_eq(&self, other: &Error) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<E> From<E> for Error
where
    E: StdError + Send + Sync + 'static,
{
    fn from(error: E) -> Self {
        Error::new(error)
    }
}

impl AsRef<dyn StdError + Send + Sync + 'static> for Error {
    fn as_ref(&self) -> &(dyn StdError + Send + Sync + 'static) {
        &*self.inner
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.inner, f)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&*self.inner, f)
    }
}

/// Returned by the `try_resolve*` methods when the promise already left
/// [`State::Pending`]. The stored outcome is left untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("promise already resolved ({state})")]
pub struct AlreadyResolved {
    /// The state the promise was found in.
    pub state: State,
}

/// Failure cause used when a producer closure, or a function given to a
/// combinator, panics instead of returning.
///
/// # Example
/// ```
/// # use monadic_promise::{Promise, PromisePanic, ThreadPerTask};
/// let p = Promise::<()>::spawn(&ThreadPerTask, || panic!("boom"));
/// let err = p.wait().unwrap_err();
/// assert_eq!(err.downcast_ref::<PromisePanic>().unwrap().message(), "boom");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("promise function panicked: {message}")]
pub struct PromisePanic {
    message: String,
}

impl PromisePanic {
    /// Creates a panic cause with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        PromisePanic {
            message: message.into(),
        }
    }

    pub(crate) fn from_payload(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        PromisePanic { message }
    }

    /// The panic message, or a placeholder if the payload was not a string.
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Runs `f`, turning a panic into a [`PromisePanic`] failure.
pub(crate) fn catch_panic<R>(what: &'static str, f: impl FnOnce() -> R) -> Result<R, Error> {
    panic::catch_unwind(AssertUnwindSafe(f)).map_err(|payload| {
        let panic = PromisePanic::from_payload(payload);
        warn!(message = panic.message(), "{what} panicked");
        Error::new(panic)
    })
}

/// Failure cause of [`lift_all`](crate::lift_all) when at least one input failed.
///
/// The representative `cause` is the first failure in completion order.
#[derive(Debug, Clone, Error)]
#[error("{failed} of {total} promises failed; first at index {index}: {cause}")]
pub struct GatherError {
    index: usize,
    failed: usize,
    total: usize,
    cause: Error,
}

impl GatherError {
    pub(crate) fn new(index: usize, failed: usize, total: usize, cause: Error) -> Self {
        GatherError {
            index,
            failed,
            total,
            cause,
        }
    }

    /// Position, in the input sequence, of the first input to fail.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Number of inputs that failed.
    pub fn failed(&self) -> usize {
        self.failed
    }

    /// Number of inputs.
    pub fn total(&self) -> usize {
        self.total
    }

    /// The first observed failure, unchanged.
    pub fn cause(&self) -> &Error {
        &self.cause
    }
}
