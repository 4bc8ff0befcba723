//! Functor, monad and applicative combinators over [`Promise`].
//!
//! Every combinator allocates a fresh pending promise and drives it purely
//! through listeners on its inputs; none of them block. A user function that
//! panics fails the result with a [`PromisePanic`](crate::PromisePanic) cause.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::trace;

use crate::{error::catch_panic, Error, GatherError, Promise};

impl<T: Clone + Send + 'static> Promise<T> {
    /// Transforms the eventual value with `f` (functor map).
    ///
    /// `f` runs on the thread that resolves this promise, or right away if it is
    /// already resolved. A failure is forwarded unchanged and `f` is never called.
    ///
    /// ```
    /// # use monadic_promise::{Error, Promise};
    /// let p = Promise::unit(3).map(|v| v * 2);
    /// assert_eq!(p.wait().unwrap(), 6);
    ///
    /// let p = Promise::<i32>::failure(Error::msg("fail")).map(|_| -> i32 { unreachable!() });
    /// assert_eq!(p.wait().unwrap_err().to_string(), "fail");
    /// ```
    pub fn map<R, F>(&self, f: F) -> Promise<R>
    where
        R: Clone + Send + 'static,
        F: FnOnce(T) -> R + Send + 'static,
    {
        let result = Promise::pending();
        let resolver = result.clone();
        self.on_complete(move |outcome| {
            resolver.resolve(outcome.and_then(|value| catch_panic("map function", || f(value))))
        });
        result
    }

    /// Sequences an asynchronous step that depends on this promise's value
    /// (monadic bind).
    ///
    /// `f` is only invoked once this promise succeeds; the promise it returns
    /// decides the outcome of the result.
    ///
    /// ```
    /// # use monadic_promise::{Promise, ThreadPerTask};
    /// let p = Promise::unit(2)
    ///     .then(|v| Promise::spawn(&ThreadPerTask, move || Ok(v * 10)))
    ///     .then(|v| Promise::unit(v + 5));
    /// assert_eq!(p.wait().unwrap(), 25);
    /// ```
    pub fn then<R, F>(&self, f: F) -> Promise<R>
    where
        R: Clone + Send + 'static,
        F: FnOnce(T) -> Promise<R> + Send + 'static,
    {
        let result = Promise::pending();
        let resolver = result.clone();
        self.on_complete(move |outcome| match outcome {
            Ok(value) => match catch_panic("then function", || f(value)) {
                Ok(next) => next.relay(resolver),
                Err(error) => resolver.resolve_failure(error),
            },
            Err(error) => resolver.resolve_failure(error),
        });
        result
    }

    fn relay(&self, to: Promise<T>) {
        self.on_complete(move |outcome| to.resolve(outcome));
    }
}

impl<T: Clone + Send + 'static> Promise<Promise<T>> {
    /// Removes one level of nesting (join).
    ///
    /// ```
    /// # use monadic_promise::Promise;
    /// let nested = Promise::unit(Promise::unit("inner"));
    /// assert_eq!(nested.flatten().wait().unwrap(), "inner");
    /// ```
    pub fn flatten(&self) -> Promise<T> {
        let result = Promise::pending();
        let resolver = result.clone();
        self.on_complete(move |outcome| match outcome {
            Ok(inner) => inner.relay(resolver),
            Err(error) => resolver.resolve_failure(error),
        });
        result
    }
}

/// Function form of [`Promise::map`].
pub fn fmap<T, R, F>(f: F, promise: Promise<T>) -> Promise<R>
where
    T: Clone + Send + 'static,
    R: Clone + Send + 'static,
    F: FnOnce(T) -> R + Send + 'static,
{
    promise.map(f)
}

/// Function form of [`Promise::then`], also known as flat-map.
pub fn bind<T, R, F>(f: F, promise: Promise<T>) -> Promise<R>
where
    T: Clone + Send + 'static,
    R: Clone + Send + 'static,
    F: FnOnce(T) -> Promise<R> + Send + 'static,
{
    promise.then(f)
}

/// Function form of [`Promise::flatten`].
///
/// For any `f`, `compose(lift(f), join)` behaves like `lift_bind(f)`.
pub fn join<T>(nested: Promise<Promise<T>>) -> Promise<T>
where
    T: Clone + Send + 'static,
{
    nested.flatten()
}

/// Lifts `f: T -> R` into a function `Promise<T> -> Promise<R>` (curried [`fmap`]).
///
/// ```
/// # use monadic_promise::{lift, Promise};
/// let shout = lift(|s: String| s.to_uppercase());
/// assert_eq!(shout(Promise::unit("hi".to_string())).wait().unwrap(), "HI");
/// ```
pub fn lift<T, R, F>(f: F) -> impl Fn(Promise<T>) -> Promise<R>
where
    T: Clone + Send + 'static,
    R: Clone + Send + 'static,
    F: Fn(T) -> R + Send + Sync + 'static,
{
    let f = Arc::new(f);
    move |promise| {
        let f = Arc::clone(&f);
        promise.map(move |value| f(value))
    }
}

/// Lifts `f: T -> Promise<R>` into a function `Promise<T> -> Promise<R>`
/// (curried [`bind`]).
pub fn lift_bind<T, R, F>(f: F) -> impl Fn(Promise<T>) -> Promise<R>
where
    T: Clone + Send + 'static,
    R: Clone + Send + 'static,
    F: Fn(T) -> Promise<R> + Send + Sync + 'static,
{
    let f = Arc::new(f);
    move |promise| {
        let f = Arc::clone(&f);
        promise.then(move |value| f(value))
    }
}

fn lock<S>(mutex: &Mutex<S>) -> MutexGuard<'_, S> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Pair<A, B, F> {
    a: Option<A>,
    b: Option<B>,
    f: Option<F>,
}

impl<A, B, F> Pair<A, B, F> {
    fn take_ready(&mut self) -> Option<(A, B, F)> {
        if self.a.is_none() || self.b.is_none() {
            return None;
        }
        Some((self.a.take()?, self.b.take()?, self.f.take()?))
    }
}

fn fail_first<R: Clone + 'static>(result: &Promise<R>, error: Error) {
    if let Err(lost) = result.try_resolve_failure(error) {
        trace!(state = %lost.state, "dropping failure of a promise already combined");
    }
}

/// Combines two promises with `f` once both succeed.
///
/// The result fails as soon as either input fails, with that input's cause
/// unchanged. If both fail at nearly the same time, exactly one of the two causes
/// is delivered; which one is not specified.
///
/// ```
/// # use monadic_promise::{lift_a2, Promise, ThreadPerTask};
/// let pa = Promise::spawn(&ThreadPerTask, || Ok(3));
/// let pb = Promise::spawn(&ThreadPerTask, || Ok(4));
/// assert_eq!(lift_a2(|a, b| a + b, pa, pb).wait().unwrap(), 7);
/// ```
pub fn lift_a2<A, B, R, F>(f: F, pa: Promise<A>, pb: Promise<B>) -> Promise<R>
where
    A: Clone + Send + 'static,
    B: Clone + Send + 'static,
    R: Clone + Send + 'static,
    F: FnOnce(A, B) -> R + Send + 'static,
{
    let result = Promise::pending();
    let pair = Arc::new(Mutex::new(Pair {
        a: None,
        b: None,
        f: Some(f),
    }));

    {
        let pair = Arc::clone(&pair);
        let result = result.clone();
        pa.on_complete(move |outcome| match outcome {
            Ok(a) => {
                let ready = {
                    let mut pair = lock(&pair);
                    pair.a = Some(a);
                    pair.take_ready()
                };
                if let Some((a, b, f)) = ready {
                    result.resolve(catch_panic("lift_a2 function", || f(a, b)));
                }
            }
            Err(error) => fail_first(&result, error),
        });
    }
    {
        let result = result.clone();
        pb.on_complete(move |outcome| match outcome {
            Ok(b) => {
                let ready = {
                    let mut pair = lock(&pair);
                    pair.b = Some(b);
                    pair.take_ready()
                };
                if let Some((a, b, f)) = ready {
                    result.resolve(catch_panic("lift_a2 function", || f(a, b)));
                }
            }
            Err(error) => fail_first(&result, error),
        });
    }

    result
}

/// Lifts `f: (A, B) -> R` into a function over two promises (curried [`lift_a2`]).
pub fn lift2<A, B, R, F>(f: F) -> impl Fn(Promise<A>, Promise<B>) -> Promise<R>
where
    A: Clone + Send + 'static,
    B: Clone + Send + 'static,
    R: Clone + Send + 'static,
    F: Fn(A, B) -> R + Send + Sync + 'static,
{
    let f = Arc::new(f);
    move |pa, pb| {
        let f = Arc::clone(&f);
        lift_a2(move |a, b| f(a, b), pa, pb)
    }
}

struct Gather<T, F> {
    values: Vec<Option<T>>,
    remaining: usize,
    failed: usize,
    first_failure: Option<(usize, Error)>,
    f: Option<F>,
}

enum Gathered<T, F> {
    Succeeded(Vec<T>, F),
    Failed(GatherError),
}

impl<T, F> Gather<T, F> {
    fn new(total: usize, f: F) -> Self {
        Gather {
            values: (0..total).map(|_| None).collect(),
            remaining: total,
            failed: 0,
            first_failure: None,
            f: Some(f),
        }
    }

    /// Records one input's outcome; returns the combined outcome once the last
    /// input has reported.
    fn record(&mut self, index: usize, outcome: Result<T, Error>) -> Option<Gathered<T, F>> {
        match outcome {
            Ok(value) => self.values[index] = Some(value),
            Err(error) => {
                self.failed += 1;
                if self.first_failure.is_none() {
                    self.first_failure = Some((index, error));
                }
            }
        }
        self.remaining -= 1;
        if self.remaining > 0 {
            return None;
        }

        let total = self.values.len();
        match self.first_failure.take() {
            Some((index, cause)) => Some(Gathered::Failed(GatherError::new(
                index,
                self.failed,
                total,
                cause,
            ))),
            None => {
                let values = self.values.drain(..).flatten().collect();
                Some(Gathered::Succeeded(values, self.f.take()?))
            }
        }
    }
}

/// Waits for every promise in `promises`, then applies `f` to their values in
/// input order (scatter-gather).
///
/// If any input fails, the result fails with a [`GatherError`] once all inputs
/// have resolved. Its [`cause`](GatherError::cause) is the first failure *in
/// completion order*, not in input order. An empty input resolves immediately
/// with `f(vec![])`.
///
/// ```
/// # use monadic_promise::{lift_all, Promise};
/// let pages = vec![Promise::unit("Hello world"), Promise::unit("Fava")];
/// let joined = lift_all(|pages: Vec<&str>| pages.join(","), pages);
/// assert_eq!(joined.wait().unwrap(), "Hello world,Fava");
///
/// let empty = lift_all(|pages: Vec<&str>| pages.join(","), Vec::new());
/// assert_eq!(empty.wait().unwrap(), "");
/// ```
pub fn lift_all<T, R, F, I>(f: F, promises: I) -> Promise<R>
where
    T: Clone + Send + 'static,
    R: Clone + Send + 'static,
    F: FnOnce(Vec<T>) -> R + Send + 'static,
    I: IntoIterator<Item = Promise<T>>,
{
    let promises: Vec<Promise<T>> = promises.into_iter().collect();
    let total = promises.len();
    if total == 0 {
        return Promise::from_result(catch_panic("lift_all function", || f(Vec::new())));
    }

    let result = Promise::pending();
    let gather = Arc::new(Mutex::new(Gather::new(total, f)));
    for (index, promise) in promises.iter().enumerate() {
        let gather = Arc::clone(&gather);
        let result = result.clone();
        promise.on_complete(move |outcome| {
            let gathered = lock(&gather).record(index, outcome);
            match gathered {
                Some(Gathered::Succeeded(values, f)) => {
                    result.resolve(catch_panic("lift_all function", || f(values)))
                }
                Some(Gathered::Failed(error)) => result.resolve_failure(error),
                None => {}
            }
        });
    }
    result
}

/// Lifts `f: Vec<T> -> R` into a function over a list of promises (curried
/// [`lift_all`]).
pub fn lift_list<T, R, F>(f: F) -> impl Fn(Vec<Promise<T>>) -> Promise<R>
where
    T: Clone + Send + 'static,
    R: Clone + Send + 'static,
    F: Fn(Vec<T>) -> R + Send + Sync + 'static,
{
    let f = Arc::new(f);
    move |promises| {
        let f = Arc::clone(&f);
        lift_all(move |values| f(values), promises)
    }
}
