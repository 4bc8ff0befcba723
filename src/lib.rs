//!
//! # Monadic promises for Rust
//!
//! This crate provides a thread-safe, single-assignment [`Promise`] with listener-based
//! notification and a small composition algebra over it.
//!
//! ## Features
//! - Resolve-once state machine, checked at runtime: a second resolution panics
//!   (or is reported by the `try_resolve*` family)
//! - Listeners run in registration order, never under the promise's lock
//! - Any number of threads may block in [`Promise::wait`]
//! - Functor/monad combinators: [`Promise::map`], [`Promise::then`], [`Promise::flatten`]
//! - Parallel combinators: [`lift_a2`] (first failure wins) and [`lift_all`] (scatter-gather)
//! - Producer work runs on an [`Executor`] that the caller owns
//!
//! ## Example
//! ```
//! use monadic_promise::{lift_a2, Promise, ThreadPool};
//!
//! let pool = ThreadPool::new(4).unwrap();
//! let a = Promise::spawn(&pool, || Ok(3));
//! let b = Promise::spawn(&pool, || Ok(4)).map(|v| v * 10);
//! assert_eq!(lift_a2(|a, b| a + b, a, b).wait().unwrap(), 43);
//! ```
//!
//! ## Error Handling
//! A failed promise carries an opaque [`Error`]. Combinators forward it unchanged and
//! never call user functions once a failure is observed upstream. A producer that
//! panics resolves its promise with a [`PromisePanic`] cause.
//!
//! ## Laws
//! With [`identity`] and left-to-right [`compose`]:
//! - `lift(identity)` behaves as `identity`
//! - `lift(compose(f, g))` behaves as `compose(lift(f), lift(g))`
//! - `compose(lift(f), join)` behaves as `lift_bind(f)`

#![warn(missing_docs)]


mod combinators;
mod error;
mod executor;
mod func;
mod listener;
mod promise;

pub use combinators::{bind, fmap, join, lift, lift2, lift_a2, lift_all, lift_bind, lift_list};
pub use error::{AlreadyResolved, Error, GatherError, PromisePanic};
pub use executor::{spawn_batch, Builder, Executor, Job, PoolError, ThreadPerTask, ThreadPool};
pub use func::{compose, identity};
pub use listener::Listener;
pub use promise::{Promise, State};
