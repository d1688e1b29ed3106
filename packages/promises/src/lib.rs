//! Single-assignment, multicast promise cells.
//!
//! A [`Promise<T>`] is a cell that resolves at most once - to a value, to an
//! empty completion, or to an error - and caches that resolution forever.
//! Producers resolve it through push-style callbacks; any number of
//! consumers observe it, whether they attach before or after resolution,
//! and late consumers are served from the cache without re-driving the
//! producer. Blocking and non-blocking accessors ([`Promise::get`] and
//! [`Promise::peek`]) cover callers that do not want the callback surface.
//!
//! A cell can also wrap an upstream [`Source`]. The source is subscribed
//! lazily when the first consumer attaches, and the cell forwards exactly
//! one unit of demand upstream over its whole lifetime, however many
//! consumers show up and however their demand interleaves with the
//! subscription handshake.
//!
//! All entry points are non-blocking and lock-free; concurrent signals are
//! serialized through an internal drain loop, so any mix of producers,
//! consumers and cancellation can race freely.
//!
//! # Direct resolution
//!
//! ```rust
//! use promises::Promise;
//!
//! let cell = Promise::<String>::new();
//! cell.on_next("ready".to_string());
//!
//! assert_eq!(cell.peek().unwrap(), Some("ready".to_string()));
//! ```
//!
//! # Blocking across threads
//!
//! ```rust
//! use std::sync::Arc;
//! use std::thread;
//! use std::time::Duration;
//!
//! use promises::Promise;
//!
//! let cell = Promise::<u32>::new();
//!
//! let resolver = {
//!     let cell = Arc::clone(&cell);
//!     thread::spawn(move || cell.on_next(42))
//! };
//!
//! let value = cell.get(Duration::from_secs(5)).unwrap();
//! assert_eq!(value, Some(42));
//! # resolver.join().unwrap();
//! ```

mod constants;
mod diagnostics;
mod error;
mod promise;
mod protocol;
mod relay;
pub mod terminal;

#[cfg(test)]
mod test_utils;

pub use error::{Error, InvalidDemand};
pub use promise::Promise;
pub use protocol::{ResolveError, Source, Subscriber, Subscription};
pub use relay::ReplayRelay;
