//! The push-based streaming protocol spoken between sources, cells and consumers.
//!
//! The protocol follows the usual request/backpressure handshake: a producer
//! hands a [`Subscription`] to a [`Subscriber`], the subscriber signals demand
//! through it, and the producer pushes at most that many values before the
//! terminal `on_complete`/`on_error` signal.

use std::error::Error;
use std::sync::Arc;

/// Shared, immutable failure cause delivered through the streaming protocol.
///
/// An error signal fans out to any number of consumers, before or after they
/// attach, so the cause is held behind an [`Arc`] instead of being consumed
/// by the first observer.
pub type ResolveError = Arc<dyn Error + Send + Sync>;

/// The pull side of the protocol: demand and cancellation for one subscriber.
pub trait Subscription: Send + Sync {
    /// Signals readiness to receive `demand` more values.
    ///
    /// Zero is not valid demand. How a violation is surfaced is up to the
    /// implementor; it is never silently treated as demand.
    fn request(&self, demand: u64);

    /// Abandons the subscription.
    ///
    /// No further signals are wanted. Producers must stop referencing the
    /// subscriber as soon as practical; cancelling twice is harmless.
    fn cancel(&self);
}

/// The push side of the protocol: callbacks a consumer receives.
///
/// `on_subscribe` is always the first signal. After it, a well-behaved
/// producer delivers at most the requested number of `on_next` signals
/// followed by exactly one of `on_complete` or `on_error`, and nothing after
/// that.
pub trait Subscriber<T>: Send + Sync {
    /// Hands the subscriber the handle through which it drives demand.
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>);

    /// Delivers one value.
    fn on_next(&self, value: T);

    /// Signals that no further values will arrive.
    fn on_complete(&self);

    /// Signals failure; terminal like `on_complete`.
    fn on_error(&self, cause: ResolveError);
}

/// A push producer that emits at most one value followed by completion, or
/// an error, or nothing before completion.
///
/// A source is single-subscription: a second concurrent `subscribe` attempt
/// must be rejected by cancelling the offered subscription rather than by
/// serving two subscribers. Sources must honor cancellation and should drop
/// their subscriber reference once a terminal signal has been delivered.
pub trait Source<T>: Send + Sync {
    /// Starts production for the given subscriber.
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<T>>);
}
