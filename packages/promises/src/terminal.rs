//! One-shot adapters for subscribers attaching to an already-terminal cell.
//!
//! These keep late subscription on a resolved cell free of any interaction
//! with the multicast relay: the subscriber is completed, failed or handed a
//! single cached value directly.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use crate::diagnostics;
use crate::protocol::{ResolveError, Subscriber, Subscription};

/// A subscription that never produces anything.
///
/// Handed to subscribers that receive their terminal signal immediately, so
/// that the `on_subscribe`-first protocol contract still holds. Demand and
/// cancellation are both no-ops.
#[derive(Debug)]
pub struct EmptySubscription;

impl Subscription for EmptySubscription {
    fn request(&self, _demand: u64) {}

    fn cancel(&self) {}
}

/// Immediately completes `subscriber` with no value.
pub fn complete<T>(subscriber: &Arc<dyn Subscriber<T>>) {
    subscriber.on_subscribe(Arc::new(EmptySubscription));
    subscriber.on_complete();
}

/// Immediately fails `subscriber` with `cause`.
pub fn error<T>(subscriber: &Arc<dyn Subscriber<T>>, cause: ResolveError) {
    subscriber.on_subscribe(Arc::new(EmptySubscription));
    subscriber.on_error(cause);
}

const SCALAR_READY: u8 = 0;
const SCALAR_EMITTED: u8 = 1;
const SCALAR_CANCELLED: u8 = 2;

/// A subscription over one cached value: the first positive demand emits the
/// value and completes the subscriber, after which the subscription is spent.
///
/// Cancelling before the first request suppresses emission entirely.
pub struct ScalarSubscription<T>
where
    T: Clone + Send + Sync + 'static,
{
    subscriber: Arc<dyn Subscriber<T>>,
    value: T,
    once: AtomicU8,
}

impl<T> ScalarSubscription<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Creates a subscription that will emit `value` to `subscriber` on
    /// first demand.
    #[must_use]
    pub fn new(subscriber: Arc<dyn Subscriber<T>>, value: T) -> Self {
        Self {
            subscriber,
            value,
            once: AtomicU8::new(SCALAR_READY),
        }
    }
}

impl<T> Subscription for ScalarSubscription<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn request(&self, demand: u64) {
        if demand == 0 {
            // The owning cell is already terminal; nothing to escalate to.
            diagnostics::invalid_demand(demand);
            return;
        }

        if self
            .once
            .compare_exchange(
                SCALAR_READY,
                SCALAR_EMITTED,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
        {
            self.subscriber.on_next(self.value.clone());
            self.subscriber.on_complete();
        }
    }

    fn cancel(&self) {
        // Losing the race to `request` means the value was already emitted;
        // there is nothing to undo.
        #[expect(
            clippy::let_underscore_must_use,
            reason = "the outcome of the cancellation race is irrelevant either way"
        )]
        let _ = self.once.compare_exchange(
            SCALAR_READY,
            SCALAR_CANCELLED,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }
}

impl<T> fmt::Debug for ScalarSubscription<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScalarSubscription")
            .field("once", &self.once.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}
