//! Recording doubles shared by the in-crate tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::constants::ERR_POISONED_LOCK;
use crate::protocol::{ResolveError, Source, Subscriber, Subscription};

/// Builds an erased error with the given display text.
pub(crate) fn text_error(message: &str) -> ResolveError {
    Arc::new(std::io::Error::other(message.to_string()))
}

struct Recorded<T> {
    subscription: Option<Arc<dyn Subscription>>,
    values: Vec<T>,
    completed: bool,
    error: Option<ResolveError>,
}

impl<T> Default for Recorded<T> {
    fn default() -> Self {
        Self {
            subscription: None,
            values: Vec::new(),
            completed: false,
            error: None,
        }
    }
}

/// A subscriber that records every signal it receives.
///
/// The auto-requesting flavor models the common consumer that wants the
/// outcome immediately; the manual flavor withholds demand so tests can
/// steer it.
pub(crate) struct RecordingSubscriber<T> {
    auto_request: bool,
    recorded: Mutex<Recorded<T>>,
}

impl<T> RecordingSubscriber<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// A subscriber that requests one unit of demand as soon as it is
    /// handed a subscription.
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            auto_request: true,
            recorded: Mutex::new(Recorded::default()),
        })
    }

    /// A subscriber that signals no demand until told to.
    pub(crate) fn manual() -> Arc<Self> {
        Arc::new(Self {
            auto_request: false,
            recorded: Mutex::new(Recorded::default()),
        })
    }

    pub(crate) fn values(&self) -> Vec<T> {
        self.recorded.lock().expect(ERR_POISONED_LOCK).values.clone()
    }

    pub(crate) fn is_completed(&self) -> bool {
        self.recorded.lock().expect(ERR_POISONED_LOCK).completed
    }

    pub(crate) fn error(&self) -> Option<ResolveError> {
        self.recorded
            .lock()
            .expect(ERR_POISONED_LOCK)
            .error
            .as_ref()
            .map(Arc::clone)
    }

    pub(crate) fn saw_subscription(&self) -> bool {
        self.recorded
            .lock()
            .expect(ERR_POISONED_LOCK)
            .subscription
            .is_some()
    }

    fn subscription(&self) -> Arc<dyn Subscription> {
        self.recorded
            .lock()
            .expect(ERR_POISONED_LOCK)
            .subscription
            .as_ref()
            .map(Arc::clone)
            .expect("test subscriber was never handed a subscription")
    }

    /// Forwards demand through the recorded subscription.
    pub(crate) fn request(&self, demand: u64) {
        self.subscription().request(demand);
    }

    /// Cancels through the recorded subscription.
    pub(crate) fn cancel(&self) {
        self.subscription().cancel();
    }
}

impl<T> Subscriber<T> for RecordingSubscriber<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
        {
            let mut recorded = self.recorded.lock().expect(ERR_POISONED_LOCK);
            recorded.subscription = Some(Arc::clone(&subscription));
        }
        // Request outside the lock; the subscription may signal back
        // synchronously.
        if self.auto_request {
            subscription.request(1);
        }
    }

    fn on_next(&self, value: T) {
        self.recorded
            .lock()
            .expect(ERR_POISONED_LOCK)
            .values
            .push(value);
    }

    fn on_complete(&self) {
        self.recorded.lock().expect(ERR_POISONED_LOCK).completed = true;
    }

    fn on_error(&self, cause: ResolveError) {
        self.recorded.lock().expect(ERR_POISONED_LOCK).error = Some(cause);
    }
}

/// A subscription that only counts how it is driven.
#[derive(Debug, Default)]
pub(crate) struct ProbeSubscription {
    request_calls: AtomicUsize,
    cancel_calls: AtomicUsize,
}

impl ProbeSubscription {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// How many times `request` was called, regardless of demand amount.
    pub(crate) fn request_calls(&self) -> usize {
        self.request_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn cancel_calls(&self) -> usize {
        self.cancel_calls.load(Ordering::SeqCst)
    }
}

impl Subscription for ProbeSubscription {
    fn request(&self, _demand: u64) {
        self.request_calls.fetch_add(1, Ordering::SeqCst);
    }

    fn cancel(&self) {
        self.cancel_calls.fetch_add(1, Ordering::SeqCst);
    }
}

/// A source under test control: it hands out one probe subscription and
/// emits only when told to.
pub(crate) struct ProbeSource<T> {
    subscription: Arc<ProbeSubscription>,
    subscriber: Mutex<Option<Arc<dyn Subscriber<T>>>>,
    subscribe_calls: AtomicUsize,
}

impl<T> ProbeSource<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub(crate) fn new() -> Self {
        Self {
            subscription: Arc::new(ProbeSubscription::new()),
            subscriber: Mutex::new(None),
            subscribe_calls: AtomicUsize::new(0),
        }
    }

    /// The probe handle this source hands to its subscriber.
    pub(crate) fn subscription(&self) -> Arc<ProbeSubscription> {
        Arc::clone(&self.subscription)
    }

    pub(crate) fn is_subscribed(&self) -> bool {
        self.subscriber
            .lock()
            .expect(ERR_POISONED_LOCK)
            .is_some()
    }

    pub(crate) fn subscribe_calls(&self) -> usize {
        self.subscribe_calls.load(Ordering::SeqCst)
    }

    /// Pushes a value to the current subscriber, dropping the retained
    /// handle afterwards so the production is plainly over.
    pub(crate) fn emit(&self, value: T) {
        let subscriber = self
            .subscriber
            .lock()
            .expect(ERR_POISONED_LOCK)
            .take()
            .expect("probe source has no subscriber to emit to");
        subscriber.on_next(value);
    }
}

impl<T> Source<T> for ProbeSource<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<T>>) {
        self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
        *self.subscriber.lock().expect(ERR_POISONED_LOCK) = Some(Arc::clone(&subscriber));
        subscriber.on_subscribe(Arc::clone(&self.subscription) as _);
    }
}
