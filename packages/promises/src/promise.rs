//! The resolvable cell at the heart of the crate.

use std::fmt;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::thread;
use std::time::{Duration, Instant};

use arc_swap::{ArcSwap, ArcSwapOption};

use crate::constants::{ERR_CAUSE_MISSING, ERR_CELL_DETACHED, ERR_VALUE_MISSING};
use crate::error::{Error, InvalidDemand};
use crate::protocol::{ResolveError, Source, Subscriber, Subscription};
use crate::relay::ReplayRelay;
use crate::{diagnostics, terminal};

/// Lifecycle of a cell. Stored as a `u8` so every transition is a single
/// compare-and-swap; exactly one of any set of concurrent attempts wins.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Ready = 0,
    Subscribed = 1,
    PostSubscribed = 2,
    ResolvedValue = 3,
    ResolvedEmpty = 4,
    Errored = 5,
    Cancelled = 6,
}

impl State {
    fn from_raw(raw: u8) -> Self {
        match raw {
            0 => Self::Ready,
            1 => Self::Subscribed,
            2 => Self::PostSubscribed,
            3 => Self::ResolvedValue,
            4 => Self::ResolvedEmpty,
            5 => Self::Errored,
            6 => Self::Cancelled,
            _ => unreachable!("state field only ever holds values written from this enum"),
        }
    }

    /// Value, empty or error: the states that cache a resolution forever.
    /// Cancellation is terminal too but caches nothing.
    fn is_resolved(self) -> bool {
        matches!(
            self,
            Self::ResolvedValue | Self::ResolvedEmpty | Self::Errored
        )
    }

    /// Still accepting transitions.
    fn is_live(self) -> bool {
        matches!(self, Self::Ready | Self::Subscribed | Self::PostSubscribed)
    }
}

// The 3-valued counter coordinating the single upstream `request(1)`,
// whichever of the upstream-subscribe and downstream-request calls lands
// first.
const REQUESTED_NONE: u8 = 0;
const REQUESTED_PENDING: u8 = 1;
const REQUESTED_FORWARDED: u8 = 2;

/// Polling interval of the bounded blocking wait. An implementation detail,
/// not a contract; callers needing low-latency blocking should layer their
/// own condition variable on top of `subscribe`.
const POLL_INTERVAL: Duration = Duration::from_millis(1);

// `arc-swap` slots need a sized payload, so the dyn handle gets one wrapper
// layer.
struct UpstreamHandle {
    subscription: Arc<dyn Subscription>,
}

enum RelaySlot<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// No consumer has attached yet; the relay is created on first subscribe.
    Empty,
    Live(Arc<ReplayRelay<T>>),
    /// Installed by the drain loop exactly when the terminal handoff happens
    /// (or when cancellation releases the upstream). Absorbs every later
    /// terminal or cancellation attempt.
    Sentinel,
}

/// A single-assignment, multicast promise cell.
///
/// A cell resolves at most once - to a value, to an empty completion, or to
/// an error - and caches that resolution forever. Any number of consumers
/// can [`subscribe`][Promise::subscribe] before or after resolution;
/// consumers attaching late observe the cached outcome without re-driving
/// the upstream source. Non-streaming callers can use the blocking
/// [`get`][Promise::get] and non-blocking [`peek`][Promise::peek] accessors
/// instead.
///
/// A cell can stand alone, resolved directly through its producer-side
/// callbacks, or wrap a [`Source`] that is subscribed lazily when the first
/// consumer attaches.
///
/// All producer and consumer entry points are non-blocking and lock-free;
/// concurrent signals are serialized through an internal drain loop rather
/// than a mutex.
///
/// # Example
///
/// ```rust
/// use promises::Promise;
///
/// let cell = Promise::<String>::new();
/// cell.on_next("ready".to_string());
///
/// // Late observers see the cached resolution.
/// assert_eq!(cell.peek().unwrap(), Some("ready".to_string()));
/// ```
pub struct Promise<T>
where
    T: Clone + Send + Sync + 'static,
{
    state: AtomicU8,

    /// Pending-signals counter serializing the drain loop; not a domain
    /// value. Whoever moves it from zero runs the drain, everyone else
    /// relies on the running drain observing their signal.
    wip: AtomicUsize,

    requested: AtomicU8,
    value: OnceLock<T>,
    error: OnceLock<ResolveError>,
    source: Option<Arc<dyn Source<T>>>,
    upstream: ArcSwapOption<UpstreamHandle>,
    relay: ArcSwap<RelaySlot<T>>,

    /// The one sentinel instance this cell ever installs, pre-allocated so
    /// the drain loop does not allocate.
    sentinel: Arc<RelaySlot<T>>,

    /// The cell hands itself out as a subscription (to the relay) and as a
    /// subscriber (to the source); both need an owning handle to `self`.
    weak_self: Weak<Self>,
}

impl<T> Promise<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Creates a cell with no upstream source.
    ///
    /// The cell is resolved directly through [`on_next`][Self::on_next],
    /// [`on_complete`][Self::on_complete] or [`on_error`][Self::on_error].
    #[must_use]
    pub fn new() -> Arc<Self> {
        Self::build(None)
    }

    /// Creates a cell bound to an upstream source.
    ///
    /// The source is subscribed lazily: the first consumer to attach
    /// triggers the cell's own subscription to it, and the cell forwards
    /// exactly one unit of demand upstream over its whole lifetime.
    #[must_use]
    pub fn from_source(source: Arc<dyn Source<T>>) -> Arc<Self> {
        Self::build(Some(source))
    }

    fn build(source: Option<Arc<dyn Source<T>>>) -> Arc<Self> {
        Arc::new_cyclic(|weak_self| Self {
            state: AtomicU8::new(State::Ready as u8),
            wip: AtomicUsize::new(0),
            requested: AtomicU8::new(REQUESTED_NONE),
            value: OnceLock::new(),
            error: OnceLock::new(),
            source,
            upstream: ArcSwapOption::empty(),
            relay: ArcSwap::from_pointee(RelaySlot::Empty),
            sentinel: Arc::new(RelaySlot::Sentinel),
            weak_self: weak_self.clone(),
        })
    }

    fn load_state(&self) -> State {
        State::from_raw(self.state.load(Ordering::Acquire))
    }

    fn transition(&self, from: State, to: State) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// CAS-retries into a resolution state from whichever live state is
    /// observed; returns `false` if another signal already made the cell
    /// terminal.
    fn try_resolve(&self, target: State) -> bool {
        let mut observed = self.load_state();
        loop {
            if !observed.is_live() {
                return false;
            }
            match self.state.compare_exchange(
                observed as u8,
                target as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(raw) => observed = State::from_raw(raw),
            }
        }
    }

    /// Marks pending work and, if this call moved the counter off zero,
    /// runs the drain loop. Everyone else trusts the already-running drain.
    #[cfg_attr(test, mutants::skip)] // Serialization primitive - tampering hangs the test suite.
    fn nudge(&self) {
        if self.wip.fetch_add(1, Ordering::AcqRel) == 0 {
            self.drain();
        }
    }

    /// The only place terminal broadcast, upstream cancellation and the
    /// request handshake actually execute. Never runs on two threads at
    /// once; see [`nudge`][Self::nudge].
    #[cfg_attr(test, mutants::skip)] // Serialization primitive - tampering hangs the test suite.
    fn drain(&self) {
        let mut missed: usize = 1;
        loop {
            let state = self.load_state();

            if state.is_resolved() {
                let previous = self.relay.swap(Arc::clone(&self.sentinel));
                if let RelaySlot::Live(relay) = previous.as_ref() {
                    match state {
                        State::ResolvedEmpty => relay.on_complete(),
                        State::ResolvedValue => {
                            relay.on_next(self.value.get().cloned().expect(ERR_VALUE_MISSING));
                            relay.on_complete();
                        }
                        State::Errored => {
                            relay.on_error(Arc::clone(self.error.get().expect(ERR_CAUSE_MISSING)));
                        }
                        _ => unreachable!("resolved states are matched exhaustively above"),
                    }
                    // The relay now owns the outcome; this cell's drain is
                    // done forever.
                    return;
                }
            }

            if let Some(upstream) = self.upstream.load_full() {
                if state == State::Cancelled {
                    let previous = self.relay.swap(Arc::clone(&self.sentinel));
                    if !matches!(previous.as_ref(), RelaySlot::Sentinel) {
                        self.upstream.store(None);
                        upstream.subscription.cancel();
                        return;
                    }
                }

                if self.requested.load(Ordering::Acquire) == REQUESTED_PENDING
                    && self
                        .requested
                        .compare_exchange(
                            REQUESTED_PENDING,
                            REQUESTED_FORWARDED,
                            Ordering::AcqRel,
                            Ordering::Acquire,
                        )
                        .is_ok()
                {
                    upstream.subscription.request(1);
                }
            }

            if state == State::Subscribed && self.transition(State::Subscribed, State::PostSubscribed)
            {
                let slot = self.relay.load_full();
                if let RelaySlot::Live(relay) = slot.as_ref() {
                    let cell: Arc<dyn Subscription> =
                        self.weak_self.upgrade().expect(ERR_CELL_DETACHED);
                    relay.on_subscribe(cell);
                }
            }

            let remaining = self
                .wip
                .fetch_sub(missed, Ordering::AcqRel)
                .checked_sub(missed)
                .expect("pending-signals counter still owes the signals this drain pass consumed");
            if remaining == 0 {
                return;
            }
            missed = remaining;
        }
    }

    /// Shared terminal-transition path of `on_next` and `on_complete`; the
    /// two differ only in target state and payload.
    fn settle(&self, value: Option<T>) {
        let upstream = self.upstream.load_full();

        let target = match value {
            Some(value) => {
                // A value is legitimate only if a subscription was actually
                // established (when a source exists) and none was recorded
                // yet.
                if (self.source.is_some() && upstream.is_none()) || self.value.get().is_some() {
                    diagnostics::value_dropped::<T>();
                    return;
                }
                if self.value.set(value).is_err() {
                    diagnostics::value_dropped::<T>();
                    return;
                }
                // Single-value contract: no further values are wanted. The
                // swap claims the handle, so the cancel happens at most
                // once however this races with other release paths.
                if let Some(upstream) = self.upstream.swap(None) {
                    upstream.subscription.cancel();
                }
                State::ResolvedValue
            }
            None => {
                self.upstream.store(None);
                State::ResolvedEmpty
            }
        };

        if !self.try_resolve(target) {
            if target == State::ResolvedValue {
                diagnostics::value_dropped::<T>();
            }
            return;
        }
        self.nudge();
    }

    /// Receives the upstream subscription handle from the bound source.
    ///
    /// A second concurrent subscription attempt violates the protocol; it
    /// is cancelled and reported, and the first subscription is kept.
    /// Accepting a subscription eagerly forwards the cell's single unit of
    /// upstream demand.
    pub fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
        let upstream = Arc::new(UpstreamHandle { subscription });
        let previous = self
            .upstream
            .compare_and_swap(&None::<Arc<UpstreamHandle>>, Some(Arc::clone(&upstream)));
        if previous.is_some() {
            diagnostics::duplicate_upstream();
            upstream.subscription.cancel();
            return;
        }

        if self.transition(State::Ready, State::Subscribed)
            && self.requested.swap(REQUESTED_FORWARDED, Ordering::AcqRel) != REQUESTED_FORWARDED
        {
            upstream.subscription.request(1);
        }
        self.nudge();
    }

    /// Delivers the value that resolves this cell.
    ///
    /// A value arriving after resolution, or from a source the cell never
    /// actually subscribed to, is discarded and reported to the diagnostic
    /// drop sink rather than corrupting the cached outcome.
    pub fn on_next(&self, value: T) {
        self.settle(Some(value));
    }

    /// Resolves this cell to an empty completion.
    pub fn on_complete(&self) {
        self.settle(None);
    }

    /// Resolves this cell to an error.
    ///
    /// Late or illegitimate error signals are dropped the same way late
    /// values are.
    pub fn on_error(&self, cause: ResolveError) {
        let upstream = self.upstream.load_full();
        if (self.source.is_some() && upstream.is_none()) || self.error.get().is_some() {
            diagnostics::error_dropped(&cause);
            return;
        }
        if self.error.set(Arc::clone(&cause)).is_err() {
            diagnostics::error_dropped(&cause);
            return;
        }
        self.upstream.store(None);

        if !self.try_resolve(State::Errored) {
            diagnostics::error_dropped(&cause);
            return;
        }
        self.nudge();
    }

    /// Signals consumer demand through the cell.
    ///
    /// However many consumers call this and however it interleaves with the
    /// upstream subscription being established, the source receives
    /// `request(1)` at most once. Zero demand is a backpressure protocol
    /// violation and resolves the cell itself to an [`InvalidDemand`] error.
    pub fn request(&self, demand: u64) {
        if demand > 0 {
            let recorded = self
                .requested
                .compare_exchange(
                    REQUESTED_NONE,
                    REQUESTED_PENDING,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok();
            if !recorded {
                // Demand was already recorded; if the upstream handle is in
                // place by now, this call may be the one that forwards it.
                if let Some(upstream) = self.upstream.load_full() {
                    if self
                        .requested
                        .compare_exchange(
                            REQUESTED_PENDING,
                            REQUESTED_FORWARDED,
                            Ordering::AcqRel,
                            Ordering::Acquire,
                        )
                        .is_ok()
                    {
                        upstream.subscription.request(1);
                    }
                }
            }
        } else {
            self.on_error(Arc::new(InvalidDemand::new(demand)));
        }
        self.nudge();
    }

    /// Cancels the cell.
    ///
    /// Cancelling a pending cell releases the upstream subscription and
    /// stops the cell from ever resolving; consumers already attached do
    /// not receive a terminal signal on this path (cancellation is
    /// consumer-driven, not a broadcast event). Cancelling after resolution
    /// is a no-op.
    pub fn cancel(&self) {
        let mut observed = self.load_state();
        loop {
            if !observed.is_live() {
                return;
            }
            match self.state.compare_exchange(
                observed as u8,
                State::Cancelled as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(raw) => observed = State::from_raw(raw),
            }
        }
        self.nudge();
    }

    /// Attaches a downstream consumer.
    ///
    /// May be called any number of times, concurrently, before or after
    /// resolution. On an already-resolved cell the consumer is served
    /// directly from the cache - no relay, no upstream interaction. On a
    /// pending cell the consumer joins the multicast relay; the first
    /// attach is also what subscribes the cell to its source, if it has
    /// one.
    ///
    /// # Example
    ///
    /// ```rust
    /// use std::sync::{Arc, Mutex};
    ///
    /// use promises::{Promise, ResolveError, Subscriber, Subscription};
    ///
    /// struct Collect {
    ///     seen: Mutex<Vec<String>>,
    /// }
    ///
    /// impl Subscriber<String> for Collect {
    ///     fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
    ///         subscription.request(1);
    ///     }
    ///
    ///     fn on_next(&self, value: String) {
    ///         self.seen.lock().unwrap().push(value);
    ///     }
    ///
    ///     fn on_complete(&self) {}
    ///
    ///     fn on_error(&self, _cause: ResolveError) {}
    /// }
    ///
    /// let cell = Promise::<String>::new();
    /// let collector = Arc::new(Collect {
    ///     seen: Mutex::new(Vec::new()),
    /// });
    /// cell.subscribe(Arc::clone(&collector) as _);
    ///
    /// cell.on_next("ready".to_string());
    /// assert_eq!(
    ///     collector.seen.lock().unwrap().as_slice(),
    ///     ["ready".to_string()]
    /// );
    /// ```
    pub fn subscribe(&self, subscriber: Arc<dyn Subscriber<T>>) {
        loop {
            match self.load_state() {
                State::ResolvedEmpty => {
                    terminal::complete(&subscriber);
                    return;
                }
                State::ResolvedValue => {
                    let value = self.value.get().cloned().expect(ERR_VALUE_MISSING);
                    let scalar = terminal::ScalarSubscription::new(Arc::clone(&subscriber), value);
                    subscriber.on_subscribe(Arc::new(scalar));
                    return;
                }
                State::Errored => {
                    let cause = Arc::clone(self.error.get().expect(ERR_CAUSE_MISSING));
                    terminal::error(&subscriber, cause);
                    return;
                }
                _ => {}
            }

            let slot = self.relay.load_full();
            let relay = match slot.as_ref() {
                RelaySlot::Live(relay) => Arc::clone(relay),
                RelaySlot::Sentinel => {
                    // The terminal handoff already happened: re-read the
                    // state and take the fast path. After cancellation
                    // there is nothing to deliver.
                    if self.load_state().is_resolved() {
                        continue;
                    }
                    return;
                }
                RelaySlot::Empty => {
                    let created = ReplayRelay::replay_last_or_default(self.value.get().cloned());
                    let installed = self.relay.compare_and_swap(
                        &slot,
                        Arc::new(RelaySlot::Live(Arc::clone(&created))),
                    );
                    if Arc::ptr_eq(&installed, &slot) {
                        // First successful installer starts the upstream
                        // production.
                        if let Some(source) = &self.source {
                            let cell: Arc<dyn Subscriber<T>> =
                                self.weak_self.upgrade().expect(ERR_CELL_DETACHED);
                            source.subscribe(cell);
                        }
                        created
                    } else {
                        // Lost the install race; use whichever relay won.
                        continue;
                    }
                }
            };

            relay.attach(subscriber);
            self.nudge();
            return;
        }
    }

    /// Blocks the calling thread until the cell resolves or `timeout`
    /// elapses, requesting one unit of demand first so a lazily-bound
    /// source starts producing.
    ///
    /// Returns the value (or [`None`] for an empty completion) on
    /// resolution, the recorded cause as [`Error::Failed`] if the cell
    /// errored, and [`Error::Cancelled`] if the deadline elapsed first. A
    /// cell that was cancelled before this call returns `Ok(None)`
    /// immediately.
    ///
    /// The wait polls at a short fixed interval rather than parking on a
    /// condition variable, trading a little CPU for simplicity.
    ///
    /// # Errors
    ///
    /// [`Error::Failed`] if the cell resolved to an error;
    /// [`Error::Cancelled`] if `timeout` elapsed before resolution.
    #[cfg_attr(test, mutants::skip)] // Timing loop - tampering hangs the test suite.
    pub fn get(&self, timeout: Duration) -> Result<Option<T>, Error> {
        self.request(1);
        if !self.is_pending() {
            return self.peek();
        }

        let start = Instant::now();
        loop {
            match self.load_state() {
                State::ResolvedValue => {
                    return Ok(Some(self.value.get().cloned().expect(ERR_VALUE_MISSING)));
                }
                State::ResolvedEmpty => return Ok(None),
                State::Errored => {
                    return Err(Error::Failed {
                        cause: Arc::clone(self.error.get().expect(ERR_CAUSE_MISSING)),
                    });
                }
                _ => {}
            }
            if start.elapsed() >= timeout {
                return Err(Error::Cancelled);
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    /// Returns the currently cached outcome without waiting, requesting one
    /// unit of demand first so a lazily-bound source starts producing.
    ///
    /// `Ok(None)` covers every non-value outcome that is not an error:
    /// still pending, resolved empty, or cancelled.
    ///
    /// # Errors
    ///
    /// [`Error::Failed`] if the cell resolved to an error.
    pub fn peek(&self) -> Result<Option<T>, Error> {
        self.request(1);
        match self.load_state() {
            State::ResolvedValue => Ok(Some(self.value.get().cloned().expect(ERR_VALUE_MISSING))),
            State::Errored => Err(Error::Failed {
                cause: Arc::clone(self.error.get().expect(ERR_CAUSE_MISSING)),
            }),
            _ => Ok(None),
        }
    }

    /// The cell has neither resolved nor been cancelled yet.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.load_state().is_live()
    }

    /// The cell resolved to a value or to an empty completion.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(
            self.load_state(),
            State::ResolvedValue | State::ResolvedEmpty
        )
    }

    /// The cell resolved to an error.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.load_state() == State::Errored
    }

    /// The cell was cancelled before it could resolve.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.load_state() == State::Cancelled
    }

    /// The cell reached a cached resolution (value, empty or error).
    /// Cancellation does not count: it caches nothing.
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.load_state().is_resolved()
    }

    /// The recorded failure cause, if the cell resolved to an error.
    #[must_use]
    pub fn current_error(&self) -> Option<ResolveError> {
        if self.load_state() == State::Errored {
            self.error.get().map(Arc::clone)
        } else {
            None
        }
    }
}

impl<T> Subscriber<T> for Promise<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
        Self::on_subscribe(self, subscription);
    }

    fn on_next(&self, value: T) {
        Self::on_next(self, value);
    }

    fn on_complete(&self) {
        Self::on_complete(self);
    }

    fn on_error(&self, cause: ResolveError) {
        Self::on_error(self, cause);
    }
}

impl<T> Subscription for Promise<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn request(&self, demand: u64) {
        Self::request(self, demand);
    }

    fn cancel(&self) {
        Self::cancel(self);
    }
}

impl<T> Source<T> for Promise<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<T>>) {
        Self::subscribe(self, subscriber);
    }
}

impl<T> Drop for Promise<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn drop(&mut self) {
        // Dropping the last handle to a still-pending cell abandons
        // production; the resolution paths have already cleared this slot.
        if let Some(upstream) = self.upstream.swap(None) {
            upstream.subscription.cancel();
        }
    }
}

impl<T> fmt::Debug for Promise<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise")
            .field("state", &self.load_state())
            .field("has_source", &self.source.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Barrier;

    use static_assertions::assert_impl_all;
    use testing::with_watchdog;

    use super::*;
    use crate::test_utils::{ProbeSource, ProbeSubscription, RecordingSubscriber, text_error};

    assert_impl_all!(Promise<u32>: Send, Sync);

    fn as_dyn<T>(subscriber: &Arc<RecordingSubscriber<T>>) -> Arc<dyn Subscriber<T>>
    where
        T: Clone + Send + Sync + 'static,
    {
        Arc::clone(subscriber) as _
    }

    #[test]
    fn resolves_to_value_and_caches_it() {
        let cell = Promise::<String>::new();
        assert!(cell.is_pending());

        cell.on_next("x".to_string());
        cell.on_complete();

        assert_eq!(cell.peek().unwrap(), Some("x".to_string()));
        assert!(cell.is_success());
        assert!(cell.is_terminated());

        let late = RecordingSubscriber::new();
        cell.subscribe(as_dyn(&late));
        assert_eq!(late.values(), vec!["x".to_string()]);
        assert!(late.is_completed());
    }

    #[test]
    fn empty_completion_resolves_to_nothing() {
        with_watchdog(|| {
            let cell = Promise::<u32>::new();
            cell.on_complete();

            let handle = thread::spawn(move || cell.get(Duration::ZERO));
            let outcome = handle.join().unwrap();
            assert_eq!(outcome.unwrap(), None);
        });
    }

    #[test]
    fn errored_cell_surfaces_cause_everywhere() {
        let cell = Promise::<u32>::new();
        cell.on_error(text_error("boom"));

        let outcome = cell.get(Duration::from_millis(1000));
        match outcome {
            Err(Error::Failed { cause }) => assert_eq!(cause.to_string(), "boom"),
            other => panic!("expected a failed outcome, got {other:?}"),
        }
        assert!(cell.is_error());
        assert_eq!(cell.current_error().unwrap().to_string(), "boom");

        let late = RecordingSubscriber::new();
        cell.subscribe(as_dyn(&late));
        assert_eq!(late.error().unwrap().to_string(), "boom");
        assert!(late.values().is_empty());
    }

    #[test]
    fn cancel_releases_upstream_exactly_once() {
        let source = Arc::new(ProbeSource::<u32>::new());
        let cell = Promise::<u32>::from_source(Arc::clone(&source) as _);
        let consumer = RecordingSubscriber::new();
        cell.subscribe(as_dyn(&consumer));
        assert!(source.is_subscribed());

        cell.cancel();
        cell.cancel();

        assert_eq!(source.subscription().cancel_calls(), 1);
        assert!(cell.is_cancelled());
        // The timeout path: cancelled cells cache nothing, so `get` has
        // nothing to return, but no error either.
        assert_eq!(cell.get(Duration::from_millis(10)).unwrap(), None);
    }

    #[test]
    fn cancel_after_resolution_is_a_no_op() {
        let cell = Promise::<u32>::new();
        cell.on_next(1);
        cell.cancel();

        assert!(cell.is_success());
        assert!(!cell.is_cancelled());
        assert_eq!(cell.peek().unwrap(), Some(1));
    }

    #[test]
    fn upstream_receives_exactly_one_request_demand_first() {
        let source = Arc::new(ProbeSource::<u32>::new());
        let cell = Promise::<u32>::from_source(Arc::clone(&source) as _);

        // Demand lands before the upstream subscription exists.
        cell.request(1);
        assert_eq!(source.subscription().request_calls(), 0);

        let consumer = RecordingSubscriber::new();
        cell.subscribe(as_dyn(&consumer));
        assert_eq!(source.subscription().request_calls(), 1);

        cell.request(5);
        cell.request(1);
        assert_eq!(source.subscription().request_calls(), 1);
    }

    #[test]
    fn upstream_receives_exactly_one_request_subscription_first() {
        let source = Arc::new(ProbeSource::<u32>::new());
        let cell = Promise::<u32>::from_source(Arc::clone(&source) as _);

        let consumer = RecordingSubscriber::new();
        cell.subscribe(as_dyn(&consumer));
        assert_eq!(source.subscription().request_calls(), 1);

        cell.request(1);
        assert_eq!(source.subscription().request_calls(), 1);
    }

    #[test]
    fn value_delivery_cancels_the_upstream_subscription() {
        let source = Arc::new(ProbeSource::<u32>::new());
        let cell = Promise::<u32>::from_source(Arc::clone(&source) as _);
        let consumer = RecordingSubscriber::new();
        cell.subscribe(as_dyn(&consumer));

        source.emit(7);

        assert_eq!(source.subscription().cancel_calls(), 1);
        assert_eq!(consumer.values(), vec![7]);
        assert!(consumer.is_completed());
    }

    #[test]
    fn late_subscriber_sees_what_early_subscriber_saw() {
        let source = Arc::new(ProbeSource::<u32>::new());
        let cell = Promise::<u32>::from_source(Arc::clone(&source) as _);
        let early = RecordingSubscriber::new();
        cell.subscribe(as_dyn(&early));

        source.emit(7);

        let late = RecordingSubscriber::new();
        cell.subscribe(as_dyn(&late));

        assert_eq!(early.values(), vec![7]);
        assert_eq!(late.values(), vec![7]);
        assert!(early.is_completed());
        assert!(late.is_completed());
        // Replay comes from the cache, not from re-driving the source.
        assert_eq!(source.subscription().request_calls(), 1);
        assert_eq!(source.subscribe_calls(), 1);
    }

    #[test]
    fn second_value_is_dropped_not_applied() {
        let cell = Promise::<String>::new();
        cell.on_next("a".to_string());
        cell.on_next("b".to_string());

        assert_eq!(cell.peek().unwrap(), Some("a".to_string()));
    }

    #[test]
    fn value_without_legitimate_subscription_is_dropped() {
        let source = Arc::new(ProbeSource::<u32>::new());
        let cell = Promise::<u32>::from_source(Arc::clone(&source) as _);

        // No consumer attached, so the cell never subscribed to its source;
        // a value pushed now has no legitimate origin.
        cell.on_next(7);

        assert!(cell.is_pending());
        assert_eq!(cell.peek().unwrap(), None);
    }

    #[test]
    fn error_after_error_is_dropped() {
        let cell = Promise::<u32>::new();
        cell.on_error(text_error("first"));
        cell.on_error(text_error("second"));

        assert_eq!(cell.current_error().unwrap().to_string(), "first");
    }

    #[test]
    fn duplicate_upstream_subscription_is_cancelled() {
        let cell = Promise::<u32>::new();
        let first = Arc::new(ProbeSubscription::new());
        let second = Arc::new(ProbeSubscription::new());

        cell.on_subscribe(Arc::clone(&first) as _);
        cell.on_subscribe(Arc::clone(&second) as _);

        assert_eq!(first.cancel_calls(), 0);
        assert_eq!(second.cancel_calls(), 1);
    }

    #[test]
    fn zero_demand_resolves_the_cell_to_an_error() {
        let cell = Promise::<u32>::new();
        cell.request(0);

        assert!(cell.is_error());
        let cause = cell.current_error().unwrap();
        let invalid = cause
            .downcast_ref::<InvalidDemand>()
            .expect("cause should be the invalid-demand error");
        assert_eq!(invalid.requested(), 0);
    }

    #[test]
    fn subscriber_attached_before_resolution_is_served_by_the_relay() {
        let cell = Promise::<u32>::new();
        let consumer = RecordingSubscriber::new();
        cell.subscribe(as_dyn(&consumer));

        assert!(consumer.values().is_empty());
        cell.on_next(5);

        assert_eq!(consumer.values(), vec![5]);
        assert!(consumer.is_completed());
    }

    #[test]
    fn consumer_without_demand_receives_nothing_until_it_requests() {
        let cell = Promise::<u32>::new();
        let consumer = RecordingSubscriber::manual();
        cell.subscribe(as_dyn(&consumer));

        cell.on_next(5);
        assert!(consumer.values().is_empty());

        consumer.request(1);
        assert_eq!(consumer.values(), vec![5]);
        assert!(consumer.is_completed());
    }

    #[test]
    fn first_attach_triggers_the_lazy_subscription() {
        let source = Arc::new(ProbeSource::<u32>::new());
        let cell = Promise::<u32>::from_source(Arc::clone(&source) as _);

        // Even a consumer that only requests later triggers the lazy
        // subscription, and the cell forwards its unit of demand eagerly.
        let consumer = RecordingSubscriber::manual();
        cell.subscribe(as_dyn(&consumer));
        assert!(source.is_subscribed());
        assert_eq!(source.subscription().request_calls(), 1);
    }

    #[test]
    fn cancelled_cell_quietly_ignores_late_subscribers_after_upstream_release() {
        let source = Arc::new(ProbeSource::<u32>::new());
        let cell = Promise::<u32>::from_source(Arc::clone(&source) as _);
        let consumer = RecordingSubscriber::new();
        cell.subscribe(as_dyn(&consumer));

        cell.cancel();

        // Consumers attached earlier receive no terminal signal by design.
        assert!(!consumer.is_completed());
        assert!(consumer.error().is_none());

        let late = RecordingSubscriber::new();
        cell.subscribe(as_dyn(&late));
        assert!(!late.is_completed());
        assert!(late.error().is_none());
    }

    #[test]
    fn dropping_the_last_handle_to_a_pending_cell_cancels_upstream() {
        let subscription = Arc::new(ProbeSubscription::new());
        {
            let cell = Promise::<u32>::new();
            cell.on_subscribe(Arc::clone(&subscription) as _);
            assert_eq!(subscription.request_calls(), 1);
        }

        assert_eq!(subscription.cancel_calls(), 1);
    }

    #[test]
    fn concurrent_terminal_signals_resolve_exactly_once() {
        with_watchdog(|| {
            for _ in 0..200 {
                let cell = Promise::<u32>::new();
                let barrier = Arc::new(Barrier::new(3));

                let with_value = {
                    let cell = Arc::clone(&cell);
                    let barrier = Arc::clone(&barrier);
                    thread::spawn(move || {
                        barrier.wait();
                        cell.on_next(1);
                    })
                };
                let with_error = {
                    let cell = Arc::clone(&cell);
                    let barrier = Arc::clone(&barrier);
                    thread::spawn(move || {
                        barrier.wait();
                        cell.on_error(text_error("racing"));
                    })
                };
                let with_completion = {
                    let cell = Arc::clone(&cell);
                    let barrier = Arc::clone(&barrier);
                    thread::spawn(move || {
                        barrier.wait();
                        cell.on_complete();
                    })
                };

                with_value.join().unwrap();
                with_error.join().unwrap();
                with_completion.join().unwrap();

                // Exactly one terminal outcome, never a mix.
                assert!(cell.is_terminated());
                assert!(cell.is_success() ^ cell.is_error());
                if cell.is_error() {
                    assert!(cell.current_error().is_some());
                } else {
                    assert!(cell.current_error().is_none());
                }
            }
        });
    }

    #[test]
    fn concurrent_subscribers_all_observe_the_same_resolution() {
        with_watchdog(|| {
            for _ in 0..100 {
                let cell = Promise::<u32>::new();
                let subscribers: Vec<_> =
                    (0..4).map(|_| RecordingSubscriber::<u32>::new()).collect();

                let mut attachers = Vec::new();
                for subscriber in &subscribers {
                    let cell = Arc::clone(&cell);
                    let subscriber = as_dyn(subscriber);
                    attachers.push(thread::spawn(move || cell.subscribe(subscriber)));
                }
                let resolver = {
                    let cell = Arc::clone(&cell);
                    thread::spawn(move || cell.on_next(7))
                };

                for attacher in attachers {
                    attacher.join().unwrap();
                }
                resolver.join().unwrap();

                for subscriber in &subscribers {
                    assert_eq!(subscriber.values(), vec![7]);
                    assert!(subscriber.is_completed());
                }
            }
        });
    }

    #[test]
    fn get_waits_for_a_resolution_from_another_thread() {
        with_watchdog(|| {
            let cell = Promise::<u32>::new();
            let resolver = {
                let cell = Arc::clone(&cell);
                thread::spawn(move || {
                    thread::sleep(Duration::from_millis(20));
                    cell.on_next(42);
                })
            };

            let outcome = cell.get(Duration::from_secs(5));
            resolver.join().unwrap();
            assert_eq!(outcome.unwrap(), Some(42));
        });
    }

    #[test]
    fn get_times_out_on_a_cell_that_never_resolves() {
        with_watchdog(|| {
            let cell = Promise::<u32>::new();
            let outcome = cell.get(Duration::from_millis(20));
            assert!(matches!(outcome, Err(Error::Cancelled)));
            // The failed wait does not affect the cell itself.
            assert!(cell.is_pending());
        });
    }

    #[test]
    fn state_accessors_track_the_lifecycle() {
        let cell = Promise::<u32>::new();
        assert!(cell.is_pending());
        assert!(!cell.is_success());
        assert!(!cell.is_error());
        assert!(!cell.is_cancelled());
        assert!(!cell.is_terminated());

        cell.on_next(3);
        assert!(!cell.is_pending());
        assert!(cell.is_success());
        assert!(cell.is_terminated());
    }

    #[test]
    fn debug_output_names_the_state() {
        let cell = Promise::<u32>::new();
        let rendered = format!("{cell:?}");
        assert!(rendered.contains("Ready"));
    }
}
