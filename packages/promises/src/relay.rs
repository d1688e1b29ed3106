//! Lazily-created multicast relay.
//!
//! The relay fans a cached "last or default" value and the terminal event out
//! to any number of consumers, including consumers that attach after the
//! terminal event already happened. Values are only delivered to consumers
//! that signalled demand; a consumer that never requests never receives one.
//!
//! Fan-out bookkeeping sits behind a plain mutex. The relay is not part of
//! the lock-free cell core and never runs inside the cell's drain loop longer
//! than one delivery pass.

use std::fmt;
use std::sync::{Arc, Mutex, Weak};

use crate::constants::{ERR_POISONED_LOCK, ERR_RELAY_DETACHED};
use crate::diagnostics;
use crate::protocol::{ResolveError, Subscriber, Subscription};

#[derive(Clone)]
enum TerminalEvent {
    Completed,
    Failed(ResolveError),
}

struct Consumer<T> {
    id: u64,

    /// Cleared once the consumer received its terminal signal, so a relay
    /// kept alive by outstanding consumer handles does not pin subscribers
    /// that are already served.
    subscriber: Option<Arc<dyn Subscriber<T>>>,

    /// The consumer signalled demand. One unit is enough: the relay carries
    /// at most one value.
    requested: bool,

    sent_value: bool,
    done: bool,
}

struct RelayInner<T> {
    upstream: Option<Arc<dyn Subscription>>,

    /// One unit of demand was already forwarded upstream.
    upstream_demanded: bool,

    /// A consumer signalled demand before the upstream handle arrived;
    /// forward it as soon as `on_subscribe` delivers one.
    demand_pending: bool,

    latest: Option<T>,
    terminal: Option<TerminalEvent>,
    consumers: Vec<Consumer<T>>,
    next_consumer_id: u64,
}

/// What `on_subscribe` decided while the lock was held; acted on after
/// releasing it so the upstream callbacks never run under the relay lock.
enum UpstreamDecision {
    Keep,
    Forward,
    Reject,
}

enum Delivery<T> {
    Value(T),
    Complete,
    ValueThenComplete(T),
    Error(ResolveError),
}

/// A multicast relay that replays its last value (or a default provided at
/// creation) plus the terminal event to consumers attaching late.
///
/// The relay acts as a [`Subscriber`] towards whatever feeds it and hands
/// each attached consumer its own [`Subscription`], through which the
/// consumer drives demand and can detach itself without affecting others.
pub struct ReplayRelay<T>
where
    T: Clone + Send + Sync + 'static,
{
    inner: Mutex<RelayInner<T>>,
    weak_self: Weak<Self>,
}

impl<T> ReplayRelay<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Creates a relay that replays the last received value, or `default`
    /// if it terminates without ever receiving one.
    #[must_use]
    pub fn replay_last_or_default(default: Option<T>) -> Arc<Self> {
        Arc::new_cyclic(|weak_self| Self {
            inner: Mutex::new(RelayInner {
                upstream: None,
                upstream_demanded: false,
                demand_pending: false,
                latest: default,
                terminal: None,
                consumers: Vec::new(),
                next_consumer_id: 0,
            }),
            weak_self: weak_self.clone(),
        })
    }

    /// Attaches a consumer and immediately hands it its per-consumer
    /// subscription. Nothing is delivered until the consumer requests.
    pub fn attach(&self, subscriber: Arc<dyn Subscriber<T>>) {
        let id = {
            let mut inner = self.inner.lock().expect(ERR_POISONED_LOCK);
            let id = inner.next_consumer_id;
            inner.next_consumer_id = inner.next_consumer_id.wrapping_add(1);
            inner.consumers.push(Consumer {
                id,
                subscriber: Some(Arc::clone(&subscriber)),
                requested: false,
                sent_value: false,
                done: false,
            });
            id
        };

        // The handle keeps the relay alive: a consumer that defers its
        // demand past the terminal event must still be able to collect the
        // replay through it.
        subscriber.on_subscribe(Arc::new(ConsumerHandle {
            relay: self.weak_self.upgrade().expect(ERR_RELAY_DETACHED),
            id,
        }));
    }

    fn consumer_requested(&self, id: u64, demand: u64) {
        if demand == 0 {
            diagnostics::invalid_demand(demand);
            return;
        }

        let (delivery, forward) = {
            let mut inner = self.inner.lock().expect(ERR_POISONED_LOCK);
            let latest = inner.latest.clone();
            let terminal = inner.terminal.clone();

            let delivery = inner
                .consumers
                .iter_mut()
                .find(|consumer| consumer.id == id)
                .and_then(|consumer| {
                    consumer.requested = true;
                    if consumer.done {
                        return None;
                    }
                    match terminal {
                        Some(TerminalEvent::Completed) => {
                            consumer.done = true;
                            let subscriber = consumer.subscriber.take()?;
                            if consumer.sent_value {
                                Some((subscriber, Delivery::Complete))
                            } else if let Some(value) = latest {
                                consumer.sent_value = true;
                                Some((subscriber, Delivery::ValueThenComplete(value)))
                            } else {
                                Some((subscriber, Delivery::Complete))
                            }
                        }
                        Some(TerminalEvent::Failed(cause)) => {
                            consumer.done = true;
                            let subscriber = consumer.subscriber.take()?;
                            Some((subscriber, Delivery::Error(cause)))
                        }
                        None => {
                            if consumer.sent_value {
                                None
                            } else if let Some(value) = latest {
                                consumer.sent_value = true;
                                let subscriber = consumer.subscriber.as_ref().map(Arc::clone)?;
                                Some((subscriber, Delivery::Value(value)))
                            } else {
                                None
                            }
                        }
                    }
                });

            let forward = if inner.upstream_demanded {
                None
            } else if let Some(upstream) = inner.upstream.as_ref().map(Arc::clone) {
                inner.upstream_demanded = true;
                Some(upstream)
            } else {
                inner.demand_pending = true;
                None
            };

            (delivery, forward)
        };

        if let Some(upstream) = forward {
            upstream.request(1);
        }

        if let Some((subscriber, delivery)) = delivery {
            match delivery {
                Delivery::Value(value) => subscriber.on_next(value),
                Delivery::Complete => subscriber.on_complete(),
                Delivery::ValueThenComplete(value) => {
                    subscriber.on_next(value);
                    subscriber.on_complete();
                }
                Delivery::Error(cause) => subscriber.on_error(cause),
            }
        }
    }

    fn detach(&self, id: u64) {
        let mut inner = self.inner.lock().expect(ERR_POISONED_LOCK);
        inner.consumers.retain(|consumer| consumer.id != id);
    }
}

impl<T> Subscriber<T> for ReplayRelay<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
        let decision = {
            let mut inner = self.inner.lock().expect(ERR_POISONED_LOCK);
            if inner.upstream.is_some() {
                UpstreamDecision::Reject
            } else {
                inner.upstream = Some(Arc::clone(&subscription));
                if inner.demand_pending && !inner.upstream_demanded {
                    inner.upstream_demanded = true;
                    UpstreamDecision::Forward
                } else {
                    UpstreamDecision::Keep
                }
            }
        };

        match decision {
            UpstreamDecision::Keep => {}
            UpstreamDecision::Forward => subscription.request(1),
            UpstreamDecision::Reject => {
                diagnostics::duplicate_upstream();
                subscription.cancel();
            }
        }
    }

    fn on_next(&self, value: T) {
        let deliveries = {
            let mut inner = self.inner.lock().expect(ERR_POISONED_LOCK);
            if inner.terminal.is_some() {
                return;
            }
            inner.latest = Some(value.clone());

            let mut deliveries = Vec::new();
            for consumer in &mut inner.consumers {
                if !consumer.requested || consumer.sent_value || consumer.done {
                    continue;
                }
                if let Some(subscriber) = consumer.subscriber.as_ref().map(Arc::clone) {
                    consumer.sent_value = true;
                    deliveries.push(subscriber);
                }
            }
            deliveries
        };

        for subscriber in deliveries {
            subscriber.on_next(value.clone());
        }
    }

    fn on_complete(&self) {
        let deliveries = {
            let mut inner = self.inner.lock().expect(ERR_POISONED_LOCK);
            if inner.terminal.is_some() {
                return;
            }
            inner.terminal = Some(TerminalEvent::Completed);
            inner.upstream = None;
            let latest = inner.latest.clone();

            let mut deliveries = Vec::new();
            for consumer in &mut inner.consumers {
                if !consumer.requested || consumer.done {
                    continue;
                }
                consumer.done = true;
                if let Some(subscriber) = consumer.subscriber.take() {
                    let value = if consumer.sent_value {
                        None
                    } else {
                        consumer.sent_value = true;
                        latest.clone()
                    };
                    deliveries.push((subscriber, value));
                }
            }
            deliveries
        };

        for (subscriber, value) in deliveries {
            if let Some(value) = value {
                subscriber.on_next(value);
            }
            subscriber.on_complete();
        }
    }

    fn on_error(&self, cause: ResolveError) {
        let deliveries = {
            let mut inner = self.inner.lock().expect(ERR_POISONED_LOCK);
            if inner.terminal.is_some() {
                return;
            }
            inner.terminal = Some(TerminalEvent::Failed(Arc::clone(&cause)));
            inner.upstream = None;

            let mut deliveries = Vec::new();
            for consumer in &mut inner.consumers {
                if !consumer.requested || consumer.done {
                    continue;
                }
                consumer.done = true;
                if let Some(subscriber) = consumer.subscriber.take() {
                    deliveries.push(subscriber);
                }
            }
            deliveries
        };

        for subscriber in deliveries {
            subscriber.on_error(Arc::clone(&cause));
        }
    }
}

impl<T> fmt::Debug for ReplayRelay<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock().expect(ERR_POISONED_LOCK);
        f.debug_struct("ReplayRelay")
            .field("consumers", &inner.consumers.len())
            .field("has_value", &inner.latest.is_some())
            .field("is_terminated", &inner.terminal.is_some())
            .finish_non_exhaustive()
    }
}

/// Per-consumer demand/cancellation handle handed out by [`ReplayRelay::attach`].
///
/// Holds the relay strongly: the replay must outlive every handle, because
/// the owner of the relay drops its reference at the terminal handoff while
/// consumers may defer their demand past it. The relay releases its own
/// reference to the consumer's subscriber once the terminal signal is
/// delivered, so the handle does not form a lasting cycle.
struct ConsumerHandle<T>
where
    T: Clone + Send + Sync + 'static,
{
    relay: Arc<ReplayRelay<T>>,
    id: u64,
}

impl<T> Subscription for ConsumerHandle<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn request(&self, demand: u64) {
        self.relay.consumer_requested(self.id, demand);
    }

    fn cancel(&self) {
        self.relay.detach(self.id);
    }
}
