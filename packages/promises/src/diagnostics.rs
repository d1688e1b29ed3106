//! Diagnostic sink for signals that are discarded rather than applied.
//!
//! A misbehaving producer must not be able to corrupt an already-resolved
//! cell, so late or illegitimate signals are dropped. Dropping them fully
//! silently would hide real bugs in the producer, so every drop is reported
//! here instead.

use std::any;

use tracing::{debug, warn};

use crate::protocol::ResolveError;

/// A value signal arrived after resolution or without a legitimate upstream
/// subscription and was discarded.
pub(crate) fn value_dropped<T>() {
    debug!(
        value_type = any::type_name::<T>(),
        "dropped value signal: cell already resolved or never subscribed to its source"
    );
}

/// An error signal arrived after a cause was already recorded, or without a
/// legitimate upstream subscription, and was discarded.
pub(crate) fn error_dropped(cause: &ResolveError) {
    debug!(
        cause = %cause,
        "dropped error signal: cell already resolved or never subscribed to its source"
    );
}

/// A source attempted to establish a second concurrent upstream subscription.
pub(crate) fn duplicate_upstream() {
    warn!("protocol violation: on_subscribe received while an upstream subscription is active");
}

/// A subscriber requested non-positive demand from a handle that cannot
/// escalate the violation (the owning cell is already terminal).
pub(crate) fn invalid_demand(demand: u64) {
    warn!(demand, "ignored non-positive demand request");
}
