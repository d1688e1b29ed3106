// A poisoned lock means a fan-out delivery panicked mid-update and the relay
// bookkeeping can no longer be trusted; continued execution is not safe.
pub(crate) const ERR_POISONED_LOCK: &str = "encountered poisoned lock - the relay's fan-out \
    bookkeeping is no longer trustworthy and continued execution is not safe";

// These fire only if a terminal state became observable without its payload,
// which the write-before-CAS ordering rules out.
pub(crate) const ERR_VALUE_MISSING: &str =
    "cell is in the resolved-with-value state but no value is recorded";
pub(crate) const ERR_CAUSE_MISSING: &str =
    "cell is in the errored state but no failure cause is recorded";

// Every cell is constructed inside an Arc, so a live `&self` implies a live
// strong reference somewhere.
pub(crate) const ERR_CELL_DETACHED: &str =
    "cell invoked after every strong reference to it was dropped";
pub(crate) const ERR_RELAY_DETACHED: &str =
    "relay invoked after every strong reference to it was dropped";
