//! Counter delta math
//!
//! Hardware bandwidth counters are cumulative byte counts that can reset,
//! wrap, or jump after a corrupted read. Nothing here ever fails: anomalies
//! are folded into a conservative rate.

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

/// Bytes per second between two counter readings
///
/// Zero when the interval is zero, when there is no previous reading, or
/// when the counter went backwards.
pub fn calc_bytes_per_sec(current: u64, previous: u64, interval_secs: u64) -> u64 {
    if interval_secs == 0 || previous == 0 || current <= previous {
        return 0;
    }
    (current - previous) / interval_secs
}

/// Bound an implausible counter advance
///
/// A regression (`current < previous`) is passed through untouched and is
/// handled as a reset by the caller. An advance of at least `max_diff` is an
/// overflow and is replaced by `old_value + max_step`. Anything else is capped
/// at `old_value + max_step`.
pub fn clamp_mbm_delta(current: u64, previous: u64, old_value: u64, max_diff: u64, max_step: u64) -> u64 {
    if current < previous {
        return current;
    }

    let ceiling = old_value.saturating_add(max_step);
    if current - previous >= max_diff {
        return ceiling;
    }
    current.min(ceiling)
}

/// Rolling state of one (group, CCD) counter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct CounterState {
    pub counter: u64,
    pub timestamp: DateTime<Utc>,
    /// Last emitted rate in bytes/sec
    pub rate: Option<u64>,
}

/// Limits applied while advancing a counter
#[derive(Debug, Clone, Copy)]
pub(crate) struct DeltaLimits {
    pub max_diff: u64,
    pub max_step: u64,
}

/// Advance a counter with a new reading
///
/// Returns the state to keep and the rate to report, if any.
pub(crate) fn advance(
    previous: Option<&CounterState>,
    counter: u64,
    timestamp: DateTime<Utc>,
    limits: DeltaLimits,
) -> (CounterState, Option<u64>) {
    let fresh = |rate: Option<u64>| CounterState {
        counter,
        timestamp,
        rate,
    };

    let prev = match previous {
        Some(prev) => prev,
        None => return (fresh(None), None),
    };

    let interval_ms = (timestamp - prev.timestamp).num_milliseconds();
    if interval_ms <= 0 {
        debug!(
            interval_ms = interval_ms,
            "Non-positive sampling interval, keeping previous rate"
        );
        return (*prev, prev.rate);
    }

    if prev.counter == 0 {
        return (fresh(None), None);
    }

    if counter < prev.counter {
        debug!(
            current = counter,
            previous = prev.counter,
            "Counter went backwards, treating as reset"
        );
        return (fresh(Some(0)), Some(0));
    }

    // The raw reading becomes the next baseline; the spike itself is dropped
    if counter - prev.counter >= limits.max_diff {
        warn!(
            current = counter,
            previous = prev.counter,
            "Counter overflow, reporting zero for this interval"
        );
        return (fresh(Some(0)), Some(0));
    }

    let effective = clamp_mbm_delta(counter, prev.counter, prev.counter, limits.max_diff, limits.max_step);
    if effective != counter {
        warn!(
            current = counter,
            previous = prev.counter,
            clamped = effective,
            "Implausible counter advance clamped"
        );
    }

    let rate = bytes_per_sec_over_millis(effective - prev.counter, interval_ms as u64);
    (fresh(Some(rate)), Some(rate))
}

/// Rate of `delta` bytes over a millisecond interval, without truncating
/// the interval to whole seconds
fn bytes_per_sec_over_millis(delta: u64, interval_ms: u64) -> u64 {
    if interval_ms == 0 {
        return 0;
    }
    let rate = u128::from(delta) * 1_000 / u128::from(interval_ms);
    u64::try_from(rate).unwrap_or(u64::MAX)
}
