//! Per-window request and dependency counters.
//!
//! An [`Accumulator`] belongs to exactly one reporting window. Producers fold
//! events into it while it is current; once the
//! [`AccumulatorManager`](crate::manager::AccumulatorManager) retires it, a
//! consumer reads it once via [`Accumulator::snapshot`] and drops it.
//!
//! # Consistency
//!
//! Each field is its own atomic and each update is a single `fetch_add` on
//! that field, so no update is ever lost. Updates are NOT jointly atomic: a
//! concurrent snapshot can observe an event's packed count without its
//! success or failure increment, or the other way round. The skew is bounded
//! by the number of in-flight producers and is accepted for rate telemetry.

#[cfg(not(loom))]
use std::sync::atomic::{AtomicU64, Ordering};

#[cfg(loom)]
use loom::sync::atomic::{AtomicU64, Ordering};

use crate::packed::PackedCounter;

/// Whether a request or dependency call succeeded.
///
/// `Unknown` is a first-class case: the event is counted and its duration
/// recorded, but neither the success nor the failure tally moves.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    /// The call succeeded.
    Success,
    /// The call failed.
    Failure,
    /// The caller did not say.
    #[default]
    Unknown,
}

impl From<Option<bool>> for Outcome {
    fn from(success: Option<bool>) -> Self {
        match success {
            Some(true) => Self::Success,
            Some(false) => Self::Failure,
            None => Self::Unknown,
        }
    }
}

impl From<bool> for Outcome {
    fn from(success: bool) -> Self {
        Self::from(Some(success))
    }
}

/// Counters for one kind of event.
#[derive(Debug)]
struct KindCounters {
    count_and_duration: AtomicU64,
    success: AtomicU64,
    failure: AtomicU64,
}

impl KindCounters {
    fn new() -> Self {
        Self {
            count_and_duration: AtomicU64::new(0),
            success: AtomicU64::new(0),
            failure: AtomicU64::new(0),
        }
    }

    #[inline]
    fn add(&self, duration_ticks: i64, outcome: Outcome) {
        // Relaxed is sufficient: every field is a commutative sum and the
        // reader is ordered after the window closes by the manager's swap.
        self.count_and_duration.fetch_add(
            PackedCounter::encode(1, duration_ticks).raw(),
            Ordering::Relaxed,
        );
        match outcome {
            Outcome::Success => {
                self.success.fetch_add(1, Ordering::Relaxed);
            }
            Outcome::Failure => {
                self.failure.fetch_add(1, Ordering::Relaxed);
            }
            Outcome::Unknown => {}
        }
    }

    fn snapshot(&self) -> KindSnapshot {
        let (count, duration_ticks) =
            PackedCounter::from_raw(self.count_and_duration.load(Ordering::Acquire)).decode();
        KindSnapshot {
            count,
            duration_ticks,
            success_count: self.success.load(Ordering::Acquire),
            failure_count: self.failure.load(Ordering::Acquire),
        }
    }
}

/// Point-in-time values of one kind's counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct KindSnapshot {
    /// Number of events.
    pub count: u32,
    /// Sum of event durations, in ticks, truncated to the packed sub-field.
    pub duration_ticks: i64,
    /// Events whose outcome was [`Outcome::Success`].
    pub success_count: u64,
    /// Events whose outcome was [`Outcome::Failure`].
    pub failure_count: u64,
}

impl KindSnapshot {
    fn packed(self) -> PackedCounter {
        PackedCounter::encode(self.count, self.duration_ticks)
    }

    fn with_packed(packed: PackedCounter, success_count: u64, failure_count: u64) -> Self {
        let (count, duration_ticks) = packed.decode();
        Self {
            count,
            duration_ticks,
            success_count,
            failure_count,
        }
    }

    /// Sum of two snapshots, with the same wrapping as the live counters.
    #[must_use]
    pub fn wrapping_add(self, other: Self) -> Self {
        Self::with_packed(
            self.packed().wrapping_add(other.packed()),
            self.success_count.wrapping_add(other.success_count),
            self.failure_count.wrapping_add(other.failure_count),
        )
    }

    /// What was added to the counters between `earlier` and `self`.
    #[must_use]
    pub fn wrapping_sub(self, earlier: Self) -> Self {
        Self::with_packed(
            self.packed().wrapping_sub(earlier.packed()),
            self.success_count.wrapping_sub(earlier.success_count),
            self.failure_count.wrapping_sub(earlier.failure_count),
        )
    }
}

/// Point-in-time values of every counter in an [`Accumulator`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Snapshot {
    /// Inbound requests.
    pub requests: KindSnapshot,
    /// Outbound dependency calls.
    pub dependency_calls: KindSnapshot,
}

impl Snapshot {
    /// Sum of two snapshots. See [`KindSnapshot::wrapping_add`].
    #[must_use]
    pub fn wrapping_add(self, other: Self) -> Self {
        Self {
            requests: self.requests.wrapping_add(other.requests),
            dependency_calls: self.dependency_calls.wrapping_add(other.dependency_calls),
        }
    }

    /// Updates made between `earlier` and `self`. See
    /// [`KindSnapshot::wrapping_sub`].
    #[must_use]
    pub fn wrapping_sub(self, earlier: Self) -> Self {
        Self {
            requests: self.requests.wrapping_sub(earlier.requests),
            dependency_calls: self.dependency_calls.wrapping_sub(earlier.dependency_calls),
        }
    }
}

/// The counters for one reporting window.
#[derive(Debug)]
pub struct Accumulator {
    requests: KindCounters,
    dependency_calls: KindCounters,
}

impl Default for Accumulator {
    fn default() -> Self {
        Self::new()
    }
}

impl Accumulator {
    /// Create an accumulator with every counter at zero.
    #[must_use]
    pub fn new() -> Self {
        Self {
            requests: KindCounters::new(),
            dependency_calls: KindCounters::new(),
        }
    }

    /// Record one inbound request of `duration_ticks`.
    #[inline]
    pub fn add_request(&self, duration_ticks: i64, outcome: Outcome) {
        self.requests.add(duration_ticks, outcome);
    }

    /// Record one outbound dependency call of `duration_ticks`.
    #[inline]
    pub fn add_dependency_call(&self, duration_ticks: i64, outcome: Outcome) {
        self.dependency_calls.add(duration_ticks, outcome);
    }

    /// Read every counter.
    ///
    /// Intended for retired accumulators. Called on a live accumulator the
    /// result is still free of lost updates but may show the skew described
    /// in the module documentation.
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            requests: self.requests.snapshot(),
            dependency_calls: self.dependency_calls.snapshot(),
        }
    }
}
