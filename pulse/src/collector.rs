//! Window harvesting.
//!
//! The [`Collector`] is the single consumer of an
//! [`AccumulatorManager`]. Each call to [`Collector::harvest`] closes the
//! open window by swapping in a fresh accumulator, turns the retired one into
//! a [`Sample`] and publishes that sample through [`metrics`]. The collector
//! does not schedule itself: whoever owns the reporting cadence calls
//! `harvest`.
//!
//! ## Late writes
//!
//! A producer that loaded the current accumulator just before the swap may
//! finish its update after it. `harvest` first waits briefly for such writers
//! to release the retired accumulator. Any that are still holding it when the
//! wait ends are not lost: the collector keeps the accumulator and reports
//! whatever landed after the read in a later sample. An accumulator is dropped
//! only once the collector holds its last reference and has read it again.
//!
//! ## Metrics
//!
//! `pulse_requests_per_second`: Inbound requests per second in the last window
//! `pulse_request_duration_ms`: Mean inbound request duration
//! `pulse_requests_succeeded_per_second`: Successful inbound requests per second
//! `pulse_requests_failed_per_second`: Failed inbound requests per second
//! `pulse_dependency_calls_per_second`: Outbound calls per second
//! `pulse_dependency_call_duration_ms`: Mean outbound call duration
//! `pulse_dependency_calls_succeeded_per_second`: Successful outbound calls per second
//! `pulse_dependency_calls_failed_per_second`: Failed outbound calls per second
//! `pulse_windows_harvested`: Windows closed so far

use std::{
    hint,
    sync::{
        Arc,
        atomic::{Ordering, fence},
    },
    time::{Duration, Instant},
};

use metrics::{counter, gauge};
use pulse_counter::{Accumulator, AccumulatorManager, Snapshot};
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::sample::Sample;

/// Upper bound on spins `harvest` spends waiting for in-flight writers to
/// release a retired accumulator.
const SETTLE_SPINS: u32 = 1_024;

/// A retired accumulator some producer still held at the last harvest.
#[derive(Debug)]
struct Draining {
    accumulator: Arc<Accumulator>,
    reported: Snapshot,
}

/// Read `accumulator`, returning the snapshot and whether the caller holds the
/// only reference, in which case no further writes can land.
fn read_retired(accumulator: &Arc<Accumulator>) -> (Snapshot, bool) {
    let quiescent = Arc::strong_count(accumulator) == 1;
    if quiescent {
        // Pairs with the release decrement of the last writer's reference.
        fence(Ordering::Acquire);
    }
    (accumulator.snapshot(), quiescent)
}

/// Periodic consumer of an [`AccumulatorManager`].
#[derive(Debug)]
pub struct Collector {
    manager: Arc<AccumulatorManager>,
    instrumentation_key: String,
    labels: Vec<(String, String)>,
    window_start: Instant,
    draining: Vec<Draining>,
}

impl Collector {
    /// Create a collector for `manager` whose first window opens at `now`.
    ///
    /// Every sample is attributed to `instrumentation_key`. `global_labels`
    /// are attached to every published metric.
    #[must_use]
    pub fn new(
        manager: Arc<AccumulatorManager>,
        instrumentation_key: impl Into<String>,
        global_labels: &FxHashMap<String, String>,
        now: Instant,
    ) -> Self {
        let instrumentation_key = instrumentation_key.into();
        let mut labels: Vec<(String, String)> = global_labels
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        labels.sort();
        labels.push((
            "instrumentation_key".to_string(),
            instrumentation_key.clone(),
        ));

        Self {
            manager,
            instrumentation_key,
            labels,
            window_start: now,
            draining: Vec::new(),
        }
    }

    /// The manager producers should be started against.
    #[must_use]
    pub fn manager(&self) -> &Arc<AccumulatorManager> {
        &self.manager
    }

    /// Close the open window at `now` and return its sample.
    ///
    /// The next window opens at `now`. If `now` precedes the window start the
    /// window is treated as zero-length. Updates that reached an earlier
    /// window after it was read are folded into this sample.
    pub fn harvest(&mut self, now: Instant) -> Sample {
        let retired = self.manager.swap(Accumulator::new());
        let window: Duration = now.saturating_duration_since(self.window_start);
        self.window_start = now;

        for _ in 0..SETTLE_SPINS {
            if Arc::strong_count(&retired) == 1 {
                break;
            }
            hint::spin_loop();
        }

        let mut snapshot = self.drain_late_writes();
        let (reported, quiescent) = read_retired(&retired);
        snapshot = snapshot.wrapping_add(reported);
        if !quiescent {
            self.draining.push(Draining {
                accumulator: retired,
                reported,
            });
        }

        let sample = Sample::new(self.instrumentation_key.as_str(), snapshot, window);
        self.publish(&sample);
        debug!(
            window = ?window,
            requests = sample.snapshot.requests.count,
            dependency_calls = sample.snapshot.dependency_calls.count,
            draining = self.draining.len(),
            "harvested window"
        );
        sample
    }

    /// Number of retired accumulators that may still receive late writes.
    #[must_use]
    pub fn draining(&self) -> usize {
        self.draining.len()
    }

    fn drain_late_writes(&mut self) -> Snapshot {
        let mut late = Snapshot::default();
        self.draining.retain_mut(|draining| {
            let (now, quiescent) = read_retired(&draining.accumulator);
            late = late.wrapping_add(now.wrapping_sub(draining.reported));
            draining.reported = now;
            !quiescent
        });
        late
    }

    fn publish(&self, sample: &Sample) {
        let labels = &self.labels;
        gauge!("pulse_requests_per_second", labels).set(sample.requests.per_second);
        gauge!("pulse_request_duration_ms", labels).set(sample.requests.average_duration_ms);
        gauge!("pulse_requests_succeeded_per_second", labels)
            .set(sample.requests.succeeded_per_second);
        gauge!("pulse_requests_failed_per_second", labels).set(sample.requests.failed_per_second);
        gauge!("pulse_dependency_calls_per_second", labels)
            .set(sample.dependency_calls.per_second);
        gauge!("pulse_dependency_call_duration_ms", labels)
            .set(sample.dependency_calls.average_duration_ms);
        gauge!("pulse_dependency_calls_succeeded_per_second", labels)
            .set(sample.dependency_calls.succeeded_per_second);
        gauge!("pulse_dependency_calls_failed_per_second", labels)
            .set(sample.dependency_calls.failed_per_second);
        counter!("pulse_windows_harvested", labels).increment(1);
    }
}
