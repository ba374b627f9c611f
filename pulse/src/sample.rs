//! Per-window rates derived from a retired accumulator.

use std::time::Duration;

use pulse_counter::{KindSnapshot, Snapshot};

use crate::telemetry::TICKS_PER_MILLISECOND;

/// Rates for one kind of event over one window.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct Rates {
    /// Events per second.
    pub per_second: f64,
    /// Mean event duration, in milliseconds. Zero when there were no events.
    pub average_duration_ms: f64,
    /// Successful events per second.
    pub succeeded_per_second: f64,
    /// Failed events per second.
    pub failed_per_second: f64,
}

impl Rates {
    /// Compute rates for `counts` observed over `window`.
    ///
    /// A zero-length window yields zero rates rather than infinities.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn new(counts: &KindSnapshot, window: Duration) -> Self {
        let seconds = window.as_secs_f64();
        let per_second = |n: f64| if seconds > 0.0 { n / seconds } else { 0.0 };

        let count = f64::from(counts.count);
        let average_duration_ms = if counts.count == 0 {
            0.0
        } else {
            counts.duration_ticks as f64 / TICKS_PER_MILLISECOND as f64 / count
        };

        Self {
            per_second: per_second(count),
            average_duration_ms,
            succeeded_per_second: per_second(counts.success_count as f64),
            failed_per_second: per_second(counts.failure_count as f64),
        }
    }
}

/// A closed reporting window.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// Destination identity every aggregated item is attributed to.
    pub instrumentation_key: String,
    /// Measured length of the window.
    pub window: Duration,
    /// Raw counters read from the retired accumulator.
    pub snapshot: Snapshot,
    /// Inbound request rates.
    pub requests: Rates,
    /// Outbound dependency call rates.
    pub dependency_calls: Rates,
}

impl Sample {
    /// Build a sample from a retired accumulator's `snapshot` covering
    /// `window`.
    #[must_use]
    pub fn new(instrumentation_key: impl Into<String>, snapshot: Snapshot, window: Duration) -> Self {
        Self {
            instrumentation_key: instrumentation_key.into(),
            window,
            requests: Rates::new(&snapshot.requests, window),
            dependency_calls: Rates::new(&snapshot.dependency_calls, window),
            snapshot,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn rates_over_two_seconds() {
        let counts = KindSnapshot {
            count: 4,
            duration_ticks: 4 * 250 * TICKS_PER_MILLISECOND,
            success_count: 3,
            failure_count: 1,
        };
        let rates = Rates::new(&counts, Duration::from_secs(2));

        assert!(close(rates.per_second, 2.0));
        assert!(close(rates.average_duration_ms, 250.0));
        assert!(close(rates.succeeded_per_second, 1.5));
        assert!(close(rates.failed_per_second, 0.5));
    }

    #[test]
    fn empty_window_is_all_zero() {
        let rates = Rates::new(&KindSnapshot::default(), Duration::from_secs(1));
        assert_eq!(rates, Rates::default());
    }

    #[test]
    fn zero_length_window_is_finite() {
        let counts = KindSnapshot {
            count: 1,
            duration_ticks: TICKS_PER_MILLISECOND,
            success_count: 1,
            failure_count: 0,
        };
        let rates = Rates::new(&counts, Duration::ZERO);
        assert!(close(rates.per_second, 0.0));
        assert!(close(rates.average_duration_ms, 1.0));
    }

    #[test]
    fn sample_carries_identity_and_both_kinds() {
        let snapshot = Snapshot {
            requests: KindSnapshot {
                count: 10,
                duration_ticks: 10 * TICKS_PER_MILLISECOND,
                success_count: 10,
                failure_count: 0,
            },
            dependency_calls: KindSnapshot {
                count: 5,
                duration_ticks: 0,
                success_count: 0,
                failure_count: 5,
            },
        };
        let sample = Sample::new("ikey", snapshot, Duration::from_secs(1));

        assert_eq!(sample.instrumentation_key, "ikey");
        assert_eq!(sample.snapshot, snapshot);
        assert!(close(sample.requests.per_second, 10.0));
        assert!(close(sample.requests.average_duration_ms, 1.0));
        assert!(close(sample.dependency_calls.failed_per_second, 5.0));
    }

    proptest! {
        #[test]
        fn outcome_rates_never_exceed_event_rate(
            count in 0..10_000u32,
            success in 0..10_000u64,
            millis in 1..60_000u64,
        ) {
            let success = success.min(u64::from(count));
            let counts = KindSnapshot {
                count,
                duration_ticks: 0,
                success_count: success,
                failure_count: u64::from(count) - success,
            };
            let rates = Rates::new(&counts, Duration::from_millis(millis));
            prop_assert!(rates.succeeded_per_second <= rates.per_second + 1e-9);
            prop_assert!(rates.failed_per_second <= rates.per_second + 1e-9);
            prop_assert!(
                (rates.succeeded_per_second + rates.failed_per_second - rates.per_second).abs() < 1e-6
            );
        }
    }
}
