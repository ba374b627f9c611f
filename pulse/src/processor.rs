//! The inline aggregating stage.
//!
//! [`Processor`] sits in a telemetry chain and sees every item. While
//! collection is running it folds requests and dependency calls into the
//! current accumulator of the bound
//! [`AccumulatorManager`](pulse_counter::AccumulatorManager); in every case it
//! then hands the item to the next stage, exactly once.
//!
//! The item's own instrumentation key is not consulted. All aggregated data
//! belongs to the single destination the collector was configured with.
//!
//! This is the hottest code in pulse: every telemetry item in the host passes
//! through [`Processor::process`]. The fast path is one pointer load for the
//! gate, one for the accumulator and two relaxed `fetch_add`s.

use std::{
    any::Any,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};

use metrics::counter;
use pulse_counter::{AccumulatorManager, gate};
use tracing::warn;

use crate::telemetry::{Kind, Telemetry, TelemetryProcessor, duration_to_ticks};

/// Aggregating telemetry stage.
///
/// The successor is a required constructor argument: a `Processor` with
/// nowhere to forward items cannot be built.
#[derive(Debug)]
pub struct Processor<N> {
    next: N,
    gate: gate::CollectionGate,
}

impl<N> Processor<N> {
    /// Create a stopped processor forwarding to `next`.
    #[must_use]
    pub fn new(next: N) -> Self {
        Self {
            next,
            gate: gate::CollectionGate::new(),
        }
    }

    /// Begin aggregating into `manager`.
    ///
    /// # Errors
    ///
    /// Returns [`gate::Error::AlreadyRunning`] if collection is already
    /// running.
    pub fn start_collection(&self, manager: Arc<AccumulatorManager>) -> Result<(), gate::Error> {
        self.gate.start(manager)
    }

    /// Stop aggregating. Idempotent.
    pub fn stop_collection(&self) {
        let _ = self.gate.stop();
    }

    /// Whether collection is running.
    #[must_use]
    pub fn is_collecting(&self) -> bool {
        self.gate.is_collecting()
    }

    /// The next stage in the chain.
    #[must_use]
    pub fn next(&self) -> &N {
        &self.next
    }

    #[inline]
    fn aggregate<T: Telemetry>(&self, item: &T) {
        let bound = self.gate.bound();
        let Some(manager) = &*bound else {
            return;
        };

        match item.kind() {
            Kind::Request => manager
                .current()
                .add_request(duration_to_ticks(item.duration()), item.outcome()),
            Kind::DependencyCall => manager
                .current()
                .add_dependency_call(duration_to_ticks(item.duration()), item.outcome()),
            Kind::Other => {}
        }
    }
}

impl<T, N> TelemetryProcessor<T> for Processor<N>
where
    T: Telemetry,
    N: TelemetryProcessor<T>,
{
    fn process(&self, item: T) {
        // A fault while aggregating must never cost the host its telemetry.
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| self.aggregate(&item))) {
            counter!("pulse_aggregation_faults").increment(1);
            warn!(
                fault = panic_message(payload.as_ref()),
                "aggregation fault swallowed, forwarding item"
            );
        }
        self.next.process(item);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::{
        DependencyTelemetry, Item, Outcome, RequestTelemetry, TraceTelemetry,
    };
    use proptest::prelude::*;
    use std::{
        sync::Mutex,
        sync::atomic::{AtomicUsize, Ordering},
        thread,
        time::Duration,
    };

    /// Terminal stage remembering everything it was handed.
    #[derive(Debug)]
    struct Recorder<T> {
        seen: Mutex<Vec<T>>,
    }

    impl<T> Default for Recorder<T> {
        fn default() -> Self {
            Self {
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    impl<T> Recorder<T> {
        fn len(&self) -> usize {
            self.seen.lock().expect("mutex poisoned").len()
        }
    }

    impl<T> TelemetryProcessor<T> for Recorder<T> {
        fn process(&self, item: T) {
            self.seen.lock().expect("mutex poisoned").push(item);
        }
    }

    /// Item whose accessors panic, standing in for a faulty host item.
    #[derive(Debug, Clone, Copy, PartialEq)]
    struct Faulty {
        kind: Kind,
    }

    impl Telemetry for Faulty {
        fn kind(&self) -> Kind {
            self.kind
        }

        fn duration(&self) -> Duration {
            panic!("duration unavailable")
        }

        fn outcome(&self) -> Outcome {
            panic!("outcome unavailable")
        }
    }

    fn request(ms: u64, success: Outcome, ikey: Option<&str>) -> Item {
        Item::Request(RequestTelemetry {
            name: "GET /".into(),
            duration: Duration::from_millis(ms),
            success,
            response_code: Some("200".into()),
            instrumentation_key: ikey.map(str::to_string),
        })
    }

    fn dependency(ms: u64, success: Outcome) -> Item {
        Item::Dependency(DependencyTelemetry {
            name: "SELECT 1".into(),
            target: Some("db".into()),
            duration: Duration::from_millis(ms),
            success,
            instrumentation_key: None,
        })
    }

    fn trace() -> Item {
        Item::Trace(TraceTelemetry {
            message: "hello".into(),
            instrumentation_key: None,
        })
    }

    fn collecting() -> (Processor<Recorder<Item>>, Arc<AccumulatorManager>) {
        let processor = Processor::new(Recorder::default());
        let manager = Arc::new(AccumulatorManager::new());
        processor.start_collection(Arc::clone(&manager)).unwrap();
        (processor, manager)
    }

    #[test]
    fn stopped_processor_forwards_without_aggregating() {
        let processor = Processor::new(Recorder::default());
        let manager = Arc::new(AccumulatorManager::new());

        processor.process(request(5, Outcome::Success, None));
        processor.process(dependency(5, Outcome::Failure));

        assert_eq!(processor.next().len(), 2);
        assert_eq!(manager.current().snapshot(), pulse_counter::Snapshot::default());
    }

    #[test]
    fn stopped_after_start_no_longer_aggregates() {
        let (processor, manager) = collecting();
        processor.process(request(1, Outcome::Success, None));
        processor.stop_collection();
        processor.process(request(1, Outcome::Success, None));

        assert_eq!(manager.current().snapshot().requests.count, 1);
        assert_eq!(processor.next().len(), 2);
    }

    #[test]
    fn requests_and_dependencies_land_in_their_counters() {
        let (processor, manager) = collecting();

        processor.process(request(10, Outcome::Success, None));
        processor.process(request(20, Outcome::Failure, None));
        processor.process(request(5, Outcome::Unknown, None));
        processor.process(dependency(7, Outcome::Failure));
        processor.process(trace());

        let snapshot = manager.current().snapshot();
        assert_eq!(snapshot.requests.count, 3);
        assert_eq!(snapshot.requests.duration_ticks, 35 * 10_000);
        assert_eq!(snapshot.requests.success_count, 1);
        assert_eq!(snapshot.requests.failure_count, 1);
        assert_eq!(snapshot.dependency_calls.count, 1);
        assert_eq!(snapshot.dependency_calls.duration_ticks, 7 * 10_000);
        assert_eq!(snapshot.dependency_calls.failure_count, 1);
        assert_eq!(processor.next().len(), 5);
    }

    #[test]
    fn instrumentation_key_is_ignored() {
        let (processor, manager) = collecting();

        processor.process(request(1, Outcome::Success, Some("tenant-a")));
        processor.process(request(1, Outcome::Success, Some("tenant-b")));
        processor.process(request(1, Outcome::Success, None));

        assert_eq!(manager.current().snapshot().requests.count, 3);
    }

    #[test]
    fn double_start_fails() {
        let (processor, _manager) = collecting();
        let other = Arc::new(AccumulatorManager::new());
        assert_eq!(
            processor.start_collection(other),
            Err(gate::Error::AlreadyRunning)
        );
        assert!(processor.is_collecting());
    }

    #[test]
    fn double_stop_is_harmless() {
        let (processor, _manager) = collecting();
        processor.stop_collection();
        processor.stop_collection();
        assert!(!processor.is_collecting());
    }

    #[test]
    fn faults_are_swallowed_and_item_forwarded_once() {
        let processor = Processor::new(Recorder::<Faulty>::default());
        let manager = Arc::new(AccumulatorManager::new());
        processor.start_collection(Arc::clone(&manager)).unwrap();

        processor.process(Faulty {
            kind: Kind::Request,
        });
        processor.process(Faulty {
            kind: Kind::DependencyCall,
        });
        // Other never reads duration or outcome, so it never faults.
        processor.process(Faulty { kind: Kind::Other });

        let seen = processor.next().seen.lock().unwrap();
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[0].kind, Kind::Request);
        assert_eq!(seen[1].kind, Kind::DependencyCall);
        assert_eq!(seen[2].kind, Kind::Other);
        assert_eq!(manager.current().snapshot(), pulse_counter::Snapshot::default());
    }

    #[test]
    fn window_rotation_under_concurrent_processing() {
        const PRODUCERS: usize = 4;
        const PER_PRODUCER: usize = 5_000;

        let forwarded = Arc::new(AtomicUsize::new(0));
        let sink = {
            let forwarded = Arc::clone(&forwarded);
            move |_: Item| {
                forwarded.fetch_add(1, Ordering::Relaxed);
            }
        };
        let processor = Arc::new(Processor::new(sink));
        let manager = Arc::new(AccumulatorManager::new());
        processor.start_collection(Arc::clone(&manager)).unwrap();

        let producers: Vec<_> = (0..PRODUCERS)
            .map(|_| {
                let processor = Arc::clone(&processor);
                thread::spawn(move || {
                    for i in 0..PER_PRODUCER {
                        let item = if i % 2 == 0 {
                            request(1, Outcome::Success, None)
                        } else {
                            dependency(1, Outcome::Failure)
                        };
                        processor.process(item);
                    }
                })
            })
            .collect();

        let mut retired = Vec::new();
        while producers.iter().any(|p| !p.is_finished()) {
            retired.push(manager.rotate());
            thread::yield_now();
        }
        for producer in producers {
            producer.join().unwrap();
        }

        let mut requests = u64::from(manager.current().snapshot().requests.count);
        let mut dependencies = u64::from(manager.current().snapshot().dependency_calls.count);
        for window in &retired {
            let snapshot = window.snapshot();
            requests += u64::from(snapshot.requests.count);
            dependencies += u64::from(snapshot.dependency_calls.count);
        }
        assert_eq!(requests, u64::try_from(PRODUCERS * PER_PRODUCER / 2).unwrap());
        assert_eq!(dependencies, u64::try_from(PRODUCERS * PER_PRODUCER / 2).unwrap());
        assert_eq!(forwarded.load(Ordering::Relaxed), PRODUCERS * PER_PRODUCER);
    }

    fn arb_item() -> impl Strategy<Value = Item> {
        let outcome = prop_oneof![
            Just(Outcome::Success),
            Just(Outcome::Failure),
            Just(Outcome::Unknown),
        ];
        prop_oneof![
            (0..1_000u64, outcome.clone()).prop_map(|(ms, o)| request(ms, o, None)),
            (0..1_000u64, outcome).prop_map(|(ms, o)| dependency(ms, o)),
            Just(trace()),
        ]
    }

    proptest! {
        #[test]
        fn every_item_forwarded_exactly_once_in_order(
            items in prop::collection::vec(arb_item(), 0..64),
            collect in any::<bool>(),
        ) {
            let processor = Processor::new(Recorder::default());
            let manager = Arc::new(AccumulatorManager::new());
            if collect {
                processor.start_collection(Arc::clone(&manager)).unwrap();
            }

            for item in items.clone() {
                processor.process(item);
            }

            let seen = processor.next().seen.lock().unwrap();
            prop_assert_eq!(&*seen, &items);

            let snapshot = manager.current().snapshot();
            let requests = items.iter().filter(|i| i.kind() == Kind::Request).count();
            let dependencies = items.iter().filter(|i| i.kind() == Kind::DependencyCall).count();
            if collect {
                prop_assert_eq!(usize::try_from(snapshot.requests.count).unwrap(), requests);
                prop_assert_eq!(usize::try_from(snapshot.dependency_calls.count).unwrap(), dependencies);
            } else {
                prop_assert_eq!(snapshot, pulse_counter::Snapshot::default());
            }
        }
    }
}
