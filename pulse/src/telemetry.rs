//! Telemetry items and the processing chain they travel through.
//!
//! The aggregator cares about three things per item: its [`Kind`], its
//! duration and its [`Outcome`]. Those are exposed through the [`Telemetry`]
//! trait so that host pipelines with their own item model can plug in. The
//! concrete [`Item`] here is the model pulse's own binary and tests use.

use std::time::Duration;

pub use pulse_counter::Outcome;

/// Duration unit of the counters: one tick is 100 nanoseconds.
pub const TICKS_PER_SECOND: i64 = 10_000_000;
/// Ticks in one millisecond.
pub const TICKS_PER_MILLISECOND: i64 = TICKS_PER_SECOND / 1_000;

const NANOS_PER_TICK: u128 = 100;

/// Convert `duration` to ticks, saturating at `i64::MAX`.
#[must_use]
pub fn duration_to_ticks(duration: Duration) -> i64 {
    i64::try_from(duration.as_nanos() / NANOS_PER_TICK).unwrap_or(i64::MAX)
}

/// Classification of an item for aggregation purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    /// An inbound request handled by the host.
    Request,
    /// An outbound call from the host to a dependency.
    DependencyCall,
    /// Anything else. Never aggregated.
    Other,
}

/// The view of a telemetry item the aggregator needs.
pub trait Telemetry {
    /// What sort of item this is.
    fn kind(&self) -> Kind;
    /// How long the request or call took. Ignored for [`Kind::Other`].
    fn duration(&self) -> Duration;
    /// Whether the request or call succeeded. Ignored for [`Kind::Other`].
    fn outcome(&self) -> Outcome;
}

/// A stage in a telemetry processing chain.
///
/// Stages receive items one at a time, synchronously, possibly from many
/// threads at once. A stage that does not terminate the chain hands each item
/// on to its successor.
pub trait TelemetryProcessor<T> {
    /// Handle `item`.
    fn process(&self, item: T);
}

impl<T, F> TelemetryProcessor<T> for F
where
    F: Fn(T),
{
    fn process(&self, item: T) {
        self(item);
    }
}

/// An inbound request.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RequestTelemetry {
    /// Operation name, e.g. `GET /orders/{id}`.
    pub name: String,
    /// Time taken to serve the request.
    pub duration: Duration,
    /// Whether the request succeeded.
    pub success: Outcome,
    /// Response code as reported by the host.
    pub response_code: Option<String>,
    /// Destination identity the item is addressed to.
    pub instrumentation_key: Option<String>,
}

/// An outbound dependency call.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DependencyTelemetry {
    /// Call name, e.g. the SQL command or remote operation.
    pub name: String,
    /// Remote target, e.g. a host name.
    pub target: Option<String>,
    /// Time the call took.
    pub duration: Duration,
    /// Whether the call succeeded.
    pub success: Outcome,
    /// Destination identity the item is addressed to.
    pub instrumentation_key: Option<String>,
}

/// A free-form trace message.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TraceTelemetry {
    /// Message text.
    pub message: String,
    /// Destination identity the item is addressed to.
    pub instrumentation_key: Option<String>,
}

/// A telemetry item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Item {
    /// See [`RequestTelemetry`].
    Request(RequestTelemetry),
    /// See [`DependencyTelemetry`].
    Dependency(DependencyTelemetry),
    /// See [`TraceTelemetry`].
    Trace(TraceTelemetry),
}

impl Item {
    /// The destination identity the item is addressed to, if any.
    #[must_use]
    pub fn instrumentation_key(&self) -> Option<&str> {
        match self {
            Self::Request(r) => r.instrumentation_key.as_deref(),
            Self::Dependency(d) => d.instrumentation_key.as_deref(),
            Self::Trace(t) => t.instrumentation_key.as_deref(),
        }
    }
}

impl Telemetry for Item {
    #[inline]
    fn kind(&self) -> Kind {
        match self {
            Self::Request(_) => Kind::Request,
            Self::Dependency(_) => Kind::DependencyCall,
            Self::Trace(_) => Kind::Other,
        }
    }

    #[inline]
    fn duration(&self) -> Duration {
        match self {
            Self::Request(r) => r.duration,
            Self::Dependency(d) => d.duration,
            Self::Trace(_) => Duration::ZERO,
        }
    }

    #[inline]
    fn outcome(&self) -> Outcome {
        match self {
            Self::Request(r) => r.success,
            Self::Dependency(d) => d.success,
            Self::Trace(_) => Outcome::Unknown,
        }
    }
}

impl From<RequestTelemetry> for Item {
    fn from(request: RequestTelemetry) -> Self {
        Self::Request(request)
    }
}

impl From<DependencyTelemetry> for Item {
    fn from(dependency: DependencyTelemetry) -> Self {
        Self::Dependency(dependency)
    }
}

impl From<TraceTelemetry> for Item {
    fn from(trace: TraceTelemetry) -> Self {
        Self::Trace(trace)
    }
}
