//! Collection on/off switch.
//!
//! The gate is either `Stopped` or `Collecting`. While collecting it is bound
//! to one [`AccumulatorManager`]. The state and the binding are a single
//! atomic `Option<Arc<AccumulatorManager>>`, so a producer can never observe
//! "collecting" together with a missing or stale manager.
//!
//! ```text
//! Stopped    --start(mgr)--> Collecting
//! Collecting --stop()------> Stopped
//! Collecting --start(mgr)--> Error::AlreadyRunning
//! Stopped    --stop()------> Stopped
//! ```

use std::sync::Arc;

use arc_swap::{ArcSwapOption, Guard};
use tracing::{debug, info};

use crate::manager::AccumulatorManager;

/// Errors produced by [`CollectionGate`].
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// `start` was called while collection was already running.
    #[error("can't start collection while it is already running")]
    AlreadyRunning,
}

/// Observable state of a [`CollectionGate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// No manager is bound; producers skip aggregation.
    Stopped,
    /// A manager is bound; producers write into its current accumulator.
    Collecting,
}

/// Enables and disables collection.
#[derive(Debug)]
pub struct CollectionGate {
    bound: ArcSwapOption<AccumulatorManager>,
}

impl Default for CollectionGate {
    fn default() -> Self {
        Self::new()
    }
}

impl CollectionGate {
    /// Create a stopped gate.
    #[must_use]
    pub fn new() -> Self {
        Self {
            bound: ArcSwapOption::empty(),
        }
    }

    /// Begin collecting into `manager`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyRunning`] if the gate is already collecting. The
    /// existing binding is left in place.
    pub fn start(&self, manager: Arc<AccumulatorManager>) -> Result<(), Error> {
        let previous = self
            .bound
            .compare_and_swap(&None::<Arc<AccumulatorManager>>, Some(manager));
        if previous.is_some() {
            return Err(Error::AlreadyRunning);
        }
        info!("collection started");
        Ok(())
    }

    /// Stop collecting, returning the manager that was bound, if any.
    ///
    /// Stopping a stopped gate does nothing. Producers that loaded the binding
    /// before this call may still complete their in-flight updates.
    pub fn stop(&self) -> Option<Arc<AccumulatorManager>> {
        let previous = self.bound.swap(None);
        if previous.is_some() {
            info!("collection stopped");
        } else {
            debug!("stop requested while not collecting, ignoring");
        }
        previous
    }

    /// The current state.
    #[must_use]
    pub fn state(&self) -> State {
        if self.bound.load().is_some() {
            State::Collecting
        } else {
            State::Stopped
        }
    }

    /// Whether the gate is collecting.
    #[must_use]
    pub fn is_collecting(&self) -> bool {
        self.state() == State::Collecting
    }

    /// The bound manager, read as one value together with the state.
    #[inline]
    pub fn bound(&self) -> Guard<Option<Arc<AccumulatorManager>>> {
        self.bound.load()
    }
}
