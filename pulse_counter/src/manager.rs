//! Ownership of the current reporting window.
//!
//! [`AccumulatorManager`] holds exactly one current [`Accumulator`].
//! Producers load it with [`AccumulatorManager::current`] and write into it;
//! the consumer closes a window with [`AccumulatorManager::swap`], which
//! atomically installs a fresh accumulator and returns the retired one.
//!
//! ```text
//! [process()] -> [ArcSwap::load()] -> [fetch_add on fields]
//!                      | (window closes)
//!                [ArcSwap::swap(fresh)] -> retired Arc -> snapshot()
//! ```
//!
//! Every producer update belongs to exactly one window, decided by whether its
//! load of the pointer happened before or after the swap. A producer that
//! loaded the old pointer just before the swap may still finish its
//! `fetch_add` after the swap returns; the retired accumulator is reference
//! counted so it stays valid for that writer, and the update is counted in
//! the retired window rather than lost. A consumer that snapshots immediately
//! after the swap may miss such a straggler, so it must read the retired
//! accumulator again once it holds the only reference
//! ([`Arc::strong_count`] is one) before dropping it.

use std::sync::Arc;

use arc_swap::{ArcSwap, Guard};

use crate::accumulator::Accumulator;

/// Holder of the current [`Accumulator`].
#[derive(Debug)]
pub struct AccumulatorManager {
    current: ArcSwap<Accumulator>,
}

impl Default for AccumulatorManager {
    fn default() -> Self {
        Self::new()
    }
}

impl AccumulatorManager {
    /// Create a manager whose current accumulator is empty.
    #[must_use]
    pub fn new() -> Self {
        Self::with_accumulator(Accumulator::new())
    }

    /// Create a manager with `accumulator` as the current window.
    #[must_use]
    pub fn with_accumulator(accumulator: Accumulator) -> Self {
        Self {
            current: ArcSwap::from_pointee(accumulator),
        }
    }

    /// The live accumulator. Safe to call concurrently with
    /// [`AccumulatorManager::swap`].
    #[inline]
    pub fn current(&self) -> Guard<Arc<Accumulator>> {
        self.current.load()
    }

    /// Install `next` as the current accumulator and return the retired one.
    pub fn swap(&self, next: Accumulator) -> Arc<Accumulator> {
        self.current.swap(Arc::new(next))
    }

    /// Close the current window, replacing it with an empty accumulator.
    pub fn rotate(&self) -> Arc<Accumulator> {
        self.swap(Accumulator::new())
    }
}
