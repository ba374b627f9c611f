//! Lock-free counters for pulse's hot path.
//!
//! Every request and dependency call that flows through a host pipeline may
//! touch the structures in this crate, so nothing here blocks. The pieces, from
//! the leaf up:
//!
//! * [`packed::PackedCounter`] fuses an event count and a cumulative duration
//!   into one `u64` so that a single `fetch_add` updates both.
//! * [`accumulator::Accumulator`] holds the per-window counters for requests
//!   and dependency calls.
//! * [`manager::AccumulatorManager`] owns the current accumulator and swaps it
//!   out when a reporting window closes.
//! * [`gate::CollectionGate`] records whether collection is running and, if
//!   so, which manager producers write into.

#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![deny(clippy::print_stdout)]
#![deny(clippy::print_stderr)]
#![deny(clippy::dbg_macro)]
#![deny(unused_extern_crates)]
#![deny(unused_allocation)]
#![deny(unused_assignments)]
#![deny(unused_comparisons)]
#![deny(unreachable_pub)]
#![deny(missing_docs)]
#![deny(missing_copy_implementations)]
#![deny(missing_debug_implementations)]

pub mod accumulator;
pub mod gate;
pub mod manager;
pub mod packed;

pub use accumulator::{Accumulator, KindSnapshot, Outcome, Snapshot};
pub use gate::CollectionGate;
pub use manager::AccumulatorManager;
pub use packed::PackedCounter;
