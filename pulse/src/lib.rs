//! Inline request and dependency rate aggregation.
//!
//! This library supports the pulse binary and is meant to be embedded in a
//! host's telemetry pipeline. A [`processor::Processor`] stage observes every
//! item in the chain and folds requests and dependency calls into the
//! lock-free counters of [`pulse_counter`]; a [`collector::Collector`] closes
//! reporting windows and turns them into [`sample::Sample`] rates.

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
#![allow(clippy::cast_precision_loss)]

pub mod collector;
pub mod config;
pub mod context;
pub mod processor;
pub mod sample;
pub mod telemetry;
