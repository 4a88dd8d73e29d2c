#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! Measures the wall-clock latency of a unit of work over repeated trials.
//!
//! This package executes a benchmarked function many times, records the duration of every
//! execution, optionally samples a hardware event counter around each execution and reduces
//! the recorded samples into summary statistics. Results can be printed to the console and
//! exported to a CSV file for offline analysis.
//!
//! The core functionality includes:
//! - [`Benchmark`] - Executes the benchmarked function serially on the calling thread
//! - [`ParallelBenchmark`] - Executes the benchmarked function on a fixed number of concurrent
//!   workers, one round of concurrent executions per iteration
//! - [`BenchmarkResults`] - The samples and [`Statistics`] produced by a run
//! - [`CounterBackend`] - Pluggable access to hardware event counters
//! - [`Reporter`] - Consumers of results, such as [`StdoutReporter`] and [`CsvExporter`]
//!
//! This package is not meant for use in production, serving only as a development tool for
//! benchmarking and performance analysis.
//!
//! # Operating Principles
//!
//! ## Warm-up
//!
//! Before anything is measured, the setup, function and teardown callbacks are executed a
//! configured number of times without timing. This stabilizes caches, branch predictors and
//! processor frequency scaling.
//!
//! ## Timed region
//!
//! Only the benchmarked function is inside the timed region. The setup and teardown callbacks
//! are executed immediately before and after each timed region but are never measured.
//!
//! ## Failures
//!
//! A panic in the benchmarked function or in a setup/teardown callback aborts the entire run
//! with [`Error::BenchmarkFunctionFailure`]. Partial statistics from an interrupted run are
//! never reported, as they would be misleading.
//!
//! # Example
//!
//! ```
//! use std::hint::black_box;
//!
//! use lap_timer::Benchmark;
//!
//! let results = Benchmark::new("sum_of_squares", || {
//!     black_box((0..100_u64).map(|x| x * x).sum::<u64>());
//! })
//! .iterations(50)
//! .warmup(5)
//! .measure()
//! .unwrap();
//!
//! assert_eq!(results.samples().len(), 50);
//! println!("Mean: {} ns", results.statistics().mean_nanos());
//! ```
//!
//! # Parallel example
//!
//! ```
//! use std::sync::atomic::{AtomicU64, Ordering};
//!
//! use lap_timer::ParallelBenchmark;
//!
//! let counter = AtomicU64::new(0);
//!
//! let results = ParallelBenchmark::new("contended_increment", || {
//!     counter.fetch_add(1, Ordering::Relaxed);
//! })
//! .iterations(10)
//! .warmup(0)
//! .threads(4)
//! .measure()
//! .unwrap();
//!
//! assert_eq!(results.samples().len(), 40);
//! assert_eq!(counter.load(Ordering::Relaxed), 40);
//! ```

mod benchmark;
mod config;
mod counters;
mod driver;
mod error;
mod pal;
mod parallel;
mod report;
mod results;
mod sample;
mod statistics;
mod threadpool;

pub use benchmark::*;
pub use config::{DEFAULT_ITERATIONS, DEFAULT_WARMUP};
pub use counters::*;
pub use error::*;
pub use parallel::*;
pub use report::*;
pub use results::*;
pub use sample::*;
pub use statistics::*;

pub(crate) const ERR_POISONED_LOCK: &str = "poisoned lock - safe execution no longer possible";
