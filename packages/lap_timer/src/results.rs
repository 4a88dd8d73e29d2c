use std::num::NonZero;

use crate::{CounterStatus, Sample, Statistics};

/// The outcome of a completed benchmark run.
///
/// Results only exist for runs in which every iteration completed. A run that failed part-way
/// produces an [`Error`](crate::Error) instead.
///
/// # Examples
///
/// ```
/// use lap_timer::{Benchmark, CounterStatus};
///
/// let results = Benchmark::new("alloc_vec", || {
///     std::hint::black_box(vec![0_u8; 256]);
/// })
/// .iterations(20)
/// .measure()
/// .unwrap();
///
/// assert_eq!(results.name(), "alloc_vec");
/// assert_eq!(results.iterations(), 20);
/// assert_eq!(results.threads(), 1);
/// assert_eq!(results.samples().len(), 20);
/// assert_eq!(results.counter_status(), &CounterStatus::Disabled);
///
/// let stats = results.statistics();
/// assert!(stats.min_nanos() <= stats.mean_nanos());
/// assert!(stats.mean_nanos() <= stats.max_nanos());
/// ```
#[derive(Clone, Debug)]
pub struct BenchmarkResults {
    name: String,
    iterations: u64,
    parallel_threads: Option<NonZero<usize>>,
    samples: Vec<Sample>,
    statistics: Statistics,
    counter_status: CounterStatus,
}

impl BenchmarkResults {
    pub(crate) fn new(
        name: String,
        iterations: u64,
        parallel_threads: Option<NonZero<usize>>,
        samples: Vec<Sample>,
        counter_status: CounterStatus,
    ) -> Self {
        let statistics = Statistics::from_samples(&samples)
            .expect("a validated run always records at least one sample");

        Self {
            name,
            iterations,
            parallel_threads,
            samples,
            statistics,
            counter_status,
        }
    }

    /// Name of the benchmark.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Configured number of timed iterations.
    ///
    /// For parallel runs this is the number of rounds, each of which contributes one sample
    /// per worker thread.
    #[must_use]
    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    /// Number of threads that executed timed regions concurrently. Always 1 for serial runs.
    #[must_use]
    pub fn threads(&self) -> usize {
        self.parallel_threads.map_or(1, NonZero::get)
    }

    /// Whether the results were produced by a [`ParallelBenchmark`](crate::ParallelBenchmark).
    #[must_use]
    pub fn is_parallel(&self) -> bool {
        self.parallel_threads.is_some()
    }

    /// Every recorded sample, in the order in which the timed regions completed.
    #[must_use]
    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    /// Summary statistics over all recorded samples.
    #[must_use]
    pub fn statistics(&self) -> &Statistics {
        &self.statistics
    }

    /// Whether hardware counter deltas were recorded.
    #[must_use]
    pub fn counter_status(&self) -> &CounterStatus {
        &self.counter_status
    }
}
