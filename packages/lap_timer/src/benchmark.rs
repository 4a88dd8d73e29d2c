use std::path::PathBuf;
use std::sync::Arc;

use new_zealand::nz;
use tracing::{debug, warn};

use crate::config::RunConfig;
use crate::counters::{CounterSampler, counter_status};
use crate::driver::Hooks;
#[cfg(test)]
use crate::pal::PlatformFacade;
use crate::report::publish;
use crate::sample::SampleCollector;
use crate::{BenchmarkResults, CounterBackend, Phase, Result};

/// Measures a function by executing it repeatedly on the calling thread.
///
/// A run consists of two phases:
///
/// 1. Warm-up: setup, function and teardown are executed [`warmup()`](Self::warmup) times
///    without timing anything.
/// 2. Measurement: for each of the [`iterations()`](Self::iterations), setup is executed, then
///    the function is executed inside the timed region, then teardown is executed. Every timed
///    region produces one [`Sample`](crate::Sample).
///
/// # Examples
///
/// ```
/// use std::cell::RefCell;
///
/// use lap_timer::Benchmark;
///
/// let data = RefCell::new(Vec::new());
///
/// let results = Benchmark::new("sort_reversed", || data.borrow_mut().sort_unstable())
///     .setup(|| *data.borrow_mut() = (0..1000_u32).rev().collect())
///     .teardown(|| data.borrow_mut().clear())
///     .iterations(25)
///     .warmup(2)
///     .measure()
///     .unwrap();
///
/// assert_eq!(results.samples().len(), 25);
/// ```
#[derive(derive_more::Debug)]
#[must_use]
pub struct Benchmark<'a> {
    config: RunConfig,

    #[debug(ignore)]
    function: Box<dyn Fn() + 'a>,
    #[debug(ignore)]
    setup: Option<Box<dyn Fn() + 'a>>,
    #[debug(ignore)]
    teardown: Option<Box<dyn Fn() + 'a>>,
}

impl<'a> Benchmark<'a> {
    /// Creates a benchmark of `function` with default settings.
    ///
    /// The name identifies the benchmark in reports and names the exported CSV file.
    pub fn new(name: impl Into<String>, function: impl Fn() + 'a) -> Self {
        Self {
            config: RunConfig::new(name.into()),
            function: Box::new(function),
            setup: None,
            teardown: None,
        }
    }

    /// Sets the number of timed iterations. Defaults to [`DEFAULT_ITERATIONS`](crate::DEFAULT_ITERATIONS).
    ///
    /// Zero is rejected when the benchmark is executed.
    pub fn iterations(mut self, iterations: u64) -> Self {
        self.config.iterations = iterations;
        self
    }

    /// Sets the number of untimed warm-up repetitions. Defaults to [`DEFAULT_WARMUP`](crate::DEFAULT_WARMUP).
    pub fn warmup(mut self, warmup: u64) -> Self {
        self.config.warmup = warmup;
        self
    }

    /// Sets a callback executed before every execution of the function, outside the timed region.
    pub fn setup(mut self, setup: impl Fn() + 'a) -> Self {
        self.setup = Some(Box::new(setup));
        self
    }

    /// Sets a callback executed after every execution of the function, outside the timed region.
    pub fn teardown(mut self, teardown: impl Fn() + 'a) -> Self {
        self.teardown = Some(Box::new(teardown));
        self
    }

    /// Whether to record a hardware counter delta for every timed region. Disabled by default.
    ///
    /// If the counter cannot be accessed, the run still records timing samples and reports the
    /// counters as unavailable.
    pub fn performance_counters(mut self, enabled: bool) -> Self {
        self.config.performance_counters = enabled;
        self
    }

    /// Replaces the source of hardware counters. Defaults to [`default_backend()`](crate::default_backend).
    ///
    /// Only used if [`performance_counters()`](Self::performance_counters) is enabled.
    pub fn counter_backend(mut self, backend: impl CounterBackend + 'static) -> Self {
        self.config.counter_backend = Arc::new(backend);
        self
    }

    /// Sets the directory that [`run()`](Self::run) exports results to. Defaults to the current
    /// working directory.
    pub fn output_dir(mut self, output_dir: impl Into<PathBuf>) -> Self {
        self.config.output_dir = output_dir.into();
        self
    }

    #[cfg(test)]
    pub(crate) fn with_platform(mut self, platform: PlatformFacade) -> Self {
        self.config.platform = platform;
        self
    }

    /// Executes the benchmark and returns the results without printing or exporting anything.
    ///
    /// # Errors
    ///
    /// * [`Error::InvalidConfiguration`](crate::Error::InvalidConfiguration) if the benchmark
    ///   is configured with zero iterations, more samples than fit in memory or an unusable
    ///   name. Nothing is executed then.
    /// * [`Error::BenchmarkFunctionFailure`](crate::Error::BenchmarkFunctionFailure) if the
    ///   function or one of its callbacks panicked. The run is aborted at that point.
    pub fn measure(&self) -> Result<BenchmarkResults> {
        let config = &self.config;
        let sample_count = config.validate(nz!(1))?;
        let collector = SampleCollector::try_with_capacity(sample_count)?;

        debug!(
            benchmark = %config.name,
            iterations = config.iterations,
            warmup = config.warmup,
            performance_counters = config.performance_counters,
            "starting benchmark"
        );

        let hooks = Hooks {
            setup: self.setup.as_deref(),
            function: &*self.function,
            teardown: self.teardown.as_deref(),
        };

        for _ in 0..config.warmup {
            hooks.warm_up_once().map_err(|failure| {
                warn!(benchmark = %config.name, hook = %failure.hook(), "warm-up aborted by panic");
                failure.into_error(&config.name, Phase::Warmup)
            })?;
        }

        debug!(benchmark = %config.name, "warm-up completed");

        let mut sampler = config
            .performance_counters
            .then(|| CounterSampler::open(&*config.counter_backend));

        for iteration in 0..config.iterations {
            let sample = hooks
                .measure_once(&config.platform, sampler.as_mut())
                .map_err(|failure| {
                    warn!(benchmark = %config.name, iteration, hook = %failure.hook(), "measurement aborted by panic");
                    failure.into_error(&config.name, Phase::Measurement)
                })?;

            collector.push(sample);
        }

        let samples = collector.into_samples();
        let status = counter_status(config.performance_counters, sampler.iter(), &samples);

        let results =
            BenchmarkResults::new(config.name.clone(), config.iterations, None, samples, status);

        debug!(
            benchmark = %config.name,
            mean_nanos = results.statistics().mean_nanos(),
            "benchmark completed"
        );

        Ok(results)
    }

    /// Executes the benchmark, prints the results to stdout and exports them to
    /// `<output_dir>/<name>_results.csv`.
    ///
    /// # Errors
    ///
    /// Returns the same errors as [`measure()`](Self::measure). In addition, returns
    /// [`Error::ExportFailure`](crate::Error::ExportFailure) if the CSV file could not be
    /// written, in which case the results can still be recovered from the error.
    pub fn run(&self) -> Result<BenchmarkResults> {
        publish(self.measure()?, &self.config.output_dir)
    }
}
