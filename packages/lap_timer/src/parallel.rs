use std::mem;
use std::path::PathBuf;
use std::sync::{Arc, Barrier};

use tracing::{debug, trace, warn};

use crate::config::{RunConfig, default_thread_count, validate_threads};
use crate::counters::{CounterSampler, counter_status};
use crate::driver::{Failure, Hooks};
use crate::pal::PlatformFacade;
use crate::report::publish;
use crate::sample::SampleCollector;
use crate::threadpool::ThreadPool;
use crate::{BenchmarkResults, CounterBackend, Phase, Result};

type SharedFn<'a> = dyn Fn() + Send + Sync + 'a;

/// Measures a function by executing it on several threads at the same time.
///
/// Every iteration is a round in which each of the [`threads()`](Self::threads) workers executes
/// setup, the timed function and teardown once, producing one [`Sample`](crate::Sample) per
/// worker. Workers wait for each other after setup, so their timed regions overlap. A round only
/// starts after every worker has finished the previous one.
///
/// A run with `N` iterations on `T` threads therefore produces `N * T` samples, which are kept
/// in the order in which the timed regions completed.
///
/// The worker threads exist for the duration of one run and are reused by every round.
///
/// # Examples
///
/// ```
/// use std::sync::Mutex;
///
/// use lap_timer::ParallelBenchmark;
///
/// let shared = Mutex::new(Vec::new());
///
/// let results = ParallelBenchmark::new("contended_push", || shared.lock().unwrap().push(1_u64))
///     .teardown(|| shared.lock().unwrap().clear())
///     .threads(2)
///     .iterations(10)
///     .warmup(1)
///     .measure()
///     .unwrap();
///
/// assert_eq!(results.samples().len(), 20);
/// assert_eq!(results.threads(), 2);
/// ```
#[derive(derive_more::Debug)]
#[must_use]
pub struct ParallelBenchmark<'a> {
    config: RunConfig,
    threads: usize,

    #[debug(ignore)]
    function: Box<SharedFn<'a>>,
    #[debug(ignore)]
    setup: Option<Box<SharedFn<'a>>>,
    #[debug(ignore)]
    teardown: Option<Box<SharedFn<'a>>>,
}

impl<'a> ParallelBenchmark<'a> {
    /// Creates a parallel benchmark of `function` with default settings.
    ///
    /// By default, one worker thread is used per available processor.
    pub fn new(name: impl Into<String>, function: impl Fn() + Send + Sync + 'a) -> Self {
        Self {
            config: RunConfig::new(name.into()),
            threads: default_thread_count(),
            function: Box::new(function),
            setup: None,
            teardown: None,
        }
    }

    /// Sets the number of rounds. Defaults to [`DEFAULT_ITERATIONS`](crate::DEFAULT_ITERATIONS).
    ///
    /// Each round produces one sample per worker thread. Zero is rejected when the benchmark
    /// is executed.
    pub fn iterations(mut self, iterations: u64) -> Self {
        self.config.iterations = iterations;
        self
    }

    /// Sets the number of untimed warm-up rounds. Defaults to [`DEFAULT_WARMUP`](crate::DEFAULT_WARMUP).
    pub fn warmup(mut self, warmup: u64) -> Self {
        self.config.warmup = warmup;
        self
    }

    /// Sets the number of worker threads that execute the function concurrently.
    ///
    /// Zero is rejected when the benchmark is executed.
    pub fn threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    /// Sets a callback executed by every worker before the function, outside the timed region.
    pub fn setup(mut self, setup: impl Fn() + Send + Sync + 'a) -> Self {
        self.setup = Some(Box::new(setup));
        self
    }

    /// Sets a callback executed by every worker after the function, outside the timed region.
    pub fn teardown(mut self, teardown: impl Fn() + Send + Sync + 'a) -> Self {
        self.teardown = Some(Box::new(teardown));
        self
    }

    /// Whether to record a hardware counter delta for every timed region. Disabled by default.
    ///
    /// Every worker thread opens its own counter, so concurrent timed regions never share a
    /// baseline reading.
    pub fn performance_counters(mut self, enabled: bool) -> Self {
        self.config.performance_counters = enabled;
        self
    }

    /// Replaces the source of hardware counters. Defaults to [`default_backend()`](crate::default_backend).
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
    ///   is configured with zero iterations, zero threads, more samples than fit in memory or
    ///   an unusable name. Nothing is executed then.
    /// * [`Error::BenchmarkFunctionFailure`](crate::Error::BenchmarkFunctionFailure) if the
    ///   function or one of its callbacks panicked on any worker. The round in which this
    ///   happened is completed by the other workers, then the run is aborted.
    pub fn measure(&self) -> Result<BenchmarkResults> {
        let config = &self.config;
        let threads = validate_threads(self.threads)?;
        let sample_count = config.validate(threads)?;
        let collector = SampleCollector::try_with_capacity(sample_count)?;

        debug!(
            benchmark = %config.name,
            iterations = config.iterations,
            warmup = config.warmup,
            threads = threads.get(),
            performance_counters = config.performance_counters,
            "starting parallel benchmark"
        );

        let hooks: Hooks<'_, SharedFn<'a>> = Hooks {
            setup: self.setup.as_deref(),
            function: &*self.function,
            teardown: self.teardown.as_deref(),
        };

        let mut pool = ThreadPool::new(threads);

        for round in 0..config.warmup {
            let tasks = (0..threads.get())
                .map(|_| move || hooks.warm_up_once())
                .collect();

            let outcomes = pool.execute_each(tasks);

            self.check_round(Phase::Warmup, round, outcomes)?;
        }

        debug!(benchmark = %config.name, "warm-up completed");

        let backend = config
            .performance_counters
            .then_some(&*config.counter_backend);

        let barrier = Barrier::new(threads.get());

        let mut slots: Vec<WorkerSlot> = (0..threads.get()).map(|_| WorkerSlot::default()).collect();

        for round in 0..config.iterations {
            let tasks = mem::take(&mut slots)
                .into_iter()
                .map(|mut slot| {
                    let worker = Worker {
                        hooks,
                        platform: &config.platform,
                        backend,
                        barrier: &barrier,
                        collector: &collector,
                    };

                    move || {
                        let outcome = worker.measure_once(&mut slot);
                        (slot, outcome)
                    }
                })
                .collect();

            let (returned_slots, outcomes): (Vec<_>, Vec<_>) =
                pool.execute_each(tasks).into_iter().unzip();

            slots = returned_slots;

            self.check_round(Phase::Measurement, round, outcomes)?;
        }

        debug_assert_eq!(collector.len(), sample_count);

        let samples = collector.into_samples();
        let status = counter_status(
            config.performance_counters,
            slots.iter().filter_map(|slot| slot.sampler.as_ref()),
            &samples,
        );

        let results = BenchmarkResults::new(
            config.name.clone(),
            config.iterations,
            Some(pool.thread_count()),
            samples,
            status,
        );

        debug!(
            benchmark = %config.name,
            mean_nanos = results.statistics().mean_nanos(),
            "parallel benchmark completed"
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

    /// Turns the first failure of a completed round into the error that aborts the run.
    fn check_round(
        &self,
        phase: Phase,
        round: u64,
        outcomes: Vec<std::result::Result<(), Failure>>,
    ) -> Result<()> {
        let failure = outcomes.into_iter().find_map(std::result::Result::err);

        if let Some(failure) = failure {
            warn!(
                benchmark = %self.config.name,
                %phase,
                round,
                hook = %failure.hook(),
                "parallel benchmark aborted by panic"
            );

            return Err(failure.into_error(&self.config.name, phase));
        }

        trace!(benchmark = %self.config.name, %phase, round, "round completed");

        Ok(())
    }
}

/// State owned by one worker thread across all measurement rounds.
#[derive(Debug, Default)]
struct WorkerSlot {
    // Opened on the worker thread itself because hardware counters count the opening thread.
    sampler: Option<CounterSampler>,
}

/// Everything a worker borrows from the run for one measurement round.
#[derive(Clone, Copy, Debug)]
struct Worker<'r, 'a> {
    hooks: Hooks<'r, SharedFn<'a>>,
    platform: &'r PlatformFacade,
    backend: Option<&'r dyn CounterBackend>,
    barrier: &'r Barrier,
    collector: &'r SampleCollector,
}

impl Worker<'_, '_> {
    fn measure_once(&self, slot: &mut WorkerSlot) -> std::result::Result<(), Failure> {
        let sampler = self
            .backend
            .map(|backend| &mut *slot.sampler.get_or_insert_with(|| CounterSampler::open(backend)));

        let setup = self.hooks.setup();

        // Every worker must arrive, even after a failed setup, or the others would wait forever.
        self.barrier.wait();

        setup?;

        let sample = self.hooks.timed(self.platform, sampler)?;

        self.collector.push(sample);

        self.hooks.teardown()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::thread;
    use std::time::Duration;

    use static_assertions::assert_impl_all;

    use super::*;
    use crate::pal::FakePlatform;
    use crate::{
        CounterStatus, CounterUnavailable, Error, EventCounter, Hook, UnavailableBackend,
    };

    assert_impl_all!(ParallelBenchmark<'static>: Send, Sync);

    #[derive(Debug)]
    struct SteppingCounter {
        value: u64,
        step: u64,
    }

    impl EventCounter for SteppingCounter {
        fn read(&mut self) -> std::result::Result<u64, CounterUnavailable> {
            self.value = self.value.checked_add(self.step).unwrap();
            Ok(self.value)
        }
    }

    /// Hands out stepping counters and remembers which threads opened them.
    #[derive(Debug, Default)]
    struct RecordingBackend {
        opened_on: Arc<Mutex<Vec<String>>>,
    }

    impl CounterBackend for RecordingBackend {
        fn open(&self) -> std::result::Result<Box<dyn EventCounter>, CounterUnavailable> {
            self.opened_on
                .lock()
                .unwrap()
                .push(thread::current().name().unwrap_or_default().to_string());

            Ok(Box::new(SteppingCounter { value: 0, step: 40 }))
        }
    }

    #[test]
    #[cfg_attr(miri, ignore)] // Real threads are slow under Miri.
    fn fixed_duration_workers_produce_uniform_statistics() {
        let platform = FakePlatform::new();

        let results = ParallelBenchmark::new("fixed", || {
            platform.advance(Duration::from_nanos(5));
        })
        .iterations(2)
        .threads(4)
        .warmup(0)
        .with_platform(PlatformFacade::fake(platform.clone()))
        .measure()
        .unwrap();

        assert_eq!(results.samples().len(), 8);
        assert_eq!(results.threads(), 4);
        assert_eq!(results.iterations(), 2);

        let stats = results.statistics();
        assert_eq!(stats.mean_nanos(), 5);
        assert_eq!(stats.min_nanos(), 5);
        assert_eq!(stats.max_nanos(), 5);
        assert!(stats.std_dev_nanos().abs() < f64::EPSILON);
    }

    #[test]
    #[cfg_attr(miri, ignore)] // Real threads are slow under Miri.
    fn every_worker_runs_every_round() {
        let calls = AtomicU64::new(0);

        let results = ParallelBenchmark::new("counted_calls", || {
            calls.fetch_add(1, Ordering::Relaxed);
        })
        .iterations(5)
        .warmup(2)
        .threads(3)
        .measure()
        .unwrap();

        assert_eq!(calls.load(Ordering::Relaxed), (5 + 2) * 3);
        assert_eq!(results.samples().len(), 15);
    }

    #[test]
    #[cfg_attr(miri, ignore)] // Real threads are slow under Miri.
    fn rounds_do_not_overlap() {
        const THREADS: usize = 3;

        let events = Mutex::new(Vec::new());

        ParallelBenchmark::new("rounds", || {})
            .setup(|| events.lock().unwrap().push('+'))
            .teardown(|| events.lock().unwrap().push('-'))
            .iterations(4)
            .warmup(0)
            .threads(THREADS)
            .measure()
            .unwrap();

        let events = events.into_inner().unwrap();
        assert_eq!(events.len(), 4 * 2 * THREADS);

        // Each round is a block of setups and teardowns that is never interleaved with the next.
        for round in events.chunks(2 * THREADS) {
            assert_eq!(round.iter().filter(|e| **e == '+').count(), THREADS);
            assert_eq!(round.iter().filter(|e| **e == '-').count(), THREADS);
        }
    }

    #[test]
    #[cfg_attr(miri, ignore)] // Real threads are slow under Miri.
    fn workers_within_round_run_concurrently() {
        // Deadlocks unless all workers execute the function at the same time.
        let rendezvous = Barrier::new(3);

        let results = ParallelBenchmark::new("rendezvous", || {
            rendezvous.wait();
        })
        .iterations(3)
        .warmup(1)
        .threads(3)
        .measure()
        .unwrap();

        assert_eq!(results.samples().len(), 9);
    }

    #[test]
    #[cfg_attr(miri, ignore)] // Real threads are slow under Miri.
    fn counters_are_opened_once_on_each_worker() {
        let backend = RecordingBackend::default();
        let opened_on = Arc::clone(&backend.opened_on);

        let results = ParallelBenchmark::new("per_thread_counters", || {})
            .iterations(3)
            .warmup(0)
            .threads(2)
            .performance_counters(true)
            .counter_backend(backend)
            .measure()
            .unwrap();

        assert_eq!(results.counter_status(), &CounterStatus::Available);
        assert!(results
            .samples()
            .iter()
            .all(|s| s.counter_delta() == Some(40)));

        let mut opened_on = opened_on.lock().unwrap().clone();
        opened_on.sort();
        assert_eq!(opened_on, ["lap_timer-worker-0", "lap_timer-worker-1"]);
    }

    /// Panics when opening a counter on the first worker, works on every other worker.
    #[derive(Debug)]
    struct FirstWorkerPanicsBackend;

    impl CounterBackend for FirstWorkerPanicsBackend {
        fn open(&self) -> std::result::Result<Box<dyn EventCounter>, CounterUnavailable> {
            assert_ne!(
                thread::current().name(),
                Some("lap_timer-worker-0"),
                "no counter on this core"
            );

            Ok(Box::new(SteppingCounter { value: 0, step: 40 }))
        }
    }

    #[test]
    #[cfg_attr(miri, ignore)] // Real threads are slow under Miri.
    fn panicking_counter_backend_does_not_strand_other_workers() {
        let results = ParallelBenchmark::new("flaky_backend", || {})
            .iterations(3)
            .warmup(0)
            .threads(2)
            .performance_counters(true)
            .counter_backend(FirstWorkerPanicsBackend)
            .measure()
            .unwrap();

        assert_eq!(results.samples().len(), 6);

        let counted = results
            .samples()
            .iter()
            .filter(|s| s.counter_delta() == Some(40))
            .count();
        assert_eq!(counted, 3);

        assert!(matches!(
            results.counter_status(),
            CounterStatus::Incomplete(reason) if reason.reason().contains("no counter on this core")
        ));
    }

    #[test]
    #[cfg_attr(miri, ignore)] // Real threads are slow under Miri.
    fn unavailable_counters_still_produce_timing_samples() {
        let results = ParallelBenchmark::new("no_counters", || {})
            .iterations(2)
            .warmup(0)
            .threads(4)
            .performance_counters(true)
            .counter_backend(UnavailableBackend::with_reason("denied"))
            .measure()
            .unwrap();

        assert_eq!(results.samples().len(), 8);
        assert!(results.samples().iter().all(|s| s.counter_delta().is_none()));
        assert!(matches!(
            results.counter_status(),
            CounterStatus::Unavailable(reason) if reason.reason() == "denied"
        ));
    }

    #[test]
    #[cfg_attr(miri, ignore)] // Real threads are slow under Miri.
    fn panicking_worker_aborts_run() {
        let calls = AtomicU64::new(0);

        let error = ParallelBenchmark::new("one_bad_call", || {
            let call = calls.fetch_add(1, Ordering::SeqCst);
            assert_ne!(call, 5, "sixth call fails");
        })
        .iterations(10)
        .warmup(0)
        .threads(2)
        .measure()
        .unwrap_err();

        match error {
            Error::BenchmarkFunctionFailure { phase, hook, message, .. } => {
                assert_eq!(phase, Phase::Measurement);
                assert_eq!(hook, Hook::Function);
                assert!(message.contains("sixth call fails"));
            }
            other => panic!("expected BenchmarkFunctionFailure, got {other:?}"),
        }

        // The failing round was completed by the other worker, then no more rounds started.
        assert_eq!(calls.load(Ordering::SeqCst), 6);
    }

    #[test]
    #[cfg_attr(miri, ignore)] // Real threads are slow under Miri.
    fn panicking_setup_does_not_strand_other_workers() {
        let setups = AtomicU64::new(0);

        let error = ParallelBenchmark::new("bad_setup", || {})
            .setup(|| {
                let call = setups.fetch_add(1, Ordering::SeqCst);
                assert_ne!(call, 0, "first setup fails");
            })
            .iterations(3)
            .warmup(0)
            .threads(4)
            .measure()
            .unwrap_err();

        assert!(matches!(
            error,
            Error::BenchmarkFunctionFailure {
                hook: Hook::Setup,
                phase: Phase::Measurement,
                ..
            }
        ));
    }

    #[test]
    #[cfg_attr(miri, ignore)] // Real threads are slow under Miri.
    fn panic_during_warm_up_is_reported() {
        let error = ParallelBenchmark::new("bad_warmup", || panic!("not ready"))
            .warmup(1)
            .threads(2)
            .measure()
            .unwrap_err();

        assert!(matches!(
            error,
            Error::BenchmarkFunctionFailure {
                phase: Phase::Warmup,
                hook: Hook::Function,
                ..
            }
        ));
    }

    #[test]
    fn zero_threads_is_rejected() {
        let error = ParallelBenchmark::new("no_threads", || {})
            .threads(0)
            .measure()
            .unwrap_err();

        assert!(matches!(error, Error::InvalidConfiguration { .. }));
    }

    #[test]
    fn zero_iterations_is_rejected() {
        let error = ParallelBenchmark::new("no_iterations", || {})
            .iterations(0)
            .threads(2)
            .measure()
            .unwrap_err();

        assert!(matches!(error, Error::InvalidConfiguration { .. }));
    }

    #[test]
    fn sample_count_beyond_memory_is_rejected() {
        let calls = AtomicU64::new(0);

        let error = ParallelBenchmark::new("too_many_samples", || {
            calls.fetch_add(1, Ordering::Relaxed);
        })
        .iterations(1 << 60)
        .warmup(1)
        .threads(2)
        .measure()
        .unwrap_err();

        assert!(matches!(error, Error::InvalidConfiguration { .. }));
        assert_eq!(calls.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn default_thread_count_is_positive() {
        let benchmark = ParallelBenchmark::new("defaults", || {});

        assert!(benchmark.threads > 0);
    }
}
