use std::sync::Mutex;
use std::time::Duration;

use crate::{ERR_POISONED_LOCK, Error, Result};

/// One measured execution of the benchmarked function.
///
/// # Examples
///
/// ```
/// use lap_timer::Benchmark;
///
/// let results = Benchmark::new("noop", || {}).iterations(3).measure().unwrap();
///
/// for (index, sample) in results.samples().iter().enumerate() {
///     println!("#{}: {} ns", index + 1, sample.duration_nanos());
/// }
/// ```
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Sample {
    duration_nanos: u64,
    counter_delta: Option<u64>,
}

impl Sample {
    /// Creates a sample from a measured duration and an optional counter delta.
    ///
    /// Durations that do not fit in 64 bits of nanoseconds are clamped.
    #[must_use]
    pub fn new(duration: Duration, counter_delta: Option<u64>) -> Self {
        Self {
            duration_nanos: u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX),
            counter_delta,
        }
    }

    /// Creates a sample directly from a nanosecond count.
    #[must_use]
    pub fn from_nanos(duration_nanos: u64, counter_delta: Option<u64>) -> Self {
        Self {
            duration_nanos,
            counter_delta,
        }
    }

    /// Wall-clock duration of the timed region, in nanoseconds.
    #[must_use]
    pub fn duration_nanos(&self) -> u64 {
        self.duration_nanos
    }

    /// Wall-clock duration of the timed region.
    #[must_use]
    pub fn duration(&self) -> Duration {
        Duration::from_nanos(self.duration_nanos)
    }

    /// The hardware event counter delta observed across the timed region.
    ///
    /// This is `None` if performance counters were disabled or the counter could not be read
    /// for this particular timed region.
    #[must_use]
    pub fn counter_delta(&self) -> Option<u64> {
        self.counter_delta
    }
}

/// Accumulates samples from one or more measuring threads.
///
/// Samples are kept in the order in which they were appended, which under concurrency is
/// the order in which the timed regions completed, not the order in which they started.
#[derive(Debug, Default)]
pub(crate) struct SampleCollector {
    samples: Mutex<Vec<Sample>>,
}

impl SampleCollector {
    /// Reserves room for `capacity` samples up front, so that no reallocation happens while
    /// timed regions are running.
    pub(crate) fn try_with_capacity(capacity: usize) -> Result<Self> {
        let mut samples = Vec::new();

        samples
            .try_reserve_exact(capacity)
            .map_err(|error| Error::InvalidConfiguration {
                problem: format!("cannot reserve memory for {capacity} samples: {error}"),
            })?;

        Ok(Self {
            samples: Mutex::new(samples),
        })
    }

    /// Appends a sample. The lock is held only for the duration of the append.
    pub(crate) fn push(&self, sample: Sample) {
        self.samples.lock().expect(ERR_POISONED_LOCK).push(sample);
    }

    pub(crate) fn len(&self) -> usize {
        self.samples.lock().expect(ERR_POISONED_LOCK).len()
    }

    /// Consumes the collector once no more samples can arrive.
    pub(crate) fn into_samples(self) -> Vec<Sample> {
        self.samples.into_inner().expect(ERR_POISONED_LOCK)
    }
}
