//! Hardware event counter sampling around timed regions.
//!
//! Access to hardware performance counters depends on the processor, the operating system and
//! the privileges granted to the process. This module therefore treats counter access as a
//! pluggable capability: a [`CounterBackend`] opens one [`EventCounter`] per measuring thread and
//! either produces real readings or reports [`CounterUnavailable`]. It never fabricates values.

use std::fmt::Debug;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use thiserror::Error;
use tracing::warn;

use crate::Sample;
use crate::driver::panic_message;

#[cfg(target_os = "linux")]
mod linux;

#[cfg(target_os = "linux")]
pub use linux::*;

/// One open hardware event counter, bound to the thread that opened it.
///
/// Readings must increase monotonically while the counter is open. The absolute value has no
/// meaning, only the difference between two readings on the same thread does.
#[cfg_attr(test, mockall::automock)]
pub trait EventCounter: Debug + Send {
    /// Reads the current value of the counter.
    ///
    /// # Errors
    ///
    /// Returns [`CounterUnavailable`] if the counter can no longer be read.
    fn read(&mut self) -> Result<u64, CounterUnavailable>;
}

/// Opens hardware event counters for measuring threads.
///
/// The benchmark engines call [`open()`](Self::open) on the thread that will execute the timed
/// regions, once per thread, so a backend may bind the returned counter to the calling thread.
///
/// # Examples
///
/// A backend that is never available:
///
/// ```
/// use lap_timer::{CounterBackend, CounterUnavailable, EventCounter};
///
/// #[derive(Debug)]
/// struct NoCounters;
///
/// impl CounterBackend for NoCounters {
///     fn open(&self) -> Result<Box<dyn EventCounter>, CounterUnavailable> {
///         Err(CounterUnavailable::new("this machine has no counters"))
///     }
/// }
///
/// assert!(NoCounters.open().is_err());
/// ```
pub trait CounterBackend: Debug + Send + Sync {
    /// Opens a counter bound to the calling thread.
    ///
    /// # Errors
    ///
    /// Returns [`CounterUnavailable`] if the platform does not support the counter or the
    /// process lacks the privilege to access it.
    fn open(&self) -> Result<Box<dyn EventCounter>, CounterUnavailable>;
}

/// A hardware event counter could not be opened or read.
///
/// When this happens during a benchmark run, timing samples are still recorded but their
/// counter deltas are absent.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
#[error("{reason}")]
pub struct CounterUnavailable {
    reason: String,
}

impl CounterUnavailable {
    /// Creates the error with a human-readable reason.
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    /// Why the counter is unavailable.
    #[must_use]
    pub fn reason(&self) -> &str {
        &self.reason
    }
}

/// A counter backend for platforms or environments without hardware counter access.
///
/// Every attempt to open a counter fails with [`CounterUnavailable`].
#[derive(Clone, Debug, Default)]
pub struct UnavailableBackend {
    reason: Option<String>,
}

impl UnavailableBackend {
    /// Creates a backend that reports the given reason when asked to open a counter.
    #[must_use]
    pub fn with_reason(reason: impl Into<String>) -> Self {
        Self {
            reason: Some(reason.into()),
        }
    }
}

impl CounterBackend for UnavailableBackend {
    fn open(&self) -> Result<Box<dyn EventCounter>, CounterUnavailable> {
        Err(CounterUnavailable::new(self.reason.as_deref().unwrap_or(
            "hardware performance counters are not supported on this platform",
        )))
    }
}

/// Returns the counter backend best suited to the build target.
///
/// On Linux this counts retired instructions via `perf_event_open(2)`. On other platforms the
/// returned backend always reports [`CounterUnavailable`].
#[must_use]
pub fn default_backend() -> Arc<dyn CounterBackend> {
    #[cfg(target_os = "linux")]
    {
        Arc::new(PerfEventBackend::new(HardwareEvent::Instructions))
    }

    #[cfg(not(target_os = "linux"))]
    {
        Arc::new(UnavailableBackend::default())
    }
}

/// Whether performance counters were sampled during a benchmark run.
#[derive(Clone, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum CounterStatus {
    /// Performance counters were not requested.
    Disabled,

    /// Every timed region was bracketed by successful counter readings.
    Available,

    /// Counters were read for some timed regions but not for others.
    ///
    /// Samples without a counter delta are the ones for which a reading failed.
    Incomplete(CounterUnavailable),

    /// Counters were requested but no timed region could be bracketed by counter readings.
    Unavailable(CounterUnavailable),
}

impl CounterStatus {
    /// Whether performance counters were requested for the run.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        !matches!(self, Self::Disabled)
    }
}

/// Brackets timed regions with two counter readings and yields their difference.
///
/// A sampler is owned by exactly one measuring thread, so the baseline reading is never shared
/// between concurrently timed regions.
#[derive(Debug)]
pub(crate) struct CounterSampler {
    counter: Result<Box<dyn EventCounter>, CounterUnavailable>,
    baseline: Option<u64>,

    // The first problem encountered by this sampler, reported once per run.
    first_error: Option<CounterUnavailable>,
}

impl CounterSampler {
    /// Opens a counter for the calling thread.
    ///
    /// A backend that panics is treated like one that reports itself unavailable.
    pub(crate) fn open(backend: &dyn CounterBackend) -> Self {
        let counter = panic::catch_unwind(AssertUnwindSafe(|| backend.open())).unwrap_or_else(
            |payload| {
                Err(CounterUnavailable::new(format!(
                    "counter backend panicked: {}",
                    panic_message(payload.as_ref())
                )))
            },
        );

        let first_error = counter.as_ref().err().cloned();

        if let Some(error) = &first_error {
            warn!(reason = %error, "performance counter unavailable, continuing with timing only");
        }

        Self {
            counter,
            baseline: None,
            first_error,
        }
    }

    /// Captures the baseline reading for the next timed region.
    #[inline]
    pub(crate) fn start(&mut self) {
        self.baseline = match &mut self.counter {
            Ok(counter) => match counter.read() {
                Ok(value) => Some(value),
                Err(error) => {
                    self.first_error.get_or_insert(error);
                    None
                }
            },
            Err(_) => None,
        };
    }

    /// Reads the counter again and returns the delta since [`start()`](Self::start).
    ///
    /// Returns `None` if either reading failed.
    #[inline]
    pub(crate) fn stop(&mut self) -> Option<u64> {
        let baseline = self.baseline.take()?;

        let counter = self
            .counter
            .as_mut()
            .expect("a baseline is only captured from an open counter");

        match counter.read() {
            Ok(current) => Some(delta(baseline, current)),
            Err(error) => {
                self.first_error.get_or_insert(error);
                None
            }
        }
    }

    /// The first failure observed by this sampler, if any.
    pub(crate) fn error(&self) -> Option<&CounterUnavailable> {
        self.first_error.as_ref()
    }
}

fn delta(baseline: u64, current: u64) -> u64 {
    current.checked_sub(baseline).unwrap_or_else(|| {
        warn!(
            baseline,
            current, "performance counter went backwards, clamping delta to zero"
        );
        0
    })
}

/// Combines per-thread sampler outcomes and the recorded samples into the status of a run.
pub(crate) fn counter_status<'s>(
    enabled: bool,
    samplers: impl IntoIterator<Item = &'s CounterSampler>,
    samples: &[Sample],
) -> CounterStatus {
    if !enabled {
        return CounterStatus::Disabled;
    }

    let Some(error) = samplers.into_iter().find_map(CounterSampler::error) else {
        return CounterStatus::Available;
    };

    if samples.iter().any(|sample| sample.counter_delta().is_some()) {
        CounterStatus::Incomplete(error.clone())
    } else {
        CounterStatus::Unavailable(error.clone())
    }
}
