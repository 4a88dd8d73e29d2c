//! Executes one warm-up repetition or one timed iteration of a benchmark.
//!
//! Both benchmark engines build on the same primitives here, so the placement of the clock
//! readings relative to the setup and teardown callbacks is defined in exactly one place:
//!
//! ```text
//! setup -> clock start -> counter start -> function -> counter stop -> clock stop -> teardown
//! ```

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use crate::counters::CounterSampler;
use crate::pal::Platform;
use crate::{Error, Hook, Phase, Sample};

/// Borrowed user callbacks of one benchmark.
///
/// `F` is the unsized callable type, such as `dyn Fn()` for the serial engine or
/// `dyn Fn() + Send + Sync` for the parallel engine.
pub(crate) struct Hooks<'h, F: ?Sized + 'h> {
    pub(crate) setup: Option<&'h F>,
    pub(crate) function: &'h F,
    pub(crate) teardown: Option<&'h F>,
}

// Manual impls because derives would require `F: Clone` and `F: Debug`.
impl<F: ?Sized> Clone for Hooks<'_, F> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<F: ?Sized> Copy for Hooks<'_, F> {}

impl<F: ?Sized> fmt::Debug for Hooks<'_, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("has_setup", &self.setup.is_some())
            .field("has_teardown", &self.teardown.is_some())
            .finish_non_exhaustive()
    }
}

impl<F> Hooks<'_, F>
where
    F: Fn() + ?Sized,
{
    /// Executes setup, function and teardown once, without timing anything.
    pub(crate) fn warm_up_once(&self) -> Result<(), Failure> {
        self.setup()?;
        trap(Hook::Function, self.function)?;
        self.teardown()
    }

    /// Executes one complete timed iteration, including its untimed setup and teardown.
    pub(crate) fn measure_once(
        &self,
        platform: &impl Platform,
        sampler: Option<&mut CounterSampler>,
    ) -> Result<Sample, Failure> {
        self.setup()?;
        let sample = self.timed(platform, sampler)?;
        self.teardown()?;

        Ok(sample)
    }

    pub(crate) fn setup(&self) -> Result<(), Failure> {
        self.setup.map_or(Ok(()), |setup| trap(Hook::Setup, setup))
    }

    pub(crate) fn teardown(&self) -> Result<(), Failure> {
        self.teardown
            .map_or(Ok(()), |teardown| trap(Hook::Teardown, teardown))
    }

    /// Executes the benchmarked function inside the timed region.
    ///
    /// The counter is read inside the clock readings so that the counter delta covers the
    /// complete execution of the function.
    pub(crate) fn timed(
        &self,
        platform: &impl Platform,
        mut sampler: Option<&mut CounterSampler>,
    ) -> Result<Sample, Failure> {
        let function = self.function;

        let (start, end, counter_delta) = panic::catch_unwind(AssertUnwindSafe(|| {
            let start = platform.now();

            if let Some(sampler) = sampler.as_deref_mut() {
                sampler.start();
            }

            function();

            let counter_delta = sampler.as_deref_mut().and_then(CounterSampler::stop);

            let end = platform.now();

            (start, end, counter_delta)
        }))
        .map_err(|payload| Failure::from_panic(Hook::Function, payload.as_ref()))?;

        Ok(Sample::new(
            end.saturating_duration_since(start),
            counter_delta,
        ))
    }
}

/// A user callback panicked.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct Failure {
    hook: Hook,
    message: String,
}

impl Failure {
    fn from_panic(hook: Hook, payload: &(dyn Any + Send)) -> Self {
        Self {
            hook,
            message: panic_message(payload),
        }
    }

    pub(crate) fn hook(&self) -> Hook {
        self.hook
    }

    pub(crate) fn into_error(self, benchmark: &str, phase: Phase) -> Error {
        Error::BenchmarkFunctionFailure {
            benchmark: benchmark.to_string(),
            phase,
            hook: self.hook,
            message: self.message,
        }
    }
}

/// Extracts the human-readable message of a caught panic.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "panic with a non-string payload".to_string())
}

fn trap<F>(hook: Hook, callback: &F) -> Result<(), Failure>
where
    F: Fn() + ?Sized,
{
    panic::catch_unwind(AssertUnwindSafe(callback))
        .map_err(|payload| Failure::from_panic(hook, payload.as_ref()))
}
