use std::num::NonZero;
use std::path::{MAIN_SEPARATOR, PathBuf};
use std::sync::Arc;
use std::thread;

use new_zealand::nz;

use crate::pal::PlatformFacade;
use crate::{CounterBackend, Error, Result, Sample, default_backend};

/// Number of timed iterations executed when not configured otherwise.
pub const DEFAULT_ITERATIONS: u64 = 100;

/// Number of untimed warm-up repetitions executed when not configured otherwise.
pub const DEFAULT_WARMUP: u64 = 10;

/// Settings shared by the serial and the parallel benchmark engines.
#[derive(Clone, Debug)]
pub(crate) struct RunConfig {
    pub(crate) name: String,
    pub(crate) iterations: u64,
    pub(crate) warmup: u64,
    pub(crate) performance_counters: bool,
    pub(crate) counter_backend: Arc<dyn CounterBackend>,
    pub(crate) output_dir: PathBuf,
    pub(crate) platform: PlatformFacade,
}

impl RunConfig {
    pub(crate) fn new(name: String) -> Self {
        Self {
            name,
            iterations: DEFAULT_ITERATIONS,
            warmup: DEFAULT_WARMUP,
            performance_counters: false,
            counter_backend: default_backend(),
            output_dir: PathBuf::from("."),
            platform: PlatformFacade::real(),
        }
    }

    /// Checks that a run with this configuration can produce statistics.
    ///
    /// Returns the number of samples the run will produce with `threads` workers.
    pub(crate) fn validate(&self, threads: NonZero<usize>) -> Result<usize> {
        if self.name.is_empty() {
            return Err(invalid("benchmark name must not be empty"));
        }

        if self.name.contains(['/', '\\', MAIN_SEPARATOR]) {
            return Err(invalid(format!(
                "benchmark name '{}' must not contain path separators because it names the export file",
                self.name
            )));
        }

        if self.iterations == 0 {
            return Err(invalid("iteration count must be greater than zero"));
        }

        // No allocation may exceed `isize::MAX` bytes.
        usize::try_from(self.iterations)
            .ok()
            .and_then(|iterations| iterations.checked_mul(threads.get()))
            .filter(|&samples| {
                samples
                    .checked_mul(size_of::<Sample>())
                    .is_some_and(|bytes| bytes <= isize::MAX.unsigned_abs())
            })
            .ok_or_else(|| {
                invalid(format!(
                    "{} iterations on {threads} threads produce more samples than can be held in memory",
                    self.iterations
                ))
            })
    }
}

pub(crate) fn export_file_name(name: &str) -> String {
    format!("{name}_results.csv")
}

/// Converts a caller-supplied worker count into a validated one.
pub(crate) fn validate_threads(threads: usize) -> Result<NonZero<usize>> {
    NonZero::new(threads).ok_or_else(|| invalid("thread count must be greater than zero"))
}

/// The available hardware concurrency, used as the default worker count.
#[cfg_attr(test, mutants::skip)] // Depends on the machine the tests run on.
pub(crate) fn default_thread_count() -> usize {
    thread::available_parallelism().unwrap_or(nz!(1)).get()
}

fn invalid(problem: impl Into<String>) -> Error {
    Error::InvalidConfiguration {
        problem: problem.into(),
    }
}
