use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::BenchmarkResults;

/// Errors that can occur when running a benchmark.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The benchmark was configured in a way that makes measurement impossible, such as
    /// zero iterations or zero worker threads. Detected before any callback is executed.
    #[error("invalid benchmark configuration: {problem}")]
    InvalidConfiguration {
        /// A human-readable description of the problem.
        problem: String,
    },

    /// The benchmarked function or one of its setup/teardown callbacks panicked.
    ///
    /// The run was aborted at the point of failure and no statistics were produced.
    #[error("benchmark '{benchmark}' failed in {hook} during {phase}: {message}")]
    BenchmarkFunctionFailure {
        /// Name of the benchmark that failed.
        benchmark: String,

        /// Whether the failure happened during warm-up or measurement.
        phase: Phase,

        /// Which of the user-supplied callbacks failed.
        hook: Hook,

        /// The panic message, if the panic payload was a string.
        message: String,
    },

    /// The measured results could not be written to the export file.
    ///
    /// The in-memory results are unaffected and can be recovered from the error.
    #[error("failed to export results to '{}': {source}", path.display())]
    ExportFailure {
        /// The file that could not be written.
        path: PathBuf,

        /// The underlying I/O error.
        source: io::Error,

        /// The results that were being exported.
        results: Box<BenchmarkResults>,
    },
}

impl Error {
    /// Returns the measured results if the error occurred after measurement completed.
    ///
    /// Only an [`Error::ExportFailure`] carries results; every other error is raised before
    /// a complete set of samples exists.
    #[must_use]
    pub fn into_results(self) -> Option<BenchmarkResults> {
        match self {
            Self::ExportFailure { results, .. } => Some(*results),
            _ => None,
        }
    }
}

/// The stage of a benchmark run in which a callback was executed.
#[derive(Clone, Copy, Debug, derive_more::Display, Eq, PartialEq)]
#[non_exhaustive]
pub enum Phase {
    /// Untimed repetitions executed before measurement begins.
    #[display("warm-up")]
    Warmup,

    /// Timed iterations whose samples are recorded.
    #[display("measurement")]
    Measurement,
}

/// Identifies one of the user-supplied callbacks of a benchmark.
#[derive(Clone, Copy, Debug, derive_more::Display, Eq, PartialEq)]
#[non_exhaustive]
pub enum Hook {
    /// The callback executed before every execution of the benchmarked function.
    #[display("setup")]
    Setup,

    /// The benchmarked function itself.
    #[display("benchmarked function")]
    Function,

    /// The callback executed after every execution of the benchmarked function.
    #[display("teardown")]
    Teardown,
}

/// A specialized `Result` type for benchmark operations, returning the crate's
/// [`Error`] type as the error value.
pub type Result<T> = std::result::Result<T, Error>;
