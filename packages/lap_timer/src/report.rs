//! Consumers of benchmark results.

use std::fmt;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::config::export_file_name;
use crate::{BenchmarkResults, CounterStatus, Error, Result};

/// Consumes the results of a completed benchmark run.
///
/// # Examples
///
/// ```
/// use lap_timer::{Benchmark, BenchmarkResults, Reporter};
///
/// #[derive(Debug, Default)]
/// struct MeanCollector {
///     means: Vec<u64>,
/// }
///
/// impl Reporter for MeanCollector {
///     fn report(&mut self, results: &BenchmarkResults) -> lap_timer::Result<()> {
///         self.means.push(results.statistics().mean_nanos());
///         Ok(())
///     }
/// }
///
/// let mut collector = MeanCollector::default();
///
/// let results = Benchmark::new("noop", || {}).iterations(5).measure().unwrap();
/// collector.report(&results).unwrap();
///
/// assert_eq!(collector.means.len(), 1);
/// ```
pub trait Reporter {
    /// Processes the results of one run.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ExportFailure`] if the results could not be written to their destination.
    fn report(&mut self, results: &BenchmarkResults) -> Result<()>;
}

/// Renders results in the human-readable console format.
///
/// ```text
/// Benchmark: sorting
/// Iterations: 3
/// Mean: 20 ns
/// Stddev: 8.16496580927726 ns
/// Min: 10 ns
/// Max: 30 ns
/// =========================
/// ```
///
/// Parallel results add a `Threads:` line after the iteration count. When performance counters
/// were requested, the counter delta of every sample is listed after the statistics, or the
/// reason why counters were unavailable. If only some samples have a counter delta, the values
/// are listed after a note saying how many are missing and why.
#[derive(Debug)]
pub struct ConsoleReport<'r> {
    results: &'r BenchmarkResults,
}

impl<'r> ConsoleReport<'r> {
    /// Creates the console rendering of the given results.
    #[must_use]
    pub fn new(results: &'r BenchmarkResults) -> Self {
        Self { results }
    }
}

impl fmt::Display for ConsoleReport<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let results = self.results;

        writeln!(f, "Benchmark: {}", results.name())?;
        writeln!(f, "Iterations: {}", results.iterations())?;

        if results.is_parallel() {
            writeln!(f, "Threads: {}", results.threads())?;
        }

        write!(f, "{}", results.statistics())?;

        match results.counter_status() {
            CounterStatus::Disabled => {}
            CounterStatus::Available => {
                writeln!(f, "Performance Counters:")?;
                write_counter_values(f, results)?;
            }
            CounterStatus::Incomplete(reason) => {
                let missing = results
                    .samples()
                    .iter()
                    .filter(|sample| sample.counter_delta().is_none())
                    .count();

                writeln!(
                    f,
                    "Performance Counters: incomplete, {missing} of {} samples missing ({reason})",
                    results.samples().len()
                )?;
                write_counter_values(f, results)?;
            }
            CounterStatus::Unavailable(reason) => {
                writeln!(f, "Performance Counters: unavailable ({reason})")?;
            }
        }

        write!(f, "=========================")
    }
}

fn write_counter_values(f: &mut fmt::Formatter<'_>, results: &BenchmarkResults) -> fmt::Result {
    for sample in results.samples() {
        match sample.counter_delta() {
            Some(delta) => writeln!(f, "Counter Value: {delta}")?,
            None => writeln!(f, "Counter Value: n/a")?,
        }
    }

    Ok(())
}

/// Prints the [`ConsoleReport`] of every run to stdout.
#[derive(Debug, Default)]
#[non_exhaustive]
pub struct StdoutReporter;

impl StdoutReporter {
    /// Creates the reporter.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Reporter for StdoutReporter {
    #[cfg_attr(test, mutants::skip)] // Too difficult to test stdout output reliably - manually tested.
    fn report(&mut self, results: &BenchmarkResults) -> Result<()> {
        println!("{}", ConsoleReport::new(results));
        Ok(())
    }
}

/// Writes the samples of every run to `<output_dir>/<name>_results.csv`.
///
/// Each file has a header row and one row per sample with the 1-based iteration index and the
/// duration in nanoseconds. When performance counters were requested, a third column holds the
/// counter delta, left empty for samples without one. An existing file is overwritten.
///
/// The output directory must already exist.
///
/// # Examples
///
/// ```no_run
/// use lap_timer::{Benchmark, CsvExporter, Reporter};
///
/// let results = Benchmark::new("noop", || {}).measure().unwrap();
///
/// let mut exporter = CsvExporter::new("target");
/// exporter.report(&results).unwrap();
///
/// assert!(exporter.path_for("noop").exists());
/// ```
#[derive(Clone, Debug)]
pub struct CsvExporter {
    output_dir: PathBuf,
}

impl CsvExporter {
    /// Creates an exporter that places files in the given directory.
    #[must_use]
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    /// The directory the files are written to.
    #[must_use]
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// The file that the results of the named benchmark are written to.
    #[must_use]
    pub fn path_for(&self, benchmark_name: &str) -> PathBuf {
        self.output_dir.join(export_file_name(benchmark_name))
    }
}

impl Reporter for CsvExporter {
    fn report(&mut self, results: &BenchmarkResults) -> Result<()> {
        let path = self.path_for(results.name());

        match write_csv(&path, results) {
            Ok(()) => {
                debug!(path = %path.display(), rows = results.samples().len(), "exported results");
                Ok(())
            }
            Err(source) => Err(Error::ExportFailure {
                path,
                source,
                results: Box::new(results.clone()),
            }),
        }
    }
}

/// Prints the console report, exports the CSV file and announces where it was written.
#[cfg_attr(test, mutants::skip)] // Too difficult to test stdout output reliably - manually tested.
pub(crate) fn publish(results: BenchmarkResults, output_dir: &Path) -> Result<BenchmarkResults> {
    StdoutReporter::new().report(&results)?;

    let mut exporter = CsvExporter::new(output_dir);
    exporter.report(&results)?;

    let path = exporter.path_for(results.name());
    info!(benchmark = results.name(), path = %path.display(), "results exported");

    println!("Results exported to {}", path.display());

    Ok(results)
}

fn write_csv(path: &Path, results: &BenchmarkResults) -> io::Result<()> {
    let mut out = BufWriter::new(File::create(path)?);

    let with_counters = results.counter_status().is_enabled();

    if with_counters {
        writeln!(out, "Iteration,Duration (ns),Performance Counter")?;
    } else {
        writeln!(out, "Iteration,Duration (ns)")?;
    }

    for (index, sample) in (1_u64..).zip(results.samples()) {
        write!(out, "{index},{}", sample.duration_nanos())?;

        if with_counters {
            match sample.counter_delta() {
                Some(delta) => write!(out, ",{delta}")?,
                None => write!(out, ",")?,
            }
        }

        writeln!(out)?;
    }

    out.flush()
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::fs;

    use new_zealand::nz;

    use super::*;
    use crate::{CounterUnavailable, Sample};

    fn results_with(status: CounterStatus, samples: Vec<Sample>) -> BenchmarkResults {
        let iterations = u64::try_from(samples.len()).unwrap();
        BenchmarkResults::new("sorting".to_string(), iterations, None, samples, status)
    }

    fn three_samples() -> Vec<Sample> {
        vec![
            Sample::from_nanos(10, None),
            Sample::from_nanos(20, None),
            Sample::from_nanos(30, None),
        ]
    }

    #[test]
    fn console_report_without_counters() {
        let results = results_with(CounterStatus::Disabled, three_samples());

        let expected = format!(
            "Benchmark: sorting\nIterations: 3\nMean: 20 ns\nStddev: {} ns\nMin: 10 ns\nMax: 30 ns\n=========================",
            (200.0_f64 / 3.0).sqrt()
        );

        assert_eq!(ConsoleReport::new(&results).to_string(), expected);
    }

    #[test]
    fn console_report_lists_counter_values() {
        let results = results_with(
            CounterStatus::Available,
            vec![Sample::from_nanos(5, Some(100)), Sample::from_nanos(5, None)],
        );

        let report = ConsoleReport::new(&results).to_string();

        assert!(report.contains("Performance Counters:\nCounter Value: 100\nCounter Value: n/a\n"));
        assert!(report.ends_with("========================="));
    }

    #[test]
    fn console_report_explains_unavailable_counters() {
        let results = results_with(
            CounterStatus::Unavailable(CounterUnavailable::new("permission denied")),
            three_samples(),
        );

        let report = ConsoleReport::new(&results).to_string();

        assert!(report.contains("Performance Counters: unavailable (permission denied)\n"));
        assert!(!report.contains("Counter Value"));
    }

    #[test]
    fn console_report_lists_available_values_when_incomplete() {
        let results = results_with(
            CounterStatus::Incomplete(CounterUnavailable::new("counter was multiplexed out")),
            vec![
                Sample::from_nanos(5, Some(100)),
                Sample::from_nanos(5, None),
                Sample::from_nanos(5, Some(120)),
            ],
        );

        let report = ConsoleReport::new(&results).to_string();

        assert!(report.contains(
            "Performance Counters: incomplete, 1 of 3 samples missing (counter was multiplexed out)\n\
             Counter Value: 100\nCounter Value: n/a\nCounter Value: 120\n"
        ));
    }

    #[test]
    #[cfg_attr(miri, ignore)] // Miri cannot talk to the real filesystem.
    fn csv_matches_console_when_incomplete() {
        let dir = tempfile::tempdir().unwrap();
        let mut exporter = CsvExporter::new(dir.path());

        exporter
            .report(&results_with(
                CounterStatus::Incomplete(CounterUnavailable::new("gone")),
                vec![Sample::from_nanos(7, Some(1_500)), Sample::from_nanos(9, None)],
            ))
            .unwrap();

        let contents = fs::read_to_string(exporter.path_for("sorting")).unwrap();

        assert_eq!(
            contents,
            "Iteration,Duration (ns),Performance Counter\n1,7,1500\n2,9,\n"
        );
    }

    #[test]
    fn console_report_shows_threads_for_parallel_runs() {
        let results = BenchmarkResults::new(
            "contended".to_string(),
            1,
            Some(nz!(2)),
            vec![Sample::from_nanos(5, None), Sample::from_nanos(5, None)],
            CounterStatus::Disabled,
        );

        let report = ConsoleReport::new(&results).to_string();

        assert!(report.starts_with("Benchmark: contended\nIterations: 1\nThreads: 2\nMean: 5 ns\n"));
    }

    #[test]
    #[cfg_attr(miri, ignore)] // Miri cannot talk to the real filesystem.
    fn csv_without_counters_has_two_columns() {
        let dir = tempfile::tempdir().unwrap();
        let mut exporter = CsvExporter::new(dir.path());

        exporter
            .report(&results_with(CounterStatus::Disabled, three_samples()))
            .unwrap();

        let contents = fs::read_to_string(dir.path().join("sorting_results.csv")).unwrap();

        assert_eq!(
            contents,
            "Iteration,Duration (ns)\n1,10\n2,20\n3,30\n"
        );
    }

    #[test]
    #[cfg_attr(miri, ignore)] // Miri cannot talk to the real filesystem.
    fn csv_with_counters_has_three_columns() {
        let dir = tempfile::tempdir().unwrap();
        let mut exporter = CsvExporter::new(dir.path());

        exporter
            .report(&results_with(
                CounterStatus::Available,
                vec![Sample::from_nanos(7, Some(1_500)), Sample::from_nanos(9, None)],
            ))
            .unwrap();

        let contents = fs::read_to_string(exporter.path_for("sorting")).unwrap();

        assert_eq!(
            contents,
            "Iteration,Duration (ns),Performance Counter\n1,7,1500\n2,9,\n"
        );
    }

    #[test]
    #[cfg_attr(miri, ignore)] // Miri cannot talk to the real filesystem.
    fn csv_keeps_counter_column_when_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let mut exporter = CsvExporter::new(dir.path());

        exporter
            .report(&results_with(
                CounterStatus::Unavailable(CounterUnavailable::new("no PMU")),
                three_samples(),
            ))
            .unwrap();

        let contents = fs::read_to_string(exporter.path_for("sorting")).unwrap();
        let lines: Vec<_> = contents.lines().collect();

        assert_eq!(lines.len(), 4);
        assert!(lines.iter().all(|line| line.split(',').count() == 3));
    }

    #[test]
    #[cfg_attr(miri, ignore)] // Miri cannot talk to the real filesystem.
    fn csv_overwrites_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut exporter = CsvExporter::new(dir.path());

        fs::write(exporter.path_for("sorting"), "stale contents that are much longer\n").unwrap();

        exporter
            .report(&results_with(
                CounterStatus::Disabled,
                vec![Sample::from_nanos(1, None)],
            ))
            .unwrap();

        let contents = fs::read_to_string(exporter.path_for("sorting")).unwrap();
        assert_eq!(contents, "Iteration,Duration (ns)\n1,1\n");
    }

    #[test]
    #[cfg_attr(miri, ignore)] // Miri cannot talk to the real filesystem.
    fn missing_directory_is_export_failure_with_results() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("does").join("not").join("exist");
        let mut exporter = CsvExporter::new(&missing);

        let error = exporter
            .report(&results_with(CounterStatus::Disabled, three_samples()))
            .unwrap_err();

        match &error {
            Error::ExportFailure { path, source, .. } => {
                assert_eq!(path, &missing.join("sorting_results.csv"));
                assert_eq!(source.kind(), io::ErrorKind::NotFound);
            }
            other => panic!("expected ExportFailure, got {other:?}"),
        }

        let recovered = error.into_results().unwrap();
        assert_eq!(recovered.samples().len(), 3);
        assert_eq!(recovered.statistics().mean_nanos(), 20);
    }
}
