use std::fmt;
use std::time::Duration;

use crate::Sample;

/// Summary statistics over the durations of a set of samples.
///
/// The mean is the integer-truncated quotient of the exact sum of all durations. The standard
/// deviation is the population standard deviation around that mean: the squared deviations are
/// summed exactly with integer arithmetic and the division by the sample count happens in
/// floating point.
///
/// Every accumulation is exact, so the statistics are identical for any ordering of the same
/// samples.
///
/// # Examples
///
/// ```
/// use lap_timer::{Sample, Statistics};
///
/// let samples = [
///     Sample::from_nanos(10, None),
///     Sample::from_nanos(20, None),
///     Sample::from_nanos(30, None),
/// ];
///
/// let stats = Statistics::from_samples(&samples).unwrap();
///
/// assert_eq!(stats.mean_nanos(), 20);
/// assert_eq!(stats.min_nanos(), 10);
/// assert_eq!(stats.max_nanos(), 30);
/// assert!((stats.std_dev_nanos() - 8.165).abs() < 0.001);
/// ```
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Statistics {
    count: u64,
    mean_nanos: u64,
    std_dev_nanos: f64,
    min_nanos: u64,
    max_nanos: u64,
}

impl Statistics {
    /// Reduces a sequence of samples into summary statistics.
    ///
    /// Returns `None` if there are no samples, as none of the statistics are defined then.
    #[must_use]
    pub fn from_samples(samples: &[Sample]) -> Option<Self> {
        let count = u64::try_from(samples.len())
            .expect("sample count exceeding u64 is impossible to hold in memory");

        if count == 0 {
            return None;
        }

        let mut sum: u128 = 0;
        let mut min_nanos = u64::MAX;
        let mut max_nanos = u64::MIN;

        for sample in samples {
            let nanos = sample.duration_nanos();

            sum = sum
                .checked_add(u128::from(nanos))
                .expect("sum of u64 durations cannot overflow u128 for any sample count that fits in memory");
            min_nanos = min_nanos.min(nanos);
            max_nanos = max_nanos.max(nanos);
        }

        let mean_nanos = u64::try_from(
            sum.checked_div(u128::from(count))
                .expect("guarded by early return on zero count"),
        )
        .expect("mean of u64 values always fits in u64");

        let mut squared_deviations: u128 = 0;

        for sample in samples {
            let deviation = u128::from(sample.duration_nanos().abs_diff(mean_nanos));

            squared_deviations = squared_deviations
                .checked_add(
                    deviation
                        .checked_mul(deviation)
                        .expect("square of a u64 always fits in u128"),
                )
                .expect("sum of squared deviations overflows u128 - this indicates an unrealistic scenario");
        }

        #[expect(
            clippy::cast_precision_loss,
            reason = "floating point variance is the documented numeric policy, precision loss only affects astronomically large inputs"
        )]
        let variance = squared_deviations as f64 / count as f64;

        Some(Self {
            count,
            mean_nanos,
            std_dev_nanos: variance.sqrt(),
            min_nanos,
            max_nanos,
        })
    }

    /// Number of samples the statistics were computed from.
    #[must_use]
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Mean duration in nanoseconds, truncated toward zero.
    #[must_use]
    pub fn mean_nanos(&self) -> u64 {
        self.mean_nanos
    }

    /// Population standard deviation of the durations, in nanoseconds.
    #[must_use]
    pub fn std_dev_nanos(&self) -> f64 {
        self.std_dev_nanos
    }

    /// Shortest observed duration in nanoseconds.
    #[must_use]
    pub fn min_nanos(&self) -> u64 {
        self.min_nanos
    }

    /// Longest observed duration in nanoseconds.
    #[must_use]
    pub fn max_nanos(&self) -> u64 {
        self.max_nanos
    }

    /// Mean duration, truncated to whole nanoseconds.
    #[must_use]
    pub fn mean(&self) -> Duration {
        Duration::from_nanos(self.mean_nanos)
    }

    /// Shortest observed duration.
    #[must_use]
    pub fn min(&self) -> Duration {
        Duration::from_nanos(self.min_nanos)
    }

    /// Longest observed duration.
    #[must_use]
    pub fn max(&self) -> Duration {
        Duration::from_nanos(self.max_nanos)
    }
}

impl fmt::Display for Statistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Mean: {} ns", self.mean_nanos)?;
        writeln!(f, "Stddev: {} ns", self.std_dev_nanos)?;
        writeln!(f, "Min: {} ns", self.min_nanos)?;
        writeln!(f, "Max: {} ns", self.max_nanos)
    }
}
