use std::fmt::Debug;
use std::time::Instant;

/// Provides the clock that brackets timed regions.
pub(crate) trait Platform: Debug + Send + Sync + 'static {
    /// Captures the current instant of a monotonic clock with nanosecond granularity.
    fn now(&self) -> Instant;
}
