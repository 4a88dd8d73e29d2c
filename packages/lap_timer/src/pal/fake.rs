//! Fake platform implementation for testing.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use crate::pal::Platform;

/// Fake clock whose time advances only when [`advance()`](Self::advance) is called.
///
/// Time is tracked separately for every thread, so a benchmarked function running concurrently
/// on several workers can advance "its own" clock without the workers observing each other.
/// Multiple clones of the same `FakePlatform` share the same underlying state.
#[derive(Clone, Debug)]
pub(crate) struct FakePlatform {
    epoch: Instant,
    elapsed_per_thread: Arc<Mutex<HashMap<ThreadId, Duration>>>,
}

impl FakePlatform {
    pub(crate) fn new() -> Self {
        Self {
            epoch: Instant::now(),
            elapsed_per_thread: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Advances the clock observed by the calling thread.
    pub(crate) fn advance(&self, duration: Duration) {
        let mut elapsed = self
            .elapsed_per_thread
            .lock()
            .expect("FakePlatform state lock should not be poisoned");

        let entry = elapsed.entry(thread::current().id()).or_default();
        *entry = entry
            .checked_add(duration)
            .expect("fake time overflow - tests never advance this far");
    }
}

impl Platform for FakePlatform {
    fn now(&self) -> Instant {
        let elapsed = self
            .elapsed_per_thread
            .lock()
            .expect("FakePlatform state lock should not be poisoned")
            .get(&thread::current().id())
            .copied()
            .unwrap_or_default();

        self.epoch
            .checked_add(elapsed)
            .expect("fake time overflow - tests never advance this far")
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn time_stands_still_until_advanced() {
        let platform = FakePlatform::new();

        let a = platform.now();
        let b = platform.now();

        assert_eq!(a, b);
    }

    #[test]
    fn advance_moves_time_forward() {
        let platform = FakePlatform::new();

        let start = platform.now();
        platform.advance(Duration::from_nanos(15));
        platform.advance(Duration::from_nanos(5));

        assert_eq!(platform.now().duration_since(start), Duration::from_nanos(20));
    }

    #[test]
    fn clones_share_state() {
        let platform1 = FakePlatform::new();
        let platform2 = platform1.clone();

        let start = platform1.now();
        platform2.advance(Duration::from_millis(1));

        assert_eq!(platform1.now().duration_since(start), Duration::from_millis(1));
    }

    #[test]
    #[cfg_attr(miri, ignore)] // Real threads are slow under Miri and add nothing here.
    fn threads_observe_only_their_own_time() {
        let platform = FakePlatform::new();
        let start = platform.now();

        thread::scope(|s| {
            s.spawn(|| platform.advance(Duration::from_secs(5)));
        });

        assert_eq!(platform.now(), start);
    }
}
