//! Hardware event counters via the Linux `perf_event` subsystem.
//!
//! # Permissions
//!
//! Opening a counter requires one of:
//! - Root privileges
//! - The `CAP_PERFMON` capability (kernel 5.8+)
//! - `kernel.perf_event_paranoid <= 2` (check with `cat /proc/sys/kernel/perf_event_paranoid`)
//!
//! Counters exclude kernel and hypervisor activity, which is what allows the last option.

use std::io;
use std::os::fd::RawFd;

use tracing::debug;

use crate::{CounterBackend, CounterUnavailable, EventCounter};

mod bindings;

pub(crate) use bindings::*;

const PERF_TYPE_HARDWARE: u32 = 0;

const ATTR_FLAG_EXCLUDE_KERNEL: u64 = 1 << 5;
const ATTR_FLAG_EXCLUDE_HV: u64 = 1 << 6;

/// A generalized hardware event that the processor can count.
#[derive(Clone, Copy, Debug, Default, derive_more::Display, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum HardwareEvent {
    /// Retired instructions.
    #[default]
    #[display("instructions")]
    Instructions,

    /// Processor cycles. Affected by frequency scaling.
    #[display("cpu-cycles")]
    CpuCycles,

    /// Last level cache misses.
    #[display("cache-misses")]
    CacheMisses,

    /// Mispredicted branch instructions.
    #[display("branch-misses")]
    BranchMisses,
}

impl HardwareEvent {
    /// The `PERF_COUNT_HW_*` identifier of the event.
    const fn config(self) -> u64 {
        match self {
            Self::CpuCycles => 0,
            Self::Instructions => 1,
            Self::CacheMisses => 3,
            Self::BranchMisses => 5,
        }
    }

    fn attr(self) -> PerfEventAttr {
        PerfEventAttr {
            kind: PERF_TYPE_HARDWARE,
            size: u32::try_from(size_of::<PerfEventAttr>())
                .expect("perf_event_attr prefix is 64 bytes"),
            config: self.config(),
            flags: ATTR_FLAG_EXCLUDE_KERNEL | ATTR_FLAG_EXCLUDE_HV,
            ..PerfEventAttr::default()
        }
    }
}

/// Counts a [`HardwareEvent`] for each measuring thread using `perf_event_open(2)`.
///
/// Each call to [`open()`](CounterBackend::open) creates a counter that counts only the calling
/// thread, on whichever processor it runs.
///
/// # Examples
///
/// ```
/// use lap_timer::{Benchmark, CounterStatus, HardwareEvent, PerfEventBackend};
///
/// let results = Benchmark::new("spin", || {
///     std::hint::black_box((0..1000_u64).sum::<u64>());
/// })
/// .iterations(10)
/// .performance_counters(true)
/// .counter_backend(PerfEventBackend::new(HardwareEvent::CpuCycles))
/// .measure()
/// .unwrap();
///
/// match results.counter_status() {
///     CounterStatus::Available => println!("counters sampled"),
///     CounterStatus::Incomplete(reason) => println!("some counters missing: {reason}"),
///     CounterStatus::Unavailable(reason) => println!("no counters: {reason}"),
///     _ => {}
/// }
/// ```
#[derive(Debug)]
pub struct PerfEventBackend {
    event: HardwareEvent,
    bindings: BindingsFacade,
}

impl PerfEventBackend {
    /// Creates a backend that counts the given event.
    #[must_use]
    pub fn new(event: HardwareEvent) -> Self {
        Self {
            event,
            bindings: BindingsFacade::real(),
        }
    }

    #[cfg(test)]
    pub(crate) fn with_bindings(event: HardwareEvent, bindings: BindingsFacade) -> Self {
        Self { event, bindings }
    }

    /// The event counted by this backend.
    #[must_use]
    pub fn event(&self) -> HardwareEvent {
        self.event
    }
}

impl CounterBackend for PerfEventBackend {
    fn open(&self) -> Result<Box<dyn EventCounter>, CounterUnavailable> {
        let fd = self
            .bindings
            .perf_event_open(&self.event.attr())
            .map_err(|error| open_error(self.event, &error))?;

        debug!(event = %self.event, fd, "opened performance counter");

        Ok(Box::new(PerfEventCounter {
            fd,
            event: self.event,
            bindings: self.bindings.clone(),
        }))
    }
}

fn open_error(event: HardwareEvent, error: &io::Error) -> CounterUnavailable {
    match error.raw_os_error() {
        Some(libc::EACCES | libc::EPERM) => CounterUnavailable::new(format!(
            "permission denied opening {event} counter - run with CAP_PERFMON or lower kernel.perf_event_paranoid"
        )),
        Some(libc::ENOENT | libc::EOPNOTSUPP | libc::ENODEV | libc::ENOSYS) => {
            CounterUnavailable::new(format!(
                "{event} counter is not supported by this processor or kernel"
            ))
        }
        _ => CounterUnavailable::new(format!("failed to open {event} counter: {error}")),
    }
}

#[derive(Debug)]
struct PerfEventCounter {
    fd: RawFd,
    event: HardwareEvent,
    bindings: BindingsFacade,
}

impl EventCounter for PerfEventCounter {
    #[inline]
    fn read(&mut self) -> Result<u64, CounterUnavailable> {
        self.bindings.read_counter(self.fd).map_err(|error| {
            CounterUnavailable::new(format!("failed to read {} counter: {error}", self.event))
        })
    }
}

impl Drop for PerfEventCounter {
    fn drop(&mut self) {
        self.bindings.close(self.fd);
    }
}
