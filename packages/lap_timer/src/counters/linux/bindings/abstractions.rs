use std::fmt::Debug;
use std::io;
use std::os::fd::RawFd;

/// Layout of the leading part of the kernel `perf_event_attr` structure
/// (`PERF_ATTR_SIZE_VER0`). Newer kernels accept this size and treat the rest as zero.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[repr(C)]
pub(crate) struct PerfEventAttr {
    pub(crate) kind: u32,
    pub(crate) size: u32,
    pub(crate) config: u64,
    pub(crate) sample_period: u64,
    pub(crate) sample_type: u64,
    pub(crate) read_format: u64,
    pub(crate) flags: u64,
    pub(crate) wakeup_events: u32,
    pub(crate) bp_type: u32,
    pub(crate) config1: u64,
}

/// Bindings for FFI calls into the operating system.
///
/// All counter FFI calls must go through this trait, enabling them to be mocked.
#[cfg_attr(test, mockall::automock)]
pub(crate) trait Bindings: Debug + Send + Sync + 'static {
    /// Opens a performance counter for the calling thread on any processor.
    fn perf_event_open(&self, attr: &PerfEventAttr) -> io::Result<RawFd>;

    /// Reads the current 64-bit value of an open counter.
    fn read_counter(&self, fd: RawFd) -> io::Result<u64>;

    fn close(&self, fd: RawFd);
}
