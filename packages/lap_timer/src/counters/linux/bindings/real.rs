use std::os::fd::RawFd;
use std::{io, mem, ptr};

use crate::counters::linux::bindings::{Bindings, PerfEventAttr};

const PERF_FLAG_FD_CLOEXEC: libc::c_ulong = 1 << 3;

/// FFI bindings that target the real operating system that the build is targeting.
///
/// You would only use different bindings in unit tests that need to use mock bindings.
/// Even then, whenever possible, unit tests should use real bindings for maximum realism.
#[derive(Debug, Default)]
pub(crate) struct BuildTargetBindings;

impl Bindings for BuildTargetBindings {
    fn perf_event_open(&self, attr: &PerfEventAttr) -> io::Result<RawFd> {
        let pid: libc::pid_t = 0;
        let cpu: libc::c_int = -1;
        let group_fd: libc::c_int = -1;

        // SAFETY: `attr` is a valid `perf_event_attr` prefix whose `size` field matches the
        // structure we pass. The kernel only reads from the pointer.
        let result = unsafe {
            libc::syscall(
                libc::SYS_perf_event_open,
                ptr::from_ref(attr),
                pid,
                cpu,
                group_fd,
                PERF_FLAG_FD_CLOEXEC,
            )
        };

        if result < 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(RawFd::try_from(result).expect("the kernel never returns a file descriptor above c_int"))
    }

    fn read_counter(&self, fd: RawFd) -> io::Result<u64> {
        let mut value: u64 = 0;

        // SAFETY: We pass a pointer to a live u64 and its exact size; the kernel writes at most
        // that many bytes.
        let bytes_read = unsafe {
            libc::read(
                fd,
                (&raw mut value).cast::<libc::c_void>(),
                mem::size_of::<u64>(),
            )
        };

        if bytes_read < 0 {
            return Err(io::Error::last_os_error());
        }

        if usize::try_from(bytes_read).ok() != Some(mem::size_of::<u64>()) {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("short read of {bytes_read} bytes from performance counter"),
            ));
        }

        Ok(value)
    }

    fn close(&self, fd: RawFd) {
        // SAFETY: The caller owns `fd` and never uses it again after this call.
        // Nothing useful can be done if closing fails, so the result is ignored.
        unsafe {
            libc::close(fd);
        }
    }
}
