use std::fmt::Debug;
use std::io;
use std::os::fd::RawFd;
#[cfg(test)]
use std::sync::Arc;

#[cfg(test)]
use crate::counters::linux::bindings::MockBindings;
use crate::counters::linux::bindings::{Bindings, BuildTargetBindings, PerfEventAttr};

#[derive(Clone)]
pub(crate) enum BindingsFacade {
    Real(&'static BuildTargetBindings),

    #[cfg(test)]
    Mock(Arc<MockBindings>),
}

impl BindingsFacade {
    pub(crate) const fn real() -> Self {
        Self::Real(&BuildTargetBindings)
    }
}

impl Bindings for BindingsFacade {
    fn perf_event_open(&self, attr: &PerfEventAttr) -> io::Result<RawFd> {
        match self {
            Self::Real(bindings) => bindings.perf_event_open(attr),
            #[cfg(test)]
            Self::Mock(bindings) => bindings.perf_event_open(attr),
        }
    }

    fn read_counter(&self, fd: RawFd) -> io::Result<u64> {
        match self {
            Self::Real(bindings) => bindings.read_counter(fd),
            #[cfg(test)]
            Self::Mock(bindings) => bindings.read_counter(fd),
        }
    }

    fn close(&self, fd: RawFd) {
        match self {
            Self::Real(bindings) => bindings.close(fd),
            #[cfg(test)]
            Self::Mock(bindings) => bindings.close(fd),
        }
    }
}

impl From<&'static BuildTargetBindings> for BindingsFacade {
    fn from(bindings: &'static BuildTargetBindings) -> Self {
        Self::Real(bindings)
    }
}

#[cfg(test)]
impl From<MockBindings> for BindingsFacade {
    fn from(bindings: MockBindings) -> Self {
        Self::Mock(Arc::new(bindings))
    }
}

impl Debug for BindingsFacade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Real(bindings) => bindings.fmt(f),
            #[cfg(test)]
            Self::Mock(bindings) => bindings.fmt(f),
        }
    }
}
