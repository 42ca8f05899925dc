#![cfg_attr(coverage_nightly, coverage(off))]

use std::ffi::{c_int, c_void};
use std::fmt::{self, Debug};
use std::io;
use std::ptr::NonNull;
#[cfg(test)]
use std::sync::Arc;

use libc::{pid_t, sem_t, timespec};

#[cfg(test)]
use crate::pal::MockBindings;
use crate::pal::{Bindings, BuildTargetBindings};

/// Enum to hide the real/mock choice behind a single wrapper type.
#[derive(Clone)]
pub(crate) enum BindingsFacade {
    Target(&'static BuildTargetBindings),

    #[cfg(test)]
    Mock(Arc<MockBindings>),
}

impl BindingsFacade {
    pub(crate) const fn target() -> Self {
        Self::Target(&BuildTargetBindings)
    }

    #[cfg(test)]
    pub(crate) fn from_mock(mock: MockBindings) -> Self {
        Self::Mock(Arc::new(mock))
    }
}

impl Bindings for BindingsFacade {
    fn mmap_shared_anonymous(&self, len: usize) -> Result<NonNull<c_void>, io::Error> {
        match self {
            Self::Target(bindings) => bindings.mmap_shared_anonymous(len),
            #[cfg(test)]
            Self::Mock(mock) => mock.mmap_shared_anonymous(len),
        }
    }

    fn munmap(&self, addr: NonNull<c_void>, len: usize) -> Result<(), io::Error> {
        match self {
            Self::Target(bindings) => bindings.munmap(addr, len),
            #[cfg(test)]
            Self::Mock(mock) => mock.munmap(addr, len),
        }
    }

    fn sem_init_shared(&self, sem: NonNull<sem_t>, value: u32) -> Result<(), io::Error> {
        match self {
            Self::Target(bindings) => bindings.sem_init_shared(sem, value),
            #[cfg(test)]
            Self::Mock(mock) => mock.sem_init_shared(sem, value),
        }
    }

    fn sem_destroy(&self, sem: NonNull<sem_t>) -> Result<(), io::Error> {
        match self {
            Self::Target(bindings) => bindings.sem_destroy(sem),
            #[cfg(test)]
            Self::Mock(mock) => mock.sem_destroy(sem),
        }
    }

    fn sem_post(&self, sem: NonNull<sem_t>) -> Result<(), io::Error> {
        match self {
            Self::Target(bindings) => bindings.sem_post(sem),
            #[cfg(test)]
            Self::Mock(mock) => mock.sem_post(sem),
        }
    }

    fn sem_wait(&self, sem: NonNull<sem_t>) -> Result<(), io::Error> {
        match self {
            Self::Target(bindings) => bindings.sem_wait(sem),
            #[cfg(test)]
            Self::Mock(mock) => mock.sem_wait(sem),
        }
    }

    fn sem_timedwait(&self, sem: NonNull<sem_t>, deadline: timespec) -> Result<(), io::Error> {
        match self {
            Self::Target(bindings) => bindings.sem_timedwait(sem, deadline),
            #[cfg(test)]
            Self::Mock(mock) => mock.sem_timedwait(sem, deadline),
        }
    }

    fn clock_gettime_realtime(&self) -> timespec {
        match self {
            Self::Target(bindings) => bindings.clock_gettime_realtime(),
            #[cfg(test)]
            Self::Mock(mock) => mock.clock_gettime_realtime(),
        }
    }

    fn fork(&self) -> Result<pid_t, io::Error> {
        match self {
            Self::Target(bindings) => bindings.fork(),
            #[cfg(test)]
            Self::Mock(mock) => mock.fork(),
        }
    }

    fn waitpid(&self, pid: pid_t) -> Result<c_int, io::Error> {
        match self {
            Self::Target(bindings) => bindings.waitpid(pid),
            #[cfg(test)]
            Self::Mock(mock) => mock.waitpid(pid),
        }
    }

    fn getpid(&self) -> pid_t {
        match self {
            Self::Target(bindings) => bindings.getpid(),
            #[cfg(test)]
            Self::Mock(mock) => mock.getpid(),
        }
    }

    fn exit_immediately(&self, status: c_int) {
        match self {
            Self::Target(bindings) => bindings.exit_immediately(status),
            #[cfg(test)]
            Self::Mock(mock) => mock.exit_immediately(status),
        }
    }

    fn malloc_trim(&self) {
        match self {
            Self::Target(bindings) => bindings.malloc_trim(),
            #[cfg(test)]
            Self::Mock(mock) => mock.malloc_trim(),
        }
    }
}

#[cfg_attr(coverage_nightly, coverage(off))] // No API contract to test.
impl Debug for BindingsFacade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Target(inner) => inner.fmt(f),
            #[cfg(test)]
            Self::Mock(inner) => inner.fmt(f),
        }
    }
}
