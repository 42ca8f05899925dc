use std::ffi::{c_int, c_void};
use std::fmt::Debug;
use std::ptr::{self, NonNull};
use std::{io, mem};

use libc::{pid_t, sem_t, timespec};

use crate::pal::Bindings;

/// FFI bindings that target the real operating system that the build is targeting.
///
/// You would only use different bindings in PAL unit tests that need to use mock bindings.
/// Even then, whenever possible, unit tests should use real bindings for maximum realism.
#[derive(Debug, Default)]
pub(crate) struct BuildTargetBindings;

// Real OS bindings are excluded from coverage measurement because:
// 1. They are tested via the sampler tests running on actual Linux.
// 2. Error paths require OS-level failures that are impractical to trigger in tests.
#[cfg_attr(coverage_nightly, coverage(off))]
impl Bindings for BuildTargetBindings {
    fn mmap_shared_anonymous(&self, len: usize) -> Result<NonNull<c_void>, io::Error> {
        // SAFETY: No safety requirements beyond passing valid arguments. We request a fresh
        // mapping at an address of the kernel's choosing, so no existing memory is affected.
        let addr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };

        if addr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }

        NonNull::new(addr).ok_or_else(|| io::Error::other("mmap() returned a null mapping"))
    }

    fn munmap(&self, addr: NonNull<c_void>, len: usize) -> Result<(), io::Error> {
        // SAFETY: The caller passes a mapping it obtained from mmap_shared_anonymous() and
        // no longer references.
        let result = unsafe { libc::munmap(addr.as_ptr(), len) };

        if result == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }

    fn sem_init_shared(&self, sem: NonNull<sem_t>, value: u32) -> Result<(), io::Error> {
        // Nonzero means the semaphore is shared between processes.
        // SAFETY: The semaphore lives in a shared mapping that is valid for writes.
        let result = unsafe { libc::sem_init(sem.as_ptr(), 1, value) };

        if result == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }

    fn sem_destroy(&self, sem: NonNull<sem_t>) -> Result<(), io::Error> {
        // SAFETY: The semaphore was initialized by sem_init_shared() and nobody waits on it.
        let result = unsafe { libc::sem_destroy(sem.as_ptr()) };

        if result == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }

    fn sem_post(&self, sem: NonNull<sem_t>) -> Result<(), io::Error> {
        // SAFETY: The semaphore was initialized by sem_init_shared() and is still mapped.
        let result = unsafe { libc::sem_post(sem.as_ptr()) };

        if result == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }

    fn sem_wait(&self, sem: NonNull<sem_t>) -> Result<(), io::Error> {
        // SAFETY: The semaphore was initialized by sem_init_shared() and is still mapped.
        let result = unsafe { libc::sem_wait(sem.as_ptr()) };

        if result == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }

    fn sem_timedwait(&self, sem: NonNull<sem_t>, deadline: timespec) -> Result<(), io::Error> {
        // SAFETY: The semaphore was initialized by sem_init_shared() and is still mapped.
        let result = unsafe { libc::sem_timedwait(sem.as_ptr(), &raw const deadline) };

        if result == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }

    fn clock_gettime_realtime(&self) -> timespec {
        // SAFETY: All zeroes is a valid timespec.
        let mut now: timespec = unsafe { mem::zeroed() };

        // SAFETY: No safety requirements beyond passing a valid output pointer.
        let result = unsafe { libc::clock_gettime(libc::CLOCK_REALTIME, &raw mut now) };

        assert!(
            result == 0,
            "CLOCK_REALTIME is always available: {}",
            io::Error::last_os_error()
        );

        now
    }

    fn fork(&self) -> Result<pid_t, io::Error> {
        // SAFETY: The child only runs the sampling loop and leaves via _exit(), so it never
        // returns into code that relies on state owned by other threads of the parent.
        let pid = unsafe { libc::fork() };

        if pid < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(pid)
        }
    }

    fn waitpid(&self, pid: pid_t) -> Result<c_int, io::Error> {
        let mut status: c_int = 0;

        // SAFETY: No safety requirements beyond passing a valid output pointer.
        let result = unsafe { libc::waitpid(pid, &raw mut status, 0) };

        if result < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(status)
        }
    }

    fn getpid(&self) -> pid_t {
        // SAFETY: No safety requirements.
        unsafe { libc::getpid() }
    }

    fn exit_immediately(&self, status: c_int) {
        // SAFETY: No safety requirements; the process ends here.
        unsafe { libc::_exit(status) }
    }

    fn malloc_trim(&self) {
        #[cfg(target_env = "gnu")]
        {
            // SAFETY: No safety requirements.
            unsafe {
                libc::malloc_trim(0);
            }
        }
    }
}
