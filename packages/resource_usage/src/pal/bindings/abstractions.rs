#![cfg_attr(
    test,
    expect(
        clippy::struct_field_names,
        reason = "false positive from automock generated code"
    )
)]

use std::ffi::{c_int, c_void};
use std::fmt::Debug;
use std::io;
use std::ptr::NonNull;

use libc::{pid_t, sem_t, timespec};

/// Bindings for FFI calls into the operating system.
///
/// All PAL FFI calls must go through this trait, enabling them to be mocked.
///
/// Semaphore functions must only be given semaphores that live inside a region returned by
/// `mmap_shared_anonymous()` and not yet unmapped.
#[cfg_attr(test, mockall::automock)]
pub(crate) trait Bindings: Debug + Send + Sync + 'static {
    // mmap() of a zero-filled read-write region shared with forked children
    fn mmap_shared_anonymous(&self, len: usize) -> Result<NonNull<c_void>, io::Error>;

    fn munmap(&self, addr: NonNull<c_void>, len: usize) -> Result<(), io::Error>;

    // sem_init() of a semaphore shared between processes
    fn sem_init_shared(&self, sem: NonNull<sem_t>, value: u32) -> Result<(), io::Error>;

    fn sem_destroy(&self, sem: NonNull<sem_t>) -> Result<(), io::Error>;

    fn sem_post(&self, sem: NonNull<sem_t>) -> Result<(), io::Error>;

    fn sem_wait(&self, sem: NonNull<sem_t>) -> Result<(), io::Error>;

    // sem_timedwait() with an absolute CLOCK_REALTIME deadline
    fn sem_timedwait(&self, sem: NonNull<sem_t>, deadline: timespec) -> Result<(), io::Error>;

    // clock_gettime(CLOCK_REALTIME)
    fn clock_gettime_realtime(&self) -> timespec;

    // fork(); returns 0 in the child and the child's process ID in the parent
    fn fork(&self) -> Result<pid_t, io::Error>;

    // waitpid() for a specific child; returns the raw wait status
    fn waitpid(&self, pid: pid_t) -> Result<c_int, io::Error>;

    fn getpid(&self) -> pid_t;

    // _exit(), skipping destructors, atexit handlers and stdio flushing
    fn exit_immediately(&self, status: c_int);

    // malloc_trim(0) where the C runtime supports it, otherwise nothing
    fn malloc_trim(&self);
}
