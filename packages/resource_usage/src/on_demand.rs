//! Hand-over of a time-sensitive value between two processes.

use std::ffi::c_long;
use std::ptr::NonNull;
use std::sync::atomic::{self, AtomicU64};
use std::time::Duration;
use std::{fmt, io};

use libc::{sem_t, time_t, timespec};

use crate::pal::{Bindings, BindingsFacade};
use crate::{Error, Result};

const NANOS_PER_SECOND: c_long = 1_000_000_000;

/// Layout of the shared region. Only ever accessed through raw pointers (semaphores) and
/// shared references to the atomic cell.
#[repr(C)]
struct Slot {
    value: AtomicU64,
    demand: sem_t,
    supply: sem_t,
}

/// Transfers a single `u64` from a producer to a consumer, on demand, across a process
/// boundary.
///
/// The value lives in a shared memory mapping together with two process-shared semaphores,
/// "demand" and "supply", that both start out unavailable. The mapping is inherited by
/// processes forked after construction, so a parent and its child can each hold one end:
///
/// * the consumer calls [`get()`][Self::get], which signals demand and blocks until a value
///   has been supplied;
/// * the producer calls [`wait_for_demand()`][Self::wait_for_demand] and, once it returns
///   `true`, answers with [`set()`][Self::set].
///
/// Without a timeout, the producer and the consumer are never active at the same time. With a
/// timeout, the producer can do periodic work between demands without busy-waiting.
///
/// There must be exactly one producer and one consumer over the lifetime of the value, and
/// every successful `wait_for_demand()` must be answered by exactly one `set()`. Calls made in
/// a different order are not detected; the consumer may then read a stale value.
///
/// # Examples
///
/// ```
/// use std::thread;
///
/// use resource_usage::OnDemandValue;
///
/// let exchange = OnDemandValue::new().unwrap();
///
/// thread::scope(|s| {
///     s.spawn(|| {
///         assert!(exchange.wait_for_demand(None));
///         exchange.set(7);
///     });
///
///     assert_eq!(exchange.get(), 7);
/// });
/// ```
pub struct OnDemandValue {
    slot: NonNull<Slot>,
    bindings: BindingsFacade,
}

impl OnDemandValue {
    /// Creates the shared value with both parties blocked.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SharedMemory`] if the shared mapping or its semaphores cannot be
    /// created.
    pub fn new() -> Result<Self> {
        Self::with_bindings(BindingsFacade::target())
    }

    pub(crate) fn with_bindings(bindings: BindingsFacade) -> Result<Self> {
        let region = bindings
            .mmap_shared_anonymous(size_of::<Slot>())
            .map_err(Error::SharedMemory)?;

        // The mapping is page-aligned and zero-filled, which is a valid AtomicU64.
        let slot = region.cast::<Slot>();

        let demand = semaphore(slot, SlotSemaphore::Demand);
        let supply = semaphore(slot, SlotSemaphore::Supply);

        // Cleanup failures are ignored, the initialization error is the one worth reporting.
        if let Err(e) = bindings.sem_init_shared(demand, 0) {
            let _unmapped = bindings.munmap(region, size_of::<Slot>());
            return Err(Error::SharedMemory(e));
        }

        if let Err(e) = bindings.sem_init_shared(supply, 0) {
            let _destroyed = bindings.sem_destroy(demand);
            let _unmapped = bindings.munmap(region, size_of::<Slot>());
            return Err(Error::SharedMemory(e));
        }

        Ok(Self { slot, bindings })
    }

    /// Waits for the consumer to indicate demand.
    ///
    /// Returns `true` once demand has been received, after which the caller must answer with
    /// [`set()`][Self::set]. With a timeout, returns `false` if no demand arrived in time.
    #[must_use]
    pub fn wait_for_demand(&self, timeout: Option<Duration>) -> bool {
        let demand = self.semaphore(SlotSemaphore::Demand);

        let Some(timeout) = timeout else {
            self.wait(demand);
            return true;
        };

        // Interrupted waits resume against the same deadline, so signals cannot stretch it.
        let deadline = deadline_after(self.bindings.clock_gettime_realtime(), timeout);

        loop {
            match self.bindings.sem_timedwait(demand, deadline) {
                Ok(()) => return true,
                Err(e) if e.kind() == io::ErrorKind::TimedOut => return false,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => panic!("waiting on a process-shared semaphore failed: {e}"),
            }
        }
    }

    /// Satisfies the demand of a waiting consumer.
    pub fn set(&self, value: u64) {
        self.slot().value.store(value, atomic::Ordering::Release);

        self.bindings
            .sem_post(self.semaphore(SlotSemaphore::Supply))
            .expect("posting a process-shared semaphore can only fail if it is corrupted");
    }

    /// Indicates demand and waits for the producer to supply a value.
    ///
    /// This is the only way to signal demand. Blocks for as long as the producer takes to
    /// answer; there is no timeout.
    #[must_use]
    pub fn get(&self) -> u64 {
        self.bindings
            .sem_post(self.semaphore(SlotSemaphore::Demand))
            .expect("posting a process-shared semaphore can only fail if it is corrupted");

        self.wait(self.semaphore(SlotSemaphore::Supply));

        self.slot().value.load(atomic::Ordering::Acquire)
    }

    /// The value most recently supplied, without signaling demand.
    #[must_use]
    pub fn value(&self) -> u64 {
        self.slot().value.load(atomic::Ordering::Acquire)
    }

    fn wait(&self, sem: NonNull<sem_t>) {
        loop {
            match self.bindings.sem_wait(sem) {
                Ok(()) => return,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => panic!("waiting on a process-shared semaphore failed: {e}"),
            }
        }
    }

    fn slot(&self) -> &Slot {
        // SAFETY: The mapping stays valid until we are dropped. The atomic cell is the only
        // field accessed through references; semaphores are only accessed via raw pointers.
        unsafe { self.slot.as_ref() }
    }

    fn semaphore(&self, which: SlotSemaphore) -> NonNull<sem_t> {
        semaphore(self.slot, which)
    }
}

#[derive(Clone, Copy, Debug)]
enum SlotSemaphore {
    Demand,
    Supply,
}

fn semaphore(slot: NonNull<Slot>, which: SlotSemaphore) -> NonNull<sem_t> {
    let slot = slot.as_ptr();

    let sem = match which {
        // SAFETY: The slot pointer refers to a live mapping of the right size, and we only
        // compute a field address without creating a reference to it.
        SlotSemaphore::Demand => unsafe { &raw mut (*slot).demand },
        // SAFETY: As above.
        SlotSemaphore::Supply => unsafe { &raw mut (*slot).supply },
    };

    NonNull::new(sem).expect("a field of a non-null mapping is never null")
}

/// The absolute point in time `timeout` after `now`, saturating far in the future.
fn deadline_after(now: timespec, timeout: Duration) -> timespec {
    let timeout_secs = time_t::try_from(timeout.as_secs()).unwrap_or(time_t::MAX);
    let timeout_nanos =
        c_long::try_from(timeout.subsec_nanos()).expect("sub-second nanoseconds fit in c_long");

    let mut secs = now.tv_sec.saturating_add(timeout_secs);
    let mut nanos = now.tv_nsec.saturating_add(timeout_nanos);

    if nanos >= NANOS_PER_SECOND {
        nanos = nanos.saturating_sub(NANOS_PER_SECOND);
        secs = secs.saturating_add(1);
    }

    let mut deadline = now;
    deadline.tv_sec = secs;
    deadline.tv_nsec = nanos;
    deadline
}

impl Drop for OnDemandValue {
    fn drop(&mut self) {
        // Forked children leave via _exit() and never get here, so only the owner tears down.
        // There is nobody to report a failure to.
        let demand = self.semaphore(SlotSemaphore::Demand);
        let supply = self.semaphore(SlotSemaphore::Supply);

        let _destroyed = self.bindings.sem_destroy(demand);
        let _destroyed = self.bindings.sem_destroy(supply);
        let _unmapped = self.bindings.munmap(self.slot.cast(), size_of::<Slot>());
    }
}

impl fmt::Debug for OnDemandValue {
    #[cfg_attr(test, mutants::skip)] // No API contract.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OnDemandValue")
            .field("value", &self.value())
            .field("bindings", &self.bindings)
            .finish_non_exhaustive()
    }
}

// SAFETY: The slot is only touched through an atomic cell and process-shared semaphores, both
// of which may be used from any thread.
unsafe impl Send for OnDemandValue {}

// SAFETY: See above; every method takes &self and synchronizes through the semaphores.
unsafe impl Sync for OnDemandValue {}
