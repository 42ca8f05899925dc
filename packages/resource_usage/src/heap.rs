//! Allocation wrapper for tracing the size of live heap allocations.

use std::alloc::{GlobalAlloc, Layout, System};
use std::fmt;
use std::sync::atomic::{self, AtomicBool, AtomicU64};

// The global allocator works with static data all over the place, so this is how it be.
// There is exactly one tracer per process, shared by every handle.
static TRACING: AtomicBool = AtomicBool::new(false);
static CURRENT_BYTES: AtomicU64 = AtomicU64::new(0);
static PEAK_BYTES: AtomicU64 = AtomicU64::new(0);

/// Size of traced heap allocations at a point in time.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[expect(
    clippy::exhaustive_structs,
    reason = "custom tracers construct this directly; the two sizes are all there is to know"
)]
pub struct TracedMemory {
    /// Bytes currently held by traced allocations.
    pub current: u64,

    /// Highest value `current` has reached since tracing started or traces were last cleared.
    pub peak: u64,
}

/// A process-wide facility that traces heap allocations.
///
/// There is only one tracer per process, so code that wants to use it must not disturb a
/// caller that was already using it. Implementations are handles to that shared state.
pub trait Tracer: fmt::Debug {
    /// Whether allocations are currently being traced.
    fn is_tracing(&self) -> bool;

    /// Starts tracing with empty traces. Does nothing if tracing is already active.
    fn start(&self);

    /// Stops tracing and discards all traces.
    fn stop(&self);

    /// Discards all traces collected so far, without stopping tracing.
    fn clear_traces(&self);

    /// The current and peak size of traced allocations.
    fn traced_memory(&self) -> TracedMemory;
}

/// Handle to the heap tracer fed by [`Allocator`].
///
/// The tracer only observes allocations made through the tracking allocator, so it reports
/// zero unless [`Allocator`] is installed as the global allocator.
///
/// All handles share one set of counters for the whole process. Allocations made by any
/// thread count toward the traces, and changing the tracer state through one handle affects
/// every other handle.
///
/// # Examples
///
/// ```
/// use resource_usage::{Allocator, HeapTracer, Tracer};
///
/// #[global_allocator]
/// static ALLOCATOR: Allocator<std::alloc::System> = Allocator::system();
///
/// let tracer = HeapTracer;
/// tracer.start();
/// let data = std::hint::black_box(vec![0_u8; 10_000]);
/// assert!(tracer.traced_memory().peak >= 10_000);
/// drop(data);
/// tracer.stop();
/// ```
#[derive(Clone, Copy, Debug, Default)]
#[expect(
    clippy::exhaustive_structs,
    reason = "a stateless handle to process-wide state, constructed by name"
)]
pub struct HeapTracer;

impl Tracer for HeapTracer {
    fn is_tracing(&self) -> bool {
        TRACING.load(atomic::Ordering::Acquire)
    }

    fn start(&self) {
        if self.is_tracing() {
            return;
        }

        reset_counters();
        TRACING.store(true, atomic::Ordering::Release);
    }

    fn stop(&self) {
        TRACING.store(false, atomic::Ordering::Release);
        reset_counters();
    }

    fn clear_traces(&self) {
        reset_counters();
    }

    fn traced_memory(&self) -> TracedMemory {
        TracedMemory {
            current: CURRENT_BYTES.load(atomic::Ordering::Relaxed),
            peak: PEAK_BYTES.load(atomic::Ordering::Relaxed),
        }
    }
}

fn reset_counters() {
    CURRENT_BYTES.store(0, atomic::Ordering::Relaxed);
    PEAK_BYTES.store(0, atomic::Ordering::Relaxed);
}

#[inline]
fn trace_allocation(size: usize) {
    if !TRACING.load(atomic::Ordering::Relaxed) {
        return;
    }

    let size: u64 = size.try_into().expect("usize always fits into u64");

    // Relaxed is sufficient: we only need atomicity, not ordering w.r.t. other memory ops.
    let current = CURRENT_BYTES
        .fetch_add(size, atomic::Ordering::Relaxed)
        .wrapping_add(size);
    PEAK_BYTES.fetch_max(current, atomic::Ordering::Relaxed);
}

#[inline]
fn trace_deallocation(size: usize) {
    if !TRACING.load(atomic::Ordering::Relaxed) {
        return;
    }

    let size: u64 = size.try_into().expect("usize always fits into u64");

    // Blocks allocated before tracing started (or before the last clear) are not known
    // individually, so releasing them may try to go below zero. We stop at zero instead.
    // The update closure never gives up, so the result is always the previous value.
    let _previous = CURRENT_BYTES.fetch_update(
        atomic::Ordering::Relaxed,
        atomic::Ordering::Relaxed,
        |current| Some(current.saturating_sub(size)),
    );
}

/// A memory allocator that traces the size of live heap allocations while a [`Tracer`]
/// session is active.
///
/// This allocator wraps any [`GlobalAlloc`] implementation, forwarding every call to it
/// unchanged. When tracing is inactive the overhead is a single relaxed atomic load.
///
/// # Examples
///
/// ```rust
/// use resource_usage::Allocator;
///
/// #[global_allocator]
/// static ALLOCATOR: Allocator<std::alloc::System> = Allocator::system();
/// ```
pub struct Allocator<A: GlobalAlloc> {
    inner: A,
}

impl<A: GlobalAlloc> fmt::Debug for Allocator<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Allocator")
            .field("inner", &"<allocator>")
            .finish()
    }
}

impl Allocator<System> {
    /// Creates a new tracing allocator using the system's default allocator.
    #[must_use]
    #[inline]
    pub const fn system() -> Self {
        Self { inner: System }
    }
}

impl<A: GlobalAlloc> Allocator<A> {
    /// Creates a new tracing allocator on top of the provided allocator.
    #[must_use]
    #[inline]
    pub const fn new(allocator: A) -> Self {
        Self { inner: allocator }
    }
}

// SAFETY: We delegate all allocation operations to the underlying allocator,
// which already implements GlobalAlloc safely, while adding tracing functionality.
unsafe impl<A: GlobalAlloc> GlobalAlloc for Allocator<A> {
    #[inline]
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        // SAFETY: We forward the call to the underlying allocator which implements GlobalAlloc.
        let ptr = unsafe { self.inner.alloc(layout) };

        if !ptr.is_null() {
            trace_allocation(layout.size());
        }

        ptr
    }

    #[inline]
    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        trace_deallocation(layout.size());

        // SAFETY: We forward the call to the underlying allocator which implements GlobalAlloc.
        unsafe { self.inner.dealloc(ptr, layout) }
    }

    #[inline]
    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        // SAFETY: We forward the call to the underlying allocator which implements GlobalAlloc.
        let ptr = unsafe { self.inner.alloc_zeroed(layout) };

        if !ptr.is_null() {
            trace_allocation(layout.size());
        }

        ptr
    }

    #[inline]
    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        // SAFETY: We forward the call to the underlying allocator which implements GlobalAlloc.
        let new_ptr = unsafe { self.inner.realloc(ptr, layout, new_size) };

        // On failure the original block stays allocated, so nothing changes.
        if !new_ptr.is_null() {
            trace_deallocation(layout.size());
            trace_allocation(new_size);
        }

        new_ptr
    }
}
