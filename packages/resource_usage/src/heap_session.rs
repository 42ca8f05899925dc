//! Peak heap tracing across a unit of work.

use tracing::trace;

use crate::Tracer;

/// Measures the peak size of traced heap allocations across a unit of work.
///
/// If the tracer is already active when the session starts, the session clears the traces
/// collected so far and leaves the tracer running when it ends, because it does not own the
/// tracer. Otherwise the session starts the tracer and stops it again when it ends.
///
/// Sessions over the same tracer must not overlap. The second session clears the traces the
/// first one has collected, so the first one reports a peak that misses everything before the
/// second one started. If the first session ends first, it stops the tracer under the second.
///
/// # Examples
///
/// ```
/// use resource_usage::{Allocator, HeapTraceSession, HeapTracer};
///
/// #[global_allocator]
/// static ALLOCATOR: Allocator<std::alloc::System> = Allocator::system();
///
/// let session = HeapTraceSession::start(&HeapTracer);
/// let data = vec![0_u8; 1_000_000];
/// drop(std::hint::black_box(data));
/// let peak = session.stop();
///
/// assert!(peak >= 1_000_000);
/// ```
#[derive(Debug)]
#[must_use = "the peak is only reported when the session is stopped"]
pub struct HeapTraceSession<'a, T: Tracer + ?Sized> {
    tracer: &'a T,

    // Whether this session started the tracer and is therefore responsible for stopping it.
    owns_tracer: bool,

    stopped: bool,
}

impl<'a, T: Tracer + ?Sized> HeapTraceSession<'a, T> {
    /// Starts measuring, either by starting the tracer or by clearing the traces of an
    /// already active tracer.
    pub fn start(tracer: &'a T) -> Self {
        let owns_tracer = if tracer.is_tracing() {
            tracer.clear_traces();
            false
        } else {
            tracer.start();
            true
        };

        trace!(owns_tracer, "heap trace session started");

        Self {
            tracer,
            owns_tracer,
            stopped: false,
        }
    }

    /// Whether this session started the tracer and will stop it when it ends.
    #[must_use]
    pub fn owns_tracer(&self) -> bool {
        self.owns_tracer
    }

    /// Ends the session and returns the peak size of traced allocations in bytes.
    #[must_use]
    pub fn stop(mut self) -> u64 {
        let peak = self.tracer.traced_memory().peak;
        self.release();

        trace!(peak, "heap trace session stopped");

        peak
    }

    fn release(&mut self) {
        if self.stopped {
            return;
        }

        self.stopped = true;

        if self.owns_tracer {
            self.tracer.stop();
        }
    }
}

impl<T: Tracer + ?Sized> Drop for HeapTraceSession<'_, T> {
    fn drop(&mut self) {
        // A session abandoned by a panicking unit of work still restores the tracer state.
        self.release();
    }
}

/// Fake tracer for unit tests, recording the calls made to it.
#[cfg(test)]
pub(crate) mod fake {
    use std::sync::{Arc, Mutex, MutexGuard};

    use crate::{TracedMemory, Tracer};

    #[derive(Debug, Default)]
    struct FakeTracerState {
        tracing: bool,
        memory: TracedMemory,
        starts: usize,
        stops: usize,
        clears: usize,
    }

    /// Clones share the same underlying state, so tests can change the traced memory while
    /// a session holds a reference to the tracer.
    #[derive(Clone, Debug, Default)]
    pub(crate) struct FakeTracer {
        state: Arc<Mutex<FakeTracerState>>,
    }

    impl FakeTracer {
        pub(crate) fn new() -> Self {
            Self::default()
        }

        pub(crate) fn already_tracing(memory: TracedMemory) -> Self {
            let tracer = Self::new();
            {
                let mut state = tracer.lock();
                state.tracing = true;
                state.memory = memory;
            }
            tracer
        }

        pub(crate) fn set_peak(&self, peak: u64) {
            self.lock().memory.peak = peak;
        }

        pub(crate) fn starts(&self) -> usize {
            self.lock().starts
        }

        pub(crate) fn stops(&self) -> usize {
            self.lock().stops
        }

        pub(crate) fn clears(&self) -> usize {
            self.lock().clears
        }

        fn lock(&self) -> MutexGuard<'_, FakeTracerState> {
            self.state
                .lock()
                .expect("FakeTracer state lock should not be poisoned")
        }
    }

    impl Tracer for FakeTracer {
        fn is_tracing(&self) -> bool {
            self.lock().tracing
        }

        fn start(&self) {
            let mut state = self.lock();
            state.starts += 1;
            if !state.tracing {
                state.tracing = true;
                state.memory = TracedMemory::default();
            }
        }

        fn stop(&self) {
            let mut state = self.lock();
            state.stops += 1;
            state.tracing = false;
            state.memory = TracedMemory::default();
        }

        fn clear_traces(&self) {
            let mut state = self.lock();
            state.clears += 1;
            state.memory = TracedMemory::default();
        }

        fn traced_memory(&self) -> TracedMemory {
            self.lock().memory
        }
    }
}
