//! Integration of the measurements with a test host.

#[cfg(not(target_os = "linux"))]
use std::convert::Infallible;
use std::io;
use std::time::{Duration, Instant};

use tracing::debug;

#[cfg(not(target_os = "linux"))]
use crate::Error;
use crate::markers::{register_markers, uss_interval};
use crate::{
    DEFAULT_INTERVAL, HeapTraceSession, HeapTracer, MarkerRegistry, REPORT_DURATION,
    REPORT_TRACEMALLOC, REPORT_USS, RESOURCE_CATEGORY, Result, ResourceSummary, RunLog, Stage,
    SummaryWriter, TestItem, Tracer, format_duration, format_peak_allocated, format_peak_uss,
};
#[cfg(target_os = "linux")]
use crate::{UssSampler, UssSession};

#[cfg(target_os = "linux")]
type UssHandle = UssSession;

#[cfg(not(target_os = "linux"))]
type UssHandle = Infallible;

/// Measures the resource usage of marked tests and summarizes it at the end of the run.
///
/// A host calls the three hooks of this type at the matching points of a run:
///
/// * [`configure()`][Self::configure] once, to register the markers;
/// * [`run_call()`][Self::run_call] around the body of every test;
/// * [`terminal_summary()`][Self::terminal_summary] once after all tests have run.
///
/// Tests without any of the markers run exactly as they would without this type.
///
/// # Concurrency
///
/// Heap tracing uses a single process-wide tracer, so tests marked `report_tracemalloc` must
/// not run concurrently with each other. Overlapping calls share the tracer: a call that
/// starts while another is tracing resets the peak the other one reports, and the call that
/// started the tracer stops it even while the other one still measures. Tests with only the
/// other markers may run in parallel.
///
/// # Examples
///
/// ```
/// use resource_usage::{Marker, Outcome, ResourceUsage, RunLog, Stage, TestItem, TestReport};
///
/// let plugin = ResourceUsage::new();
///
/// let mut markers = Vec::new();
/// plugin.configure(&mut markers);
///
/// let mut item = TestItem::new("test_sum").marker(Marker::report_duration());
/// plugin.run_call(&mut item, || (1..=10).sum::<u32>()).unwrap();
///
/// let mut log = RunLog::new();
/// log.record(TestReport::from_item(&item, Stage::Call, Outcome::Passed));
///
/// let mut output = resource_usage::TerminalWriter::new(Vec::new());
/// plugin.terminal_summary(&log, &mut output).unwrap();
/// let output = String::from_utf8(output.into_inner()).unwrap();
///
/// assert!(output.contains("test_sum (call) running time: "));
/// ```
#[derive(Debug)]
pub struct ResourceUsage<T: Tracer = HeapTracer> {
    tracer: T,
    default_interval: Duration,
    trim_heap: bool,
}

impl ResourceUsage<HeapTracer> {
    /// Creates the integration, tracing heap allocations through the tracking
    /// [`Allocator`][crate::Allocator].
    #[must_use]
    pub fn new() -> Self {
        Self::with_tracer(HeapTracer)
    }
}

impl Default for ResourceUsage<HeapTracer> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Tracer> ResourceUsage<T> {
    /// Creates the integration with a custom heap tracer.
    #[must_use]
    pub const fn with_tracer(tracer: T) -> Self {
        Self {
            tracer,
            default_interval: DEFAULT_INTERVAL,
            trim_heap: true,
        }
    }

    /// Sets the USS sampling interval for tests whose markers do not specify one.
    #[must_use]
    pub const fn default_interval(mut self, interval: Duration) -> Self {
        self.default_interval = interval;
        self
    }

    /// Sets whether freed heap memory is returned to the operating system before the USS
    /// baseline of a test is measured.
    #[must_use]
    pub const fn trim_heap(mut self, trim_heap: bool) -> Self {
        self.trim_heap = trim_heap;
        self
    }

    /// Registers the markers with the host.
    pub fn configure(&self, registry: &mut (impl MarkerRegistry + ?Sized)) {
        register_markers(registry);
    }

    /// Runs the body of a test, measuring whatever its markers request.
    ///
    /// The measurements nest around the body: USS sampling outermost, then heap tracing, then
    /// the wall clock. The results are attached to the `call` stage of the item in the order
    /// running time, unique set size, allocated memory.
    ///
    /// If the body panics, the panic propagates after every measurement has been torn down
    /// and nothing is attached.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInterval`][crate::Error::InvalidInterval] without running the
    /// body if a `report_uss` marker has an unusable interval. Returns the sampler error if
    /// USS sampling fails; the body has then run, unless sampling could not start.
    pub fn run_call<R>(&self, item: &mut TestItem, body: impl FnOnce() -> R) -> Result<R> {
        let report_duration = item.has_marker(REPORT_DURATION);
        let report_uss = item.has_marker(REPORT_USS);
        let report_heap = item.has_marker(REPORT_TRACEMALLOC);

        if !report_duration && !report_uss && !report_heap {
            return Ok(body());
        }

        let interval = if report_uss {
            Some(uss_interval(item.iter_markers(REPORT_USS), self.default_interval)?)
        } else {
            None
        };

        debug!(
            node_id = item.node_id(),
            report_duration,
            report_uss,
            report_heap,
            "measuring test call"
        );

        let uss_session = interval
            .map(|interval| self.start_uss(interval))
            .transpose()?;
        let heap_session = report_heap.then(|| HeapTraceSession::start(&self.tracer));

        let started = Instant::now();
        let result = body();
        let elapsed = started.elapsed();

        let heap_peak = heap_session.map(HeapTraceSession::stop);
        let uss_delta = uss_session.map(stop_uss).transpose()?;

        debug!(
            node_id = item.node_id(),
            ?elapsed,
            uss_delta,
            heap_peak,
            "measured test call"
        );

        if report_duration {
            item.add_report_section(Stage::Call, RESOURCE_CATEGORY, format_duration(elapsed));
        }

        if let Some(delta) = uss_delta {
            item.add_report_section(Stage::Call, RESOURCE_CATEGORY, format_peak_uss(delta));
        }

        if let Some(peak) = heap_peak {
            item.add_report_section(Stage::Call, RESOURCE_CATEGORY, format_peak_allocated(peak));
        }

        Ok(result)
    }

    /// Writes the resource usage section of the end-of-run summary, if any test reported
    /// resource usage.
    ///
    /// # Errors
    ///
    /// Returns the error of the writer.
    pub fn terminal_summary(
        &self,
        log: &RunLog,
        writer: &mut (impl SummaryWriter + ?Sized),
    ) -> io::Result<()> {
        ResourceSummary::from_log(log).write_to(writer)
    }

    #[cfg(target_os = "linux")]
    fn start_uss(&self, interval: Duration) -> Result<UssHandle> {
        UssSampler::new()
            .interval(interval)
            .trim_heap(self.trim_heap)
            .start()
    }

    #[cfg(not(target_os = "linux"))]
    #[expect(
        clippy::unused_self,
        reason = "signature shared with the Linux implementation"
    )]
    fn start_uss(&self, _interval: Duration) -> Result<UssHandle> {
        Err(Error::Unsupported)
    }
}

/// Ends USS sampling and returns how far the unique set size rose above the baseline.
#[cfg(target_os = "linux")]
fn stop_uss(session: UssHandle) -> Result<u64> {
    session.stop().map(|measurement| measurement.delta())
}

#[cfg(not(target_os = "linux"))]
fn stop_uss(session: UssHandle) -> Result<u64> {
    match session {}
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::cell::Cell;
    use std::panic::{self, AssertUnwindSafe};

    use super::*;
    use crate::heap_session::fake::FakeTracer;
    use crate::{Annotation, Error, Marker, Outcome, TerminalWriter, TestReport};

    fn resource_texts(item: &TestItem) -> Vec<&str> {
        item.annotations()
            .iter()
            .inspect(|a| {
                assert_eq!(a.stage(), Stage::Call);
                assert_eq!(a.category(), RESOURCE_CATEGORY);
            })
            .map(Annotation::text)
            .collect()
    }

    #[test]
    fn unmarked_test_runs_without_measuring() {
        let tracer = FakeTracer::new();
        let plugin = ResourceUsage::with_tracer(tracer.clone());
        let mut item = TestItem::new("t").marker(Marker::new("slow"));

        let result = plugin.run_call(&mut item, || 42).unwrap();

        assert_eq!(result, 42);
        assert!(item.annotations().is_empty());
        assert_eq!(tracer.starts(), 0);
    }

    #[test]
    fn duration_is_reported() {
        let plugin = ResourceUsage::with_tracer(FakeTracer::new());
        let mut item = TestItem::new("t").marker(Marker::report_duration());

        plugin.run_call(&mut item, || ()).unwrap();

        let texts = resource_texts(&item);
        assert_eq!(texts.len(), 1);
        assert!(texts[0].starts_with("running time: 0.0"), "{texts:?}");
    }

    #[test]
    fn heap_peak_is_reported() {
        let tracer = FakeTracer::new();
        let plugin = ResourceUsage::with_tracer(tracer.clone());
        let mut item = TestItem::new("t").marker(Marker::report_tracemalloc());

        plugin
            .run_call(&mut item, || tracer.set_peak(2_000_000))
            .unwrap();

        assert_eq!(resource_texts(&item), ["peak allocated memory: 2MB"]);
        assert_eq!(tracer.starts(), 1);
        assert_eq!(tracer.stops(), 1);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn annotations_follow_fixed_order() {
        let tracer = FakeTracer::new();
        let plugin = ResourceUsage::with_tracer(tracer.clone());

        // Declared in a different order than they are reported in.
        let mut item = TestItem::new("t")
            .marker(Marker::report_tracemalloc())
            .marker(Marker::report_uss().kwarg("interval", "0.01"))
            .marker(Marker::report_duration());

        plugin
            .run_call(&mut item, || tracer.set_peak(1500))
            .unwrap();

        let texts = resource_texts(&item);
        assert_eq!(texts.len(), 3);
        assert!(texts[0].starts_with("running time: "));
        assert!(texts[1].starts_with("peak unique set size: "));
        assert_eq!(texts[2], "peak allocated memory: 1.5kB");
    }

    #[cfg(not(target_os = "linux"))]
    #[test]
    fn uss_is_unsupported() {
        let plugin = ResourceUsage::with_tracer(FakeTracer::new());
        let mut item = TestItem::new("t").marker(Marker::report_uss());

        let result = plugin.run_call(&mut item, || ());

        assert!(matches!(result, Err(Error::Unsupported)));
    }

    #[test]
    fn invalid_interval_fails_before_body() {
        let plugin = ResourceUsage::with_tracer(FakeTracer::new());
        let mut item = TestItem::new("t").marker(Marker::report_uss().kwarg("interval", "-1"));
        let ran = Cell::new(false);

        let result = plugin.run_call(&mut item, || ran.set(true));

        assert!(matches!(result, Err(Error::InvalidInterval { .. })));
        assert!(!ran.get());
        assert!(item.annotations().is_empty());
    }

    #[test]
    fn panicking_body_restores_tracer() {
        let tracer = FakeTracer::new();
        let plugin = ResourceUsage::with_tracer(tracer.clone());
        let mut item = TestItem::new("t").marker(Marker::report_tracemalloc());

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            plugin.run_call(&mut item, || panic!("test body failed"))
        }));

        assert!(result.is_err());
        assert!(!tracer.is_tracing());
        assert!(item.annotations().is_empty());
    }

    #[test]
    fn configure_registers_all_markers() {
        let plugin = ResourceUsage::with_tracer(FakeTracer::new());
        let mut lines = Vec::new();

        plugin.configure(&mut lines);

        assert_eq!(lines.len(), 3);
    }

    #[test]
    fn summary_is_written_only_when_something_was_measured() {
        let plugin = ResourceUsage::with_tracer(FakeTracer::new());
        let quiet = TestItem::new("quiet");
        let mut log = RunLog::new();
        log.record(TestReport::from_item(&quiet, Stage::Call, Outcome::Passed));

        let mut output = TerminalWriter::new(Vec::new());
        plugin.terminal_summary(&log, &mut output).unwrap();

        assert!(output.into_inner().is_empty());
    }
}
