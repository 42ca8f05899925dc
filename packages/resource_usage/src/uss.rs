//! Peak unique set size sampling from a forked helper process.

use std::panic::{self, AssertUnwindSafe};
use std::time::Duration;
use std::{fmt, io};

use libc::pid_t;
use tracing::debug;

use crate::pal::{Bindings, BindingsFacade};
use crate::{DEFAULT_INTERVAL, Error, OnDemandValue, ProcessTree, Result};

/// Supplied by the helper process instead of a size once any measurement has failed.
const MEASUREMENT_FAILED: u64 = u64::MAX;

/// Configures and starts sampling of the peak unique set size (USS) of a process tree.
///
/// Sampling happens in a helper process forked from the current process, so that the
/// measurement does not disturb the memory usage of the process being measured. The helper
/// measures the USS of the target process plus all its recursive descendants (except the
/// helper itself) once when sampling starts, then every `interval` until sampling stops.
///
/// The parent and the helper process hand measurements over through an [`OnDemandValue`], so
/// the baseline is measured exactly when the parent asks for it and the final value contains
/// every sample taken up to the moment the parent stops sampling.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use resource_usage::UssSampler;
///
/// let session = UssSampler::new()
///     .interval(Duration::from_millis(10))
///     .start()
///     .unwrap();
///
/// let data = std::hint::black_box(vec![1_u8; 10_000_000]);
/// std::thread::sleep(Duration::from_millis(50));
/// drop(data);
///
/// let measurement = session.stop().unwrap();
/// assert!(measurement.peak() >= measurement.baseline());
/// ```
#[derive(Debug)]
#[must_use = "sampling only happens after start() is called"]
pub struct UssSampler {
    interval: Duration,
    target_pid: Option<u32>,
    trim_heap: bool,
    bindings: BindingsFacade,
}

impl UssSampler {
    /// Creates a sampler for the current process with the default interval.
    pub fn new() -> Self {
        Self::with_bindings(BindingsFacade::target())
    }

    pub(crate) const fn with_bindings(bindings: BindingsFacade) -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            target_pid: None,
            trim_heap: true,
            bindings,
        }
    }

    /// Sets the time between two samples. Defaults to [`DEFAULT_INTERVAL`].
    ///
    /// Memory held for less than one interval may be missed.
    pub const fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Sets the root of the process tree to measure. Defaults to the current process.
    pub const fn target_pid(mut self, pid: u32) -> Self {
        self.target_pid = Some(pid);
        self
    }

    /// Sets whether freed heap memory is returned to the operating system before the baseline
    /// is measured. Defaults to `true`.
    ///
    /// Memory that the C runtime retains after it has been freed still counts as unique set
    /// size, so it would otherwise make the baseline depend on earlier work.
    pub const fn trim_heap(mut self, trim_heap: bool) -> Self {
        self.trim_heap = trim_heap;
        self
    }

    /// Spawns the helper process and measures the baseline.
    ///
    /// Returns once the baseline is known, so any memory the caller allocates afterwards is
    /// attributed to the session.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SharedMemory`] if the value exchange cannot be created,
    /// [`Error::Spawn`] if the helper process cannot be forked and [`Error::Measurement`] if
    /// the target process cannot be measured.
    pub fn start(self) -> Result<UssSession> {
        let target = self
            .target_pid
            .unwrap_or_else(|| pid_to_u32(self.bindings.getpid()));

        let exchange = OnDemandValue::with_bindings(self.bindings.clone())?;

        let helper = self.bindings.fork().map_err(Error::Spawn)?;

        if helper == 0 {
            self.run_helper(&exchange, target);
        }

        debug!(helper, target, interval = ?self.interval, "USS sampler process spawned");

        if self.trim_heap {
            self.bindings.malloc_trim();
        }

        let baseline = exchange.get();

        let session = UssSession {
            exchange,
            helper,
            target,
            baseline,
            bindings: self.bindings,
            finished: false,
        };

        if baseline == MEASUREMENT_FAILED {
            // Dropping the session performs the final demand and reaps the helper.
            drop(session);
            return Err(Error::Measurement { pid: target });
        }

        debug!(helper, baseline, "USS baseline measured");

        Ok(session)
    }

    /// Body of the forked helper process. Never returns.
    ///
    /// Only the calling thread exists in the helper, so this must not touch any lock that
    /// another thread of the parent might have held at the time of the fork. That includes
    /// logging and the default panic hook.
    fn run_helper(&self, exchange: &OnDemandValue, target: u32) -> ! {
        silence_panics();

        let own_pid = pid_to_u32(self.bindings.getpid());
        let tree = ProcessTree::new();

        sample_until_demanded(
            exchange,
            || {
                panic::catch_unwind(AssertUnwindSafe(|| tree.tree_uss(target, Some(own_pid))))
                    .ok()
                    .and_then(io::Result::ok)
            },
            self.interval,
        );

        self.bindings.exit_immediately(0);
        unreachable!("the USS sampler process exits without returning");
    }
}

impl Default for UssSampler {
    fn default() -> Self {
        Self::new()
    }
}

/// The producer side of USS sampling.
///
/// Answers the first demand with a fresh sample, then samples every `interval` and answers
/// the next demand with the highest sample seen, after which it returns. A failed sample
/// turns every later answer into [`MEASUREMENT_FAILED`].
fn sample_until_demanded(
    exchange: &OnDemandValue,
    mut measure: impl FnMut() -> Option<u64>,
    interval: Duration,
) {
    // The parent asks for the baseline once it is ready to be measured.
    let demanded = exchange.wait_for_demand(None);
    debug_assert!(demanded, "a wait without timeout only ends with demand");

    let mut peak = measure();
    exchange.set(peak.unwrap_or(MEASUREMENT_FAILED));

    while !exchange.wait_for_demand(Some(interval)) {
        peak = peak.and_then(|peak| measure().map(|sample| peak.max(sample)));
    }

    exchange.set(peak.unwrap_or(MEASUREMENT_FAILED));
}

/// Replaces the panic hook with one that does nothing.
///
/// The default hook locks stderr to print the panic message. A panic caught in the helper
/// still unwinds to its `catch_unwind()` but never touches stderr.
fn silence_panics() {
    panic::set_hook(Box::new(|_| {}));
}

fn pid_to_u32(pid: pid_t) -> u32 {
    u32::try_from(pid).expect("process IDs are always positive")
}

/// A running USS sampling session, started by [`UssSampler::start()`].
///
/// Dropping the session without calling [`stop()`][Self::stop] still ends sampling and waits
/// for the helper process to exit.
#[must_use = "the peak is only reported when the session is stopped"]
pub struct UssSession {
    exchange: OnDemandValue,
    helper: pid_t,
    target: u32,
    baseline: u64,
    bindings: BindingsFacade,
    finished: bool,
}

impl UssSession {
    /// The unique set size of the process tree when sampling started, in bytes.
    #[must_use]
    pub const fn baseline(&self) -> u64 {
        self.baseline
    }

    /// The process ID of the helper process that takes the samples.
    #[must_use]
    pub fn helper_pid(&self) -> u32 {
        pid_to_u32(self.helper)
    }

    /// Ends sampling and waits for the helper process to exit.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Join`] if waiting for the helper process fails,
    /// [`Error::SamplerExit`] if it did not exit cleanly and [`Error::Measurement`] if any
    /// sample failed.
    pub fn stop(mut self) -> Result<UssMeasurement> {
        let peak = self.finish()?;

        debug!(
            helper = self.helper,
            baseline = self.baseline,
            peak,
            "USS sampling stopped"
        );

        Ok(UssMeasurement {
            baseline: self.baseline,
            peak,
        })
    }

    fn finish(&mut self) -> Result<u64> {
        self.finished = true;

        // This demand ends the sampling loop of the helper process.
        let peak = self.exchange.get();

        self.reap()?;

        if peak == MEASUREMENT_FAILED {
            return Err(Error::Measurement { pid: self.target });
        }

        Ok(peak)
    }

    fn reap(&self) -> Result<()> {
        let status = loop {
            match self.bindings.waitpid(self.helper) {
                Ok(status) => break status,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(source) => {
                    return Err(Error::Join {
                        pid: self.helper,
                        source,
                    });
                }
            }
        };

        debug!(helper = self.helper, status, "USS sampler process reaped");

        if libc::WIFEXITED(status) && libc::WEXITSTATUS(status) == 0 {
            Ok(())
        } else {
            Err(Error::SamplerExit {
                pid: self.helper,
                status,
            })
        }
    }
}

impl Drop for UssSession {
    fn drop(&mut self) {
        if self.finished {
            return;
        }

        if let Err(e) = self.finish() {
            debug!(helper = self.helper, error = %e, "abandoned USS session ended with error");
        }
    }
}

impl fmt::Debug for UssSession {
    #[cfg_attr(test, mutants::skip)] // No API contract.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UssSession")
            .field("helper", &self.helper)
            .field("target", &self.target)
            .field("baseline", &self.baseline)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

/// The result of a completed USS sampling session.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct UssMeasurement {
    baseline: u64,
    peak: u64,
}

impl UssMeasurement {
    /// The unique set size when sampling started, in bytes.
    #[must_use]
    pub const fn baseline(&self) -> u64 {
        self.baseline
    }

    /// The highest unique set size sampled during the session, in bytes.
    ///
    /// The baseline is one of the samples, so this is never below it.
    #[must_use]
    pub const fn peak(&self) -> u64 {
        self.peak
    }

    /// How far the unique set size rose above the baseline during the session, in bytes.
    #[must_use]
    pub const fn delta(&self) -> u64 {
        self.peak.saturating_sub(self.baseline)
    }
}
