#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![cfg_attr(coverage_nightly, coverage(off))] // This is all test code, no need to test it.

//! Private helpers for tests and benchmarks of the resource usage packages.

#[cfg(target_os = "linux")]
use std::path::Path;
use std::sync::mpsc;
use std::time::Duration;
use std::{env, hint, panic, thread};

/// How long a test may run before the watchdog fails it.
pub const WATCHDOG_TIMEOUT: Duration = Duration::from_secs(10);

/// Runs a test with a timeout to prevent infinite hangs.
///
/// Tests of cross-process synchronization hang rather than fail when the protocol is broken,
/// because one side waits forever for a signal that never comes. This wraps the test so that
/// it fails with a panic after [`WATCHDOG_TIMEOUT`] instead.
///
/// When the `MUTATION_TESTING` environment variable is set to "1", the watchdog
/// is disabled and the test function is executed directly. This allows mutation
/// testing to properly detect hanging mutations.
///
/// # Panics
///
/// Panics if the test exceeds the timeout (when not in mutation testing mode) or if the
/// test itself panics.
///
/// # Example
///
/// ```rust
/// use testing::with_watchdog;
///
/// with_watchdog(|| {
///     assert_eq!(2 + 2, 4);
/// });
/// ```
pub fn with_watchdog<F, R>(test_fn: F) -> R
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    if env::var("MUTATION_TESTING").as_deref() == Ok("1") {
        return test_fn();
    }

    let (tx, rx) = mpsc::channel();

    let test_handle = thread::spawn(move || {
        let result = test_fn();
        // If this fails, the watchdog has already given up on us.
        drop(tx.send(result));
    });

    match rx.recv_timeout(WATCHDOG_TIMEOUT) {
        Ok(result) => {
            test_handle
                .join()
                .expect("test thread already reported its result");
            result
        }
        Err(mpsc::RecvTimeoutError::Timeout) => {
            panic!("test exceeded the watchdog timeout of {WATCHDOG_TIMEOUT:?}");
        }
        Err(mpsc::RecvTimeoutError::Disconnected) => {
            // The test thread panicked; surface its panic as our own.
            match test_handle.join() {
                Ok(()) => panic!("test thread disconnected without a result"),
                Err(e) => panic::resume_unwind(e),
            }
        }
    }
}

/// Touching one byte per this many bytes makes every page of a block resident.
const PAGE_SIZE: usize = 4096;

/// Allocates a block of `bytes`, makes every page of it resident and keeps it alive for
/// `duration` before releasing it.
///
/// Freshly allocated memory is usually not backed by physical pages until it is written to,
/// so merely allocating would not raise the unique set size of the process.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
///
/// use testing::hold_memory;
///
/// hold_memory(1024 * 1024, Duration::from_millis(1));
/// ```
pub fn hold_memory(bytes: usize, duration: Duration) {
    let mut block = vec![0_u8; bytes];

    for page in block.chunks_mut(PAGE_SIZE) {
        if let Some(first) = page.first_mut() {
            *first = 1;
        }
    }

    hint::black_box(&mut block);
    thread::sleep(duration);
    drop(hint::black_box(block));
}

/// Whether a process with the given ID currently exists.
///
/// A zombie process (one that has exited but not been reaped by its parent) still exists.
#[cfg(target_os = "linux")]
#[must_use]
pub fn process_exists(pid: u32) -> bool {
    Path::new(&format!("/proc/{pid}")).exists()
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    #[cfg(target_os = "linux")]
    use std::process;

    use super::*;

    #[test]
    fn watchdog_allows_fast_tests() {
        let result = with_watchdog(|| {
            // A test that completes quickly
            42
        });
        assert_eq!(result, 42);
    }

    #[test]
    fn watchdog_returns_correct_value() {
        let result = with_watchdog(|| "hello world");
        assert_eq!(result, "hello world");
    }

    #[test]
    fn held_memory_is_released() {
        hold_memory(3 * PAGE_SIZE + 1, Duration::ZERO);
        hold_memory(0, Duration::ZERO);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn own_process_exists() {
        assert!(process_exists(process::id()));
        assert!(!process_exists(u32::MAX));
    }
}
