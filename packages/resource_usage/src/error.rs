use std::{io, result};

use thiserror::Error;

/// Errors that can occur while measuring the resource usage of a unit of work.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// A marker carried an `interval` keyword argument that is not a usable sampling interval.
    #[error("invalid `interval` argument '{value}' on marker '{marker}': {problem}")]
    InvalidInterval {
        /// Name of the marker that carried the argument.
        marker: String,

        /// The raw argument value, as provided by the host.
        value: String,

        /// A human-readable description of the problem.
        problem: String,
    },

    /// The shared memory region used to exchange values with the sampler process could not
    /// be set up.
    #[error("failed to set up shared memory for value exchange")]
    SharedMemory(#[source] io::Error),

    /// The sampler process could not be spawned.
    #[error("failed to spawn the USS sampler process")]
    Spawn(#[source] io::Error),

    /// The sampler process could not measure the unique set size of its target process.
    #[error("failed to measure the unique set size of process {pid}")]
    Measurement {
        /// The process that was being measured.
        pid: u32,
    },

    /// Waiting for the sampler process to exit failed.
    #[error("failed to wait for USS sampler process {pid} to exit")]
    Join {
        /// The sampler process.
        pid: i32,

        /// The underlying operating system error.
        #[source]
        source: io::Error,
    },

    /// The sampler process did not exit cleanly.
    #[error("USS sampler process {pid} exited abnormally with wait status {status}")]
    SamplerExit {
        /// The sampler process.
        pid: i32,

        /// The raw wait status reported by the operating system.
        status: i32,
    },

    /// Peak unique set size sampling is not available on this platform.
    #[error("peak unique set size sampling is only supported on Linux")]
    Unsupported,
}

/// A specialized `Result` type for resource usage operations, returning the crate's
/// [`Error`] type as the error value.
pub type Result<T> = result::Result<T, Error>;

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::error::Error as _;
    use std::fmt::Debug;

    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(Error: Send, Sync, Debug);

    #[test]
    fn invalid_interval_names_marker_and_value() {
        let error = Error::InvalidInterval {
            marker: "report_uss".to_string(),
            value: "soon".to_string(),
            problem: "not a number".to_string(),
        };

        let message = error.to_string();
        assert!(message.contains("report_uss"));
        assert!(message.contains("'soon'"));
        assert!(message.contains("not a number"));
    }

    #[test]
    fn spawn_error_exposes_os_error_as_source() {
        let error = Error::Spawn(io::Error::from(io::ErrorKind::OutOfMemory));

        let source = error.source().expect("spawn errors carry their cause");
        assert!(source.to_string().contains("memory"));
    }
}
