#![cfg_attr(
    test,
    expect(
        clippy::struct_field_names,
        reason = "false positive from automock generated code"
    )
)]

use std::fmt::Debug;
use std::io;

/// Linux exposes per-process accounting as a virtual filesystem under `/proc`. This trait
/// abstracts this virtual filesystem to allow it to be mocked.
///
/// The scope of this trait is limited to the per-process files the USS sampler reads. Processes
/// can exit at any moment, so every read may fail with `NotFound` (or `ESRCH` for some files)
/// and callers decide which failures are tolerable.
#[cfg_attr(test, mockall::automock)]
pub(crate) trait Filesystem: Debug + Send + Sync + 'static {
    /// Get the contents of the /proc/{pid}/smaps_rollup file.
    ///
    /// This is a plaintext file with "Key:    value kB" lines, one per memory statistic,
    /// summed over all mappings of the process. Absent on kernels older than 4.14.
    fn get_smaps_rollup_contents(&self, pid: u32) -> Result<String, io::Error>;

    /// Get the contents of the /proc/{pid}/smaps file.
    ///
    /// Same "Key:    value kB" lines as `smaps_rollup`, repeated for every mapping.
    fn get_smaps_contents(&self, pid: u32) -> Result<String, io::Error>;

    /// Get the contents of the /proc/{pid}/stat file.
    ///
    /// A single line: "pid (comm) state ppid ...". The command name may itself contain spaces
    /// and parentheses, so fields after it are located from the last ')'.
    fn get_stat_contents(&self, pid: u32) -> Result<String, io::Error>;

    /// Get the process IDs of all processes visible in /proc.
    fn get_process_ids(&self) -> Result<Vec<u32>, io::Error>;
}
