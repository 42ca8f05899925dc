use std::fmt::Debug;
use std::{fs, io};

use crate::pal::Filesystem;

/// The virtual filesystem for the real operating system that the build is targeting.
///
/// You would only use different filesystems in PAL unit tests that need to use a mock filesystem.
/// Even then, whenever possible, unit tests should use the real filesystem for maximum realism.
#[derive(Debug, Default)]
pub(crate) struct BuildTargetFilesystem;

// Real filesystem bindings are excluded from coverage measurement because:
// 1. They are tested via the sampler tests running on actual Linux.
// 2. Failure paths depend on processes exiting at exactly the right moment.
#[cfg_attr(coverage_nightly, coverage(off))]
impl Filesystem for BuildTargetFilesystem {
    fn get_smaps_rollup_contents(&self, pid: u32) -> Result<String, io::Error> {
        fs::read_to_string(format!("/proc/{pid}/smaps_rollup"))
    }

    fn get_smaps_contents(&self, pid: u32) -> Result<String, io::Error> {
        fs::read_to_string(format!("/proc/{pid}/smaps"))
    }

    fn get_stat_contents(&self, pid: u32) -> Result<String, io::Error> {
        fs::read_to_string(format!("/proc/{pid}/stat"))
    }

    fn get_process_ids(&self) -> Result<Vec<u32>, io::Error> {
        let mut pids = Vec::new();

        for entry in fs::read_dir("/proc")? {
            // Entries can disappear while we iterate; those are simply not listed.
            let Ok(entry) = entry else {
                continue;
            };

            if let Some(pid) = entry.file_name().to_str().and_then(|n| n.parse().ok()) {
                pids.push(pid);
            }
        }

        Ok(pids)
    }
}
