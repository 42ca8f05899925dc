//! Unique set size of a process and its descendants, as reported by `/proc`.

use std::collections::{HashMap, VecDeque};
use std::io;

use crate::pal::{Filesystem, FilesystemFacade};

/// Bytes per unit of the `kB` values in `/proc/<pid>/smaps` and `smaps_rollup`.
const BYTES_PER_KB: u64 = 1024;

/// Fields of `smaps` that count memory mapped by this process and no other.
const PRIVATE_FIELDS: [&str; 3] = ["Private_Clean", "Private_Dirty", "Private_Hugetlb"];

/// Queries the unique set size (USS) of processes and process trees.
///
/// The USS of a process is the physical memory that would be freed if the process exited
/// right now, i.e. all the pages that are mapped by this process alone.
///
/// Processes come and go while a tree is being measured, so descendants that exit or deny
/// access mid-measurement are silently left out. The root of the tree must remain measurable.
///
/// This type does not log, as it runs inside the forked USS sampler process.
///
/// # Examples
///
/// ```
/// use resource_usage::ProcessTree;
///
/// let tree = ProcessTree::new();
/// let uss = tree.uss(std::process::id()).unwrap();
///
/// assert!(uss > 0);
/// ```
#[derive(Debug)]
pub struct ProcessTree {
    fs: FilesystemFacade,
}

impl ProcessTree {
    /// Creates a query interface for the processes of the running system.
    #[must_use]
    pub fn new() -> Self {
        Self::with_filesystem(FilesystemFacade::target())
    }

    pub(crate) const fn with_filesystem(fs: FilesystemFacade) -> Self {
        Self { fs }
    }

    /// The unique set size of a single process, in bytes.
    ///
    /// Reads `/proc/<pid>/smaps_rollup`, falling back to the per-mapping `/proc/<pid>/smaps`
    /// on kernels that do not provide the rollup.
    ///
    /// # Errors
    ///
    /// Returns the I/O error of reading the process statistics, for example `NotFound` if the
    /// process does not exist. Unparseable statistics are reported as `InvalidData`.
    pub fn uss(&self, pid: u32) -> io::Result<u64> {
        let contents = match self.fs.get_smaps_rollup_contents(pid) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => self.fs.get_smaps_contents(pid)?,
            Err(e) => return Err(e),
        };

        sum_private_memory(&contents)
    }

    /// The process IDs of all recursive descendants of `pid`, parents before their children.
    ///
    /// # Errors
    ///
    /// Returns the I/O error of listing the processes of the system. Processes that exit while
    /// their parent link is being read are left out without error.
    pub fn descendants(&self, pid: u32) -> io::Result<Vec<u32>> {
        let mut children_of: HashMap<u32, Vec<u32>> = HashMap::new();

        for candidate in self.fs.get_process_ids()? {
            // Gone already, or not readable. Either way not part of the tree we can measure.
            let Ok(stat) = self.fs.get_stat_contents(candidate) else {
                continue;
            };

            if let Some(parent) = parse_parent_pid(&stat) {
                children_of.entry(parent).or_default().push(candidate);
            }
        }

        let mut descendants = Vec::new();
        let mut pending = VecDeque::from([pid]);

        while let Some(parent) = pending.pop_front() {
            let Some(mut children) = children_of.remove(&parent) else {
                continue;
            };

            children.sort_unstable();
            pending.extend(children.iter().copied());
            descendants.extend(children);
        }

        Ok(descendants)
    }

    /// The summed unique set size of `target` and all its recursive descendants, in bytes.
    ///
    /// The process `exclude`, if any, is not counted. Descendants that exit or deny access
    /// during the measurement contribute nothing.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if `target` itself cannot be measured, if the processes of the
    /// system cannot be listed or if a descendant fails in an unexpected way.
    pub fn tree_uss(&self, target: u32, exclude: Option<u32>) -> io::Result<u64> {
        let mut total = self.uss(target)?;

        for pid in self.descendants(target)? {
            if exclude == Some(pid) {
                continue;
            }

            match self.uss(pid) {
                Ok(uss) => total = total.saturating_add(uss),
                Err(e) if is_transient(&e) => {}
                Err(e) => return Err(e),
            }
        }

        Ok(total)
    }
}

impl Default for ProcessTree {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether the error means the process went away or is not ours to inspect.
fn is_transient(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied
    ) || error.raw_os_error() == Some(libc::ESRCH)
}

/// Sums the private memory fields of `smaps` or `smaps_rollup` contents.
fn sum_private_memory(contents: &str) -> io::Result<u64> {
    let mut total_kb: u64 = 0;

    for line in contents.lines() {
        // Private_Dirty:       1234 kB
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };

        if !PRIVATE_FIELDS.contains(&key.trim()) {
            continue;
        }

        let kb = value
            .trim()
            .strip_suffix("kB")
            .map(str::trim)
            .and_then(|v| v.parse::<u64>().ok())
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("unexpected memory statistic line: {line}"),
                )
            })?;

        total_kb = total_kb.saturating_add(kb);
    }

    Ok(total_kb.saturating_mul(BYTES_PER_KB))
}

/// Extracts the parent process ID from `/proc/<pid>/stat` contents.
fn parse_parent_pid(stat: &str) -> Option<u32> {
    // 1234 (command name) S 1 ...
    // The command name can contain anything, including ") ", so we start after the last ')'.
    let (_, after_command) = stat.rsplit_once(')')?;
    let mut fields = after_command.split_whitespace();

    let _state = fields.next()?;
    fields.next()?.parse().ok()
}
