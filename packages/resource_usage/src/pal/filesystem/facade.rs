use std::fmt::{self, Debug};
use std::io;
#[cfg(test)]
use std::sync::Arc;

#[cfg(test)]
use crate::pal::MockFilesystem;
use crate::pal::{BuildTargetFilesystem, Filesystem};

/// Enum to hide the different filesystem implementations behind a single wrapper type.
#[derive(Clone)]
pub(crate) enum FilesystemFacade {
    Target(&'static BuildTargetFilesystem),

    #[cfg(test)]
    Mock(Arc<MockFilesystem>),
}

impl FilesystemFacade {
    pub(crate) const fn target() -> Self {
        Self::Target(&BuildTargetFilesystem)
    }

    #[cfg(test)]
    pub(crate) fn from_mock(mock: MockFilesystem) -> Self {
        Self::Mock(Arc::new(mock))
    }
}

impl Filesystem for FilesystemFacade {
    fn get_smaps_rollup_contents(&self, pid: u32) -> Result<String, io::Error> {
        match self {
            Self::Target(filesystem) => filesystem.get_smaps_rollup_contents(pid),
            #[cfg(test)]
            Self::Mock(mock) => mock.get_smaps_rollup_contents(pid),
        }
    }

    fn get_smaps_contents(&self, pid: u32) -> Result<String, io::Error> {
        match self {
            Self::Target(filesystem) => filesystem.get_smaps_contents(pid),
            #[cfg(test)]
            Self::Mock(mock) => mock.get_smaps_contents(pid),
        }
    }

    fn get_stat_contents(&self, pid: u32) -> Result<String, io::Error> {
        match self {
            Self::Target(filesystem) => filesystem.get_stat_contents(pid),
            #[cfg(test)]
            Self::Mock(mock) => mock.get_stat_contents(pid),
        }
    }

    fn get_process_ids(&self) -> Result<Vec<u32>, io::Error> {
        match self {
            Self::Target(filesystem) => filesystem.get_process_ids(),
            #[cfg(test)]
            Self::Mock(mock) => mock.get_process_ids(),
        }
    }
}

impl Debug for FilesystemFacade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Target(inner) => inner.fmt(f),
            #[cfg(test)]
            Self::Mock(inner) => inner.fmt(f),
        }
    }
}
