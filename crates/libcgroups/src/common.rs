use std::{
    fmt::Display,
    path::{Path, PathBuf},
};

use nix::sys::statfs::{statfs, CGROUP2_SUPER_MAGIC, TMPFS_MAGIC};

pub const DEFAULT_CGROUP_ROOT: &str = "/sys/fs/cgroup";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CgroupSetup {
    Hybrid,
    Legacy,
    Unified,
}

impl CgroupSetup {
    /// Only a pure cgroup v2 host can enforce resource limits for an
    /// unprivileged user. Hybrid hosts still control resources through v1.
    pub fn is_unified(&self) -> bool {
        matches!(self, CgroupSetup::Unified)
    }
}

impl Display for CgroupSetup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let print = match self {
            CgroupSetup::Hybrid => "hybrid",
            CgroupSetup::Legacy => "legacy",
            CgroupSetup::Unified => "unified",
        };

        write!(f, "{print}")
    }
}

#[derive(thiserror::Error, Debug)]
pub enum WrappedIoError {
    #[error("failed to read {path}: {err}")]
    Read { err: std::io::Error, path: PathBuf },
    #[error("at {path}: {err}")]
    Other { err: std::io::Error, path: PathBuf },
}

impl WrappedIoError {
    pub fn inner(&self) -> &std::io::Error {
        match self {
            WrappedIoError::Read { err, .. } => err,
            WrappedIoError::Other { err, .. } => err,
        }
    }
}

pub(crate) trait WrapIoResult {
    type Target;

    fn wrap_read<P: Into<PathBuf>>(self, path: P) -> Result<Self::Target, WrappedIoError>;
    fn wrap_other<P: Into<PathBuf>>(self, path: P) -> Result<Self::Target, WrappedIoError>;
}

impl<T> WrapIoResult for Result<T, std::io::Error> {
    type Target = T;

    fn wrap_read<P: Into<PathBuf>>(self, path: P) -> Result<Self::Target, WrappedIoError> {
        self.map_err(|err| WrappedIoError::Read {
            err,
            path: path.into(),
        })
    }

    fn wrap_other<P: Into<PathBuf>>(self, path: P) -> Result<Self::Target, WrappedIoError> {
        self.map_err(|err| WrappedIoError::Other {
            err,
            path: path.into(),
        })
    }
}

#[derive(thiserror::Error, Debug)]
pub enum GetCgroupSetupError {
    #[error("io error: {0}")]
    WrappedIo(#[from] WrappedIoError),
    #[error("non default cgroup root not supported")]
    NonDefault,
    #[error("failed to detect cgroup setup")]
    FailedToDetect,
}

/// Determines the cgroup setup of the system. Systems typically have one of
/// three setups:
/// - Unified: Pure cgroup v2 system.
/// - Legacy: Pure cgroup v1 system.
/// - Hybrid: Hybrid is basically a cgroup v1 system, except for
///   an additional unified hierarchy which doesn't have any
///   controllers attached. Resource control can purely be achieved
///   through the cgroup v1 hierarchy, not through the cgroup v2 hierarchy.
pub fn get_cgroup_setup_with_root(root_path: &Path) -> Result<CgroupSetup, GetCgroupSetupError> {
    if !root_path.exists() {
        return Err(GetCgroupSetupError::NonDefault);
    }

    // If the filesystem is of type cgroup2, the system is in unified mode.
    // If the filesystem is tmpfs instead the system is either in legacy or
    // hybrid mode. If a cgroup2 filesystem has been mounted under the "unified"
    // folder we are in hybrid mode, otherwise we are in legacy mode.
    let stat = statfs(root_path)
        .map_err(std::io::Error::from)
        .wrap_other(root_path)?;
    if stat.filesystem_type() == CGROUP2_SUPER_MAGIC {
        tracing::debug!(root = ?root_path, "detected unified cgroup hierarchy");
        return Ok(CgroupSetup::Unified);
    }

    if stat.filesystem_type() == TMPFS_MAGIC {
        let unified = root_path.join("unified");
        if unified.exists() {
            let stat = statfs(&unified)
                .map_err(std::io::Error::from)
                .wrap_other(&unified)?;
            if stat.filesystem_type() == CGROUP2_SUPER_MAGIC {
                return Ok(CgroupSetup::Hybrid);
            }
        }

        return Ok(CgroupSetup::Legacy);
    }

    Err(GetCgroupSetupError::FailedToDetect)
}

pub fn get_cgroup_setup() -> Result<CgroupSetup, GetCgroupSetupError> {
    get_cgroup_setup_with_root(Path::new(DEFAULT_CGROUP_ROOT))
}

/// Reads a single value file below the cgroup root, e.g. `cgroup.controllers`.
pub fn read_cgroup_file<P: AsRef<Path>>(path: P) -> Result<String, WrappedIoError> {
    let path = path.as_ref();
    std::fs::read_to_string(path).wrap_read(path)
}

/// Lists the controllers enabled at the root of a unified hierarchy.
pub fn available_controllers_with_root(root_path: &Path) -> Result<Vec<String>, WrappedIoError> {
    let content = read_cgroup_file(root_path.join("cgroup.controllers"))?;
    Ok(content.split_whitespace().map(str::to_owned).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    #[test]
    fn test_cgroup_setup_display() {
        assert_eq!(CgroupSetup::Unified.to_string(), "unified");
        assert_eq!(CgroupSetup::Hybrid.to_string(), "hybrid");
        assert_eq!(CgroupSetup::Legacy.to_string(), "legacy");
    }

    #[test]
    fn test_only_unified_is_unified() {
        assert!(CgroupSetup::Unified.is_unified());
        assert!(!CgroupSetup::Hybrid.is_unified());
        assert!(!CgroupSetup::Legacy.is_unified());
    }

    #[test]
    fn test_missing_root_is_non_default() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let missing = tmp.path().join("does-not-exist");
        assert!(matches!(
            get_cgroup_setup_with_root(&missing),
            Err(GetCgroupSetupError::NonDefault)
        ));
        Ok(())
    }

    #[test]
    fn test_available_controllers() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        std::fs::write(tmp.path().join("cgroup.controllers"), "cpuset cpu io memory pids\n")?;
        let controllers = available_controllers_with_root(tmp.path())?;
        assert_eq!(controllers, vec!["cpuset", "cpu", "io", "memory", "pids"]);
        Ok(())
    }

    #[test]
    fn test_read_missing_file_keeps_path() {
        let err = read_cgroup_file("/nonexistent/cgroup.controllers").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/cgroup.controllers"));
        assert_eq!(err.inner().kind(), std::io::ErrorKind::NotFound);
    }
}
