//! Facts about the host the spec is generated on.
//!
//! Spec generation reads the host in a handful of places: mount table,
//! device nodes, resource limits, hostname. [`HostInfo`] collects them behind
//! one seam so the builder can be driven by a fake in tests.

use std::fs;
use std::path::{Path, PathBuf};

use caps::Capability;
use libcgroups::common::{self, CgroupSetup, GetCgroupSetupError};
use nix::sys::resource::{getrlimit, Resource};
use nix::sys::stat::{major, minor, stat, SFlag};
use oci_spec::runtime::{LinuxDeviceType, LinuxRlimitType};
use procfs::process::Process;

use crate::user_ns::{self, IdMapError};

/// Default seccomp profile shipped by the containers packages.
pub const DEFAULT_SECCOMP_PROFILE: &str = "/usr/share/containers/seccomp.json";
/// Set by a parent that already re-executed inside a user namespace.
pub const USERNS_CONFIGURED_ENV: &str = "STEVEDORE_USERNS_CONFIGURED";

const GID_MAP: &str = "/proc/self/gid_map";

#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("failed to read {path:?}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to stat {path:?}")]
    Stat { path: PathBuf, source: nix::Error },
    #[error("{0:?} is not a device node")]
    NotADevice(PathBuf),
    #[error("failed to query {resource:?}")]
    Rlimit {
        resource: LinuxRlimitType,
        source: nix::Error,
    },
    #[error("host name is not valid utf-8")]
    Hostname,
    #[error(transparent)]
    Nix(#[from] nix::Error),
    #[error(transparent)]
    Procfs(#[from] procfs::ProcError),
    #[error(transparent)]
    CgroupSetup(#[from] GetCgroupSetupError),
    #[error(transparent)]
    IdMap(#[from] IdMapError),
}

type Result<T> = std::result::Result<T, HostError>;

/// One entry of the host mount table. Only flag options are kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostMount {
    pub mount_point: PathBuf,
    pub options: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostRlimit {
    pub typ: LinuxRlimitType,
    pub soft: u64,
    pub hard: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostDevice {
    pub path: PathBuf,
    pub typ: LinuxDeviceType,
    pub major: i64,
    pub minor: i64,
    /// Permission bits of the node.
    pub file_mode: u32,
    pub uid: u32,
    pub gid: u32,
}

pub trait HostInfo {
    /// True when the caller cannot act as the host's root.
    fn is_rootless(&self) -> bool;
    fn cgroup_setup(&self) -> Result<CgroupSetup>;
    /// Number of gids mapped into the caller's user namespace.
    fn available_gids(&self) -> Result<u64>;
    fn hostname(&self) -> Result<String>;
    fn mounts(&self) -> Result<Vec<HostMount>>;
    fn rlimits(&self) -> Result<Vec<HostRlimit>>;
    /// Capabilities the running kernel knows, sorted by name.
    fn supported_capabilities(&self) -> Vec<Capability>;
    fn device(&self, path: &Path) -> Result<HostDevice>;
    /// Every device node below `dir`, recursing into subdirectories.
    fn devices_under(&self, dir: &Path) -> Result<Vec<HostDevice>>;
    fn env_var(&self, key: &str) -> Option<String>;
    fn default_seccomp_profile(&self) -> Option<PathBuf>;
}

/// Limits copied from the host for `ulimit=host`.
pub const HOST_RLIMITS: &[(LinuxRlimitType, Resource)] = &[
    (LinuxRlimitType::RlimitAs, Resource::RLIMIT_AS),
    (LinuxRlimitType::RlimitCore, Resource::RLIMIT_CORE),
    (LinuxRlimitType::RlimitCpu, Resource::RLIMIT_CPU),
    (LinuxRlimitType::RlimitData, Resource::RLIMIT_DATA),
    (LinuxRlimitType::RlimitFsize, Resource::RLIMIT_FSIZE),
    (LinuxRlimitType::RlimitLocks, Resource::RLIMIT_LOCKS),
    (LinuxRlimitType::RlimitMemlock, Resource::RLIMIT_MEMLOCK),
    (LinuxRlimitType::RlimitMsgqueue, Resource::RLIMIT_MSGQUEUE),
    (LinuxRlimitType::RlimitNice, Resource::RLIMIT_NICE),
    (LinuxRlimitType::RlimitNofile, Resource::RLIMIT_NOFILE),
    (LinuxRlimitType::RlimitNproc, Resource::RLIMIT_NPROC),
    (LinuxRlimitType::RlimitRss, Resource::RLIMIT_RSS),
    (LinuxRlimitType::RlimitRtprio, Resource::RLIMIT_RTPRIO),
    (LinuxRlimitType::RlimitRttime, Resource::RLIMIT_RTTIME),
    (LinuxRlimitType::RlimitSigpending, Resource::RLIMIT_SIGPENDING),
    (LinuxRlimitType::RlimitStack, Resource::RLIMIT_STACK),
];

/// Directory names under `/dev` that hold no devices a container should
/// inherit.
const SKIPPED_DEVICE_DIRS: &[&str] = &["pts", "shm", "fd", "mqueue", ".lxc", ".lxd-mounts", ".udev"];

/// The machine this process runs on.
#[derive(Debug, Default, Clone, Copy)]
pub struct LinuxHost;

impl HostInfo for LinuxHost {
    fn is_rootless(&self) -> bool {
        !nix::unistd::geteuid().is_root() || std::env::var_os(USERNS_CONFIGURED_ENV).is_some()
    }

    fn cgroup_setup(&self) -> Result<CgroupSetup> {
        Ok(common::get_cgroup_setup()?)
    }

    fn available_gids(&self) -> Result<u64> {
        let contents = fs::read_to_string(GID_MAP).map_err(|source| HostError::Io {
            path: PathBuf::from(GID_MAP),
            source,
        })?;
        Ok(user_ns::mapped_ids(&user_ns::parse_id_map(&contents)?))
    }

    fn hostname(&self) -> Result<String> {
        nix::unistd::gethostname()?
            .into_string()
            .map_err(|_| HostError::Hostname)
    }

    fn mounts(&self) -> Result<Vec<HostMount>> {
        let mount_infos = Process::myself()?.mountinfo()?;
        Ok(mount_infos
            .0
            .into_iter()
            .map(|info| {
                let mut options: Vec<String> = info.mount_options.into_keys().collect();
                options.sort();
                HostMount {
                    mount_point: info.mount_point,
                    options,
                }
            })
            .collect())
    }

    fn rlimits(&self) -> Result<Vec<HostRlimit>> {
        HOST_RLIMITS
            .iter()
            .map(|&(typ, resource)| {
                let (soft, hard) =
                    getrlimit(resource).map_err(|source| HostError::Rlimit { resource: typ, source })?;
                Ok(HostRlimit { typ, soft, hard })
            })
            .collect()
    }

    fn supported_capabilities(&self) -> Vec<Capability> {
        let mut supported: Vec<Capability> = caps::runtime::thread_all_supported().into_iter().collect();
        supported.sort_by_key(|c| c.to_string());
        supported
    }

    fn device(&self, path: &Path) -> Result<HostDevice> {
        let st = stat(path).map_err(|source| HostError::Stat {
            path: path.to_path_buf(),
            source,
        })?;
        let format = SFlag::from_bits_truncate(st.st_mode & SFlag::S_IFMT.bits());
        let typ = if format == SFlag::S_IFCHR {
            LinuxDeviceType::C
        } else if format == SFlag::S_IFBLK {
            LinuxDeviceType::B
        } else if format == SFlag::S_IFIFO {
            LinuxDeviceType::P
        } else {
            return Err(HostError::NotADevice(path.to_path_buf()));
        };
        Ok(HostDevice {
            path: path.to_path_buf(),
            typ,
            major: major(st.st_rdev) as i64,
            minor: minor(st.st_rdev) as i64,
            file_mode: st.st_mode & 0o7777,
            uid: st.st_uid,
            gid: st.st_gid,
        })
    }

    fn devices_under(&self, dir: &Path) -> Result<Vec<HostDevice>> {
        let mut devices = Vec::new();
        let entries = fs::read_dir(dir).map_err(|source| HostError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        for entry in entries {
            let entry = entry.map_err(|source| HostError::Io {
                path: dir.to_path_buf(),
                source,
            })?;
            let path = entry.path();
            let file_type = entry.file_type().map_err(|source| HostError::Io {
                path: path.clone(),
                source,
            })?;

            if file_type.is_dir() {
                let name = entry.file_name();
                if SKIPPED_DEVICE_DIRS.iter().any(|skip| name == *skip) {
                    continue;
                }
                devices.extend(self.devices_under(&path)?);
                continue;
            }
            if entry.file_name() == "console" {
                continue;
            }
            match self.device(&path) {
                Ok(device) => devices.push(device),
                Err(HostError::NotADevice(_)) => {}
                Err(err) => return Err(err),
            }
        }
        Ok(devices)
    }

    fn env_var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }

    fn default_seccomp_profile(&self) -> Option<PathBuf> {
        let path = Path::new(DEFAULT_SECCOMP_PROFILE);
        path.exists().then(|| path.to_path_buf())
    }
}
