use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use caps::Capability;
use libcgroups::common::CgroupSetup;
use oci_spec::runtime::{LinuxDeviceType, LinuxRlimitType};

use crate::capabilities::all_capabilities;
use crate::host::{HostDevice, HostError, HostInfo, HostMount, HostRlimit};

/// A host whose facts are plain fields.
#[derive(Debug, Clone)]
pub(crate) struct FakeHost {
    pub rootless: bool,
    pub cgroup_setup: CgroupSetup,
    pub available_gids: u64,
    /// `None` makes the hostname lookup fail.
    pub hostname: Option<String>,
    pub mounts: Vec<HostMount>,
    pub rlimits: Vec<HostRlimit>,
    pub supported_capabilities: Vec<Capability>,
    /// Kept sorted by path.
    pub devices: Vec<HostDevice>,
    pub env: BTreeMap<String, String>,
    pub default_seccomp_profile: Option<PathBuf>,
}

impl Default for FakeHost {
    fn default() -> Self {
        Self {
            rootless: false,
            cgroup_setup: CgroupSetup::Unified,
            available_gids: 65536,
            hostname: Some("fakehost".to_owned()),
            mounts: vec![HostMount {
                mount_point: PathBuf::from("/"),
                options: vec!["relatime".to_owned(), "rw".to_owned()],
            }],
            rlimits: vec![
                HostRlimit {
                    typ: LinuxRlimitType::RlimitCore,
                    soft: 0,
                    hard: u64::MAX,
                },
                HostRlimit {
                    typ: LinuxRlimitType::RlimitNofile,
                    soft: 1024,
                    hard: 524288,
                },
                HostRlimit {
                    typ: LinuxRlimitType::RlimitNproc,
                    soft: 63459,
                    hard: 63459,
                },
            ],
            supported_capabilities: all_capabilities(),
            devices: Vec::new(),
            env: BTreeMap::new(),
            default_seccomp_profile: None,
        }
    }
}

impl FakeHost {
    pub fn rootless() -> Self {
        Self {
            rootless: true,
            ..Default::default()
        }
    }

    fn with_device(mut self, path: &str, typ: LinuxDeviceType, major: i64, minor: i64) -> Self {
        self.devices.push(HostDevice {
            path: PathBuf::from(path),
            typ,
            major,
            minor,
            file_mode: 0o660,
            uid: 0,
            gid: 0,
        });
        self.devices.sort_by(|a, b| a.path.cmp(&b.path));
        self
    }

    pub fn with_char_device(self, path: &str, major: i64, minor: i64) -> Self {
        self.with_device(path, LinuxDeviceType::C, major, minor)
    }

    pub fn with_block_device(self, path: &str, major: i64, minor: i64) -> Self {
        self.with_device(path, LinuxDeviceType::B, major, minor)
    }

    pub fn with_mount(mut self, mount_point: &str, options: &[&str]) -> Self {
        self.mounts.push(HostMount {
            mount_point: PathBuf::from(mount_point),
            options: options.iter().map(|o| o.to_string()).collect(),
        });
        self
    }

    pub fn with_env(mut self, key: &str, value: &str) -> Self {
        self.env.insert(key.to_owned(), value.to_owned());
        self
    }

    fn below<'a>(&'a self, dir: &'a Path) -> impl Iterator<Item = &'a HostDevice> + 'a {
        self.devices
            .iter()
            .filter(move |d| d.path != dir && d.path.starts_with(dir))
    }
}

impl HostInfo for FakeHost {
    fn is_rootless(&self) -> bool {
        self.rootless
    }

    fn cgroup_setup(&self) -> Result<CgroupSetup, HostError> {
        Ok(self.cgroup_setup)
    }

    fn available_gids(&self) -> Result<u64, HostError> {
        Ok(self.available_gids)
    }

    fn hostname(&self) -> Result<String, HostError> {
        self.hostname.clone().ok_or(HostError::Hostname)
    }

    fn mounts(&self) -> Result<Vec<HostMount>, HostError> {
        Ok(self.mounts.clone())
    }

    fn rlimits(&self) -> Result<Vec<HostRlimit>, HostError> {
        Ok(self.rlimits.clone())
    }

    fn supported_capabilities(&self) -> Vec<Capability> {
        self.supported_capabilities.clone()
    }

    fn device(&self, path: &Path) -> Result<HostDevice, HostError> {
        if let Some(device) = self.devices.iter().find(|d| d.path == path) {
            return Ok(device.clone());
        }
        if self.below(path).next().is_some() {
            return Err(HostError::NotADevice(path.to_path_buf()));
        }
        Err(HostError::Stat {
            path: path.to_path_buf(),
            source: nix::Error::ENOENT,
        })
    }

    fn devices_under(&self, dir: &Path) -> Result<Vec<HostDevice>, HostError> {
        let devices: Vec<HostDevice> = self.below(dir).cloned().collect();
        if devices.is_empty() && dir != Path::new("/dev") {
            return Err(HostError::Io {
                path: dir.to_path_buf(),
                source: io::Error::from(io::ErrorKind::NotFound),
            });
        }
        Ok(devices)
    }

    fn env_var(&self, key: &str) -> Option<String> {
        self.env.get(key).cloned()
    }

    fn default_seccomp_profile(&self) -> Option<PathBuf> {
        self.default_seccomp_profile.clone()
    }
}
