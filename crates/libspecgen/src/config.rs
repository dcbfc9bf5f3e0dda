//! The creation configuration a container spec is compiled from.
//!
//! Every field has a neutral default, so a JSON document only needs to name
//! what it changes. Namespace modes deserialize from their canonical strings
//! and reject unknown modes while parsing.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Deserialize;

use crate::namespaces::{NamespaceMode, NetworkMode};

/// Profile path that disables seccomp filtering entirely.
pub const SECCOMP_UNCONFINED: &str = "unconfined";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CreateConfig {
    pub command: Vec<String>,
    pub work_dir: Option<PathBuf>,
    pub env: BTreeMap<String, String>,
    /// User the process runs as: empty, a name, or `uid[:gid]`.
    pub user: String,
    pub hostname: String,
    pub tty: bool,
    pub read_only_rootfs: bool,
    pub annotations: BTreeMap<String, String>,
    pub sysctl: BTreeMap<String, String>,
    /// Forward the host's proxy variables into the container.
    pub http_proxy: bool,
    pub privileged: bool,
    pub no_new_privileges: bool,
    pub apparmor_profile: String,
    pub seccomp_profile_path: String,
    pub cap_add: Vec<String>,
    pub cap_drop: Vec<String>,
    /// Devices in `src[:dst[:perms]]` form.
    pub devices: Vec<String>,
    pub resources: Resources,
    pub id_mappings: IdMappings,
    pub pid_mode: NamespaceMode,
    pub ipc_mode: NamespaceMode,
    pub uts_mode: NamespaceMode,
    pub userns_mode: NamespaceMode,
    pub net_mode: NetworkMode,
}

impl CreateConfig {
    /// Empty, `root` and `0` all mean the container's root user.
    pub fn runs_as_root(&self) -> bool {
        matches!(self.user.as_str(), "" | "root" | "0")
    }

    pub fn is_seccomp_unconfined(&self) -> bool {
        self.seccomp_profile_path == SECCOMP_UNCONFINED
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Resources {
    pub memory: i64,
    pub memory_reservation: i64,
    pub memory_swap: i64,
    pub kernel_memory: i64,
    /// `-1` leaves the kernel default in place.
    pub memory_swappiness: i64,
    pub disable_oom_killer: bool,
    pub oom_score_adj: i32,
    pub cpu_shares: u64,
    pub cpu_quota: i64,
    pub cpu_period: u64,
    pub cpus: f64,
    pub cpu_rt_runtime: i64,
    pub cpu_rt_period: u64,
    pub cpuset_cpus: String,
    pub cpuset_mems: String,
    pub pids_limit: i64,
    pub blkio_weight: u16,
    /// `path:weight`
    pub blkio_weight_device: Vec<String>,
    /// `path:rate[unit]`
    pub device_read_bps: Vec<String>,
    pub device_write_bps: Vec<String>,
    /// `path:rate`
    pub device_read_iops: Vec<String>,
    pub device_write_iops: Vec<String>,
    /// `name=soft[:hard]`, or the single entry `host`.
    pub ulimit: Vec<String>,
}

impl Default for Resources {
    fn default() -> Self {
        Self {
            memory: 0,
            memory_reservation: 0,
            memory_swap: 0,
            kernel_memory: 0,
            memory_swappiness: -1,
            disable_oom_killer: false,
            oom_score_adj: 0,
            cpu_shares: 0,
            cpu_quota: 0,
            cpu_period: 0,
            cpus: 0.0,
            cpu_rt_runtime: 0,
            cpu_rt_period: 0,
            cpuset_cpus: String::new(),
            cpuset_mems: String::new(),
            pids_limit: 0,
            blkio_weight: 0,
            blkio_weight_device: Vec::new(),
            device_read_bps: Vec::new(),
            device_write_bps: Vec::new(),
            device_read_iops: Vec::new(),
            device_write_iops: Vec::new(),
            ulimit: Vec::new(),
        }
    }
}

/// One contiguous range of a user namespace ID map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IdMap {
    pub container_id: u32,
    pub host_id: u32,
    pub size: u32,
}

impl IdMap {
    pub fn contains_container_id(&self, id: u32) -> bool {
        self.container_id <= id && u64::from(id) < u64::from(self.container_id) + u64::from(self.size)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IdMappings {
    pub uid_map: Vec<IdMap>,
    pub gid_map: Vec<IdMap>,
}

impl IdMappings {
    pub fn is_empty(&self) -> bool {
        self.uid_map.is_empty() && self.gid_map.is_empty()
    }
}
