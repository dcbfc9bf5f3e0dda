//! Capability sets of the container process.
use std::str::FromStr;

use caps::Capability;
use oci_spec::runtime::{
    Capabilities, Capability as SpecCapability, LinuxCapabilities, LinuxCapabilitiesBuilder,
};
use oci_spec::OciSpecError;

use crate::config::CreateConfig;

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum CapabilityError {
    #[error("unknown capability to add: {0:?}")]
    UnknownAdd(String),
    #[error("unknown capability drop: {0:?}")]
    UnknownDrop(String),
}

/// Capabilities granted to a container running with the default policy.
pub fn default_capabilities() -> Vec<Capability> {
    vec![
        Capability::CAP_CHOWN,
        Capability::CAP_DAC_OVERRIDE,
        Capability::CAP_FSETID,
        Capability::CAP_FOWNER,
        Capability::CAP_MKNOD,
        Capability::CAP_NET_RAW,
        Capability::CAP_SETGID,
        Capability::CAP_SETUID,
        Capability::CAP_SETFCAP,
        Capability::CAP_SETPCAP,
        Capability::CAP_NET_BIND_SERVICE,
        Capability::CAP_SYS_CHROOT,
        Capability::CAP_KILL,
        Capability::CAP_AUDIT_WRITE,
    ]
}

/// Every capability known to the `caps` crate, ordered by name.
pub fn all_capabilities() -> Vec<Capability> {
    let mut all: Vec<Capability> = caps::all().into_iter().collect();
    all.sort_by_key(|c| c.to_string());
    all
}

/// Parses `NET_ADMIN`, `net_admin` or `CAP_NET_ADMIN`.
pub fn parse_capability(name: &str) -> Option<Capability> {
    let upper = name.to_ascii_uppercase();
    let full = if upper.starts_with("CAP_") {
        upper
    } else {
        format!("CAP_{upper}")
    };
    Capability::from_str(&full).ok()
}

fn is_all(name: &str) -> bool {
    name.eq_ignore_ascii_case("all")
}

/// Applies `--cap-add` / `--cap-drop` style lists to `basics`. `ALL` in the
/// add list starts from every capability; `ALL` in the drop list starts
/// from nothing, so only explicit adds remain.
pub fn tweak_capabilities(
    basics: &[Capability],
    adds: &[String],
    drops: &[String],
) -> Result<Vec<Capability>, CapabilityError> {
    let drop_all = drops.iter().any(|d| is_all(d));
    let drops = drops
        .iter()
        .filter(|d| !is_all(d))
        .map(|d| parse_capability(d).ok_or_else(|| CapabilityError::UnknownDrop(d.clone())))
        .collect::<Result<Vec<_>, _>>()?;

    let add_all = adds.iter().any(|a| is_all(a));
    let adds = adds
        .iter()
        .filter(|a| !is_all(a))
        .map(|a| parse_capability(a).ok_or_else(|| CapabilityError::UnknownAdd(a.clone())))
        .collect::<Result<Vec<_>, _>>()?;

    let base = if add_all {
        all_capabilities()
    } else {
        basics.to_vec()
    };

    let mut tweaked: Vec<Capability> = Vec::new();
    if !drop_all {
        for cap in base {
            if !drops.contains(&cap) && !tweaked.contains(&cap) {
                tweaked.push(cap);
            }
        }
    }
    for cap in adds {
        if !tweaked.contains(&cap) {
            tweaked.push(cap);
        }
    }

    Ok(tweaked)
}

/// The five capability sets of a process. Bounding may differ from the
/// others when the process does not run as root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilitySets {
    pub bounding: Vec<Capability>,
    pub effective: Vec<Capability>,
    pub inheritable: Vec<Capability>,
    pub permitted: Vec<Capability>,
    pub ambient: Vec<Capability>,
}

impl CapabilitySets {
    pub fn uniform(caps: Vec<Capability>) -> Self {
        Self {
            bounding: caps.clone(),
            effective: caps.clone(),
            inheritable: caps.clone(),
            permitted: caps.clone(),
            ambient: caps,
        }
    }

    /// Resolves the sets for `config`. Privileged containers get every
    /// capability the host supports. A non-root user starts its process sets
    /// from nothing, while its bounding set keeps `defaults` as the ceiling.
    pub fn for_config(
        config: &CreateConfig,
        defaults: &[Capability],
        host_supported: Vec<Capability>,
    ) -> Result<Self, CapabilityError> {
        if config.privileged {
            return Ok(Self::uniform(host_supported));
        }

        if config.runs_as_root() {
            let caps = tweak_capabilities(defaults, &config.cap_add, &config.cap_drop)?;
            return Ok(Self::uniform(caps));
        }

        let process = tweak_capabilities(&[], &config.cap_add, &config.cap_drop)?;
        let bounding = tweak_capabilities(defaults, &config.cap_add, &config.cap_drop)?;
        tracing::debug!(user = %config.user, ?process, ?bounding, "restricted capabilities for non-root user");
        Ok(Self {
            bounding,
            ..Self::uniform(process)
        })
    }

    pub fn into_oci(self) -> Result<LinuxCapabilities, OciSpecError> {
        LinuxCapabilitiesBuilder::default()
            .bounding(to_oci_set(&self.bounding))
            .effective(to_oci_set(&self.effective))
            .inheritable(to_oci_set(&self.inheritable))
            .permitted(to_oci_set(&self.permitted))
            .ambient(to_oci_set(&self.ambient))
            .build()
    }
}

fn to_oci_set(caps: &[Capability]) -> Capabilities {
    caps.iter().map(|c| c.to_oci()).collect()
}

pub trait CapabilityExt {
    /// Convert to the runtime spec's capability type
    fn to_oci(&self) -> SpecCapability;
}

impl CapabilityExt for Capability {
    fn to_oci(&self) -> SpecCapability {
        match self {
            Capability::CAP_AUDIT_CONTROL => SpecCapability::AuditControl,
            Capability::CAP_AUDIT_READ => SpecCapability::AuditRead,
            Capability::CAP_AUDIT_WRITE => SpecCapability::AuditWrite,
            Capability::CAP_BLOCK_SUSPEND => SpecCapability::BlockSuspend,
            Capability::CAP_BPF => SpecCapability::Bpf,
            Capability::CAP_CHECKPOINT_RESTORE => SpecCapability::CheckpointRestore,
            Capability::CAP_CHOWN => SpecCapability::Chown,
            Capability::CAP_DAC_OVERRIDE => SpecCapability::DacOverride,
            Capability::CAP_DAC_READ_SEARCH => SpecCapability::DacReadSearch,
            Capability::CAP_FOWNER => SpecCapability::Fowner,
            Capability::CAP_FSETID => SpecCapability::Fsetid,
            Capability::CAP_IPC_LOCK => SpecCapability::IpcLock,
            Capability::CAP_IPC_OWNER => SpecCapability::IpcOwner,
            Capability::CAP_KILL => SpecCapability::Kill,
            Capability::CAP_LEASE => SpecCapability::Lease,
            Capability::CAP_LINUX_IMMUTABLE => SpecCapability::LinuxImmutable,
            Capability::CAP_MAC_ADMIN => SpecCapability::MacAdmin,
            Capability::CAP_MAC_OVERRIDE => SpecCapability::MacOverride,
            Capability::CAP_MKNOD => SpecCapability::Mknod,
            Capability::CAP_NET_ADMIN => SpecCapability::NetAdmin,
            Capability::CAP_NET_BIND_SERVICE => SpecCapability::NetBindService,
            Capability::CAP_NET_BROADCAST => SpecCapability::NetBroadcast,
            Capability::CAP_NET_RAW => SpecCapability::NetRaw,
            Capability::CAP_PERFMON => SpecCapability::Perfmon,
            Capability::CAP_SETGID => SpecCapability::Setgid,
            Capability::CAP_SETFCAP => SpecCapability::Setfcap,
            Capability::CAP_SETPCAP => SpecCapability::Setpcap,
            Capability::CAP_SETUID => SpecCapability::Setuid,
            Capability::CAP_SYS_ADMIN => SpecCapability::SysAdmin,
            Capability::CAP_SYS_BOOT => SpecCapability::SysBoot,
            Capability::CAP_SYS_CHROOT => SpecCapability::SysChroot,
            Capability::CAP_SYS_MODULE => SpecCapability::SysModule,
            Capability::CAP_SYS_NICE => SpecCapability::SysNice,
            Capability::CAP_SYS_PACCT => SpecCapability::SysPacct,
            Capability::CAP_SYS_PTRACE => SpecCapability::SysPtrace,
            Capability::CAP_SYS_RAWIO => SpecCapability::SysRawio,
            Capability::CAP_SYS_RESOURCE => SpecCapability::SysResource,
            Capability::CAP_SYS_TIME => SpecCapability::SysTime,
            Capability::CAP_SYS_TTY_CONFIG => SpecCapability::SysTtyConfig,
            Capability::CAP_SYSLOG => SpecCapability::Syslog,
            Capability::CAP_WAKE_ALARM => SpecCapability::WakeAlarm,
            Capability::__Nonexhaustive => unreachable!("invalid capability"),
        }
    }
}
