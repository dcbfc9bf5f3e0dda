//! Compiles a [`CreateConfig`] into an OCI runtime spec.
//!
//! The build is a pure function of the configuration, the caller's extra
//! mounts and the facts read through [`HostInfo`]. Every policy branch runs
//! exactly once, and any validation failure aborts the whole build so a
//! partial spec is never returned.

use std::path::PathBuf;

use caps::Capability;
use oci_spec::runtime::{LinuxNamespaceType, LinuxSeccomp, Mount, Spec};
use serde_json::Value;

use crate::blkio;
use crate::capabilities::{default_capabilities, CapabilitySets};
use crate::config::CreateConfig;
use crate::devices;
use crate::error::{Result, SpecError};
use crate::generator::Generator;
use crate::host::HostInfo;
use crate::mounts::{self, MountPolicy};
use crate::namespaces;
use crate::resources::ResourcePlan;
use crate::rlimits;
use crate::seccomp::{self, NativeArch};
use crate::user_ns;

/// Value of the `container` variable in the process environment.
pub const CONTAINER_ENGINE: &str = "stevedore";

const PROXY_ENV: &[&str] = &[
    "http_proxy",
    "HTTP_PROXY",
    "https_proxy",
    "HTTPS_PROXY",
    "ftp_proxy",
    "FTP_PROXY",
    "no_proxy",
    "NO_PROXY",
];

const MASKED_PATHS: &[&str] = &[
    "/proc/acpi",
    "/proc/kcore",
    "/proc/keys",
    "/proc/latency_stats",
    "/proc/timer_list",
    "/proc/timer_stats",
    "/proc/sched_debug",
    "/proc/scsi",
    "/sys/firmware",
    "/sys/fs/selinux",
];

const READONLY_PATHS: &[&str] = &[
    "/proc/asound",
    "/proc/bus",
    "/proc/fs",
    "/proc/irq",
    "/proc/sys",
    "/proc/sysrq-trigger",
];

/// Builds the spec for `config`. `user_mounts` take precedence over the
/// default mounts with the same destination.
#[tracing::instrument(level = "debug", skip_all)]
pub fn build(config: &CreateConfig, host: &dyn HostInfo, user_mounts: &[Mount]) -> Result<Spec> {
    let mut g = Generator::new()?;
    let rootless = host.is_rootless();
    let in_user_ns =
        rootless || (!config.id_mappings.is_empty() && !config.userns_mode.is_host());

    let host_gids = if rootless {
        Some(host.available_gids()?)
    } else {
        None
    };
    let policy = MountPolicy {
        privileged: config.privileged,
        rootless,
        in_user_ns,
        net_host: config.net_mode.is_host(),
        ipc_host: config.ipc_mode.is_host(),
        pid_host: config.pid_mode.is_host(),
        gid5_available: user_ns::gid5_available(host_gids, &config.id_mappings.gid_map),
    };
    tracing::debug!(?policy, "mount policy");
    mounts::apply_mount_policy(&policy, &mut g)?;

    g.cwd = config
        .work_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from("/"));
    g.args = config.command.clone();
    g.terminal = config.tty;
    g.annotations = config.annotations.clone();
    g.root_readonly = config.read_only_rootfs;

    if config.http_proxy {
        for key in PROXY_ENV {
            if let Some(value) = host.env_var(key).filter(|v| !v.is_empty()) {
                g.add_process_env(key, &value);
            }
        }
    }

    apply_hostname(config, host, &mut g)?;
    g.sysctl = config.sysctl.clone();
    g.add_process_env("container", CONTAINER_ENGINE);

    let mut plan = ResourcePlan::from_config(&config.resources)?;
    g.oom_score_adj = Some(config.resources.oom_score_adj);

    if config.privileged {
        if !rootless {
            devices::add_privileged_devices(host, &mut g)?;
        }
    } else {
        devices::add_configured_devices(&config.devices, rootless, host, &mut g)?;
    }

    for map in &config.id_mappings.uid_map {
        g.add_uid_mapping(map.host_id, map.container_id, map.size)?;
    }
    for map in &config.id_mappings.gid_map {
        g.add_gid_mapping(map.host_id, map.container_id, map.size)?;
    }
    g.no_new_privileges = config.no_new_privileges;
    if !config.privileged && !config.apparmor_profile.is_empty() {
        g.apparmor_profile = Some(config.apparmor_profile.clone());
    }

    block_kernel_filesystems(config, rootless, &mut g);

    for (key, value) in &config.env {
        g.add_process_env(key, value);
    }

    rlimits::apply_rlimits(&config.resources.ulimit, rootless, host, &mut g)?;

    namespaces::apply_namespace_mode(LinuxNamespaceType::Pid, &config.pid_mode, &mut g)?;
    namespaces::apply_user_mode(&config.userns_mode, &config.id_mappings, &mut g)?;
    namespaces::apply_network_mode(&config.net_mode, &mut g)?;
    namespaces::apply_namespace_mode(LinuxNamespaceType::Uts, &config.uts_mode, &mut g)?;
    namespaces::apply_namespace_mode(LinuxNamespaceType::Ipc, &config.ipc_mode, &mut g)?;

    // The seccomp profile is resolved against the final bounding set.
    g.capabilities = CapabilitySets::for_config(
        config,
        &default_capabilities(),
        host.supported_capabilities(),
    )?;
    g.seccomp = seccomp_filter(config, host, &g.capabilities.bounding)?;

    let assembled = mounts::supersede_user_mounts(user_mounts, std::mem::take(&mut g.mounts));
    let mut assembled = mounts::normalize_mount_options(assembled)?;

    let block_io = blkio::block_io(&config.resources, host).map_err(SpecError::BlockIo)?;
    plan.set_block_io(block_io);

    let rootless_unified = if rootless {
        Some(host.cgroup_setup()?.is_unified())
    } else {
        None
    };
    let resources = plan.into_resources(std::mem::take(&mut g.device_rules), rootless_unified)?;

    mounts::inherit_host_options(&mut assembled, &host.mounts()?)?;
    g.mounts = assembled;

    Ok(g.into_spec(Some(resources))?)
}

fn apply_hostname(config: &CreateConfig, host: &dyn HostInfo, g: &mut Generator) -> Result<()> {
    let mut hostname = config.hostname.clone();
    if hostname.is_empty() && (config.net_mode.is_host() || config.uts_mode.is_host()) {
        hostname = host.hostname().map_err(SpecError::Hostname)?;
    }

    // Only a private UTS namespace or an explicit name sets the spec field.
    g.hostname = None;
    if !config.hostname.is_empty() || !config.uts_mode.is_host() {
        g.hostname = Some(hostname.clone());
    }
    g.add_process_env("HOSTNAME", &hostname);
    Ok(())
}

fn block_kernel_filesystems(config: &CreateConfig, rootless: bool, g: &mut Generator) {
    if config.privileged {
        return;
    }
    for path in MASKED_PATHS {
        g.add_masked_path(path);
    }
    if config.pid_mode.is_host() && rootless {
        return;
    }
    for path in READONLY_PATHS {
        g.add_readonly_path(path);
    }
}

fn seccomp_filter(
    config: &CreateConfig,
    host: &dyn HostInfo,
    bounding: &[Capability],
) -> Result<Option<LinuxSeccomp>> {
    if config.privileged || config.is_seccomp_unconfined() {
        return Ok(None);
    }

    let path = if config.seccomp_profile_path.is_empty() {
        match host.default_seccomp_profile() {
            Some(path) => path,
            None => {
                tracing::warn!("no default seccomp profile found, running without a seccomp filter");
                return Ok(None);
            }
        }
    } else {
        PathBuf::from(&config.seccomp_profile_path)
    };

    let native = NativeArch::current();
    Ok(Some(seccomp::load_profile(&path, bounding, native.as_ref())?))
}

/// Serializes `spec` with object keys and capability sets sorted, so equal
/// specs always produce identical bytes.
pub fn spec_to_json(spec: &Spec) -> Result<String> {
    let mut value = serde_json::to_value(spec)?;
    if let Some(sets) = value
        .pointer_mut("/process/capabilities")
        .and_then(Value::as_object_mut)
    {
        for set in sets.values_mut() {
            if let Some(list) = set.as_array_mut() {
                list.sort_by(|a, b| a.as_str().cmp(&b.as_str()));
            }
        }
    }
    Ok(serde_json::to_string_pretty(&value)?)
}
