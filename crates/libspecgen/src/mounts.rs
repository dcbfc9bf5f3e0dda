//! Mount list construction: defaults, the root/rootless policy applied to
//! them, user mount precedence, option normalisation and inheritance of
//! restrictive options from the host mount table.

use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};

use oci_spec::runtime::{Mount, MountBuilder};
use oci_spec::OciSpecError;

use crate::generator::Generator;
use crate::host::HostMount;

pub const TYPE_BIND: &str = "bind";
pub const TYPE_TMPFS: &str = "tmpfs";

#[derive(Debug, thiserror::Error)]
pub enum MountError {
    #[error("mount {destination:?}: option {option:?} conflicts with an earlier option")]
    ConflictingOption { destination: PathBuf, option: String },
    #[error("cannot resolve {path:?}")]
    Resolve {
        path: PathBuf,
        source: std::io::Error,
    },
}

type Result<T> = std::result::Result<T, MountError>;

pub(crate) fn new_mount(
    destination: &str,
    typ: &str,
    source: &str,
    options: &[&str],
) -> std::result::Result<Mount, OciSpecError> {
    MountBuilder::default()
        .destination(destination)
        .typ(typ)
        .source(source)
        .options(options.iter().map(|o| o.to_string()).collect::<Vec<_>>())
        .build()
}

/// The pseudo-filesystems every container starts with.
pub(crate) fn default_mounts() -> std::result::Result<Vec<Mount>, OciSpecError> {
    Ok(vec![
        new_mount("/proc", "proc", "proc", &["nosuid", "noexec", "nodev"])?,
        new_mount(
            "/dev",
            TYPE_TMPFS,
            "tmpfs",
            &["nosuid", "strictatime", "mode=755", "size=65536k"],
        )?,
        new_mount(
            "/dev/pts",
            "devpts",
            "devpts",
            &["nosuid", "noexec", "newinstance", "ptmxmode=0666", "mode=0620", "gid=5"],
        )?,
        new_mount("/dev/mqueue", "mqueue", "mqueue", &["nosuid", "noexec", "nodev"])?,
        new_mount("/sys", "sysfs", "sysfs", &["nosuid", "noexec", "nodev", "ro"])?,
    ])
}

/// Facts the default mount policy depends on.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct MountPolicy {
    pub privileged: bool,
    pub rootless: bool,
    pub in_user_ns: bool,
    pub net_host: bool,
    pub ipc_host: bool,
    pub pid_host: bool,
    pub gid5_available: bool,
}

impl MountPolicy {
    /// sysfs can only be mounted fresh when the network namespace belongs
    /// to the container's user namespace.
    pub fn can_mount_sys(&self) -> bool {
        !(self.in_user_ns && self.net_host)
    }
}

/// Rewrites the default mounts for `policy` and adds the cgroup mount.
pub(crate) fn apply_mount_policy(
    policy: &MountPolicy,
    generator: &mut Generator,
) -> std::result::Result<(), OciSpecError> {
    let mut cgroup_perm = "ro";
    let mut add_cgroup = true;

    if policy.privileged && policy.can_mount_sys() {
        cgroup_perm = "rw";
        generator.remove_mount("/sys");
        generator.add_mount(new_mount(
            "/sys",
            "sysfs",
            "sysfs",
            &["rprivate", "nosuid", "noexec", "nodev", "rw"],
        )?);
    } else if !policy.can_mount_sys() {
        tracing::debug!("cannot mount sysfs in a user namespace sharing the host network, binding /sys");
        add_cgroup = false;
        generator.remove_mount("/sys");
        let perm = if policy.privileged { "rw" } else { "ro" };
        generator.add_mount(new_mount(
            "/sys",
            TYPE_BIND,
            "/sys",
            &["rprivate", "nosuid", "noexec", "nodev", perm, "rbind"],
        )?);
        if !policy.privileged && policy.rootless {
            generator.add_masked_path("/sys/kernel");
        }
    }

    if !policy.gid5_available {
        tracing::debug!("gid 5 is not mapped, dropping gid=5 from /dev/pts");
        generator.remove_mount("/dev/pts");
        generator.add_mount(new_mount(
            "/dev/pts",
            "devpts",
            "devpts",
            &["rprivate", "nosuid", "noexec", "newinstance", "ptmxmode=0666", "mode=0620"],
        )?);
    }

    if policy.in_user_ns && policy.ipc_host {
        generator.remove_mount("/dev/mqueue");
        generator.add_mount(new_mount(
            "/dev/mqueue",
            TYPE_BIND,
            "/dev/mqueue",
            &["bind", "nosuid", "noexec", "nodev"],
        )?);
    }

    if policy.in_user_ns && policy.pid_host {
        generator.remove_mount("/proc");
        generator.add_mount(new_mount(
            "/proc",
            TYPE_BIND,
            "/proc",
            &["rbind", "nosuid", "noexec", "nodev"],
        )?);
    }

    if add_cgroup {
        generator.add_mount(new_mount(
            "/sys/fs/cgroup",
            "cgroup",
            "cgroup",
            &["rprivate", "nosuid", "noexec", "nodev", "relatime", cgroup_perm],
        )?);
    }

    Ok(())
}

/// Lexically cleans a path. In contrast to canonicalize the path does not
/// need to exist.
pub fn clean_path(path: &Path) -> PathBuf {
    let mut cleaned = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(..) | Component::CurDir => {}
            Component::RootDir => cleaned.push(component.as_os_str()),
            Component::ParentDir => {
                cleaned.pop();
            }
            Component::Normal(c) => cleaned.push(c),
        }
    }
    cleaned
}

/// Puts user mounts first and keeps only the defaults they do not
/// override. A user `/dev` mount also drops every default below `/dev`.
pub(crate) fn supersede_user_mounts(user_mounts: &[Mount], defaults: Vec<Mount>) -> Vec<Mount> {
    if user_mounts.is_empty() {
        return defaults;
    }

    let destinations: HashSet<PathBuf> = user_mounts
        .iter()
        .map(|m| clean_path(m.destination()))
        .collect();
    let dev = Path::new("/dev");
    let mount_dev = destinations.contains(dev);

    let mut mounts = user_mounts.to_vec();
    for mount in defaults {
        let destination = clean_path(mount.destination());
        if destinations.contains(&destination) {
            continue;
        }
        if mount_dev && destination != dev && destination.starts_with(dev) {
            continue;
        }
        tracing::debug!(?destination, "adding mount");
        mounts.push(mount);
    }
    mounts
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OptionGroup {
    Write,
    Propagation,
    Bind,
    Exec,
    Suid,
    Dev,
    CopyUp,
}

fn option_group(option: &str) -> Option<OptionGroup> {
    let group = match option {
        "ro" | "rw" => OptionGroup::Write,
        "private" | "rprivate" | "slave" | "rslave" | "shared" | "rshared" | "unbindable"
        | "runbindable" => OptionGroup::Propagation,
        "bind" | "rbind" => OptionGroup::Bind,
        "exec" | "noexec" => OptionGroup::Exec,
        "suid" | "nosuid" => OptionGroup::Suid,
        "dev" | "nodev" => OptionGroup::Dev,
        "tmpcopyup" | "notmpcopyup" => OptionGroup::CopyUp,
        _ => return None,
    };
    Some(group)
}

fn check_option_groups(destination: &Path, options: &[String]) -> Result<Vec<OptionGroup>> {
    let mut seen = Vec::new();
    for option in options {
        if let Some(group) = option_group(option) {
            if seen.contains(&group) {
                return Err(MountError::ConflictingOption {
                    destination: destination.to_path_buf(),
                    option: option.clone(),
                });
            }
            seen.push(group);
        }
    }
    Ok(seen)
}

/// Bind mounts default to `rbind` and `rprivate`. Tmpfs mounts other than
/// `/dev` get `tmpcopyup` unless `notmpcopyup` asks otherwise.
pub(crate) fn normalize_mount_options(mounts: Vec<Mount>) -> Result<Vec<Mount>> {
    mounts
        .into_iter()
        .map(|mut mount| {
            let destination = clean_path(mount.destination());
            let mut options = mount.options().clone().unwrap_or_default();
            let typ = mount.typ().clone();

            match typ.as_deref() {
                Some(TYPE_BIND) => {
                    let groups = check_option_groups(&destination, &options)?;
                    if !groups.contains(&OptionGroup::Bind) {
                        options.push("rbind".to_owned());
                    }
                    if !groups.contains(&OptionGroup::Propagation) {
                        options.push("rprivate".to_owned());
                    }
                }
                Some(TYPE_TMPFS) if destination != Path::new("/dev") => {
                    let groups = check_option_groups(&destination, &options)?;
                    if options.iter().any(|o| o == "notmpcopyup") {
                        options.retain(|o| o != "notmpcopyup");
                    } else if !groups.contains(&OptionGroup::CopyUp) {
                        options.push("tmpcopyup".to_owned());
                    }
                }
                _ => return Ok(mount),
            }

            mount.set_options(Some(options));
            Ok(mount)
        })
        .collect()
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(clean_path(path));
    }
    let cwd = std::env::current_dir().map_err(|source| MountError::Resolve {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(clean_path(&cwd.join(path)))
}

/// Finds the host mount covering `target` by longest mount point prefix.
/// Among equally long mount points the later entry wins, as it is mounted
/// on top.
pub fn find_mount<'a>(target: &Path, mounts: &'a [HostMount]) -> Option<&'a HostMount> {
    let mut best: Option<&HostMount> = None;
    for mount in mounts {
        if let Some(best) = best {
            if best.mount_point.as_os_str().len() > mount.mount_point.as_os_str().len() {
                continue;
            }
        }
        if target.starts_with(&mount.mount_point) {
            best = Some(mount);
        }
    }
    best
}

/// Copies `nosuid`, `noexec` and `nodev` from the host mount backing each
/// bind mount's source, so a bind never lifts a restriction of the host.
pub(crate) fn inherit_host_options(mounts: &mut [Mount], host_mounts: &[HostMount]) -> Result<()> {
    for mount in mounts.iter_mut() {
        let mut options = mount.options().clone().unwrap_or_default();
        if !options.iter().any(|o| o == "bind" || o == "rbind") {
            continue;
        }
        let Some(source) = mount.source().clone() else {
            continue;
        };
        let source = absolute(&source)?;
        let Some(host) = find_mount(&source, host_mounts) else {
            continue;
        };

        let mut changed = false;
        for option in &host.options {
            if matches!(option.as_str(), "nosuid" | "noexec" | "nodev") && !options.contains(option) {
                options.push(option.clone());
                changed = true;
            }
        }
        if changed {
            tracing::debug!(?source, mount_point = ?host.mount_point, ?options, "inherited host mount options");
            mount.set_options(Some(options));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use anyhow::Result;

    use super::*;

    fn destinations(mounts: &[Mount]) -> Vec<String> {
        mounts
            .iter()
            .map(|m| m.destination().display().to_string())
            .collect()
    }

    fn options_of<'a>(mounts: &'a [Mount], destination: &str) -> Vec<&'a str> {
        mounts
            .iter()
            .find(|m| m.destination() == Path::new(destination))
            .and_then(|m| m.options().as_ref())
            .map(|o| o.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    fn mount_of<'a>(mounts: &'a [Mount], destination: &str) -> &'a Mount {
        mounts
            .iter()
            .find(|m| m.destination() == Path::new(destination))
            .unwrap()
    }

    fn host_mount(mount_point: &str, options: &[&str]) -> HostMount {
        HostMount {
            mount_point: PathBuf::from(mount_point),
            options: options.iter().map(|o| o.to_string()).collect(),
        }
    }

    fn policy() -> MountPolicy {
        MountPolicy {
            gid5_available: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_default_policy_adds_read_only_cgroup() -> Result<()> {
        let mut g = Generator::new()?;
        apply_mount_policy(&policy(), &mut g)?;
        assert_eq!(
            destinations(&g.mounts),
            vec!["/proc", "/dev", "/dev/pts", "/dev/mqueue", "/sys", "/sys/fs/cgroup"]
        );
        assert_eq!(
            options_of(&g.mounts, "/sys/fs/cgroup"),
            vec!["rprivate", "nosuid", "noexec", "nodev", "relatime", "ro"]
        );
        assert!(options_of(&g.mounts, "/dev/pts").contains(&"gid=5"));
        Ok(())
    }

    #[test]
    fn test_privileged_mounts_fresh_sysfs() -> Result<()> {
        let mut g = Generator::new()?;
        apply_mount_policy(
            &MountPolicy {
                privileged: true,
                ..policy()
            },
            &mut g,
        )?;
        let sys = mount_of(&g.mounts, "/sys");
        assert_eq!(sys.typ().as_deref(), Some("sysfs"));
        assert_eq!(
            options_of(&g.mounts, "/sys"),
            vec!["rprivate", "nosuid", "noexec", "nodev", "rw"]
        );
        assert_eq!(options_of(&g.mounts, "/sys/fs/cgroup").last(), Some(&"rw"));
        Ok(())
    }

    #[test]
    fn test_user_ns_with_host_network_binds_sys() -> Result<()> {
        let mut g = Generator::new()?;
        apply_mount_policy(
            &MountPolicy {
                rootless: true,
                in_user_ns: true,
                net_host: true,
                ..policy()
            },
            &mut g,
        )?;
        let sys = mount_of(&g.mounts, "/sys");
        assert_eq!(sys.typ().as_deref(), Some(TYPE_BIND));
        assert_eq!(sys.source().as_deref(), Some(Path::new("/sys")));
        assert_eq!(
            options_of(&g.mounts, "/sys"),
            vec!["rprivate", "nosuid", "noexec", "nodev", "ro", "rbind"]
        );
        assert!(!destinations(&g.mounts).contains(&"/sys/fs/cgroup".to_owned()));
        assert_eq!(g.masked_paths, vec!["/sys/kernel"]);
        Ok(())
    }

    #[test]
    fn test_privileged_user_ns_with_host_network_binds_sys_rw() -> Result<()> {
        let mut g = Generator::new()?;
        apply_mount_policy(
            &MountPolicy {
                privileged: true,
                rootless: true,
                in_user_ns: true,
                net_host: true,
                ..policy()
            },
            &mut g,
        )?;
        assert!(options_of(&g.mounts, "/sys").contains(&"rw"));
        assert!(g.masked_paths.is_empty());
        Ok(())
    }

    #[test]
    fn test_missing_gid5_drops_option() -> Result<()> {
        let mut g = Generator::new()?;
        apply_mount_policy(
            &MountPolicy {
                gid5_available: false,
                ..policy()
            },
            &mut g,
        )?;
        assert_eq!(
            options_of(&g.mounts, "/dev/pts"),
            vec!["rprivate", "nosuid", "noexec", "newinstance", "ptmxmode=0666", "mode=0620"]
        );
        Ok(())
    }

    #[test]
    fn test_host_ipc_and_pid_in_user_ns_bind_from_host() -> Result<()> {
        let mut g = Generator::new()?;
        apply_mount_policy(
            &MountPolicy {
                in_user_ns: true,
                ipc_host: true,
                pid_host: true,
                ..policy()
            },
            &mut g,
        )?;
        let mqueue = mount_of(&g.mounts, "/dev/mqueue");
        assert_eq!(mqueue.typ().as_deref(), Some(TYPE_BIND));
        assert_eq!(options_of(&g.mounts, "/dev/mqueue")[0], "bind");
        let proc = mount_of(&g.mounts, "/proc");
        assert_eq!(proc.source().as_deref(), Some(Path::new("/proc")));
        assert_eq!(options_of(&g.mounts, "/proc")[0], "rbind");
        Ok(())
    }

    #[test]
    fn test_host_pid_without_user_ns_keeps_proc() -> Result<()> {
        let mut g = Generator::new()?;
        apply_mount_policy(
            &MountPolicy {
                pid_host: true,
                ..policy()
            },
            &mut g,
        )?;
        assert_eq!(mount_of(&g.mounts, "/proc").typ().as_deref(), Some("proc"));
        Ok(())
    }

    #[test]
    fn test_clean_path() {
        assert_eq!(clean_path(Path::new("/dev/")), PathBuf::from("/dev"));
        assert_eq!(clean_path(Path::new("/a/./b/../c")), PathBuf::from("/a/c"));
        assert_eq!(clean_path(Path::new("/../x")), PathBuf::from("/x"));
    }

    #[test]
    fn test_user_mount_replaces_default() -> Result<()> {
        let user = vec![new_mount("/proc/", TYPE_BIND, "/srv/proc", &["ro"])?];
        let mounts = supersede_user_mounts(&user, default_mounts()?);
        assert_eq!(
            destinations(&mounts),
            vec!["/proc/", "/dev", "/dev/pts", "/dev/mqueue", "/sys"]
        );
        Ok(())
    }

    #[test]
    fn test_user_dev_mount_drops_dev_defaults() -> Result<()> {
        let user = vec![new_mount("/dev", TYPE_BIND, "/dev", &[])?];
        let mounts = supersede_user_mounts(&user, default_mounts()?);
        assert_eq!(destinations(&mounts), vec!["/dev", "/proc", "/sys"]);
        Ok(())
    }

    #[test]
    fn test_no_user_mounts_keeps_defaults() -> Result<()> {
        let mounts = supersede_user_mounts(&[], default_mounts()?);
        assert_eq!(mounts, default_mounts()?);
        Ok(())
    }

    #[test]
    fn test_bind_options_get_defaults() -> Result<()> {
        let mounts = normalize_mount_options(vec![
            new_mount("/data", TYPE_BIND, "/srv/data", &["ro"])?,
            new_mount("/cache", TYPE_BIND, "/srv/cache", &["bind", "rshared"])?,
        ])?;
        assert_eq!(options_of(&mounts, "/data"), vec!["ro", "rbind", "rprivate"]);
        assert_eq!(options_of(&mounts, "/cache"), vec!["bind", "rshared"]);
        Ok(())
    }

    #[test]
    fn test_bind_conflicting_options() -> Result<()> {
        for options in [&["ro", "rw"][..], &["bind", "rbind"], &["private", "rslave"]] {
            let err = normalize_mount_options(vec![new_mount(
                "/data",
                TYPE_BIND,
                "/srv/data",
                options,
            )?])
            .unwrap_err();
            assert!(matches!(err, MountError::ConflictingOption { .. }), "{options:?}");
        }
        Ok(())
    }

    #[test]
    fn test_tmpfs_copy_up() -> Result<()> {
        let mounts = normalize_mount_options(vec![
            new_mount("/tmp", TYPE_TMPFS, "tmpfs", &["size=10m"])?,
            new_mount("/run", TYPE_TMPFS, "tmpfs", &["notmpcopyup"])?,
            new_mount("/dev", TYPE_TMPFS, "tmpfs", &["mode=755"])?,
            new_mount("/proc", "proc", "proc", &["nosuid"])?,
        ])?;
        assert_eq!(options_of(&mounts, "/tmp"), vec!["size=10m", "tmpcopyup"]);
        assert!(options_of(&mounts, "/run").is_empty());
        assert_eq!(options_of(&mounts, "/dev"), vec!["mode=755"]);
        assert_eq!(options_of(&mounts, "/proc"), vec!["nosuid"]);
        Ok(())
    }

    #[test]
    fn test_find_mount_longest_prefix() {
        let host = vec![
            host_mount("/", &["rw"]),
            host_mount("/home", &["rw", "nosuid"]),
            host_mount("/home/user/data", &["rw", "noexec"]),
            host_mount("/ho", &["rw"]),
        ];
        assert_eq!(
            find_mount(Path::new("/home/user/file"), &host).unwrap().mount_point,
            PathBuf::from("/home")
        );
        assert_eq!(
            find_mount(Path::new("/home/user/data/x"), &host).unwrap().mount_point,
            PathBuf::from("/home/user/data")
        );
        assert_eq!(
            find_mount(Path::new("/homework"), &host).unwrap().mount_point,
            PathBuf::from("/")
        );
        assert!(find_mount(Path::new("/x"), &[]).is_none());
    }

    #[test]
    fn test_find_mount_prefers_later_overmount() {
        let host = vec![host_mount("/data", &["rw"]), host_mount("/data", &["ro", "nodev"])];
        assert_eq!(
            find_mount(Path::new("/data/a"), &host).unwrap().options,
            vec!["ro", "nodev"]
        );
    }

    #[test]
    fn test_bind_inherits_host_restrictions() -> Result<()> {
        let host = vec![
            host_mount("/", &["rw"]),
            host_mount("/mnt/usb", &["rw", "nosuid", "nodev", "noexec", "relatime"]),
        ];
        let mut mounts = vec![
            new_mount("/usb", TYPE_BIND, "/mnt/usb/photos", &["rbind", "nosuid"])?,
            new_mount("/etc/hosts", TYPE_BIND, "/etc/hosts", &["rbind"])?,
            new_mount("/proc", "proc", "/mnt/usb", &["nosuid"])?,
        ];
        inherit_host_options(&mut mounts, &host)?;
        assert_eq!(
            options_of(&mounts, "/usb"),
            vec!["rbind", "nosuid", "nodev", "noexec"]
        );
        assert_eq!(options_of(&mounts, "/etc/hosts"), vec!["rbind"]);
        assert_eq!(options_of(&mounts, "/proc"), vec!["nosuid"]);
        Ok(())
    }
}
