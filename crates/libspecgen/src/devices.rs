//! Host devices made visible inside the container.

use std::path::{Path, PathBuf};

use oci_spec::runtime::{LinuxDevice, LinuxDeviceBuilder, LinuxDeviceCgroupBuilder};
use oci_spec::OciSpecError;

use crate::generator::Generator;
use crate::host::{HostDevice, HostError, HostInfo};
use crate::mounts::{new_mount, TYPE_BIND};

const DEFAULT_PERMISSIONS: &str = "rwm";

#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("{0} is not a valid device mode")]
    Mode(String),
    #[error("invalid device specification {0:?}")]
    Spec(String),
    #[error(transparent)]
    Host(#[from] HostError),
    #[error(transparent)]
    OciSpec(#[from] OciSpecError),
}

type Result<T> = std::result::Result<T, DeviceError>;

/// A device request in `src[:dst[:perms]]` form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceMapping {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub permissions: String,
}

/// A device cgroup mode is a non-empty subset of `rwm` with no repeats.
pub fn is_valid_device_mode(mode: &str) -> bool {
    if mode.is_empty() {
        return false;
    }
    let mut seen = [false; 3];
    for c in mode.chars() {
        let Some(i) = DEFAULT_PERMISSIONS.find(c) else {
            return false;
        };
        if seen[i] {
            return false;
        }
        seen[i] = true;
    }
    true
}

impl std::str::FromStr for DeviceMapping {
    type Err = DeviceError;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split(':').collect();
        let (source, destination, permissions) = match parts[..] {
            [src] => (src, src, DEFAULT_PERMISSIONS),
            [src, mode] if is_valid_device_mode(mode) => (src, src, mode),
            [src, dst] => (src, dst, DEFAULT_PERMISSIONS),
            [src, dst, mode] => {
                if !is_valid_device_mode(mode) {
                    return Err(DeviceError::Mode(mode.to_owned()));
                }
                (src, dst, mode)
            }
            _ => return Err(DeviceError::Spec(s.to_owned())),
        };
        if source.is_empty() || destination.is_empty() {
            return Err(DeviceError::Spec(s.to_owned()));
        }
        Ok(DeviceMapping {
            source: PathBuf::from(source),
            destination: PathBuf::from(destination),
            permissions: permissions.to_owned(),
        })
    }
}

fn linux_device(device: &HostDevice, destination: &Path) -> Result<LinuxDevice> {
    Ok(LinuxDeviceBuilder::default()
        .path(destination)
        .typ(device.typ)
        .major(device.major)
        .minor(device.minor)
        .file_mode(device.file_mode)
        .uid(device.uid)
        .gid(device.gid)
        .build()?)
}

fn add_device(
    generator: &mut Generator,
    device: &HostDevice,
    destination: &Path,
    permissions: &str,
) -> Result<()> {
    generator.devices.push(linux_device(device, destination)?);
    generator.device_rules.push(
        LinuxDeviceCgroupBuilder::default()
            .allow(true)
            .typ(device.typ)
            .major(device.major)
            .minor(device.minor)
            .access(permissions)
            .build()?,
    );
    Ok(())
}

/// Rootless containers cannot create device nodes, so the host node is bind
/// mounted instead.
fn bind_device(
    generator: &mut Generator,
    source: &Path,
    destination: &Path,
    permissions: &str,
) -> Result<()> {
    let perm = if permissions.contains('w') { "rw" } else { "ro" };
    let mount = new_mount(
        &destination.to_string_lossy(),
        TYPE_BIND,
        &source.to_string_lossy(),
        &["slave", "nosuid", "noexec", perm, "rbind"],
    )?;
    generator.add_mount(mount);
    Ok(())
}

/// Resolves `source` to the devices it names: the node itself, or every
/// node below it when it is a directory.
fn resolve(host: &dyn HostInfo, mapping: &DeviceMapping) -> Result<Vec<(HostDevice, PathBuf)>> {
    match host.device(&mapping.source) {
        Ok(device) => Ok(vec![(device, mapping.destination.clone())]),
        Err(HostError::NotADevice(path)) => {
            let devices = match host.devices_under(&mapping.source) {
                Ok(devices) => devices,
                Err(HostError::Io { .. }) => return Err(HostError::NotADevice(path).into()),
                Err(err) => return Err(err.into()),
            };
            Ok(devices
                .into_iter()
                .map(|device| {
                    let relative = device
                        .path
                        .strip_prefix(&mapping.source)
                        .map(Path::to_path_buf)
                        .unwrap_or_default();
                    let destination = mapping.destination.join(relative);
                    (device, destination)
                })
                .collect())
        }
        Err(err) => Err(err.into()),
    }
}

/// Adds the requested devices of a non-privileged container.
pub(crate) fn add_configured_devices(
    requests: &[String],
    rootless: bool,
    host: &dyn HostInfo,
    generator: &mut Generator,
) -> Result<()> {
    for request in requests {
        let mapping: DeviceMapping = request.parse()?;
        for (device, destination) in resolve(host, &mapping)? {
            tracing::debug!(source = ?device.path, ?destination, rootless, "adding device");
            if rootless {
                bind_device(generator, &device.path, &destination, &mapping.permissions)?;
            } else {
                add_device(generator, &device, &destination, &mapping.permissions)?;
            }
        }
    }
    Ok(())
}

/// Gives a privileged container every host device and an allow-all rule.
pub(crate) fn add_privileged_devices(host: &dyn HostInfo, generator: &mut Generator) -> Result<()> {
    for device in host.devices_under(Path::new("/dev"))? {
        generator.devices.push(linux_device(&device, &device.path)?);
    }
    generator.device_rules = vec![LinuxDeviceCgroupBuilder::default()
        .allow(true)
        .access(DEFAULT_PERMISSIONS)
        .build()?];
    Ok(())
}
