use oci_spec::OciSpecError;

use crate::blkio::BlkioError;
use crate::capabilities::CapabilityError;
use crate::devices::DeviceError;
use crate::host::HostError;
use crate::mounts::MountError;
use crate::resources::ResourceError;
use crate::rlimits::RlimitError;
use crate::seccomp::SeccompError;

#[derive(Debug, thiserror::Error)]
pub enum SpecError {
    #[error("unable to retrieve hostname")]
    Hostname(#[source] HostError),
    #[error("error creating block io")]
    BlockIo(#[source] BlkioError),
    #[error(transparent)]
    Host(#[from] HostError),
    #[error(transparent)]
    Mount(#[from] MountError),
    #[error(transparent)]
    Resource(#[from] ResourceError),
    #[error(transparent)]
    Rlimit(#[from] RlimitError),
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error(transparent)]
    Capability(#[from] CapabilityError),
    #[error(transparent)]
    Seccomp(#[from] SeccompError),
    #[error(transparent)]
    OciSpec(#[from] OciSpecError),
    #[error("failed to serialize spec")]
    Serialize(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SpecError>;
