//! Spec building: compiling a container creation configuration and a set of
//! host facts into an OCI runtime spec.
pub mod blkio;
pub mod builder;
pub mod capabilities;
pub mod config;
pub mod devices;
pub mod error;
mod generator;
pub mod host;
pub mod mounts;
pub mod namespaces;
pub mod resources;
pub mod rlimits;
pub mod seccomp;
pub mod user_ns;

#[cfg(test)]
pub(crate) mod test_utils;

pub use builder::{build, spec_to_json};
pub use config::CreateConfig;
pub use error::{Result, SpecError};
pub use host::{HostInfo, LinuxHost};
