//! Compiles a containers seccomp profile into the OCI seccomp block.
//!
//! The profile format is a superset of the OCI one: syscall rules may be
//! gated on capabilities and architectures, and the architecture list may
//! be given as a map from a native architecture to its sub-architectures.
//! Compilation resolves those conditions against the container's bounding
//! set and the native architecture.

use std::path::{Path, PathBuf};

use caps::Capability;
use oci_spec::runtime::{
    Arch, LinuxSeccomp, LinuxSeccompAction, LinuxSeccompArg, LinuxSeccompBuilder, LinuxSyscall,
    LinuxSyscallBuilder,
};
use oci_spec::OciSpecError;
use serde::Deserialize;

#[derive(Debug, thiserror::Error)]
pub enum SeccompError {
    #[error("opening seccomp profile ({}) failed", path.display())]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("loading seccomp profile ({}) failed", path.display())]
    Load { path: PathBuf, source: ProfileError },
}

#[derive(Debug, thiserror::Error)]
pub enum ProfileError {
    #[error(transparent)]
    Parse(#[from] serde_json::Error),
    #[error("'architectures' and 'archMap' were specified in the seccomp profile, use either 'architectures' or 'archMap'")]
    ArchitecturesAndArchMap,
    #[error("'name' and 'names' were specified in the seccomp profile, use either 'name' or 'names'")]
    NameAndNames,
    #[error(transparent)]
    OciSpec(#[from] OciSpecError),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub default_action: LinuxSeccompAction,
    #[serde(default)]
    pub default_errno_ret: Option<u32>,
    #[serde(default)]
    pub architectures: Vec<Arch>,
    #[serde(default)]
    pub arch_map: Vec<ArchMapEntry>,
    #[serde(default)]
    pub syscalls: Vec<SyscallRule>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchMapEntry {
    pub architecture: Arch,
    #[serde(default)]
    pub sub_architectures: Vec<Arch>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyscallRule {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub names: Vec<String>,
    pub action: LinuxSeccompAction,
    #[serde(default)]
    pub errno_ret: Option<u32>,
    #[serde(default)]
    pub args: Vec<LinuxSeccompArg>,
    #[serde(default)]
    pub includes: Filter,
    #[serde(default)]
    pub excludes: Filter,
}

/// Conditions on a rule. Arches use the `GOARCH`-style names of the profile
/// format (`amd64`, `arm64`, ...).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Filter {
    #[serde(default)]
    pub caps: Vec<String>,
    #[serde(default)]
    pub arches: Vec<String>,
}

/// The architecture the container will run on, in both naming schemes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeArch {
    /// Profile-format name, e.g. `amd64`.
    pub name: &'static str,
    /// libseccomp name, e.g. `SCMP_ARCH_X86_64`.
    pub scmp: &'static str,
}

impl NativeArch {
    pub fn current() -> Option<Self> {
        let (name, scmp) = match std::env::consts::ARCH {
            "x86_64" => ("amd64", "SCMP_ARCH_X86_64"),
            "x86" => ("386", "SCMP_ARCH_X86"),
            "aarch64" => ("arm64", "SCMP_ARCH_AARCH64"),
            "arm" => ("arm", "SCMP_ARCH_ARM"),
            "s390x" => ("s390x", "SCMP_ARCH_S390X"),
            "powerpc64" => ("ppc64le", "SCMP_ARCH_PPC64LE"),
            "riscv64" => ("riscv64", "SCMP_ARCH_RISCV64"),
            _ => return None,
        };
        Some(NativeArch { name, scmp })
    }

    fn matches(&self, arch: &Arch) -> bool {
        serde_json::to_value(arch)
            .map(|value| value == self.scmp)
            .unwrap_or(false)
    }
}

fn holds_all(bounding: &[String], caps: &[String]) -> bool {
    caps.iter().all(|c| bounding.contains(c))
}

fn holds_any(bounding: &[String], caps: &[String]) -> bool {
    caps.iter().any(|c| bounding.contains(c))
}

fn rule_applies(rule: &SyscallRule, bounding: &[String], native: Option<&NativeArch>) -> bool {
    let native_name = native.map(|n| n.name);
    let listed = |arches: &[String]| native_name.is_some_and(|name| arches.iter().any(|a| a == name));

    if listed(&rule.excludes.arches) || holds_any(bounding, &rule.excludes.caps) {
        return false;
    }
    if !rule.includes.arches.is_empty() && !listed(&rule.includes.arches) {
        return false;
    }
    holds_all(bounding, &rule.includes.caps)
}

impl Profile {
    /// Resolves the profile for a process holding `bounding`.
    pub fn compile(
        &self,
        bounding: &[Capability],
        native: Option<&NativeArch>,
    ) -> Result<LinuxSeccomp, ProfileError> {
        if !self.architectures.is_empty() && !self.arch_map.is_empty() {
            return Err(ProfileError::ArchitecturesAndArchMap);
        }

        let mut architectures = self.architectures.clone();
        if let Some(native) = native {
            for entry in self.arch_map.iter().filter(|e| native.matches(&e.architecture)) {
                architectures.push(entry.architecture);
                architectures.extend(entry.sub_architectures.iter().copied());
            }
        }

        let bounding: Vec<String> = bounding.iter().map(|c| c.to_string()).collect();
        let mut syscalls: Vec<LinuxSyscall> = Vec::new();
        for rule in &self.syscalls {
            if !rule.name.is_empty() && !rule.names.is_empty() {
                return Err(ProfileError::NameAndNames);
            }
            if !rule_applies(rule, &bounding, native) {
                continue;
            }

            let names = if rule.name.is_empty() {
                rule.names.clone()
            } else {
                vec![rule.name.clone()]
            };
            let mut syscall = LinuxSyscallBuilder::default().names(names).action(rule.action);
            if let Some(errno) = rule.errno_ret {
                syscall = syscall.errno_ret(errno);
            }
            if !rule.args.is_empty() {
                syscall = syscall.args(rule.args.clone());
            }
            syscalls.push(syscall.build()?);
        }

        let mut seccomp = LinuxSeccompBuilder::default()
            .default_action(self.default_action)
            .syscalls(syscalls);
        if let Some(errno) = self.default_errno_ret {
            seccomp = seccomp.default_errno_ret(errno);
        }
        if !architectures.is_empty() {
            seccomp = seccomp.architectures(architectures);
        }
        Ok(seccomp.build()?)
    }
}

/// Reads and compiles the profile at `path`.
pub fn load_profile(
    path: &Path,
    bounding: &[Capability],
    native: Option<&NativeArch>,
) -> Result<LinuxSeccomp, SeccompError> {
    let contents = std::fs::read_to_string(path).map_err(|source| SeccompError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    let load = || -> Result<LinuxSeccomp, ProfileError> {
        let profile: Profile = serde_json::from_str(&contents)?;
        profile.compile(bounding, native)
    };
    load().map_err(|source| SeccompError::Load {
        path: path.to_path_buf(),
        source,
    })
}
