//! Namespace modes and the policy that turns them into spec namespaces.
//!
//! Only joining an explicit namespace path and sharing the host's namespace
//! change the spec. Container, pod and network-specific modes are wired up
//! by the layers that start the container, so they are recognised here but
//! leave the namespace list alone.

use std::fmt::{self, Display};
use std::path::PathBuf;
use std::str::FromStr;

use oci_spec::runtime::LinuxNamespaceType;
use oci_spec::OciSpecError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;

use crate::config::IdMappings;
use crate::generator::Generator;

static NETWORK_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9][a-zA-Z0-9_.-]*$").unwrap());

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NamespaceModeError {
    #[error("unknown namespace mode {0:?}")]
    Unknown(String),
    #[error("unknown network mode {0:?}")]
    UnknownNetwork(String),
}

/// Mode of the PID, IPC, UTS and user namespaces.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub enum NamespaceMode {
    /// A fresh namespace owned by the container.
    #[default]
    Private,
    Host,
    /// `ns:<path>`: join the namespace at this path.
    Path(PathBuf),
    /// `container:<id>`: share another container's namespace.
    Container(String),
    Pod,
}

impl NamespaceMode {
    pub fn is_host(&self) -> bool {
        matches!(self, NamespaceMode::Host)
    }
}

impl FromStr for NamespaceMode {
    type Err = NamespaceModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mode = match s {
            "" | "private" => NamespaceMode::Private,
            "host" => NamespaceMode::Host,
            "pod" => NamespaceMode::Pod,
            _ => match s.split_once(':') {
                Some(("ns", path)) if !path.is_empty() => NamespaceMode::Path(path.into()),
                Some(("container", id)) if !id.is_empty() => NamespaceMode::Container(id.into()),
                _ => return Err(NamespaceModeError::Unknown(s.to_owned())),
            },
        };
        Ok(mode)
    }
}

impl TryFrom<String> for NamespaceMode {
    type Error = NamespaceModeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl Display for NamespaceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NamespaceMode::Private => write!(f, "private"),
            NamespaceMode::Host => write!(f, "host"),
            NamespaceMode::Path(path) => write!(f, "ns:{}", path.display()),
            NamespaceMode::Container(id) => write!(f, "container:{id}"),
            NamespaceMode::Pod => write!(f, "pod"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub enum NetworkMode {
    #[default]
    Bridge,
    None,
    Host,
    Path(PathBuf),
    Container(String),
    Pod,
    Slirp4netns,
    /// A named network created by the user.
    UserDefined(String),
}

impl NetworkMode {
    pub fn is_host(&self) -> bool {
        matches!(self, NetworkMode::Host)
    }
}

impl FromStr for NetworkMode {
    type Err = NamespaceModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mode = match s {
            "" | "default" | "bridge" => NetworkMode::Bridge,
            "none" => NetworkMode::None,
            "host" => NetworkMode::Host,
            "pod" => NetworkMode::Pod,
            "slirp4netns" => NetworkMode::Slirp4netns,
            _ => match s.split_once(':') {
                Some(("ns", path)) if !path.is_empty() => NetworkMode::Path(path.into()),
                Some(("container", id)) if !id.is_empty() => NetworkMode::Container(id.into()),
                Some(("slirp4netns", _)) => NetworkMode::Slirp4netns,
                None if NETWORK_NAME_RE.is_match(s) => NetworkMode::UserDefined(s.to_owned()),
                _ => return Err(NamespaceModeError::UnknownNetwork(s.to_owned())),
            },
        };
        Ok(mode)
    }
}

impl TryFrom<String> for NetworkMode {
    type Error = NamespaceModeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl Display for NetworkMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkMode::Bridge => write!(f, "bridge"),
            NetworkMode::None => write!(f, "none"),
            NetworkMode::Host => write!(f, "host"),
            NetworkMode::Path(path) => write!(f, "ns:{}", path.display()),
            NetworkMode::Container(id) => write!(f, "container:{id}"),
            NetworkMode::Pod => write!(f, "pod"),
            NetworkMode::Slirp4netns => write!(f, "slirp4netns"),
            NetworkMode::UserDefined(name) => write!(f, "{name}"),
        }
    }
}

/// Applies a PID, IPC or UTS namespace mode.
pub(crate) fn apply_namespace_mode(
    typ: LinuxNamespaceType,
    mode: &NamespaceMode,
    generator: &mut Generator,
) -> Result<(), OciSpecError> {
    match mode {
        NamespaceMode::Path(path) => {
            tracing::debug!(namespace = ?typ, ?path, "joining namespace by path");
            generator.add_or_replace_namespace(typ, Some(path.clone()))?;
        }
        NamespaceMode::Host => {
            tracing::debug!(namespace = ?typ, "sharing the host namespace");
            generator.remove_namespace(typ);
        }
        NamespaceMode::Container(id) => {
            tracing::debug!(namespace = ?typ, container = %id, "using container namespace mode");
        }
        NamespaceMode::Pod => {
            tracing::debug!(namespace = ?typ, "using pod namespace mode");
        }
        NamespaceMode::Private => {}
    }
    Ok(())
}

pub(crate) fn apply_user_mode(
    mode: &NamespaceMode,
    id_mappings: &IdMappings,
    generator: &mut Generator,
) -> Result<(), OciSpecError> {
    if let NamespaceMode::Path(path) = mode {
        tracing::debug!(?path, "joining user namespace by path");
        generator.add_or_replace_namespace(LinuxNamespaceType::User, Some(path.clone()))?;
        // The low-level runtime requires a mapping even when joining.
        generator.add_uid_mapping(0, 0, 1)?;
        generator.add_gid_mapping(0, 0, 1)?;
    }

    if !id_mappings.is_empty() && !mode.is_host() {
        generator.add_or_replace_namespace(LinuxNamespaceType::User, None)?;
    }
    Ok(())
}

pub(crate) fn apply_network_mode(
    mode: &NetworkMode,
    generator: &mut Generator,
) -> Result<(), OciSpecError> {
    match mode {
        NetworkMode::Host => {
            tracing::debug!("using host netmode");
            generator.remove_namespace(LinuxNamespaceType::Network);
        }
        NetworkMode::Path(path) => {
            tracing::debug!(?path, "using ns netmode");
            generator.add_or_replace_namespace(LinuxNamespaceType::Network, Some(path.clone()))?;
        }
        NetworkMode::None => tracing::debug!("using none netmode"),
        NetworkMode::Bridge => tracing::debug!("using bridge netmode"),
        NetworkMode::Container(id) => tracing::debug!(container = %id, "using container netmode"),
        NetworkMode::Pod => tracing::debug!("using pod netmode, unless pod is not sharing"),
        NetworkMode::Slirp4netns => tracing::debug!("using slirp4netns netmode"),
        NetworkMode::UserDefined(name) => tracing::debug!(network = %name, "using user defined netmode"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use oci_spec::runtime::LinuxNamespace;

    use super::*;
    use crate::config::IdMap;

    fn namespace<'a>(
        namespaces: &'a [LinuxNamespace],
        typ: LinuxNamespaceType,
    ) -> Option<&'a LinuxNamespace> {
        namespaces.iter().find(|ns| ns.typ() == typ)
    }

    #[test]
    fn test_parse_namespace_modes() {
        let tests = vec![
            ("", NamespaceMode::Private),
            ("private", NamespaceMode::Private),
            ("host", NamespaceMode::Host),
            ("pod", NamespaceMode::Pod),
            ("ns:/run/netns/a", NamespaceMode::Path("/run/netns/a".into())),
            ("container:abc", NamespaceMode::Container("abc".into())),
        ];
        for (input, want) in tests {
            assert_eq!(input.parse::<NamespaceMode>(), Ok(want), "{input}");
        }

        for input in ["ns:", "container:", "bridge", "hostile"] {
            assert_eq!(
                input.parse::<NamespaceMode>(),
                Err(NamespaceModeError::Unknown(input.to_owned()))
            );
        }
    }

    #[test]
    fn test_parse_network_modes() {
        let tests = vec![
            ("", NetworkMode::Bridge),
            ("default", NetworkMode::Bridge),
            ("none", NetworkMode::None),
            ("host", NetworkMode::Host),
            ("ns:/run/netns/a", NetworkMode::Path("/run/netns/a".into())),
            ("container:abc", NetworkMode::Container("abc".into())),
            ("pod", NetworkMode::Pod),
            ("slirp4netns", NetworkMode::Slirp4netns),
            ("slirp4netns:port_handler=rootlesskit", NetworkMode::Slirp4netns),
            ("backend_net", NetworkMode::UserDefined("backend_net".into())),
        ];
        for (input, want) in tests {
            assert_eq!(input.parse::<NetworkMode>(), Ok(want), "{input}");
        }

        for input in ["container:", "ns:", "-dash", "two words", "weird:mode"] {
            let err = input.parse::<NetworkMode>().unwrap_err();
            assert!(err.to_string().starts_with("unknown network mode"));
        }
    }

    #[test]
    fn test_mode_display_round_trips() {
        for input in ["private", "host", "pod", "ns:/proc/1/ns/pid", "container:abc"] {
            let mode: NamespaceMode = input.parse().unwrap();
            assert_eq!(mode.to_string(), input);
        }
        for input in ["bridge", "none", "host", "slirp4netns", "mynet", "ns:/x"] {
            let mode: NetworkMode = input.parse().unwrap();
            assert_eq!(mode.to_string(), input);
        }
    }

    #[test]
    fn test_host_mode_removes_namespace() -> Result<()> {
        let mut g = Generator::new()?;
        apply_namespace_mode(LinuxNamespaceType::Pid, &NamespaceMode::Host, &mut g)?;
        assert!(namespace(&g.namespaces, LinuxNamespaceType::Pid).is_none());
        assert!(namespace(&g.namespaces, LinuxNamespaceType::Ipc).is_some());
        Ok(())
    }

    #[test]
    fn test_path_mode_replaces_namespace() -> Result<()> {
        let mut g = Generator::new()?;
        let before = g.namespaces.len();
        apply_namespace_mode(
            LinuxNamespaceType::Uts,
            &NamespaceMode::Path("/proc/42/ns/uts".into()),
            &mut g,
        )?;
        assert_eq!(g.namespaces.len(), before);
        let uts = namespace(&g.namespaces, LinuxNamespaceType::Uts).unwrap();
        assert_eq!(uts.path().as_deref(), Some(std::path::Path::new("/proc/42/ns/uts")));
        Ok(())
    }

    #[test]
    fn test_container_and_pod_modes_are_no_ops() -> Result<()> {
        let mut g = Generator::new()?;
        let before = g.namespaces.clone();
        apply_namespace_mode(
            LinuxNamespaceType::Ipc,
            &NamespaceMode::Container("abc".into()),
            &mut g,
        )?;
        apply_namespace_mode(LinuxNamespaceType::Pid, &NamespaceMode::Pod, &mut g)?;
        apply_network_mode(&NetworkMode::Slirp4netns, &mut g)?;
        apply_network_mode(&NetworkMode::UserDefined("mynet".into()), &mut g)?;
        assert_eq!(g.namespaces, before);
        Ok(())
    }

    #[test]
    fn test_network_host_and_path() -> Result<()> {
        let mut g = Generator::new()?;
        apply_network_mode(&NetworkMode::Path("/run/netns/a".into()), &mut g)?;
        let net = namespace(&g.namespaces, LinuxNamespaceType::Network).unwrap();
        assert_eq!(net.path().as_deref(), Some(std::path::Path::new("/run/netns/a")));

        apply_network_mode(&NetworkMode::Host, &mut g)?;
        assert!(namespace(&g.namespaces, LinuxNamespaceType::Network).is_none());
        Ok(())
    }

    #[test]
    fn test_joining_user_namespace_adds_dummy_mappings() -> Result<()> {
        let mut g = Generator::new()?;
        apply_user_mode(
            &NamespaceMode::Path("/proc/42/ns/user".into()),
            &IdMappings::default(),
            &mut g,
        )?;
        let user = namespace(&g.namespaces, LinuxNamespaceType::User).unwrap();
        assert!(user.path().is_some());
        assert_eq!(g.uid_mappings.len(), 1);
        assert_eq!(g.uid_mappings[0].size(), 1);
        assert_eq!(g.gid_mappings[0].container_id(), 0);
        Ok(())
    }

    #[test]
    fn test_id_mappings_add_private_user_namespace() -> Result<()> {
        let mappings = IdMappings {
            uid_map: vec![IdMap {
                container_id: 0,
                host_id: 100000,
                size: 65536,
            }],
            gid_map: Vec::new(),
        };

        let mut g = Generator::new()?;
        apply_user_mode(&NamespaceMode::Private, &mappings, &mut g)?;
        let user = namespace(&g.namespaces, LinuxNamespaceType::User).unwrap();
        assert!(user.path().is_none());

        let mut g = Generator::new()?;
        apply_user_mode(&NamespaceMode::Host, &mappings, &mut g)?;
        assert!(namespace(&g.namespaces, LinuxNamespaceType::User).is_none());
        Ok(())
    }
}
