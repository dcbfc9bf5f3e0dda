//! Mutable working state of a spec while policy is applied to it.
//!
//! The OCI types are mostly built once through their builders, so the
//! policy code edits this flat model and [`Generator::into_spec`] assembles
//! the final [`Spec`] at the end.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use oci_spec::runtime::{
    Linux, LinuxDevice, LinuxDeviceCgroup, LinuxDeviceCgroupBuilder, LinuxIdMapping,
    LinuxIdMappingBuilder, LinuxNamespace, LinuxNamespaceBuilder, LinuxNamespaceType,
    LinuxResources, LinuxRlimit, LinuxRlimitBuilder, LinuxRlimitType, LinuxSeccomp, Mount,
    Process, RootBuilder, Spec, UserBuilder,
};
use oci_spec::OciSpecError;

use crate::capabilities::CapabilitySets;
use crate::mounts;

const DEFAULT_PATH_ENV: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";
const DEFAULT_NOFILE: u64 = 1024;

#[derive(Debug, Clone)]
pub(crate) struct Generator {
    pub hostname: Option<String>,
    pub cwd: PathBuf,
    pub args: Vec<String>,
    pub terminal: bool,
    /// `KEY=value` entries in insertion order.
    pub env: Vec<String>,
    pub uid: u32,
    pub gid: u32,
    pub no_new_privileges: bool,
    pub apparmor_profile: Option<String>,
    pub oom_score_adj: Option<i32>,
    pub rlimits: Vec<LinuxRlimit>,
    pub capabilities: CapabilitySets,
    pub root_readonly: bool,
    pub annotations: BTreeMap<String, String>,
    pub mounts: Vec<Mount>,
    pub namespaces: Vec<LinuxNamespace>,
    pub uid_mappings: Vec<LinuxIdMapping>,
    pub gid_mappings: Vec<LinuxIdMapping>,
    pub sysctl: BTreeMap<String, String>,
    pub devices: Vec<LinuxDevice>,
    pub device_rules: Vec<LinuxDeviceCgroup>,
    pub masked_paths: Vec<String>,
    pub readonly_paths: Vec<String>,
    pub seccomp: Option<LinuxSeccomp>,
}

impl Generator {
    /// A generator holding the default Linux container setup: the standard
    /// pseudo-filesystem mounts, private pid/network/ipc/uts/mount
    /// namespaces, the default capability set and a deny-all device rule.
    pub fn new() -> Result<Self, OciSpecError> {
        let namespaces = [
            LinuxNamespaceType::Pid,
            LinuxNamespaceType::Network,
            LinuxNamespaceType::Ipc,
            LinuxNamespaceType::Uts,
            LinuxNamespaceType::Mount,
        ]
        .into_iter()
        .map(|typ| LinuxNamespaceBuilder::default().typ(typ).build())
        .collect::<Result<Vec<_>, _>>()?;

        let nofile = LinuxRlimitBuilder::default()
            .typ(LinuxRlimitType::RlimitNofile)
            .hard(DEFAULT_NOFILE)
            .soft(DEFAULT_NOFILE)
            .build()?;

        let deny_all = LinuxDeviceCgroupBuilder::default()
            .allow(false)
            .access("rwm")
            .build()?;

        Ok(Self {
            hostname: None,
            cwd: PathBuf::from("/"),
            args: Vec::new(),
            terminal: false,
            env: vec![format!("PATH={DEFAULT_PATH_ENV}"), "TERM=xterm".to_owned()],
            uid: 0,
            gid: 0,
            no_new_privileges: false,
            apparmor_profile: None,
            oom_score_adj: None,
            rlimits: vec![nofile],
            capabilities: CapabilitySets::uniform(crate::capabilities::default_capabilities()),
            root_readonly: false,
            annotations: BTreeMap::new(),
            mounts: mounts::default_mounts()?,
            namespaces,
            uid_mappings: Vec::new(),
            gid_mappings: Vec::new(),
            sysctl: BTreeMap::new(),
            devices: Vec::new(),
            device_rules: vec![deny_all],
            masked_paths: Vec::new(),
            readonly_paths: Vec::new(),
            seccomp: None,
        })
    }

    /// Sets `key=value`, replacing an existing entry for the same key.
    pub fn add_process_env(&mut self, key: &str, value: &str) {
        let entry = format!("{key}={value}");
        let prefix = format!("{key}=");
        match self.env.iter_mut().find(|e| e.starts_with(&prefix)) {
            Some(existing) => *existing = entry,
            None => self.env.push(entry),
        }
    }

    pub fn add_rlimit(
        &mut self,
        typ: LinuxRlimitType,
        hard: u64,
        soft: u64,
    ) -> Result<(), OciSpecError> {
        let rlimit = LinuxRlimitBuilder::default()
            .typ(typ)
            .hard(hard)
            .soft(soft)
            .build()?;
        match self.rlimits.iter_mut().find(|r| r.typ() == typ) {
            Some(existing) => *existing = rlimit,
            None => self.rlimits.push(rlimit),
        }
        Ok(())
    }

    pub fn remove_mount(&mut self, destination: &str) {
        self.mounts
            .retain(|m| m.destination().as_path() != Path::new(destination));
    }

    pub fn add_mount(&mut self, mount: Mount) {
        self.mounts.push(mount);
    }

    pub fn add_or_replace_namespace(
        &mut self,
        typ: LinuxNamespaceType,
        path: Option<PathBuf>,
    ) -> Result<(), OciSpecError> {
        let mut builder = LinuxNamespaceBuilder::default().typ(typ);
        if let Some(path) = path {
            builder = builder.path(path);
        }
        let namespace = builder.build()?;

        match self.namespaces.iter_mut().find(|ns| ns.typ() == typ) {
            Some(existing) => *existing = namespace,
            None => self.namespaces.push(namespace),
        }
        Ok(())
    }

    pub fn remove_namespace(&mut self, typ: LinuxNamespaceType) {
        self.namespaces.retain(|ns| ns.typ() != typ);
    }

    pub fn add_uid_mapping(
        &mut self,
        host_id: u32,
        container_id: u32,
        size: u32,
    ) -> Result<(), OciSpecError> {
        self.uid_mappings
            .push(id_mapping(host_id, container_id, size)?);
        Ok(())
    }

    pub fn add_gid_mapping(
        &mut self,
        host_id: u32,
        container_id: u32,
        size: u32,
    ) -> Result<(), OciSpecError> {
        self.gid_mappings
            .push(id_mapping(host_id, container_id, size)?);
        Ok(())
    }

    pub fn add_masked_path(&mut self, path: &str) {
        if !self.masked_paths.iter().any(|p| p == path) {
            self.masked_paths.push(path.to_owned());
        }
    }

    pub fn add_readonly_path(&mut self, path: &str) {
        if !self.readonly_paths.iter().any(|p| p == path) {
            self.readonly_paths.push(path.to_owned());
        }
    }

    /// Assembles the final spec. `resources` is `None` only when the
    /// resources block should be left out.
    pub fn into_spec(self, resources: Option<LinuxResources>) -> Result<Spec, OciSpecError> {
        let user = UserBuilder::default().uid(self.uid).gid(self.gid).build()?;

        let mut process = Process::default();
        process
            .set_terminal(Some(self.terminal))
            .set_user(user)
            .set_args(Some(self.args))
            .set_env(Some(self.env))
            .set_cwd(self.cwd)
            .set_capabilities(Some(self.capabilities.into_oci()?))
            .set_rlimits(non_empty(self.rlimits))
            .set_no_new_privileges(Some(self.no_new_privileges))
            .set_apparmor_profile(self.apparmor_profile)
            .set_oom_score_adj(self.oom_score_adj);

        let mut linux = Linux::default();
        linux
            .set_uid_mappings(non_empty(self.uid_mappings))
            .set_gid_mappings(non_empty(self.gid_mappings))
            .set_sysctl(non_empty_map(self.sysctl))
            .set_resources(resources)
            .set_namespaces(Some(self.namespaces))
            .set_devices(non_empty(self.devices))
            .set_seccomp(self.seccomp)
            .set_masked_paths(non_empty(self.masked_paths))
            .set_readonly_paths(non_empty(self.readonly_paths));

        let root = RootBuilder::default()
            .path("rootfs")
            .readonly(self.root_readonly)
            .build()?;

        let mut spec = Spec::default();
        spec.set_root(Some(root))
            .set_mounts(Some(self.mounts))
            .set_process(Some(process))
            .set_hostname(self.hostname.filter(|h| !h.is_empty()))
            .set_annotations(non_empty_map(self.annotations))
            .set_linux(Some(linux));
        Ok(spec)
    }
}

fn id_mapping(host_id: u32, container_id: u32, size: u32) -> Result<LinuxIdMapping, OciSpecError> {
    LinuxIdMappingBuilder::default()
        .host_id(host_id)
        .container_id(container_id)
        .size(size)
        .build()
}

fn non_empty<T>(items: Vec<T>) -> Option<Vec<T>> {
    (!items.is_empty()).then_some(items)
}

fn non_empty_map(map: BTreeMap<String, String>) -> Option<HashMap<String, String>> {
    (!map.is_empty()).then(|| map.into_iter().collect())
}
