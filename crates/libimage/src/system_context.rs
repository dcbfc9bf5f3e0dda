use std::path::PathBuf;

/// A boolean that can also be left unspecified, so that an unset option is
/// never mistaken for an explicit `false`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OptionalBool {
    #[default]
    Undefined,
    True,
    False,
}

impl From<bool> for OptionalBool {
    fn from(value: bool) -> Self {
        if value {
            OptionalBool::True
        } else {
            OptionalBool::False
        }
    }
}

impl OptionalBool {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            OptionalBool::Undefined => None,
            OptionalBool::True => Some(true),
            OptionalBool::False => Some(false),
        }
    }
}

/// Registry options a caller may pass along with a pull.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DockerRegistryOptions {
    pub docker_cert_path: Option<PathBuf>,
    pub docker_insecure_skip_tls_verify: OptionalBool,
    pub os_choice: Option<String>,
    pub architecture_choice: Option<String>,
    pub variant_choice: Option<String>,
}

/// Everything the copy layer needs to know about the host and the registry
/// configuration for one pull.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SystemContext {
    pub auth_file_path: Option<PathBuf>,
    pub signature_policy_path: Option<PathBuf>,
    pub os_choice: Option<String>,
    pub architecture_choice: Option<String>,
    pub variant_choice: Option<String>,
    pub docker_cert_path: Option<PathBuf>,
    pub docker_insecure_skip_tls_verify: OptionalBool,
    pub blob_info_cache_dir: Option<PathBuf>,
    pub system_registries_conf_path: Option<PathBuf>,
}

impl SystemContext {
    pub fn new(signature_policy_path: Option<PathBuf>, auth_file_path: Option<PathBuf>) -> Self {
        Self {
            signature_policy_path,
            auth_file_path,
            ..Default::default()
        }
    }

    /// Applies per-pull registry overrides. Unset values keep what the
    /// context already carries.
    pub fn apply_docker_options(&mut self, options: &DockerRegistryOptions) {
        if options.os_choice.is_some() {
            self.os_choice = options.os_choice.clone();
        }
        if options.architecture_choice.is_some() {
            self.architecture_choice = options.architecture_choice.clone();
        }
        if options.variant_choice.is_some() {
            self.variant_choice = options.variant_choice.clone();
        }
        if options.docker_cert_path.is_some() {
            self.docker_cert_path = options.docker_cert_path.clone();
        }
        if options.docker_insecure_skip_tls_verify != OptionalBool::Undefined {
            self.docker_insecure_skip_tls_verify = options.docker_insecure_skip_tls_verify;
        }
    }
}
