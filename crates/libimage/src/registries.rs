//! Search registries for unqualified image names, read from
//! `registries.conf`.
use std::path::{Path, PathBuf};

use serde::Deserialize;

pub const SYSTEM_REGISTRIES_CONF_PATH: &str = "/etc/containers/registries.conf";
const REGISTRIES_CONF_ENV: &str = "CONTAINERS_REGISTRIES_CONF";

#[derive(Debug, thiserror::Error)]
pub enum RegistriesError {
    #[error("failed to read {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("mixing sysregistry v1/v2 is not supported in {0}")]
    MixedVersions(PathBuf),
}

type Result<T> = std::result::Result<T, RegistriesError>;

/// Ordered list of registries tried for names without a registry.
pub trait SearchRegistries {
    fn search_registries(&self) -> Result<Vec<String>>;
}

impl SearchRegistries for Vec<String> {
    fn search_registries(&self) -> Result<Vec<String>> {
        Ok(self.clone())
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct RegistriesFile {
    unqualified_search_registries: Option<Vec<String>>,
    registries: Option<V1Registries>,
}

#[derive(Debug, Default, Deserialize)]
struct V1Registries {
    search: Option<V1RegistryList>,
}

#[derive(Debug, Default, Deserialize)]
struct V1RegistryList {
    #[serde(default)]
    registries: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistriesConf {
    search: Vec<String>,
}

impl RegistriesConf {
    /// Path of the system-wide configuration, honoring
    /// `CONTAINERS_REGISTRIES_CONF`.
    pub fn system_path() -> PathBuf {
        std::env::var_os(REGISTRIES_CONF_ENV)
            .filter(|path| !path.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(SYSTEM_REGISTRIES_CONF_PATH))
    }

    /// Loads `path`. A missing file means no search registries are
    /// configured.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(?path, "no registries configuration found");
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(RegistriesError::Read {
                    path: path.to_owned(),
                    source,
                })
            }
        };

        Self::from_toml(path, &content)
    }

    fn from_toml(path: &Path, content: &str) -> Result<Self> {
        let file: RegistriesFile =
            toml::from_str(content).map_err(|source| RegistriesError::Parse {
                path: path.to_owned(),
                source,
            })?;

        let v1 = file
            .registries
            .and_then(|registries| registries.search)
            .map(|search| search.registries);

        let search = match (file.unqualified_search_registries, v1) {
            (Some(_), Some(_)) => return Err(RegistriesError::MixedVersions(path.to_owned())),
            (Some(v2), None) => v2,
            (None, Some(v1)) => v1,
            (None, None) => Vec::new(),
        };

        let mut deduplicated: Vec<String> = Vec::with_capacity(search.len());
        for registry in search {
            if !deduplicated.contains(&registry) {
                deduplicated.push(registry);
            }
        }
        tracing::debug!(registries = ?deduplicated, "loaded search registries");

        Ok(Self {
            search: deduplicated,
        })
    }

    pub fn registries(&self) -> &[String] {
        &self.search
    }
}

impl SearchRegistries for RegistriesConf {
    fn search_registries(&self) -> Result<Vec<String>> {
        Ok(self.search.clone())
    }
}
