use std::fmt::{self, Display};
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;

use crate::name::{DockerReference, NameError};

pub const DEFAULT_GRAPH_ROOT: &str = "/var/lib/containers/storage";

static IMAGE_ID_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-f0-9]{64}$").unwrap());

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("empty storage reference")]
    Empty,
    #[error("invalid image ID {0:?}")]
    InvalidId(String),
    #[error("invalid image name {input:?}")]
    InvalidName {
        input: String,
        #[source]
        source: NameError,
    },
}

type Result<T> = std::result::Result<T, StoreError>;

/// Where a pulled image lands in local storage: a name, an image ID, or
/// both.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreReference {
    Named {
        name: DockerReference,
        id: Option<String>,
    },
    Id(String),
}

impl Display for StoreReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreReference::Named { name, id: None } => write!(f, "{name}"),
            StoreReference::Named { name, id: Some(id) } => write!(f, "{name}@{id}"),
            StoreReference::Id(id) => write!(f, "@{id}"),
        }
    }
}

/// The slice of the local storage backend the pull resolver relies on.
pub trait ImageStore {
    fn graph_root(&self) -> &Path;
    fn parse_store_reference(&self, reference: &str) -> Result<StoreReference>;
}

/// A storage backend rooted at a graph root directory.
#[derive(Debug, Clone)]
pub struct LocalStore {
    graph_root: PathBuf,
}

impl LocalStore {
    pub fn new<P: Into<PathBuf>>(graph_root: P) -> Self {
        Self {
            graph_root: graph_root.into(),
        }
    }
}

impl ImageStore for LocalStore {
    fn graph_root(&self) -> &Path {
        &self.graph_root
    }

    fn parse_store_reference(&self, reference: &str) -> Result<StoreReference> {
        parse_store_reference(reference)
    }
}

/// Parses `name`, `@id` or `name@id`. Names are normalized and tagged
/// `latest` when they carry neither tag nor digest.
pub fn parse_store_reference(reference: &str) -> Result<StoreReference> {
    if reference.is_empty() {
        return Err(StoreError::Empty);
    }

    if let Some(id) = reference.strip_prefix('@') {
        if !IMAGE_ID_RE.is_match(id) {
            return Err(StoreError::InvalidId(id.to_owned()));
        }
        return Ok(StoreReference::Id(id.to_owned()));
    }

    // A trailing bare hex ID is an image ID; `@algo:hex` is a digest and
    // stays part of the name.
    let (name, id) = match reference.rsplit_once('@') {
        Some((name, id)) if IMAGE_ID_RE.is_match(id) => (name, Some(id.to_owned())),
        _ => (reference, None),
    };

    let name = DockerReference::parse_normalized(name)
        .map_err(|source| StoreError::InvalidName {
            input: name.to_owned(),
            source,
        })?
        .with_default_tag();

    Ok(StoreReference::Named { name, id })
}

/// The default graph root for the current user: the system store for root,
/// the per-user data directory otherwise.
pub fn default_graph_root() -> PathBuf {
    if nix::unistd::geteuid().is_root() {
        return PathBuf::from(DEFAULT_GRAPH_ROOT);
    }

    let data_home = std::env::var_os("XDG_DATA_HOME")
        .filter(|dir| !dir.is_empty())
        .map(PathBuf::from)
        .or_else(|| {
            std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".local").join("share"))
        });

    match data_home {
        Some(dir) => dir.join("containers").join("storage"),
        None => PathBuf::from(DEFAULT_GRAPH_ROOT),
    }
}
