use std::fmt::{self, Display};
use std::path::PathBuf;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::name::{DockerReference, NameError};

static OCI_IMAGE_NAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^([A-Za-z0-9]+(([-._:@+]|--)[A-Za-z0-9]+)*)(/([A-Za-z0-9]+(([-._:@+]|--)[A-Za-z0-9]+)*))*$",
    )
    .unwrap()
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transport {
    Docker,
    Directory,
    OciLayout,
    DockerArchive,
    OciArchive,
}

impl Transport {
    pub const ALL: [Transport; 5] = [
        Transport::Docker,
        Transport::Directory,
        Transport::OciLayout,
        Transport::DockerArchive,
        Transport::OciArchive,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Transport::Docker => "docker",
            Transport::Directory => "dir",
            Transport::OciLayout => "oci",
            Transport::DockerArchive => "docker-archive",
            Transport::OciArchive => "oci-archive",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.name() == name)
    }

    /// Whether pulling through this transport talks to a remote registry.
    pub fn is_registry(&self) -> bool {
        matches!(self, Transport::Docker)
    }
}

impl Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Selects one image inside a docker-archive holding several.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveSource {
    Named(DockerReference),
    Index(usize),
}

impl Display for ArchiveSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArchiveSource::Named(reference) => write!(f, "{reference}"),
            ArchiveSource::Index(index) => write!(f, "@{index}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageReference {
    Docker(DockerReference),
    Directory {
        path: PathBuf,
    },
    OciLayout {
        dir: PathBuf,
        image: String,
    },
    DockerArchive {
        path: PathBuf,
        source: Option<ArchiveSource>,
    },
    OciArchive {
        path: PathBuf,
        image: String,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum ReferenceError {
    #[error("invalid image name {0:?}, expected colon-separated transport:reference")]
    MissingTransport(String),
    #[error("invalid image name {input:?}, unknown transport {transport:?}")]
    UnknownTransport { input: String, transport: String },
    #[error("docker: image reference {0:?} does not start with //")]
    MissingDoubleSlash(String),
    #[error("docker references with both a tag and digest are currently not supported: {0}")]
    TagAndDigest(String),
    #[error("invalid {transport} reference {input:?}")]
    InvalidName {
        transport: Transport,
        input: String,
        #[source]
        source: NameError,
    },
    #[error("{0}: path must not be empty")]
    EmptyPath(Transport),
    #[error("docker-archive doesn't support digest references: {0}")]
    ArchiveDigest(String),
    #[error("invalid source index {0:?} in docker-archive reference")]
    InvalidIndex(String),
    #[error("invalid image name {image:?} in {transport} reference")]
    InvalidImageName { transport: Transport, image: String },
}

type Result<T> = std::result::Result<T, ReferenceError>;

impl ImageReference {
    /// Parses a `transport:reference` string.
    pub fn parse(input: &str) -> Result<Self> {
        let (transport_name, within) = input
            .split_once(':')
            .ok_or_else(|| ReferenceError::MissingTransport(input.to_owned()))?;
        let transport =
            Transport::from_name(transport_name).ok_or_else(|| ReferenceError::UnknownTransport {
                input: input.to_owned(),
                transport: transport_name.to_owned(),
            })?;

        Self::parse_within_transport(transport, within)
    }

    pub fn parse_within_transport(transport: Transport, within: &str) -> Result<Self> {
        match transport {
            Transport::Docker => {
                let name = within
                    .strip_prefix("//")
                    .ok_or_else(|| ReferenceError::MissingDoubleSlash(within.to_owned()))?;
                let reference = parse_named(transport, name)?;
                if reference.tag().is_some() && reference.digest().is_some() {
                    return Err(ReferenceError::TagAndDigest(name.to_owned()));
                }
                Ok(ImageReference::Docker(reference.with_default_tag()))
            }
            Transport::Directory => Ok(ImageReference::Directory {
                path: non_empty_path(transport, within)?,
            }),
            Transport::OciLayout | Transport::OciArchive => {
                let (path, image) = within.split_once(':').unwrap_or((within, ""));
                let path = non_empty_path(transport, path)?;
                if !image.is_empty() && !OCI_IMAGE_NAME_RE.is_match(image) {
                    return Err(ReferenceError::InvalidImageName {
                        transport,
                        image: image.to_owned(),
                    });
                }
                let image = image.to_owned();
                if transport == Transport::OciLayout {
                    Ok(ImageReference::OciLayout { dir: path, image })
                } else {
                    Ok(ImageReference::OciArchive { path, image })
                }
            }
            Transport::DockerArchive => {
                let (path, source) = within.split_once(':').unwrap_or((within, ""));
                let path = non_empty_path(transport, path)?;
                let source = match source {
                    "" => None,
                    index if index.starts_with('@') => {
                        let parsed = index[1..]
                            .parse::<usize>()
                            .map_err(|_| ReferenceError::InvalidIndex(index.to_owned()))?;
                        Some(ArchiveSource::Index(parsed))
                    }
                    name => {
                        let reference = parse_named(transport, name)?;
                        if reference.digest().is_some() {
                            return Err(ReferenceError::ArchiveDigest(name.to_owned()));
                        }
                        Some(ArchiveSource::Named(reference.with_default_tag()))
                    }
                };
                Ok(ImageReference::DockerArchive { path, source })
            }
        }
    }

    pub fn transport(&self) -> Transport {
        match self {
            ImageReference::Docker(_) => Transport::Docker,
            ImageReference::Directory { .. } => Transport::Directory,
            ImageReference::OciLayout { .. } => Transport::OciLayout,
            ImageReference::DockerArchive { .. } => Transport::DockerArchive,
            ImageReference::OciArchive { .. } => Transport::OciArchive,
        }
    }

    pub fn string_within_transport(&self) -> String {
        match self {
            ImageReference::Docker(reference) => format!("//{reference}"),
            ImageReference::Directory { path } => path.display().to_string(),
            ImageReference::OciLayout { dir, image } => format!("{}:{image}", dir.display()),
            ImageReference::OciArchive { path, image } => format!("{}:{image}", path.display()),
            ImageReference::DockerArchive { path, source } => match source {
                Some(source) => format!("{}:{source}", path.display()),
                None => path.display().to_string(),
            },
        }
    }

    /// The registry-style name this reference carries, if any. Storage
    /// references for pulled images are derived from it when present.
    pub fn docker_reference(&self) -> Option<&DockerReference> {
        match self {
            ImageReference::Docker(reference) => Some(reference),
            ImageReference::DockerArchive {
                source: Some(ArchiveSource::Named(reference)),
                ..
            } => Some(reference),
            _ => None,
        }
    }
}

impl Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.transport(), self.string_within_transport())
    }
}

/// Returns the transport named by the prefix of `input`, if it names one.
pub fn transport_from_image_name(input: &str) -> Option<Transport> {
    input
        .split_once(':')
        .and_then(|(transport, _)| Transport::from_name(transport))
}

fn parse_named(transport: Transport, name: &str) -> Result<DockerReference> {
    DockerReference::parse_normalized(name).map_err(|source| ReferenceError::InvalidName {
        transport,
        input: name.to_owned(),
        source,
    })
}

fn non_empty_path(transport: Transport, path: &str) -> Result<PathBuf> {
    if path.is_empty() {
        return Err(ReferenceError::EmptyPath(transport));
    }
    Ok(PathBuf::from(path))
}
