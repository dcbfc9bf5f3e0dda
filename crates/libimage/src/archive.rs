//! Read-only views into image archives: just enough of `manifest.json`
//! (docker-archive) and `index.json` (oci-archive) to name the images they
//! hold.
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use oci_spec::image::{Descriptor, ImageIndex, ImageManifest};
use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::name::DockerReference;
use crate::reference::{ArchiveSource, ImageReference};

pub const ANNOTATION_REF_NAME: &str = "org.opencontainers.image.ref.name";
const DOCKER_MANIFEST: &str = "manifest.json";
const OCI_INDEX: &str = "index.json";

#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("failed to read archive {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{entry} not found in archive {path}")]
    MissingEntry { path: PathBuf, entry: String },
    #[error("invalid {entry} in archive {path}")]
    InvalidJson {
        path: PathBuf,
        entry: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("archive {path} contains no images")]
    Empty { path: PathBuf },
    #[error("archive {path} contains {count} images, a specific image must be selected")]
    Ambiguous { path: PathBuf, count: usize },
    #[error("tag {tag} not found in archive {path}")]
    TagNotFound { path: PathBuf, tag: String },
    #[error("invalid source index @{index}, only {count} manifest items available")]
    IndexOutOfRange { index: usize, count: usize },
    #[error("no descriptor found for reference {image:?} in {path}")]
    DescriptorNotFound { path: PathBuf, image: String },
    #[error("invalid digest {0:?}")]
    InvalidDigest(String),
}

type Result<T> = std::result::Result<T, ArchiveError>;

/// Returns the hex part of an `algorithm:hex` digest.
pub fn digest_hex(digest: &str) -> Result<&str> {
    match digest.split_once(':') {
        Some((algorithm, hex))
            if !algorithm.is_empty()
                && !hex.is_empty()
                && hex.chars().all(|c| c.is_ascii_hexdigit()) =>
        {
            Ok(hex)
        }
        _ => Err(ArchiveError::InvalidDigest(digest.to_owned())),
    }
}

fn read_entry(archive: &Path, name: &str) -> Result<Option<Vec<u8>>> {
    let wrap = |source: io::Error| ArchiveError::Io {
        path: archive.to_owned(),
        source,
    };

    let file = File::open(archive).map_err(wrap)?;
    let mut tar = tar::Archive::new(file);
    let wanted = Path::new(name);
    for entry in tar.entries().map_err(wrap)? {
        let mut entry = entry.map_err(wrap)?;
        let path = entry.path().map_err(wrap)?.into_owned();
        let path = path.strip_prefix(".").unwrap_or(&path);
        if path == wanted {
            let mut content = Vec::new();
            entry.read_to_end(&mut content).map_err(wrap)?;
            return Ok(Some(content));
        }
    }

    Ok(None)
}

fn read_json<T: serde::de::DeserializeOwned>(archive: &Path, name: &str) -> Result<T> {
    let content = read_entry(archive, name)?.ok_or_else(|| ArchiveError::MissingEntry {
        path: archive.to_owned(),
        entry: name.to_owned(),
    })?;

    serde_json::from_slice(&content).map_err(|source| ArchiveError::InvalidJson {
        path: archive.to_owned(),
        entry: name.to_owned(),
        source,
    })
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ManifestItem {
    config: String,
    #[serde(default)]
    repo_tags: Option<Vec<String>>,
}

impl ManifestItem {
    fn tags(&self) -> &[String] {
        self.repo_tags.as_deref().unwrap_or_default()
    }
}

/// An open docker-archive. Archives that are not regular files (a pipe on
/// stdin, for instance) are buffered into a temporary file that lives until
/// [`DockerArchiveReader::close`].
#[derive(Debug)]
pub struct DockerArchiveReader {
    path: PathBuf,
    manifest: Vec<ManifestItem>,
    buffered: Option<tempfile::TempPath>,
}

impl DockerArchiveReader {
    pub fn open(path: &Path) -> Result<Self> {
        let wrap = |source: io::Error| ArchiveError::Io {
            path: path.to_owned(),
            source,
        };

        let metadata = std::fs::metadata(path).map_err(wrap)?;
        let (archive_path, buffered) = if metadata.is_file() {
            (path.to_owned(), None)
        } else {
            let mut source = File::open(path).map_err(wrap)?;
            let mut temp = tempfile::NamedTempFile::new().map_err(wrap)?;
            io::copy(&mut source, &mut temp).map_err(wrap)?;
            let temp = temp.into_temp_path();
            tracing::debug!(source = ?path, buffer = ?temp, "buffered docker-archive");
            (temp.to_path_buf(), Some(temp))
        };

        let manifest: Vec<ManifestItem> = read_json(&archive_path, DOCKER_MANIFEST)?;
        Ok(Self {
            path: archive_path,
            manifest,
            buffered,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn image_count(&self) -> usize {
        self.manifest.len()
    }

    /// A reference to `source` inside this open archive.
    pub fn reference_for(&self, source: Option<ArchiveSource>) -> ImageReference {
        ImageReference::DockerArchive {
            path: self.path.clone(),
            source,
        }
    }

    /// Finds the manifest item `source` refers to, along with the index of
    /// the matching tag when a tag was asked for.
    fn choose_manifest_item(
        &self,
        source: Option<&ArchiveSource>,
    ) -> Result<(&ManifestItem, Option<usize>)> {
        match source {
            Some(ArchiveSource::Named(wanted)) => {
                for item in &self.manifest {
                    for (index, tag) in item.tags().iter().enumerate() {
                        let matches = DockerReference::parse_normalized(tag)
                            .map(|parsed| parsed.with_default_tag() == *wanted)
                            .unwrap_or(false);
                        if matches {
                            return Ok((item, Some(index)));
                        }
                    }
                }
                Err(ArchiveError::TagNotFound {
                    path: self.path.clone(),
                    tag: wanted.to_string(),
                })
            }
            Some(ArchiveSource::Index(index)) => self
                .manifest
                .get(*index)
                .map(|item| (item, None))
                .ok_or(ArchiveError::IndexOutOfRange {
                    index: *index,
                    count: self.manifest.len(),
                }),
            None => match self.manifest.as_slice() {
                [item] => Ok((item, None)),
                [] => Err(ArchiveError::Empty {
                    path: self.path.clone(),
                }),
                items => Err(ArchiveError::Ambiguous {
                    path: self.path.clone(),
                    count: items.len(),
                }),
            },
        }
    }

    /// Tags recorded for the image `source` selects. A named source yields
    /// only the tag it matched.
    pub fn manifest_tags_for(&self, source: Option<&ArchiveSource>) -> Result<Vec<String>> {
        let (item, tag_index) = self.choose_manifest_item(source)?;
        Ok(match tag_index {
            Some(index) => vec![item.tags()[index].clone()],
            None => item.tags().to_vec(),
        })
    }

    /// Digest of the image config, computed over the config blob.
    pub fn config_digest(&self, source: Option<&ArchiveSource>) -> Result<String> {
        let (item, _) = self.choose_manifest_item(source)?;
        let config = read_entry(&self.path, &item.config)?.ok_or_else(|| {
            ArchiveError::MissingEntry {
                path: self.path.clone(),
                entry: item.config.clone(),
            }
        })?;

        Ok(format!("sha256:{:x}", Sha256::digest(&config)))
    }

    /// Releases the archive, removing any buffered copy.
    pub fn close(self) -> io::Result<()> {
        match self.buffered {
            Some(temp) => temp.close(),
            None => Ok(()),
        }
    }
}

/// An oci-archive: a tarred OCI image layout.
#[derive(Debug)]
pub struct OciArchiveReader {
    path: PathBuf,
    index: ImageIndex,
}

impl OciArchiveReader {
    pub fn open(path: &Path) -> Result<Self> {
        let index: ImageIndex = read_json(path, OCI_INDEX)?;
        Ok(Self {
            path: path.to_owned(),
            index,
        })
    }

    pub fn manifest_count(&self) -> usize {
        self.index.manifests().len()
    }

    /// The manifest descriptor named `image`. An empty name is only valid
    /// when the archive holds exactly one image.
    pub fn descriptor_for(&self, image: &str) -> Result<&Descriptor> {
        let manifests = self.index.manifests();
        if image.is_empty() {
            return match manifests.as_slice() {
                [descriptor] => Ok(descriptor),
                [] => Err(ArchiveError::Empty {
                    path: self.path.clone(),
                }),
                all => Err(ArchiveError::Ambiguous {
                    path: self.path.clone(),
                    count: all.len(),
                }),
            };
        }

        manifests
            .iter()
            .find(|descriptor| ref_name(descriptor) == Some(image))
            .ok_or_else(|| ArchiveError::DescriptorNotFound {
                path: self.path.clone(),
                image: image.to_owned(),
            })
    }

    /// Digest of the image config the manifest behind `descriptor` points
    /// at.
    pub fn config_digest(&self, descriptor: &Descriptor) -> Result<String> {
        let digest = descriptor.digest().to_string();
        let (algorithm, _) = digest
            .split_once(':')
            .ok_or_else(|| ArchiveError::InvalidDigest(digest.clone()))?;
        let blob = format!("blobs/{algorithm}/{}", digest_hex(&digest)?);
        let manifest: ImageManifest = read_json(&self.path, &blob)?;

        Ok(manifest.config().digest().to_string())
    }
}

/// The `org.opencontainers.image.ref.name` annotation of a descriptor.
pub fn ref_name(descriptor: &Descriptor) -> Option<&str> {
    descriptor
        .annotations()
        .as_ref()
        .and_then(|annotations| annotations.get(ANNOTATION_REF_NAME))
        .map(String::as_str)
        .filter(|name| !name.is_empty())
}
