//! Turning an image locator into the ordered list of source/destination
//! pairs a pull will try.
use std::fmt;

use nonempty::NonEmpty;

use crate::archive::{digest_hex, ref_name, DockerArchiveReader, OciArchiveReader};
use crate::error::{PullError, Result};
use crate::name::{normalized_tag, to_local_image_name, DecomposedName, DEFAULT_LOCAL_REGISTRY};
use crate::reference::{transport_from_image_name, ArchiveSource, ImageReference, Transport};
use crate::registries::SearchRegistries;
use crate::store::{ImageStore, StoreReference};

/// Runs once when the goal is finished with, successful or not.
pub type Cleanup = Box<dyn FnOnce() -> std::io::Result<()>>;

/// One copy attempt: where from, where to, and the name reported back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefPair {
    pub image: String,
    pub src: ImageReference,
    pub dst: StoreReference,
}

pub struct PullGoal {
    ref_pairs: NonEmpty<RefPair>,
    pull_all_pairs: bool,
    used_search_registries: bool,
    searched_registries: Vec<String>,
    cleanups: Vec<Cleanup>,
}

impl PullGoal {
    pub fn single(pair: RefPair) -> Self {
        Self {
            ref_pairs: NonEmpty::new(pair),
            pull_all_pairs: false,
            used_search_registries: false,
            searched_registries: Vec::new(),
            cleanups: Vec::new(),
        }
    }

    pub fn ref_pairs(&self) -> &NonEmpty<RefPair> {
        &self.ref_pairs
    }

    /// Every pair is attempted instead of stopping at the first success.
    pub fn pull_all_pairs(&self) -> bool {
        self.pull_all_pairs
    }

    /// The pairs were derived from the configured search registries.
    pub fn used_search_registries(&self) -> bool {
        self.used_search_registries
    }

    pub fn searched_registries(&self) -> &[String] {
        &self.searched_registries
    }

    pub fn add_cleanup(&mut self, cleanup: Cleanup) {
        self.cleanups.push(cleanup);
    }

    /// Runs the registered cleanups. Each runs at most once; failures are
    /// logged and otherwise ignored.
    pub fn clean_up(&mut self) {
        for cleanup in std::mem::take(&mut self.cleanups) {
            if let Err(err) = cleanup() {
                tracing::error!("{}", err);
            }
        }
    }
}

impl Drop for PullGoal {
    fn drop(&mut self) {
        self.clean_up();
    }
}

impl fmt::Debug for PullGoal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PullGoal")
            .field("ref_pairs", &self.ref_pairs)
            .field("pull_all_pairs", &self.pull_all_pairs)
            .field("used_search_registries", &self.used_search_registries)
            .field("searched_registries", &self.searched_registries)
            .field("cleanups", &self.cleanups.len())
            .finish()
    }
}

fn try_map<T, U, F>(items: NonEmpty<T>, mut f: F) -> Result<NonEmpty<U>>
where
    F: FnMut(T) -> Result<U>,
{
    let NonEmpty { head, tail } = items;
    let mut mapped = NonEmpty::new(f(head)?);
    for item in tail {
        mapped.push(f(item)?);
    }
    Ok(mapped)
}

fn archive_error(reference: &ImageReference) -> impl FnOnce(crate::archive::ArchiveError) -> PullError {
    let reference = reference.to_string();
    move |source| PullError::Archive { reference, source }
}

/// Builds pull goals against a store and a search registry source.
pub struct GoalBuilder<'a> {
    store: &'a dyn ImageStore,
    registries: &'a dyn SearchRegistries,
}

impl<'a> GoalBuilder<'a> {
    pub fn new(store: &'a dyn ImageStore, registries: &'a dyn SearchRegistries) -> Self {
        Self { store, registries }
    }

    /// Builds the goal for a user-supplied name which may or may not carry
    /// a transport prefix.
    pub fn from_heuristic_source(&self, input_name: &str) -> Result<PullGoal> {
        match ImageReference::parse(input_name) {
            Ok(src) => self.from_image_reference(&src, input_name),
            Err(err) => {
                // A failed parse only falls back to a docker-style short name
                // when no other transport was named.
                if let Some(transport) = transport_from_image_name(input_name) {
                    if transport != Transport::Docker {
                        return Err(err.into());
                    }
                }
                self.from_possibly_unqualified_name(input_name)
            }
        }
    }

    fn pull_ref_pair(&self, src: ImageReference, dest_name: &str) -> Result<RefPair> {
        let mut image = dest_name.to_owned();
        if let Ok(decomposed) = DecomposedName::decompose(dest_name) {
            if !decomposed.has_registry() {
                image = decomposed
                    .reference_with_registry(DEFAULT_LOCAL_REGISTRY)
                    .map_err(|source| PullError::Name {
                        input: dest_name.to_owned(),
                        source,
                    })?
                    .to_string();
            }
        }

        let reference = src
            .docker_reference()
            .map(|reference| reference.to_string())
            .unwrap_or_else(|| image.clone());
        let dst = self
            .store
            .parse_store_reference(&reference)
            .map_err(|source| PullError::StoreReference {
                name: image.clone(),
                source,
            })?;

        Ok(RefPair { image, src, dst })
    }

    fn single_pair_goal(&self, src: ImageReference, dest_name: &str) -> Result<PullGoal> {
        Ok(PullGoal::single(self.pull_ref_pair(src, dest_name)?))
    }

    /// Builds the goal for an already parsed reference. `image_name` is the
    /// name the caller asked for and is used as the destination for
    /// registry-like transports.
    pub fn from_image_reference(&self, src: &ImageReference, image_name: &str) -> Result<PullGoal> {
        match src {
            ImageReference::DockerArchive { path, source } => {
                let reader = DockerArchiveReader::open(path).map_err(archive_error(src))?;
                let pairs = match self.docker_archive_pairs(&reader, source.as_ref(), src) {
                    Ok(pairs) => pairs,
                    Err(err) => {
                        if let Err(close_err) = reader.close() {
                            tracing::error!("{}", close_err);
                        }
                        return Err(err);
                    }
                };

                let mut goal = PullGoal {
                    ref_pairs: pairs,
                    pull_all_pairs: true,
                    used_search_registries: false,
                    searched_registries: Vec::new(),
                    cleanups: Vec::new(),
                };
                goal.add_cleanup(Box::new(move || reader.close()));
                Ok(goal)
            }
            ImageReference::OciArchive { path, image } => {
                let reader = OciArchiveReader::open(path).map_err(archive_error(src))?;

                // An explicit name overrides whatever the archive records, but
                // only when there is a single image it could apply to.
                if !image.is_empty() && reader.manifest_count() == 1 {
                    let whole_archive = ImageReference::OciArchive {
                        path: path.clone(),
                        image: String::new(),
                    };
                    return self.single_pair_goal(whole_archive, image);
                }

                let descriptor = reader.descriptor_for(image).map_err(archive_error(src))?;
                let dest = match ref_name(descriptor) {
                    Some(name) => name.to_owned(),
                    None => {
                        let digest = reader
                            .config_digest(descriptor)
                            .map_err(archive_error(src))?;
                        format!("@{}", digest_hex(&digest).map_err(archive_error(src))?)
                    }
                };
                self.single_pair_goal(src.clone(), &dest)
            }
            ImageReference::Directory { .. } => {
                let image = to_local_image_name(&src.string_within_transport());
                self.single_pair_goal(src.clone(), &image)
            }
            ImageReference::OciLayout { .. } => {
                let within = src.string_within_transport();
                let dir = within.split(':').next().unwrap_or_default();
                self.single_pair_goal(src.clone(), &to_local_image_name(dir))
            }
            ImageReference::Docker(_) => self.single_pair_goal(src.clone(), image_name),
        }
    }

    fn docker_archive_pairs(
        &self,
        reader: &DockerArchiveReader,
        source: Option<&ArchiveSource>,
        src: &ImageReference,
    ) -> Result<NonEmpty<RefPair>> {
        let tags = reader
            .manifest_tags_for(source)
            .map_err(archive_error(src))?;

        let dest_names = match NonEmpty::from_vec(tags) {
            Some(tags) => try_map(tags, |tag| {
                normalized_tag(&tag)
                    .map(|reference| reference.to_string())
                    .map_err(|source| PullError::Name { input: tag, source })
            })?,
            None => {
                let digest = reader.config_digest(source).map_err(archive_error(src))?;
                NonEmpty::new(format!(
                    "@{}",
                    digest_hex(&digest).map_err(archive_error(src))?
                ))
            }
        };

        try_map(dest_names, |dest_name| {
            let dst = self
                .store
                .parse_store_reference(&dest_name)
                .map_err(|source| PullError::StoreReference {
                    name: dest_name.clone(),
                    source,
                })?;
            Ok(RefPair {
                image: dest_name,
                src: reader.reference_for(source.cloned()),
                dst,
            })
        })
    }

    /// Builds the goal for a docker-style name. Names without a registry
    /// expand into one candidate per search registry, in configured order.
    pub fn from_possibly_unqualified_name(&self, input_name: &str) -> Result<PullGoal> {
        let decomposed =
            DecomposedName::decompose(input_name).map_err(|source| PullError::Name {
                input: input_name.to_owned(),
                source,
            })?;

        if decomposed.has_registry() {
            let src = ImageReference::parse_within_transport(
                Transport::Docker,
                &format!("//{input_name}"),
            )?;
            return self.single_pair_goal(src, input_name);
        }

        let searched = self.registries.search_registries()?;
        let registries = NonEmpty::from_vec(searched.clone()).ok_or(PullError::NoSearchRegistries)?;
        let ref_pairs = try_map(registries, |registry| {
            let image_name = decomposed
                .reference_with_registry(&registry)
                .map_err(|source| PullError::Name {
                    input: input_name.to_owned(),
                    source,
                })?
                .to_string();
            let src = ImageReference::parse_within_transport(
                Transport::Docker,
                &format!("//{image_name}"),
            )?;
            self.pull_ref_pair(src, &image_name)
        })?;

        tracing::debug!(registries = ?searched, name = input_name, "expanded short name");
        Ok(PullGoal {
            ref_pairs,
            pull_all_pairs: false,
            used_search_registries: true,
            searched_registries: searched,
            cleanups: Vec::new(),
        })
    }
}
