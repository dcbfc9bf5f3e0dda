use std::io::Write;
use std::path::PathBuf;

use crate::cancel::CancellationToken;
use crate::copy::{CopyError, CopyOptions, ImageCopier, SigningOptions};
use crate::error::{PairFailure, PullError, Result};
use crate::goal::{GoalBuilder, PullGoal, RefPair};
use crate::reference::ImageReference;
use crate::registries::SearchRegistries;
use crate::retry::{retry_if_necessary, RetryOptions};
use crate::store::ImageStore;
use crate::system_context::{DockerRegistryOptions, SystemContext};

/// Per-pull options.
#[derive(Default)]
pub struct PullOptions<'w> {
    pub auth_file: Option<PathBuf>,
    pub signature_policy_path: Option<PathBuf>,
    pub signing: SigningOptions,
    pub docker_options: Option<DockerRegistryOptions>,
    pub retry: RetryOptions,
    /// Only pull images whose config carries this label.
    pub label: Option<String>,
    /// Receives "Trying to pull" notices and one line per failed attempt.
    pub writer: Option<&'w mut dyn Write>,
    pub cancel: CancellationToken,
}

/// Resolves image names into pull goals and executes them against a copy
/// layer.
pub struct Puller<'a> {
    store: &'a dyn ImageStore,
    copier: &'a dyn ImageCopier,
    registries: &'a dyn SearchRegistries,
    signature_policy_path: Option<PathBuf>,
    registries_conf_path: Option<PathBuf>,
}

impl<'a> Puller<'a> {
    pub fn new(
        store: &'a dyn ImageStore,
        copier: &'a dyn ImageCopier,
        registries: &'a dyn SearchRegistries,
    ) -> Self {
        Self {
            store,
            copier,
            registries,
            signature_policy_path: None,
            registries_conf_path: None,
        }
    }

    /// Policy used when a pull does not name its own.
    pub fn with_signature_policy_path(mut self, path: PathBuf) -> Self {
        self.signature_policy_path = Some(path);
        self
    }

    pub fn with_registries_conf_path(mut self, path: PathBuf) -> Self {
        self.registries_conf_path = Some(path);
        self
    }

    fn goals(&self) -> GoalBuilder<'a> {
        GoalBuilder::new(self.store, self.registries)
    }

    /// Builds the goal for `input_name` without copying anything.
    pub fn plan(&self, input_name: &str) -> Result<PullGoal> {
        self.goals().from_heuristic_source(input_name)
    }

    pub fn system_context(&self, options: &PullOptions<'_>) -> SystemContext {
        let policy = options
            .signature_policy_path
            .clone()
            .or_else(|| self.signature_policy_path.clone());
        let mut ctx = SystemContext::new(policy, options.auth_file.clone());
        if let Some(docker_options) = &options.docker_options {
            ctx.apply_docker_options(docker_options);
        }
        ctx.blob_info_cache_dir = Some(self.store.graph_root().join("cache"));
        ctx.system_registries_conf_path = self.registries_conf_path.clone();
        ctx
    }

    /// Pulls `input_name`, which may be transport-qualified, fully qualified,
    /// or a short name resolved against the search registries. Returns the
    /// names of the images that landed in local storage.
    #[tracing::instrument(level = "debug", skip(self, options))]
    pub fn pull_image_from_heuristic_source(
        &self,
        input_name: &str,
        mut options: PullOptions<'_>,
    ) -> Result<Vec<String>> {
        let ctx = self.system_context(&options);
        let goal = self.goals().from_heuristic_source(input_name)?;
        let label = options.label.take();
        self.do_pull_image(&ctx, goal, &mut options, label.as_deref())
    }

    /// Pulls a reference whose source is known precisely. No label check
    /// is applied.
    #[tracing::instrument(level = "debug", skip(self, options))]
    pub fn pull_image_from_reference(
        &self,
        src: &ImageReference,
        mut options: PullOptions<'_>,
    ) -> Result<Vec<String>> {
        let ctx = self.system_context(&options);
        let goal = self.goals().from_image_reference(src, &src.to_string())?;
        self.do_pull_image(&ctx, goal, &mut options, None)
    }

    fn check_label(&self, label: &str, pair: &RefPair, ctx: &SystemContext) -> Result<()> {
        let labels = self.copier.inspect_labels(&pair.src, ctx)?;
        let wanted = label.to_lowercase();
        if labels.keys().any(|key| key.to_lowercase() == wanted) {
            return Ok(());
        }

        Err(PullError::MissingLabel {
            image: pair.image.clone(),
            label: label.to_owned(),
            labels: labels.into_iter().collect(),
        })
    }

    fn do_pull_image(
        &self,
        ctx: &SystemContext,
        goal: PullGoal,
        options: &mut PullOptions<'_>,
        label: Option<&str>,
    ) -> Result<Vec<String>> {
        let copy_options = CopyOptions {
            source_ctx: ctx,
            dest_ctx: ctx,
            signing: &options.signing,
        };

        let mut images = Vec::new();
        let mut failures = Vec::new();
        for pair in goal.ref_pairs().iter() {
            if options.cancel.is_cancelled() {
                return Err(PullError::Cancelled(pair.image.clone()));
            }

            if pair.src.transport().is_registry() {
                if let Some(writer) = options.writer.as_deref_mut() {
                    writeln!(writer, "Trying to pull {}...", pair.image)
                        .map_err(PullError::Progress)?;
                }
            }

            if let Some(label) = label {
                self.check_label(label, pair, ctx)?;
            }

            tracing::debug!(image = %pair.image, src = %pair.src, dst = %pair.dst, "pulling ref pair");
            let copied = retry_if_necessary(&options.cancel, &options.retry, || {
                self.copier.copy_image(&pair.dst, &pair.src, &copy_options)
            });

            match copied {
                Ok(()) => {
                    tracing::info!(image = %pair.image, "pulled image");
                    if !goal.pull_all_pairs() {
                        return Ok(vec![pair.image.clone()]);
                    }
                    images.push(pair.image.clone());
                }
                Err(err) => {
                    tracing::debug!(
                        "error pulling image ref {}: {}",
                        pair.src.string_within_transport(),
                        err
                    );
                    if let Some(writer) = options.writer.as_deref_mut() {
                        let _ = writer.write_all(clean_error_message(&err).as_bytes());
                    }
                    failures.push(PairFailure {
                        image: pair.image.clone(),
                        error: err,
                    });
                }
            }
        }

        if images.is_empty() {
            if failures.len() == 1 {
                if let Some(failure) = failures.pop() {
                    return Err(PullError::Copy(failure.error));
                }
            }
            return Err(PullError::Aggregate(failures));
        }

        for failure in &failures {
            tracing::warn!(image = %failure.image, error = %failure.error, "failed to pull image");
        }
        Ok(images)
    }
}

fn clean_error_message(err: &CopyError) -> String {
    let message = err.to_string();
    let message = message.strip_prefix("errors:\n").unwrap_or(&message);
    let first_line = message.lines().next().unwrap_or_default();
    format!("  {first_line}\n")
}
