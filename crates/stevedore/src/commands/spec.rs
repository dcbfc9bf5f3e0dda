//! Compiles a creation configuration into `config.json`.
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use libspecgen::{CreateConfig, LinuxHost};
use oci_spec::runtime::Mount;

use super::write_output;

/// Compile a container creation configuration into an OCI runtime spec
#[derive(Parser, Debug)]
pub struct Spec {
    /// creation configuration in JSON
    #[clap(long, short)]
    pub config: PathBuf,
    /// JSON array of OCI mounts taking precedence over the default mounts
    #[clap(long)]
    pub mounts: Option<PathBuf>,
    /// write the spec to this file instead of stdout
    #[clap(long, short)]
    pub output: Option<PathBuf>,
}

fn load_config(path: &Path) -> Result<CreateConfig> {
    let content =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("failed to parse creation config {}", path.display()))
}

fn load_mounts(path: &Path) -> Result<Vec<Mount>> {
    let content =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("failed to parse mounts {}", path.display()))
}

pub fn spec(args: Spec) -> Result<()> {
    let config = load_config(&args.config)?;
    let mounts = match &args.mounts {
        Some(path) => load_mounts(path)?,
        None => Vec::new(),
    };
    tracing::debug!(config = ?args.config, mounts = mounts.len(), "building spec");

    let spec = libspecgen::build(&config, &LinuxHost, &mounts).context("failed to build spec")?;
    let json = libspecgen::spec_to_json(&spec)?;
    write_output(args.output.as_deref(), &json)
}
