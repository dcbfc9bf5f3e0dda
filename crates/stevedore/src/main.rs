//! # Stevedore
//! Resolves image names into pull plans and compiles container creation
//! configurations into OCI runtime specs.
mod commands;
mod observability;

use std::path::PathBuf;

use anyhow::Result;
use clap::{crate_version, Parser};

use crate::commands::{info, plan, spec};

#[derive(Parser, Debug)]
pub struct GlobalOpts {
    /// set the log file to write logs to (default is '/dev/stderr')
    #[clap(short, long, overrides_with("log"))]
    pub log: Option<PathBuf>,
    /// change log level to debug, but the `log-level` flag takes precedence
    #[clap(long)]
    pub debug: bool,
    /// set the log format ('text' (default), or 'json')
    #[clap(long)]
    pub log_format: Option<String>,
    /// set the log level (error, warn, info, debug, trace)
    #[clap(long)]
    pub log_level: Option<String>,
    /// graph root of the local image store
    #[clap(short, long)]
    pub root: Option<PathBuf>,
    /// registries configuration listing the search registries
    #[clap(long)]
    pub registries_conf: Option<PathBuf>,
}

#[derive(Parser, Debug)]
#[clap(version = crate_version!(), author = env!("CARGO_PKG_AUTHORS"))]
pub struct Opts {
    #[clap(flatten)]
    global: GlobalOpts,

    #[clap(subcommand)]
    subcmd: SubCommand,
}

#[derive(Parser, Debug)]
enum SubCommand {
    Spec(spec::Spec),
    Plan(plan::Plan),
    Info(info::Info),
}

fn main() -> Result<()> {
    let opts = Opts::parse();

    if let Err(e) = observability::init(&opts) {
        eprintln!("log init failed: {:?}", e);
    }

    tracing::debug!("started with {:?}", std::env::args_os());

    match opts.subcmd {
        SubCommand::Spec(args) => spec::spec(args),
        SubCommand::Plan(args) => plan::plan(args, &opts.global),
        SubCommand::Info(args) => info::info(args, &opts.global),
    }
}
