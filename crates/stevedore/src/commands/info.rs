//! Prints the host facts the spec builder and the pull resolver rely on.
use std::path::Path;

use anyhow::Result;
use clap::Parser;
use libcgroups::common::{available_controllers_with_root, CgroupSetup, DEFAULT_CGROUP_ROOT};
use libimage::registries::RegistriesConf;
use libimage::store::default_graph_root;
use libspecgen::{HostInfo, LinuxHost};

use crate::GlobalOpts;

/// Show information about the host
#[derive(Parser, Debug)]
pub struct Info {}

pub fn info(_: Info, global: &GlobalOpts) -> Result<()> {
    let host = LinuxHost;
    println!("{:<18}{}", "Version", env!("CARGO_PKG_VERSION"));
    print_host(&host);
    print_images(global);
    Ok(())
}

fn or_unknown<T: ToString, E: std::fmt::Display>(result: Result<T, E>) -> String {
    match result {
        Ok(value) => value.to_string(),
        Err(err) => {
            tracing::debug!(%err, "host fact unavailable");
            "unknown".to_owned()
        }
    }
}

fn print_host(host: &dyn HostInfo) {
    println!("{:<18}{}", "Hostname", or_unknown(host.hostname()));
    println!("{:<18}{}", "Rootless", host.is_rootless());
    let setup = host.cgroup_setup();
    println!("{:<18}{}", "Cgroup setup", or_unknown(setup.as_ref().map(ToString::to_string)));
    if matches!(setup, Ok(CgroupSetup::Unified)) {
        let controllers = available_controllers_with_root(Path::new(DEFAULT_CGROUP_ROOT));
        println!(
            "{:<18}{}",
            "Controllers",
            or_unknown(controllers.map(|c| c.join(" ")))
        );
    }
    if host.is_rootless() {
        println!("{:<18}{}", "Available gids", or_unknown(host.available_gids()));
    }
    println!(
        "{:<18}{}",
        "Capabilities",
        host.supported_capabilities().len()
    );
    match host.default_seccomp_profile() {
        Some(path) => println!("{:<18}{}", "Seccomp profile", path.display()),
        None => println!("{:<18}{}", "Seccomp profile", "none"),
    }
}

fn print_images(global: &GlobalOpts) {
    let graph_root = global.root.clone().unwrap_or_else(default_graph_root);
    println!("{:<18}{}", "Graph root", graph_root.display());

    let conf_path = global
        .registries_conf
        .clone()
        .unwrap_or_else(RegistriesConf::system_path);
    match RegistriesConf::load(&conf_path) {
        Ok(conf) => println!("{:<18}{}", "Search registries", conf.registries().join(", ")),
        Err(err) => {
            tracing::warn!(%err, path = ?conf_path, "failed to load registries configuration");
            println!("{:<18}{}", "Search registries", "unknown");
        }
    }
}
