//! Shows how an image name would be pulled without copying anything.
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use libimage::goal::GoalBuilder;
use libimage::registries::RegistriesConf;
use libimage::store::{default_graph_root, LocalStore};
use libimage::PullGoal;
use serde_json::{json, Value};

use super::write_output;
use crate::GlobalOpts;

/// Show the candidate pulls for an image name
#[derive(Parser, Debug)]
pub struct Plan {
    /// image name, short name or transport reference
    pub name: String,
    /// print the plan as JSON
    #[clap(long)]
    pub json: bool,
}

fn resolve(name: &str, global: &GlobalOpts) -> Result<PullGoal> {
    let graph_root = global.root.clone().unwrap_or_else(default_graph_root);
    let conf_path: PathBuf = global
        .registries_conf
        .clone()
        .unwrap_or_else(RegistriesConf::system_path);
    let registries = RegistriesConf::load(&conf_path)
        .with_context(|| format!("failed to load {}", conf_path.display()))?;
    let store = LocalStore::new(graph_root);

    GoalBuilder::new(&store, &registries)
        .from_heuristic_source(name)
        .with_context(|| format!("failed to resolve {name}"))
}

fn summarize(goal: &PullGoal) -> Value {
    let candidates: Vec<Value> = goal
        .ref_pairs()
        .iter()
        .map(|pair| {
            json!({
                "image": pair.image,
                "source": pair.src.to_string(),
                "destination": pair.dst.to_string(),
            })
        })
        .collect();
    json!({
        "pullAllPairs": goal.pull_all_pairs(),
        "usedSearchRegistries": goal.used_search_registries(),
        "searchedRegistries": goal.searched_registries(),
        "candidates": candidates,
    })
}

fn render_text(goal: &PullGoal) -> String {
    let mut lines = vec![format!("{:<18}{}", "Pull all pairs", goal.pull_all_pairs())];
    if goal.used_search_registries() {
        lines.push(format!(
            "{:<18}{}",
            "Searched",
            goal.searched_registries().join(", ")
        ));
    }
    for pair in goal.ref_pairs().iter() {
        lines.push(format!("{:<18}{} -> {}", pair.image, pair.src, pair.dst));
    }
    lines.join("\n")
}

pub fn plan(args: Plan, global: &GlobalOpts) -> Result<()> {
    let goal = resolve(&args.name, global)?;
    tracing::debug!(?goal, "resolved pull goal");
    let output = if args.json {
        serde_json::to_string_pretty(&summarize(&goal))?
    } else {
        render_text(&goal)
    };
    write_output(None, &output)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use anyhow::Result;

    use super::*;

    fn global(root: PathBuf, registries_conf: PathBuf) -> GlobalOpts {
        GlobalOpts {
            log: None,
            debug: false,
            log_format: None,
            log_level: None,
            root: Some(root),
            registries_conf: Some(registries_conf),
        }
    }

    #[test]
    fn test_short_name_uses_search_registries() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let conf = dir.path().join("registries.conf");
        fs::write(&conf, "unqualified-search-registries = [\"quay.io\", \"docker.io\"]\n")?;

        let goal = resolve("busybox", &global(dir.path().join("storage"), conf))?;
        let summary = summarize(&goal);
        assert_eq!(summary["usedSearchRegistries"], true);
        assert_eq!(summary["pullAllPairs"], false);
        let images: Vec<&str> = summary["candidates"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|c| c["image"].as_str())
            .collect();
        assert_eq!(images, vec!["quay.io/busybox", "docker.io/busybox"]);
        Ok(())
    }

    #[test]
    fn test_short_name_without_registries_fails() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let goal = resolve(
            "busybox",
            &global(dir.path().join("storage"), dir.path().join("missing.conf")),
        );
        let err = goal.err().context("expected a resolution failure")?;
        let root = err.root_cause().to_string();
        assert!(root.contains("no search registries"), "{root}");
        Ok(())
    }

    #[test]
    fn test_qualified_name_is_a_single_pair() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let goal = resolve(
            "quay.io/libpod/alpine:latest",
            &global(dir.path().join("storage"), dir.path().join("missing.conf")),
        )?;
        assert_eq!(goal.ref_pairs().len(), 1);
        assert!(!goal.used_search_registries());
        assert!(render_text(&goal).contains("quay.io/libpod/alpine:latest"));
        Ok(())
    }
}
