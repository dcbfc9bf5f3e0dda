use std::fs;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};

pub mod info;
pub mod plan;
pub mod spec;

/// Writes `content` to `path`, or to stdout when no path is given.
fn write_output(path: Option<&Path>, content: &str) -> Result<()> {
    match path {
        Some(path) => fs::write(path, format!("{content}\n"))
            .with_context(|| format!("failed to write {}", path.display())),
        None => {
            let mut stdout = std::io::stdout().lock();
            writeln!(stdout, "{content}").context("failed to write to stdout")
        }
    }
}
