//! Command implementations

pub mod address;
pub mod command;
pub mod config;
pub mod console;
pub mod create;
pub mod delete;
pub mod resize;
pub mod start;
pub mod status;
pub mod stop;
pub mod templates;
pub mod update;
pub mod version;

use std::io::Read as _;
use std::path::Path;

use anyhow::{Context, Result};
use clap::Args;

/// A command that targets one instance.
#[derive(Args)]
pub struct InstanceArgs {
    /// Instance ID
    pub id: String,
}

/// Read a declaration file, or stdin when `path` is `-`.
pub(crate) fn read_declaration(path: &Path) -> Result<String> {
    if path == Path::new("-") {
        let mut content = String::new();
        std::io::stdin()
            .read_to_string(&mut content)
            .context("reading declaration from stdin")?;
        return Ok(content);
    }
    std::fs::read_to_string(path).with_context(|| format!("cannot read {}", path.display()))
}
