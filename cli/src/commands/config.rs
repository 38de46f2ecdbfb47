//! `idve config`: show the effective configuration.

use std::process::ExitCode;

use anyhow::Result;
use clap::Subcommand;

use crate::app::AppContext;
use crate::application::ports::ConfigStore;

/// Config subcommands.
#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show the effective configuration
    Show,
    /// Print the configuration file location
    Path,
}

/// Run the config command.
///
/// # Errors
///
/// Returns an error if the configuration file exists but is invalid.
pub fn run(app: &AppContext, cmd: &ConfigCommand) -> Result<ExitCode> {
    let path = app.config_store.path();
    match cmd {
        ConfigCommand::Show => {
            let config = app.config()?;
            app.renderer().render_config(&config, &path)?;
        }
        ConfigCommand::Path => app.renderer().render_config_path(&path)?,
    }
    Ok(ExitCode::SUCCESS)
}
