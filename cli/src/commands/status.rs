//! `idve status` / `idve list`: observed state of instances.

use std::process::ExitCode;

use anyhow::Result;
use clap::Args;

use crate::app::AppContext;

/// Arguments for the status command.
#[derive(Args)]
pub struct StatusArgs {
    /// Instance ID (all instances when omitted)
    pub id: Option<String>,
}

/// Run `idve status`. Status never changes stored records.
///
/// # Errors
///
/// Returns an error if the instance is unknown or records cannot be read.
pub async fn run(app: &AppContext, id: Option<&str>) -> Result<ExitCode> {
    let orchestrator = app.orchestrator()?;
    let renderer = app.renderer();
    match id {
        Some(id) => renderer.render_status(&orchestrator.status(id).await?)?,
        None => renderer.render_status_list(&orchestrator.status_all().await?)?,
    }
    Ok(ExitCode::SUCCESS)
}
