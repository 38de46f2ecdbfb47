//! `idve templates`: list provisioning templates.

use std::process::ExitCode;

use anyhow::Result;

use crate::app::AppContext;

/// Run `idve templates`.
///
/// # Errors
///
/// Returns an error if the template catalogue cannot be read.
pub async fn run(app: &AppContext) -> Result<ExitCode> {
    let orchestrator = app.orchestrator()?;
    let templates = orchestrator.templates().await?;
    app.renderer().render_templates(&templates)?;
    Ok(ExitCode::SUCCESS)
}
