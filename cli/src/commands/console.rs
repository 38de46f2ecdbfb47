//! `idve console`: remote display endpoints.

use std::process::ExitCode;

use anyhow::Result;

use crate::app::AppContext;

/// Run `idve console`.
///
/// # Errors
///
/// Returns an error if the instance is unknown.
pub async fn run(app: &AppContext, id: &str) -> Result<ExitCode> {
    let orchestrator = app.orchestrator()?;
    let console = orchestrator.console(id).await?;
    app.renderer().render_console(&console)?;
    Ok(ExitCode::SUCCESS)
}
