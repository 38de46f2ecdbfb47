//! `idve start`: launch an instance's hypervisor process.

use std::process::ExitCode;

use anyhow::Result;

use crate::app::AppContext;

/// Run `idve start`.
///
/// # Errors
///
/// Returns an error if the instance is unknown, its display port is taken,
/// or the hypervisor fails to launch.
pub async fn run(app: &AppContext, id: &str) -> Result<ExitCode> {
    let orchestrator = app.orchestrator()?;
    let outcome = orchestrator.start(id, &app.reporter()).await?;
    app.renderer().render_started(&outcome)?;
    Ok(ExitCode::SUCCESS)
}
