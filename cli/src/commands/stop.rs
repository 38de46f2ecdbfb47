//! `idve stop`: terminate an instance's hypervisor process.

use std::process::ExitCode;

use anyhow::Result;

use crate::app::AppContext;

/// Run `idve stop`. Stopping a stopped instance succeeds.
///
/// # Errors
///
/// Returns an error if the instance is unknown or its process survives.
pub async fn run(app: &AppContext, id: &str) -> Result<ExitCode> {
    let orchestrator = app.orchestrator()?;
    let record = orchestrator.stop(id, &app.reporter()).await?;
    app.renderer().render_done(&record.id, "stop")?;
    Ok(ExitCode::SUCCESS)
}
