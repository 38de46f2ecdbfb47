//! `idve command`: print the hypervisor command line without launching.

use std::process::ExitCode;

use anyhow::Result;

use crate::app::AppContext;

/// Run `idve command`.
///
/// # Errors
///
/// Returns an error if the instance is unknown or its pool is gone.
pub async fn run(app: &AppContext, id: &str) -> Result<ExitCode> {
    let orchestrator = app.orchestrator()?;
    let args = orchestrator.launch_command(id).await?;
    app.renderer()
        .render_command(&orchestrator.config().binaries.qemu, &args)?;
    Ok(ExitCode::SUCCESS)
}
