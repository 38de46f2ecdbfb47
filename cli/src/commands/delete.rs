//! `idve delete`: stop an instance and remove everything it owns.

use std::process::ExitCode;

use anyhow::Result;

use crate::app::AppContext;

/// Run `idve delete`.
///
/// # Errors
///
/// Returns an error if the instance is unknown, cannot be stopped, or its
/// disk cannot be removed.
pub async fn run(app: &AppContext, id: &str) -> Result<ExitCode> {
    let orchestrator = app.orchestrator()?;
    // Fail on unknown IDs before prompting.
    orchestrator.get(id).await?;

    let prompt = format!("Delete instance {id} and its disk?");
    if !app.non_interactive && !app.confirm(&prompt, false)? {
        app.output.info("Cancelled.");
        return Ok(ExitCode::SUCCESS);
    }

    orchestrator.delete(id, &app.reporter()).await?;
    app.renderer().render_done(id, "delete")?;
    Ok(ExitCode::SUCCESS)
}
