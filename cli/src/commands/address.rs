//! `idve address`: the guest's IP address.

use std::process::ExitCode;

use anyhow::Result;

use crate::app::AppContext;

/// Run `idve address`. Exits 2 when the address is unknown.
///
/// # Errors
///
/// Returns an error if the instance is unknown.
pub async fn run(app: &AppContext, id: &str) -> Result<ExitCode> {
    let orchestrator = app.orchestrator()?;
    let address = orchestrator.address(id).await?;
    app.renderer().render_address(id, address)?;
    Ok(if address.is_some() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(2)
    })
}
