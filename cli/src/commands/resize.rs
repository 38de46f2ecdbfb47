//! `idve resize`: grow an instance's primary disk.

use std::process::ExitCode;

use anyhow::Result;
use clap::Args;

use crate::app::AppContext;

/// Arguments for the resize command.
#[derive(Args)]
pub struct ResizeArgs {
    /// Instance ID
    pub id: String,

    /// New disk size in GiB (must not shrink the disk)
    #[arg(value_name = "GIB")]
    pub size_gib: u64,
}

/// Run `idve resize`.
///
/// # Errors
///
/// Returns an error if the size would shrink the disk or the resize fails.
pub async fn run(app: &AppContext, args: &ResizeArgs) -> Result<ExitCode> {
    let orchestrator = app.orchestrator()?;
    let record = orchestrator
        .resize(&args.id, args.size_gib, &app.reporter())
        .await?;
    app.renderer().render_record(&record)?;
    Ok(ExitCode::SUCCESS)
}
