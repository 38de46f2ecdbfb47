//! `idve create`: provision an instance from a YAML or JSON declaration.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::Args;

use crate::app::AppContext;
use crate::application::CreateRequest;
use crate::commands::read_declaration;
use crate::domain::InstanceError;

/// Arguments for the create command.
#[derive(Args)]
pub struct CreateArgs {
    /// Declaration file (YAML or JSON), or `-` for stdin
    #[arg(short, long, value_name = "PATH")]
    pub file: PathBuf,

    /// Start the instance once it is created
    #[arg(long)]
    pub start: bool,
}

/// Parse a create declaration. JSON is accepted as a subset of YAML.
///
/// # Errors
///
/// `InvalidDeclaration` if the document does not describe an instance.
pub fn parse_request(content: &str) -> Result<CreateRequest, InstanceError> {
    serde_yaml::from_str(content).map_err(|e| InstanceError::InvalidDeclaration(e.to_string()))
}

/// Run `idve create`.
///
/// # Errors
///
/// Returns an error if the declaration is invalid, provisioning fails, or
/// the requested start fails.
pub async fn run(app: &AppContext, args: &CreateArgs) -> Result<ExitCode> {
    let mut request = parse_request(&read_declaration(&args.file)?)?;
    request.start |= args.start;

    let orchestrator = app.orchestrator()?;
    let outcome = orchestrator.create(request, &app.reporter()).await?;
    app.renderer().render_created(&outcome)?;
    Ok(ExitCode::SUCCESS)
}
