//! `idve update`: merge declaration changes into an existing instance.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::Args;
use serde_json::{Map, Value};

use crate::app::AppContext;
use crate::commands::read_declaration;
use crate::domain::InstanceError;

/// Arguments for the update command.
#[derive(Args)]
pub struct UpdateArgs {
    /// Instance ID
    pub id: String,

    /// Partial declaration (YAML or JSON), or `-` for stdin
    #[arg(short, long, value_name = "PATH")]
    pub file: Option<PathBuf>,

    /// Set one field, e.g. `hardware.memory_mib=4096` (repeatable)
    #[arg(long = "set", value_name = "KEY=VALUE")]
    pub set: Vec<String>,
}

/// Build the update patch from an optional document plus `--set` pairs.
/// Later pairs win over earlier ones and over the document.
///
/// # Errors
///
/// `InvalidDeclaration` if the document is not a mapping, a pair lacks `=`,
/// or nothing was given.
pub fn build_patch(document: Option<&str>, pairs: &[String]) -> Result<Value, InstanceError> {
    let mut patch = match document {
        Some(content) => serde_yaml::from_str::<Value>(content)
            .map_err(|e| InstanceError::InvalidDeclaration(e.to_string()))?,
        None if pairs.is_empty() => {
            return Err(InstanceError::InvalidDeclaration(
                "nothing to update; pass --file or --set".to_string(),
            ));
        }
        None => Value::Object(Map::new()),
    };
    if !patch.is_object() {
        return Err(InstanceError::InvalidDeclaration(
            "expected a mapping of fields".to_string(),
        ));
    }

    for pair in pairs {
        let Some((key, raw)) = pair.split_once('=') else {
            return Err(InstanceError::InvalidDeclaration(format!(
                "expected KEY=VALUE, got '{pair}'"
            )));
        };
        let value = serde_yaml::from_str::<Value>(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        set_path(&mut patch, key, value)?;
    }
    Ok(patch)
}

fn set_path(root: &mut Value, key: &str, value: Value) -> Result<(), InstanceError> {
    let segments: Vec<&str> = key.split('.').collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(InstanceError::InvalidDeclaration(format!("invalid key '{key}'")));
    }
    let mut node = root;
    for segment in &segments[..segments.len() - 1] {
        let Value::Object(map) = node else {
            return Err(InstanceError::InvalidDeclaration(format!(
                "'{key}' crosses a non-mapping field"
            )));
        };
        node = map
            .entry((*segment).to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    let Value::Object(map) = node else {
        return Err(InstanceError::InvalidDeclaration(format!(
            "'{key}' crosses a non-mapping field"
        )));
    };
    map.insert(segments[segments.len() - 1].to_string(), value);
    Ok(())
}

/// Run `idve update`.
///
/// # Errors
///
/// Returns an error if the patch is invalid or the update is rejected.
pub async fn run(app: &AppContext, args: &UpdateArgs) -> Result<ExitCode> {
    let document = args.file.as_deref().map(read_declaration).transpose()?;
    let patch = build_patch(document.as_deref(), &args.set)?;

    let orchestrator = app.orchestrator()?;
    let record = orchestrator.update(&args.id, &patch, &app.reporter()).await?;
    app.renderer().render_record(&record)?;
    Ok(ExitCode::SUCCESS)
}
