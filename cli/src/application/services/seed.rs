//! Seed builder: packages first-boot documents into a `cidata` ISO.
//!
//! Imports only from `crate::domain` and `crate::application::ports`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use idve_common::ProvisioningTemplate;

use crate::application::ports::{CommandRunner, HostFs};
use crate::application::services::failure_detail;
use crate::domain::InstanceError;
use crate::domain::config::BinariesConfig;
use crate::domain::seed::{SEED_VOLUME_LABEL, SeedInput, render};

/// File name of the packaged seed image inside the per-instance seed dir.
pub const SEED_IMAGE: &str = "seed.iso";

/// Result of a seed build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedArtifacts {
    pub image: PathBuf,
    /// SHA-256 over the rendered documents.
    pub digest: String,
}

/// Render, stage, and package the seed documents for one instance.
///
/// Documents are staged in a scoped temporary directory that is removed on
/// every exit path. The image is written next to its final location and
/// renamed into place, so a rebuild replaces the previous artifacts whole.
/// `genisoimage` is tried first and `mkisofs` second.
///
/// # Errors
///
/// Returns `InstanceError::Provisioning` if rendering fails or both
/// packagers fail.
pub async fn build(
    host: &(impl CommandRunner + HostFs),
    bins: &BinariesConfig,
    seed_root: &Path,
    template: &ProvisioningTemplate,
    input: &SeedInput<'_>,
) -> Result<SeedArtifacts> {
    let docs = render(template, input)
        .map_err(|e| InstanceError::Provisioning(format!("rendering seed: {e:#}")))?;

    let dir = seed_root.join(input.instance_id);
    host.create_dir_all(&dir)
        .await
        .with_context(|| format!("creating seed directory {}", dir.display()))?;

    let staging = tempfile::Builder::new()
        .prefix("idve-seed-")
        .tempdir()
        .context("creating seed staging directory")?;

    for (name, body) in docs.files() {
        host.write_atomic(&staging.path().join(name), body.as_bytes())
            .await?;
        host.write_atomic(&dir.join(name), body.as_bytes()).await?;
    }
    if docs.network_config.is_none() {
        host.remove_file(&dir.join("network-config")).await?;
    }

    let image = dir.join(SEED_IMAGE);
    let partial = dir.join(format!("{SEED_IMAGE}.tmp"));
    package(host, bins, staging.path(), &partial).await?;
    host.rename(&partial, &image).await?;

    let digest = docs.digest();
    tracing::info!(instance = %input.instance_id, image = %image.display(), %digest, "seed image built");
    Ok(SeedArtifacts { image, digest })
}

async fn package(
    host: &(impl CommandRunner + HostFs),
    bins: &BinariesConfig,
    staging: &Path,
    output: &Path,
) -> Result<()> {
    let output_arg = output.display().to_string();
    let staging_arg = staging.display().to_string();
    let args = [
        "-output",
        output_arg.as_str(),
        "-volid",
        SEED_VOLUME_LABEL,
        "-joliet",
        "-rock",
        staging_arg.as_str(),
    ];

    let mut failures = Vec::new();
    for packager in [&bins.genisoimage, &bins.mkisofs] {
        tracing::debug!(program = %packager, ?args, "packaging seed image");
        match host.run(packager, &args).await {
            Ok(out) if out.status.success() => return Ok(()),
            Ok(out) => failures.push(failure_detail(packager, &out)),
            Err(e) => failures.push(format!("{packager}: {e:#}")),
        }
        tracing::warn!(program = %packager, "seed packager failed");
    }
    host.remove_file(output).await?;
    Err(InstanceError::Provisioning(format!(
        "could not package seed image ({})",
        failures.join("; ")
    ))
    .into())
}

/// Remove every seed artifact of an instance.
///
/// # Errors
///
/// Returns an error if the directory exists but cannot be removed.
pub async fn remove(fs: &impl HostFs, seed_root: &Path, id: &str) -> Result<()> {
    fs.remove_dir_all(&seed_root.join(id)).await
}
