//! Storage provisioner: backing disks on local qcow2 or Ceph RBD pools.
//!
//! Imports only from `crate::domain` and `crate::application::ports`.

use std::path::Path;

use anyhow::{Context, Result};
use idve_common::{PoolBackend, StoragePool};

use crate::application::ports::{CommandRunner, GuestChannel, HostFs};
use crate::application::services::failure_detail;
use crate::domain::InstanceError;
use crate::domain::config::BinariesConfig;
use crate::domain::instance::disk_handle;

/// Drive ID of the primary disk in the launch arguments.
pub const PRIMARY_DRIVE: &str = "drive-disk0";

const BYTES_PER_MIB: u64 = 1024 * 1024;
const BYTES_PER_GIB: u64 = 1024 * BYTES_PER_MIB;

/// Byte count of a disk of `gib` GiB, rejecting sizes that overflow `u64`.
fn size_bytes(gib: u64) -> Result<u64, InstanceError> {
    gib.checked_mul(BYTES_PER_GIB).ok_or_else(|| {
        InstanceError::InvalidDeclaration(format!("disk size of {gib} GiB is too large"))
    })
}

/// Authentication and monitor arguments for the `rbd` CLI.
fn rbd_connection(user: &str, key: &str, monitors: &[String]) -> Vec<String> {
    vec![
        "--id".to_string(),
        user.to_string(),
        "--key".to_string(),
        key.to_string(),
        "-m".to_string(),
        monitors.join(","),
    ]
}

async fn run_checked(runner: &impl CommandRunner, program: &str, args: &[&str]) -> Result<()> {
    tracing::debug!(program, ?args, "storage command");
    let output = runner
        .run(program, args)
        .await
        .map_err(|e| InstanceError::Provisioning(format!("{program}: {e:#}")))?;
    if output.status.success() {
        Ok(())
    } else {
        Err(InstanceError::Provisioning(failure_detail(program, &output)).into())
    }
}

async fn run_rbd(
    runner: &impl CommandRunner,
    bins: &BinariesConfig,
    connection: &[String],
    args: &[&str],
) -> Result<std::process::Output> {
    let mut full: Vec<&str> = connection.iter().map(String::as_str).collect();
    full.extend_from_slice(args);
    tracing::debug!(program = %bins.rbd, ?args, "rbd command");
    runner
        .run(&bins.rbd, &full)
        .await
        .map_err(|e| InstanceError::Provisioning(format!("{}: {e:#}", bins.rbd)).into())
}

/// Detect the image format of a base image via `qemu-img info`.
async fn base_image_format(
    runner: &impl CommandRunner,
    bins: &BinariesConfig,
    base: &Path,
) -> Result<String> {
    let base_arg = base.display().to_string();
    let output = runner
        .run(&bins.qemu_img, &["info", "--output=json", &base_arg])
        .await
        .map_err(|e| InstanceError::Provisioning(format!("{}: {e:#}", bins.qemu_img)))?;
    if !output.status.success() {
        return Err(InstanceError::Provisioning(failure_detail(&bins.qemu_img, &output)).into());
    }
    let info: serde_json::Value =
        serde_json::from_slice(&output.stdout).context("parsing qemu-img info output")?;
    Ok(info
        .get("format")
        .and_then(|f| f.as_str())
        .unwrap_or("qcow2")
        .to_string())
}

/// Ensure a backing disk exists for `id` on `pool` and return its handle.
///
/// Existing images are reused, so this is also the lazy provisioning path at
/// start time.
///
/// # Errors
///
/// Returns `InstanceError::Provisioning` if any storage command fails.
pub async fn provision(
    runner: &impl CommandRunner,
    fs: &impl HostFs,
    bins: &BinariesConfig,
    id: &str,
    pool: &StoragePool,
    size_gib: u64,
    base_image: Option<&Path>,
) -> Result<String> {
    let bytes = size_bytes(size_gib)?;
    let handle = disk_handle(&pool.backend, id);
    match &pool.backend {
        PoolBackend::Local { path } => {
            if fs.exists(Path::new(&handle)).await {
                tracing::info!(instance = %id, disk = %handle, "reusing existing disk image");
                return Ok(handle);
            }
            fs.create_dir_all(path)
                .await
                .map_err(|e| InstanceError::Provisioning(format!("{e:#}")))?;
            let size = format!("{size_gib}G");
            match base_image {
                Some(base) => {
                    let format = base_image_format(runner, bins, base).await?;
                    let base_arg = base.display().to_string();
                    run_checked(
                        runner,
                        &bins.qemu_img,
                        &["create", "-f", "qcow2", "-F", &format, "-b", &base_arg, &handle],
                    )
                    .await?;
                    run_checked(runner, &bins.qemu_img, &["resize", &handle, &size]).await?;
                }
                None => {
                    run_checked(runner, &bins.qemu_img, &["create", "-f", "qcow2", &handle, &size])
                        .await?;
                }
            }
        }
        PoolBackend::Rbd {
            pool: rbd_pool,
            monitors,
            user,
            key,
        } => {
            if base_image.is_some() {
                return Err(InstanceError::Provisioning(
                    "base images are only supported on local pools".to_string(),
                )
                .into());
            }
            let image = format!("{rbd_pool}/{id}");
            let connection = rbd_connection(user, key, monitors);
            let info = run_rbd(runner, bins, &connection, &["info", &image]).await?;
            if info.status.success() {
                tracing::info!(instance = %id, image = %image, "reusing existing rbd image");
            } else {
                let size = (bytes / BYTES_PER_MIB).to_string();
                let created =
                    run_rbd(runner, bins, &connection, &["create", "--size", &size, &image])
                        .await?;
                if !created.status.success() {
                    return Err(
                        InstanceError::Provisioning(failure_detail(&bins.rbd, &created)).into(),
                    );
                }
            }
        }
    }
    tracing::info!(instance = %id, disk = %handle, size_gib, "disk provisioned");
    Ok(handle)
}

/// Grow a disk to `new_gib`.
///
/// A running hypervisor write-locks local images, so the grow goes through
/// the monitor's `block_resize`. RBD images are grown with `rbd resize` and
/// the running guest is told through the monitor.
///
/// # Errors
///
/// Returns `ShrinkRejected` when `new_gib` is smaller than `current_gib`, or
/// `Provisioning` when a storage or monitor command fails.
#[allow(clippy::too_many_arguments)]
pub async fn resize(
    host: &(impl CommandRunner + GuestChannel),
    bins: &BinariesConfig,
    pool: &StoragePool,
    handle: &str,
    id: &str,
    current_gib: u64,
    new_gib: u64,
    monitor: Option<&Path>,
) -> Result<()> {
    if new_gib < current_gib {
        return Err(InstanceError::ShrinkRejected {
            current: current_gib,
            requested: new_gib,
        }
        .into());
    }
    if new_gib == current_gib {
        return Ok(());
    }
    let bytes = size_bytes(new_gib)?;

    let notify_monitor = |socket: &Path| {
        let arguments = serde_json::json!({
            "device": PRIMARY_DRIVE,
            "size": bytes,
        });
        let socket = socket.to_path_buf();
        async move {
            host.monitor_command(&socket, "block_resize", arguments)
                .await
                .map(|_| ())
                .map_err(|e| InstanceError::Provisioning(format!("block_resize: {e:#}")))
        }
    };

    match &pool.backend {
        PoolBackend::Local { .. } => match monitor {
            Some(socket) => notify_monitor(socket).await?,
            None => {
                let size = format!("{new_gib}G");
                run_checked(host, &bins.qemu_img, &["resize", handle, &size]).await?;
            }
        },
        PoolBackend::Rbd {
            pool: rbd_pool,
            monitors,
            user,
            key,
        } => {
            let image = format!("{rbd_pool}/{id}");
            let size = (bytes / BYTES_PER_MIB).to_string();
            let connection = rbd_connection(user, key, monitors);
            let out = run_rbd(host, bins, &connection, &["resize", "--size", &size, &image]).await?;
            if !out.status.success() {
                return Err(InstanceError::Provisioning(failure_detail(&bins.rbd, &out)).into());
            }
            if let Some(socket) = monitor {
                notify_monitor(socket).await?;
            }
        }
    }
    tracing::info!(instance = %id, from_gib = current_gib, to_gib = new_gib, "disk resized");
    Ok(())
}

/// Remove the backing disk of `id`. An already absent image is not an error.
///
/// # Errors
///
/// Returns an error if the image exists but cannot be removed.
pub async fn remove(
    runner: &impl CommandRunner,
    fs: &impl HostFs,
    bins: &BinariesConfig,
    pool: &StoragePool,
    id: &str,
) -> Result<()> {
    match &pool.backend {
        PoolBackend::Local { .. } => {
            let handle = disk_handle(&pool.backend, id);
            fs.remove_file(Path::new(&handle))
                .await
                .with_context(|| format!("removing disk {handle}"))?;
        }
        PoolBackend::Rbd {
            pool: rbd_pool,
            monitors,
            user,
            key,
        } => {
            let image = format!("{rbd_pool}/{id}");
            let connection = rbd_connection(user, key, monitors);
            let out = run_rbd(runner, bins, &connection, &["rm", &image]).await?;
            let stderr = String::from_utf8_lossy(&out.stderr);
            if !out.status.success() && !stderr.contains("No such file") {
                anyhow::bail!(failure_detail(&bins.rbd, &out));
            }
        }
    }
    tracing::info!(instance = %id, pool = %pool.name, "disk removed");
    Ok(())
}
