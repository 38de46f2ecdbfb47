//! Filesystem infrastructure: implements the `HostFs` port on the local disk.

use std::io;
use std::path::Path;

use anyhow::{Context, Result};

use crate::application::ports::HostFs;

/// Production filesystem. Blocking calls run on tokio's blocking pool via
/// `tokio::fs`.
pub struct LocalFs;

fn tolerate_missing(result: io::Result<()>) -> io::Result<()> {
    match result {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

impl HostFs for LocalFs {
    async fn exists(&self, path: &Path) -> bool {
        tokio::fs::try_exists(path).await.unwrap_or(false)
    }

    async fn create_dir_all(&self, path: &Path) -> Result<()> {
        tokio::fs::create_dir_all(path)
            .await
            .with_context(|| format!("creating directory {}", path.display()))
    }

    async fn read_to_string(&self, path: &Path) -> Result<String> {
        tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading {}", path.display()))
    }

    async fn write_atomic(&self, path: &Path, contents: &[u8]) -> Result<()> {
        let path = path.to_path_buf();
        let contents = contents.to_vec();
        tokio::task::spawn_blocking(move || write_atomic_sync(&path, &contents))
            .await
            .context("atomic write task panicked")?
    }

    async fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        tokio::fs::rename(from, to)
            .await
            .with_context(|| format!("renaming {} to {}", from.display(), to.display()))
    }

    async fn copy(&self, from: &Path, to: &Path) -> Result<()> {
        tokio::fs::copy(from, to)
            .await
            .map(|_| ())
            .with_context(|| format!("copying {} to {}", from.display(), to.display()))
    }

    async fn remove_file(&self, path: &Path) -> Result<()> {
        tolerate_missing(tokio::fs::remove_file(path).await)
            .with_context(|| format!("removing file {}", path.display()))
    }

    async fn remove_dir_all(&self, path: &Path) -> Result<()> {
        tolerate_missing(tokio::fs::remove_dir_all(path).await)
            .with_context(|| format!("removing directory {}", path.display()))
    }
}

/// Write `contents` to a temporary sibling, restrict it to the owner, and
/// rename it over `path`.
pub(crate) fn write_atomic_sync(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating directory {}", parent.display()))?;
    }
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp_path = path.with_file_name(format!(".{file_name}.tmp"));
    std::fs::write(&temp_path, contents)
        .with_context(|| format!("writing temp file {}", temp_path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&temp_path, std::fs::Permissions::from_mode(0o600))
            .with_context(|| format!("setting permissions on {}", temp_path.display()))?;
    }

    std::fs::rename(&temp_path, path)
        .with_context(|| format!("finalizing {}", path.display()))?;
    Ok(())
}
