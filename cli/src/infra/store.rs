//! Infrastructure implementation of the `InstanceStore` port.
//!
//! One pretty-printed JSON document per instance, `<state_dir>/<id>.json`,
//! written atomically (temp file + rename) with owner-only permissions.
//! Blocking file access runs under `tokio::task::spawn_blocking`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use idve_common::InstanceRecord;

use crate::application::ports::InstanceStore;
use crate::domain::instance::validate_instance_id;
use crate::infra::fs::write_atomic_sync;

pub struct JsonInstanceStore {
    dir: PathBuf,
}

impl JsonInstanceStore {
    #[must_use]
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn path_for(&self, id: &str) -> Result<PathBuf> {
        validate_instance_id(id)?;
        Ok(self.dir.join(format!("{id}.json")))
    }
}

fn load_sync(path: &Path) -> Result<Option<InstanceRecord>> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(e).with_context(|| format!("reading record {}", path.display()));
        }
    };
    let record = serde_json::from_str(&content)
        .with_context(|| format!("parsing record {}", path.display()))?;
    Ok(Some(record))
}

fn list_sync(dir: &Path) -> Result<Vec<InstanceRecord>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e).with_context(|| format!("listing {}", dir.display())),
    };
    let mut records = Vec::new();
    for entry in entries {
        let path = entry.with_context(|| format!("listing {}", dir.display()))?.path();
        if path.extension().is_none_or(|ext| ext != "json") {
            continue;
        }
        match load_sync(&path) {
            Ok(Some(record)) => records.push(record),
            Ok(None) => {}
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping unreadable record"),
        }
    }
    records.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(records)
}

impl InstanceStore for JsonInstanceStore {
    async fn load(&self, id: &str) -> Result<Option<InstanceRecord>> {
        let path = self.path_for(id)?;
        tokio::task::spawn_blocking(move || load_sync(&path))
            .await
            .context("record load task panicked")?
    }

    async fn save(&self, record: &InstanceRecord) -> Result<()> {
        let path = self.path_for(&record.id)?;
        let content = serde_json::to_vec_pretty(record).context("serializing record")?;
        tokio::task::spawn_blocking(move || write_atomic_sync(&path, &content))
            .await
            .context("record save task panicked")?
    }

    async fn remove(&self, id: &str) -> Result<()> {
        let path = self.path_for(id)?;
        match tokio::fs::remove_file(&path).await {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
                Err(e).with_context(|| format!("removing record {}", path.display()))
            }
            _ => Ok(()),
        }
    }

    async fn list(&self) -> Result<Vec<InstanceRecord>> {
        let dir = self.dir.clone();
        tokio::task::spawn_blocking(move || list_sync(&dir))
            .await
            .context("record list task panicked")?
    }
}
