//! YAML-backed storage pool and provisioning template catalogues.
//!
//! `pools.yaml` and `templates.yaml` are re-read on every lookup so edits
//! take effect without restarting anything. A missing pools file yields one
//! local pool; templates from the file extend (and override by name) the
//! built-in set.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use idve_common::{PoolBackend, ProvisioningTemplate, StoragePool};
use serde::Deserialize;

use crate::application::ports::{PoolRegistry, TemplateRegistry};
use crate::domain::seed::builtin_templates;

/// Directory of the pool used when no `pools.yaml` exists.
pub const DEFAULT_LOCAL_POOL_PATH: &str = "/var/lib/idve/instances";

#[derive(Debug, Default, Deserialize)]
struct PoolsFile {
    #[serde(default)]
    pools: Vec<StoragePool>,
}

#[derive(Debug, Default, Deserialize)]
struct TemplatesFile {
    #[serde(default)]
    templates: Vec<ProvisioningTemplate>,
}

pub struct YamlRegistry {
    pools_file: PathBuf,
    templates_file: PathBuf,
}

impl YamlRegistry {
    #[must_use]
    pub fn new(pools_file: PathBuf, templates_file: PathBuf) -> Self {
        Self {
            pools_file,
            templates_file,
        }
    }

    async fn pools(&self) -> Result<Vec<StoragePool>> {
        match read_yaml::<PoolsFile>(&self.pools_file).await? {
            Some(file) => Ok(file.pools),
            None => Ok(vec![StoragePool {
                name: "local".to_string(),
                backend: PoolBackend::Local {
                    path: PathBuf::from(DEFAULT_LOCAL_POOL_PATH),
                },
            }]),
        }
    }
}

async fn read_yaml<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e).with_context(|| format!("cannot read {}", path.display())),
    };
    let parsed =
        serde_yaml::from_str(&content).with_context(|| format!("cannot parse {}", path.display()))?;
    Ok(Some(parsed))
}

impl PoolRegistry for YamlRegistry {
    async fn find_pool(&self, name: &str) -> Result<Option<StoragePool>> {
        Ok(self.pools().await?.into_iter().find(|p| p.name == name))
    }
}

impl TemplateRegistry for YamlRegistry {
    async fn find_template(&self, name: &str) -> Result<Option<ProvisioningTemplate>> {
        Ok(self.templates().await?.into_iter().find(|t| t.name == name))
    }

    async fn templates(&self) -> Result<Vec<ProvisioningTemplate>> {
        let mut all = builtin_templates();
        if let Some(file) = read_yaml::<TemplatesFile>(&self.templates_file).await? {
            for template in file.templates {
                match all.iter_mut().find(|t| t.name == template.name) {
                    Some(existing) => *existing = template,
                    None => all.push(template),
                }
            }
        }
        Ok(all)
    }
}
