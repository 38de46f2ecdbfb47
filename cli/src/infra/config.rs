//! Infrastructure implementation of the `ConfigStore` port.

use anyhow::{Context, Result};
use std::path::PathBuf;

use crate::application::ports::ConfigStore;
use crate::domain::config::IdveConfig;

/// Environment variable that overrides the configuration file location.
pub const CONFIG_ENV: &str = "IDVE_CONFIG";

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/idve/config.yaml";

/// Production implementation of `ConfigStore` that uses a YAML file on disk.
pub struct YamlConfigStore {
    path: Option<PathBuf>,
}

impl YamlConfigStore {
    /// Store at `path`, or at `$IDVE_CONFIG` / the default location when
    /// `path` is `None`.
    #[must_use]
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }
}

impl ConfigStore for YamlConfigStore {
    fn load(&self) -> Result<IdveConfig> {
        let path = self.path();
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(IdveConfig::default());
        }
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("cannot read {}", path.display()))?;
        let config: IdveConfig = serde_yaml::from_str(&content)
            .with_context(|| format!("cannot parse {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("invalid configuration in {}", path.display()))?;
        Ok(config)
    }

    fn path(&self) -> PathBuf {
        if let Some(path) = &self.path {
            return path.clone();
        }
        match std::env::var_os(CONFIG_ENV) {
            Some(val) if !val.is_empty() => PathBuf::from(val),
            _ => PathBuf::from(DEFAULT_CONFIG_PATH),
        }
    }
}
