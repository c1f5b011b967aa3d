//! fleetwatch.toml configuration parser.

use std::path::{Path, PathBuf};

use fleetwatch_engine::{EngineConfig, SamplingConfig};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DaemonConfig {
    /// Group to manage. May be overridden on the command line.
    pub group: Option<String>,
    /// Directory holding the state database.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub sampling: SamplingConfig,
    pub backend: BackendConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackendConfig {
    /// JSON fixture describing the simulated group and its samples.
    pub fixture: PathBuf,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("/var/lib/fleetwatch")
}

impl DaemonConfig {
    /// Parse and validate a config file. Relative paths inside it are
    /// resolved against the file's directory.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config = Self::from_toml(&content)?;
        if let Some(base) = path.parent() {
            config.resolve_relative(base);
        }
        Ok(config)
    }

    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        let config: DaemonConfig = toml::from_str(content)?;
        config.engine.validate()?;
        config.sampling.validate()?;
        Ok(config)
    }

    fn resolve_relative(&mut self, base: &Path) {
        if self.backend.fixture.is_relative() {
            self.backend.fixture = base.join(&self.backend.fixture);
        }
        if self.data_dir.is_relative() {
            self.data_dir = base.join(&self.data_dir);
        }
    }

    /// Path of the redb state database.
    pub fn state_path(&self) -> PathBuf {
        self.data_dir.join("fleetwatch.redb")
    }
}
