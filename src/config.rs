//! coordmap configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::backoff::BackoffConfig;
use crate::stress::StressConfig;

/// Main coordmap configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Backoff policy for reader and writer waits
    pub backoff: BackoffConfig,

    /// Stress harness defaults
    pub stress: StressConfig,
}

/// Environment variable naming a config file; wins over the search paths
pub const CONFIG_ENV: &str = "COORDMAP_CONFIG";

impl Config {
    /// Load configuration
    ///
    /// Order: `config_path`, then `$COORDMAP_CONFIG`, then the first existing
    /// file from [`Config::search_paths`], then defaults. A file that is
    /// found but does not parse is an error rather than silently skipped.
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        let chosen = config_path
            .cloned()
            .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from))
            .or_else(|| Self::search_paths().into_iter().find(|path| path.is_file()));

        match chosen {
            Some(path) => Self::from_file(&path).context(format!("Failed to load config from {}", path.display())),
            None => {
                tracing::debug!("Config::load: no config file, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Candidate config files, most specific first
    pub fn search_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(".coordmap.yml")];
        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("coordmap").join("coordmap.yml"));
        }
        paths
    }

    fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config = serde_yaml::from_str(&content)?;
        tracing::debug!(path = %path.display(), "Config::from_file: loaded");
        Ok(config)
    }

    /// Save config to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_yaml::to_string(self)?;
        fs::write(path, content).context(format!("Failed to write config to {}", path.display()))?;
        Ok(())
    }
}
