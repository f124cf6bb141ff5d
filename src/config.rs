//! CLI configuration
//!
//! Stores the database location and orchestrator tunables in
//! ~/.passdeck/config.json

use anyhow::{Context, Result};
use passdeck_control::ControlConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Persistent CLI settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PassdeckConfig {
    /// Database URL; falls back to a SQLite file next to this config
    pub database_url: Option<String>,

    /// Orchestrator limits and timeouts
    pub control: ControlConfig,
}

/// Configuration manager
pub struct ConfigManager;

impl ConfigManager {
    /// ~/.passdeck
    pub fn config_dir() -> Result<PathBuf> {
        let home = dirs::home_dir().context("Failed to get home directory")?;
        Ok(home.join(".passdeck"))
    }

    fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.json"))
    }

    pub fn load() -> Result<PassdeckConfig> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn save(config: &PassdeckConfig) -> Result<()> {
        Self::save_to(config, &Self::config_path()?)
    }

    /// Load from `path`; a missing file yields the defaults
    pub fn load_from(path: &Path) -> Result<PassdeckConfig> {
        if !path.exists() {
            return Ok(PassdeckConfig::default());
        }

        let json =
            fs::read_to_string(path).context(format!("Failed to read config file: {:?}", path))?;

        serde_json::from_str(&json).context(format!("Failed to parse config file: {:?}", path))
    }

    pub fn save_to(config: &PassdeckConfig, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .context(format!("Failed to create config directory: {:?}", parent))?;
        }

        let json = serde_json::to_string_pretty(config).context("Failed to serialize config")?;
        fs::write(path, json).context(format!("Failed to write config file: {:?}", path))?;

        Ok(())
    }

    /// Database URL from the flag, then the config file, then the default file
    pub fn database_url(flag: Option<String>, config: &PassdeckConfig) -> Result<String> {
        if let Some(url) = flag.or_else(|| config.database_url.clone()) {
            return Ok(url);
        }
        let dir = Self::config_dir()?;
        fs::create_dir_all(&dir)
            .context(format!("Failed to create config directory: {:?}", dir))?;
        Ok(format!("sqlite://{}?mode=rwc", dir.join("passdeck.db").display()))
    }
}
