//! Configuration for the CLI.
//!
//! Handles the API endpoint and its persistence in the user's config
//! directory.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

/// Configuration file name.
const CONFIG_FILE: &str = "config.json";

/// Get the config directory path.
fn config_dir() -> Result<PathBuf> {
    ProjectDirs::from("dev", "driftd", "drift")
        .map(|dirs| dirs.config_dir().to_path_buf())
        .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))
}

/// CLI configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// API endpoint URL.
    #[serde(default = "default_api_url")]
    pub api_url: String,
}

fn default_api_url() -> String {
    std::env::var("DRIFT_API_URL").unwrap_or_else(|_| "http://localhost:8080".to_string())
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
        }
    }
}

impl Config {
    /// Load config from disk, or return default.
    pub fn load() -> Result<Self> {
        let path = config_dir()?.join(CONFIG_FILE);

        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config from {:?}", path))?;

        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config from {:?}", path))
    }

    /// Get the API URL.
    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Save config to disk.
    pub fn save(&self) -> Result<()> {
        let dir = config_dir()?;
        fs::create_dir_all(&dir)?;

        let path = dir.join(CONFIG_FILE);
        let contents = serde_json::to_string_pretty(self)?;
        fs::write(&path, contents).with_context(|| format!("Failed to write config to {:?}", path))
    }
}
