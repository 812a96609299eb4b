//! Persistent CLI configuration.
//!
//! Values in the file are fallbacks: any `FIELDSYNC_*` environment variable
//! that is set takes precedence.

use std::path::{Path, PathBuf};

use fieldsync_core::SyncConfig;
use serde::{Deserialize, Serialize};

const CONFIG_FILE_NAME: &str = "cli-config.json";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CliConfig {
    #[serde(default = "default_config_version")]
    pub version: u32,
    #[serde(default)]
    pub remote_url: Option<String>,
    #[serde(default)]
    pub auth_token: Option<String>,
    #[serde(default)]
    pub collections: Vec<String>,
    #[serde(default)]
    pub sync_interval_secs: Option<u64>,
}

const fn default_config_version() -> u32 {
    1
}

pub fn default_config_path() -> Result<PathBuf, String> {
    dirs::config_dir()
        .map(|dir| dir.join("fieldsync").join(CONFIG_FILE_NAME))
        .ok_or_else(|| "Failed to resolve CLI config directory".to_string())
}

pub fn normalize_text_option(value: Option<String>) -> Option<String> {
    let value = value?;
    let value = value.trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

pub fn is_http_url(value: &str) -> bool {
    let value = value.trim();
    value.starts_with("https://") || value.starts_with("http://")
}

impl CliConfig {
    pub fn load() -> Result<Self, String> {
        Self::load_from_path(&default_config_path()?)
    }

    pub fn load_from_path(path: &Path) -> Result<Self, String> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)
            .map_err(|error| format!("Failed to read config at {}: {}", path.display(), error))?;
        let mut config = serde_json::from_str::<Self>(&raw)
            .map_err(|error| format!("Failed to parse config at {}: {}", path.display(), error))?;
        config.normalize();
        Ok(config)
    }

    pub fn save(&self) -> Result<PathBuf, String> {
        let path = default_config_path()?;
        self.save_to_path(&path)?;
        Ok(path)
    }

    pub fn save_to_path(&self, path: &Path) -> Result<(), String> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|error| {
                format!(
                    "Failed to create config directory {}: {}",
                    parent.display(),
                    error
                )
            })?;
        }

        let mut normalized = self.clone();
        normalized.normalize();
        let serialized = serde_json::to_string_pretty(&normalized)
            .map_err(|error| format!("Failed to serialize config: {error}"))?;
        std::fs::write(path, serialized)
            .map_err(|error| format!("Failed to write config at {}: {}", path.display(), error))
    }

    /// File value for a `FIELDSYNC_*` variable.
    pub fn lookup(&self, name: &str) -> Option<String> {
        match name {
            "FIELDSYNC_REMOTE_URL" => self.remote_url.clone(),
            "FIELDSYNC_AUTH_TOKEN" => self.auth_token.clone(),
            "FIELDSYNC_COLLECTIONS" if !self.collections.is_empty() => {
                Some(self.collections.join(","))
            }
            "FIELDSYNC_SYNC_INTERVAL_SECS" => self.sync_interval_secs.map(|secs| secs.to_string()),
            _ => None,
        }
    }

    /// Effective sync configuration: environment first, then this file.
    pub fn sync_config(
        &self,
        env: impl Fn(&str) -> Option<String>,
    ) -> fieldsync_core::Result<SyncConfig> {
        SyncConfig::from_lookup(|name| {
            normalize_text_option(env(name)).or_else(|| self.lookup(name))
        })
    }

    fn normalize(&mut self) {
        self.remote_url = normalize_text_option(self.remote_url.take())
            .map(|url| url.trim_end_matches('/').to_string());
        self.auth_token = normalize_text_option(self.auth_token.take());
        let mut collections = self
            .collections
            .iter()
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .collect::<Vec<_>>();
        collections.sort();
        collections.dedup();
        self.collections = collections;
    }
}
