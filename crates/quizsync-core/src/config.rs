use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Configuration for the quizsync engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub app: AppConfig,
    #[serde(default)]
    pub user: UserConfig,
    // Remote store settings (optional; absent means local-only mode)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote: Option<RemoteConfig>,
    #[serde(default)]
    pub sync: SyncSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Application instance identifier. Namespaces every local storage key
    /// so deployments sharing a device never see each other's data.
    #[serde(default = "default_app_id")]
    pub app_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserConfig {
    /// Durable numeric identity, when one has been issued.
    pub identity: Option<i64>,

    /// Display name used for leaderboard entries.
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Base URL of the remote record store (if None, runs in local-only mode)
    pub url: Option<String>,

    /// Authentication token passed to the store
    pub auth_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Offline-queue flush interval in seconds
    #[serde(default = "default_flush_interval")]
    pub flush_interval_seconds: u64,

    /// Path to the local cache database
    pub database_path: Option<PathBuf>,
}

fn default_app_id() -> String {
    "quizsync_v1".to_string()
}

fn default_flush_interval() -> u64 {
    30 // 30 seconds
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            app_id: default_app_id(),
        }
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            flush_interval_seconds: default_flush_interval(),
            database_path: None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            app: AppConfig::default(),
            user: UserConfig::default(),
            remote: None,
            sync: SyncSettings::default(),
        }
    }
}

impl Config {
    /// Default config file location (`~/.config/quizsync/config.toml`).
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().context("Cannot determine config directory")?;
        Ok(config_dir.join("quizsync").join("config.toml"))
    }

    /// Default local cache database location.
    pub fn default_database_path() -> Result<PathBuf> {
        let data_dir = dirs::data_dir().context("Cannot determine data directory")?;
        Ok(data_dir.join("quizsync").join("cache.db"))
    }

    /// Load configuration from the default location, falling back to
    /// defaults when no file exists yet.
    pub fn load() -> Result<Self> {
        let path = Self::default_path()?;
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    /// Write the configuration to the given path, creating parent
    /// directories as needed.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Resolved cache database path.
    pub fn database_path(&self) -> Result<PathBuf> {
        match &self.sync.database_path {
            Some(path) => Ok(path.clone()),
            None => Self::default_database_path(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_round_trips_through_toml() {
        let config = Config::default();
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&text).unwrap();

        assert_eq!(parsed.app.app_id, "quizsync_v1");
        assert_eq!(parsed.sync.flush_interval_seconds, 30);
        assert!(parsed.remote.is_none());
        assert!(parsed.user.identity.is_none());
    }

    #[test]
    fn partial_config_fills_defaults() {
        let parsed: Config = toml::from_str(
            r#"
            [user]
            identity = 2004826495
            name = "Sam"

            [remote]
            url = "https://records.example.app"
            "#,
        )
        .unwrap();

        assert_eq!(parsed.user.identity, Some(2004826495));
        assert_eq!(parsed.app.app_id, "quizsync_v1");
        let remote = parsed.remote.unwrap();
        assert_eq!(remote.url.as_deref(), Some("https://records.example.app"));
        assert!(remote.auth_token.is_none());
    }
}
