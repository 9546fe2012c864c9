use anyhow::{Context, Result};
pub use quizsync_core::config::Config;
use std::path::Path;

/// Load the daemon configuration, creating a default file on first run.
pub fn load_syncd_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        let default_config = Config::default();
        default_config
            .save_to(path)
            .context("Failed to save default config")?;
        println!("Created default config at: {}", path.display());
        return Ok(default_config);
    }
    Config::load_from(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn first_run_creates_a_default_config() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");

        let config = load_syncd_config(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.app.app_id, "quizsync_v1");

        // second load reads the file back
        let reloaded = load_syncd_config(&path).unwrap();
        assert_eq!(reloaded.sync.flush_interval_seconds, 30);
    }
}
