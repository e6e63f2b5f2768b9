//! Configuration management with file persistence

use crate::locking::{LockConfig, DEFAULT_MAX_PENDING};
use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable overriding the config directory
pub const CONFIG_DIR_ENV: &str = "KEYLOCK_CONFIG_DIR";

/// keylock configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub lock: LockSettings,
}

/// Lock manager defaults as stored on disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockSettings {
    /// Queue timeout in milliseconds, 0 disables it
    pub timeout_ms: u64,
    pub max_pending: usize,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            timeout_ms: 0,
            max_pending: DEFAULT_MAX_PENDING,
        }
    }
}

impl Config {
    /// Get the config directory path
    pub fn config_dir() -> anyhow::Result<PathBuf> {
        let dir = if let Ok(custom_dir) = env::var(CONFIG_DIR_ENV) {
            PathBuf::from(custom_dir)
        } else {
            dirs::config_dir()
                .ok_or_else(|| anyhow!("Could not determine config directory"))?
                .join("keylock")
        };
        Ok(dir)
    }

    /// Get the config file path
    pub fn config_path() -> anyhow::Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load configuration from file, or the defaults if it doesn't exist
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load configuration from a specific file
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self) -> anyhow::Result<()> {
        self.save_to(&Self::config_path()?)
    }

    /// Save configuration to a specific file
    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        self.validate()?;

        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create config directory: {}", dir.display()))?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.lock.max_pending == 0 {
            return Err(anyhow!("lock.max_pending must be a positive integer"));
        }
        Ok(())
    }

    /// Lock manager configuration built from these settings
    pub fn lock_config(&self) -> LockConfig {
        LockConfig::default()
            .with_timeout_ms(self.lock.timeout_ms)
            .with_max_pending(self.lock.max_pending)
    }

    /// Get a configuration value by key
    pub fn get(&self, key: &str) -> anyhow::Result<String> {
        match key {
            "lock.timeout_ms" => Ok(self.lock.timeout_ms.to_string()),
            "lock.max_pending" => Ok(self.lock.max_pending.to_string()),
            _ => Err(anyhow!(
                "Unknown configuration key: {}. Use `keylock config list` to see available keys.",
                key
            )),
        }
    }

    /// Set a configuration value by key
    pub fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        match key {
            "lock.timeout_ms" => {
                self.lock.timeout_ms = value
                    .parse()
                    .with_context(|| format!("Invalid timeout_ms value: {}", value))?;
            }
            "lock.max_pending" => {
                let max_pending: usize = value
                    .parse()
                    .with_context(|| format!("Invalid max_pending value: {}", value))?;
                if max_pending == 0 {
                    return Err(anyhow!("lock.max_pending must be a positive integer"));
                }
                self.lock.max_pending = max_pending;
            }
            _ => {
                return Err(anyhow!(
                    "Unknown configuration key: {}. Use `keylock config list` to see available keys.",
                    key
                ));
            }
        }
        Ok(())
    }

    /// List all configuration keys and their values
    pub fn list(&self) -> anyhow::Result<Vec<(String, String)>> {
        ["lock.timeout_ms", "lock.max_pending"]
            .into_iter()
            .map(|key| Ok((key.to_string(), self.get(key)?)))
            .collect()
    }

    /// Reset configuration to defaults
    pub fn reset() -> anyhow::Result<()> {
        let path = Self::config_path()?;
        if path.exists() {
            fs::remove_file(&path)
                .with_context(|| format!("Failed to remove config file: {}", path.display()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_match_lock_config() {
        let config = Config::default();
        assert_eq!(config.lock_config(), LockConfig::default());
    }

    #[test]
    fn test_missing_file_loads_defaults() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let config = Config::load_from(&temp.path().join("absent.toml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_save_and_load() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let path = temp.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.set("lock.timeout_ms", "250").unwrap();
        config.set("lock.max_pending", "16").unwrap();
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded, config);

        let lock = loaded.lock_config();
        assert_eq!(lock.timeout, Duration::from_millis(250));
        assert_eq!(lock.max_pending, 16);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let path = temp.path().join("config.toml");
        fs::write(&path, "[lock]\ntimeout_ms = 30\n").unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.lock.timeout_ms, 30);
        assert_eq!(config.lock.max_pending, DEFAULT_MAX_PENDING);
    }

    #[test]
    fn test_zero_max_pending_is_rejected() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let path = temp.path().join("config.toml");
        fs::write(&path, "[lock]\nmax_pending = 0\n").unwrap();
        assert!(Config::load_from(&path).is_err());

        let mut config = Config::default();
        assert!(config.set("lock.max_pending", "0").is_err());
        assert_eq!(config.lock.max_pending, DEFAULT_MAX_PENDING);
    }

    #[test]
    fn test_get_set_unknown_and_invalid() {
        let mut config = Config::default();
        assert!(config.get("lock.nope").is_err());
        assert!(config.set("lock.nope", "1").is_err());
        assert!(config.set("lock.timeout_ms", "soon").is_err());
        assert_eq!(config.get("lock.timeout_ms").unwrap(), "0");
    }

    #[test]
    fn test_list() {
        let items = Config::default().list().unwrap();
        assert_eq!(
            items,
            vec![
                ("lock.timeout_ms".to_string(), "0".to_string()),
                ("lock.max_pending".to_string(), "1000".to_string()),
            ]
        );
    }
}
