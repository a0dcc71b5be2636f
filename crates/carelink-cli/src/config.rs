//! Configuration file management.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use carelink_core::CuffConfig;
use serde::{Deserialize, Serialize};

/// Environment variable that overrides the stored API key.
pub const API_KEY_ENV: &str = "CARELINK_API_KEY";

/// Configuration file structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Cloud endpoint base URL
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Cloud API key
    #[serde(default)]
    pub api_key: Option<String>,

    /// Upload new Bluetooth readings as they arrive
    #[serde(default = "default_true")]
    pub auto_upload: bool,

    /// Scan timeout in seconds
    #[serde(default)]
    pub scan_timeout: Option<u64>,

    /// Measurement timeout in seconds
    #[serde(default)]
    pub measurement_timeout: Option<u64>,

    /// Database path override
    #[serde(default)]
    pub database: Option<PathBuf>,
}

fn default_true() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key: None,
            auto_upload: true,
            scan_timeout: None,
            measurement_timeout: None,
            database: None,
        }
    }
}

impl Config {
    pub fn path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("carelink")
            .join("config.toml")
    }

    pub fn load() -> Self {
        Self::load_from(&Self::path())
    }

    /// Read a config file, falling back to defaults with a warning.
    pub fn load_from(path: &Path) -> Self {
        if path.exists() {
            match fs::read_to_string(path) {
                Ok(content) => match toml::from_str(&content) {
                    Ok(config) => return config,
                    Err(e) => {
                        eprintln!("Warning: Failed to parse config: {}", e);
                    }
                },
                Err(e) => {
                    eprintln!("Warning: Failed to read config: {}", e);
                }
            }
        }
        Self::default()
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::path())
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, content)
            .with_context(|| format!("Failed to write config: {}", path.display()))?;
        Ok(())
    }

    /// API key from the environment, else from the file.
    pub fn api_key(&self) -> Option<String> {
        resolve_api_key(std::env::var(API_KEY_ENV).ok(), self)
    }

    /// Database path: flag, then config, then the platform default.
    pub fn database_path(&self, flag: Option<PathBuf>) -> PathBuf {
        flag.or_else(|| self.database.clone())
            .unwrap_or_else(carelink_store::default_db_path)
    }

    /// Core service settings with file overrides applied.
    pub fn cuff_config(&self, measurement_timeout: Option<u64>) -> CuffConfig {
        let mut config = CuffConfig::default();
        if let Some(secs) = self.scan_timeout {
            config = config.scan_timeout(Duration::from_secs(secs));
        }
        if let Some(secs) = measurement_timeout.or(self.measurement_timeout) {
            config = config.measurement_timeout(Duration::from_secs(secs));
        }
        config
    }
}

pub fn resolve_api_key(env: Option<String>, config: &Config) -> Option<String> {
    env.filter(|k| !k.is_empty())
        .or_else(|| config.api_key.clone().filter(|k| !k.is_empty()))
}

/// Mask all but the last four characters of a secret.
pub fn mask_secret(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= 4 {
        return "*".repeat(chars.len());
    }
    let visible: String = chars[chars.len() - 4..].iter().collect();
    format!("{}{}", "*".repeat(chars.len() - 4), visible)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert!(config.auto_upload);
        assert!(config.endpoint.is_none());
        assert_eq!(config.cuff_config(None), CuffConfig::default());
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let config: Config = toml::from_str("endpoint = \"https://x.test\"").unwrap();
        assert_eq!(config.endpoint.as_deref(), Some("https://x.test"));
        assert!(config.auto_upload);
    }

    #[test]
    fn test_round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("carelink").join("config.toml");
        let config = Config {
            endpoint: Some("https://x.test/api".to_string()),
            api_key: Some("secret".to_string()),
            auto_upload: false,
            scan_timeout: Some(20),
            ..Default::default()
        };

        config.save_to(&path).unwrap();
        assert_eq!(Config::load_from(&path), config);
    }

    #[test]
    fn test_unparseable_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "scan_timeout = \"soon\"").unwrap();
        assert_eq!(Config::load_from(&path), Config::default());
    }

    #[test]
    fn test_env_api_key_wins() {
        let config = Config {
            api_key: Some("from-file".to_string()),
            ..Default::default()
        };
        assert_eq!(
            resolve_api_key(Some("from-env".to_string()), &config).as_deref(),
            Some("from-env")
        );
        assert_eq!(
            resolve_api_key(Some(String::new()), &config).as_deref(),
            Some("from-file")
        );
        assert_eq!(resolve_api_key(None, &Config::default()), None);
    }

    #[test]
    fn test_database_path_precedence() {
        let config = Config {
            database: Some(PathBuf::from("/from/config.db")),
            ..Default::default()
        };
        assert_eq!(
            config.database_path(Some(PathBuf::from("/from/flag.db"))),
            PathBuf::from("/from/flag.db")
        );
        assert_eq!(config.database_path(None), PathBuf::from("/from/config.db"));
        assert_eq!(
            Config::default().database_path(None),
            carelink_store::default_db_path()
        );
    }

    #[test]
    fn test_cuff_config_overrides() {
        let config = Config {
            scan_timeout: Some(25),
            measurement_timeout: Some(40),
            ..Default::default()
        };
        let cuff = config.cuff_config(None);
        assert_eq!(cuff.scan_timeout, Duration::from_secs(25));
        assert_eq!(cuff.measurement_timeout, Duration::from_secs(40));
        assert_eq!(
            config.cuff_config(Some(90)).measurement_timeout,
            Duration::from_secs(90)
        );
    }

    #[test]
    fn test_mask_secret() {
        assert_eq!(mask_secret("abcdefgh"), "****efgh");
        assert_eq!(mask_secret("abc"), "***");
    }
}
