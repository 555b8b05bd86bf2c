use crate::{BackupError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const DEFAULT_DATABASE_NAME: &str = "backups";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// The known backup directory files are copied into.
    pub backup_directory: PathBuf,
    /// Where local database files live.
    pub database_directory: PathBuf,
    pub database_name: String,
    /// Root of the directory-backed document store used as the remote database.
    #[serde(default)]
    pub remote_store_directory: Option<PathBuf>,
    pub backup_time_log: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("fleetbackup");
        let backup_directory = dirs::document_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("FleetBackup");

        Self {
            backup_directory,
            database_directory: data_dir.join("databases"),
            database_name: DEFAULT_DATABASE_NAME.to_string(),
            remote_store_directory: None,
            backup_time_log: data_dir.join("backup_times.log"),
        }
    }
}

impl EngineConfig {
    /// Load config from the default location, creating it if missing
    pub fn load() -> Result<Self> {
        let config_path = Self::get_config_path()?;
        Self::load_from(&config_path)
    }

    /// Load config from a path, writing defaults there if it does not exist
    pub fn load_from(config_path: &Path) -> Result<Self> {
        if config_path.exists() {
            debug!("Loading config from {}", config_path.display());
            let content = fs::read_to_string(config_path).map_err(|e| BackupError::Config {
                reason: format!("Failed to read config file: {}", e),
            })?;

            let config: Self = serde_yaml::from_str(&content).map_err(|e| BackupError::Config {
                reason: format!("Failed to parse config file: {}", e),
            })?;
            config.validate()?;
            Ok(config)
        } else {
            debug!("Config file not found, creating default");
            let config = Self::default();
            config.save_to(config_path)?;
            Ok(config)
        }
    }

    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent).map_err(|e| BackupError::Config {
                reason: format!("Failed to create config directory: {}", e),
            })?;
        }

        let content = serde_yaml::to_string(self)?;
        fs::write(config_path, content).map_err(|e| BackupError::Config {
            reason: format!("Failed to write config file: {}", e),
        })?;

        debug!("Config saved to {}", config_path.display());
        Ok(())
    }

    fn get_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().ok_or_else(|| BackupError::Config {
            reason: "Could not determine config directory".to_string(),
        })?;

        Ok(config_dir.join("fleetbackup").join("config.yaml"))
    }

    pub fn validate(&self) -> Result<()> {
        if self.database_name.trim().is_empty() {
            return Err(BackupError::Config {
                reason: "database_name must not be empty".to_string(),
            });
        }

        if self.database_name.contains(['/', '\\']) {
            return Err(BackupError::Config {
                reason: format!("database_name must be a plain name: {}", self.database_name),
            });
        }

        if !self.backup_directory.is_absolute() {
            warn!(
                "Backup directory should be an absolute path: {}",
                self.backup_directory.display()
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.database_name, DEFAULT_DATABASE_NAME);
        assert!(config.remote_store_directory.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_creates_default_then_round_trips() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("config.yaml");

        let created = EngineConfig::load_from(&path).unwrap();
        assert!(path.exists());

        let mut edited = created.clone();
        edited.remote_store_directory = Some(temp_dir.path().join("remote"));
        edited.save_to(&path).unwrap();

        let loaded = EngineConfig::load_from(&path).unwrap();
        assert_eq!(loaded.remote_store_directory, edited.remote_store_directory);
    }

    #[test]
    fn test_invalid_database_name() {
        let mut config = EngineConfig::default();
        config.database_name = "a/b".to_string();
        assert!(matches!(config.validate(), Err(BackupError::Config { .. })));

        config.database_name = " ".to_string();
        assert!(config.validate().is_err());
    }
}
