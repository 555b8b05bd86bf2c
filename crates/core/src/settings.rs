//! Per-source backup settings.
//!
//! A settings file is a JSON document discovered on a drive, a media device
//! or a subscribed directory. Together with the root directory it was found
//! under it yields one immutable [`BackupSettings`] for a backup run.

use crate::{BackupError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SourceType {
    #[default]
    DriveOrDirectory,
    MediaDevice,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SearchMethod {
    /// Compare file content; moved or renamed files are still recognised.
    Hash,
    /// Compare root-relative paths only and skip hashing known paths.
    FilePath,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoriesMap {
    pub source_relative_directory: String,
    #[serde(default)]
    pub dest_relative_directory: String,
}

impl DirectoriesMap {
    pub fn new(source: impl Into<String>, dest: impl Into<String>) -> Self {
        Self {
            source_relative_directory: source.into(),
            dest_relative_directory: dest.into(),
        }
    }
}

/// On-disk shape of a settings file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsFile {
    pub directories_maps: Vec<DirectoriesMap>,
    #[serde(default = "default_true")]
    pub should_backup_to_known_directory: bool,
    #[serde(default)]
    pub allow_multithreading: bool,
    #[serde(default)]
    pub save_interval: u16,
    #[serde(default)]
    pub source_type: SourceType,
    #[serde(default)]
    pub fast_mapping: bool,
    #[serde(default)]
    pub media_device_name: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

fn default_true() -> bool {
    true
}

/// Validated, immutable settings for one backup run.
#[derive(Debug, Clone)]
pub struct BackupSettings {
    directories_maps: Vec<DirectoriesMap>,
    should_backup_to_known_directory: bool,
    allow_multithreading: bool,
    save_interval: u16,
    source_type: SourceType,
    search_method: SearchMethod,
    root_directory: PathBuf,
    media_device_name: Option<String>,
    token: Option<String>,
    description: Option<String>,
}

impl BackupSettings {
    /// Build settings from a parsed file and the root it was detected under.
    /// Fails if any mapping has a blank source directory.
    pub fn new(file: SettingsFile, root_directory: impl Into<PathBuf>) -> Result<Self> {
        if let Some(index) = file
            .directories_maps
            .iter()
            .position(|map| map.source_relative_directory.trim().is_empty())
        {
            return Err(BackupError::invalid_settings(format!(
                "directoriesMaps[{}] has an empty sourceRelativeDirectory",
                index
            )));
        }

        let search_method = if file.fast_mapping {
            SearchMethod::FilePath
        } else {
            SearchMethod::Hash
        };

        Ok(Self {
            directories_maps: file.directories_maps,
            should_backup_to_known_directory: file.should_backup_to_known_directory,
            allow_multithreading: file.allow_multithreading,
            save_interval: file.save_interval,
            source_type: file.source_type,
            search_method,
            root_directory: root_directory.into(),
            media_device_name: file.media_device_name,
            token: file.token,
            description: file.description,
        })
    }

    /// Parse and validate a settings file, propagating any failure.
    pub fn from_file(path: &Path, root_directory: impl Into<PathBuf>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let file: SettingsFile = serde_json::from_str(&content)?;
        Self::new(file, root_directory)
    }

    pub fn directories_maps(&self) -> &[DirectoriesMap] {
        &self.directories_maps
    }

    pub fn should_backup_to_known_directory(&self) -> bool {
        self.should_backup_to_known_directory
    }

    pub fn allow_multithreading(&self) -> bool {
        self.allow_multithreading
    }

    pub fn save_interval(&self) -> u16 {
        self.save_interval
    }

    pub fn source_type(&self) -> SourceType {
        self.source_type
    }

    pub fn search_method(&self) -> SearchMethod {
        self.search_method
    }

    pub fn root_directory(&self) -> &Path {
        &self.root_directory
    }

    pub fn media_device_name(&self) -> Option<&str> {
        self.media_device_name.as_deref()
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }
}

/// Load settings the way detectors do: an unreadable or invalid file means
/// "no settings here", never a failure of the caller.
pub fn load_settings_file(path: &Path, root_directory: &Path) -> Option<BackupSettings> {
    if !path.exists() {
        debug!("No settings file at {}", path.display());
        return None;
    }

    match BackupSettings::from_file(path, root_directory) {
        Ok(settings) => Some(settings),
        Err(e) => {
            warn!("Ignoring settings file {}: {}", path.display(), e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn settings_json() -> &'static str {
        r#"{
            "directoriesMaps": [
                { "sourceRelativeDirectory": "Games", "destRelativeDirectory": "GamesBackup" },
                { "sourceRelativeDirectory": "Photos" }
            ],
            "allowMultithreading": true,
            "saveInterval": 25,
            "token": "drive-7f3a",
            "description": "laptop drive"
        }"#
    }

    #[test]
    fn test_parse_settings_with_defaults() {
        let file: SettingsFile = serde_json::from_str(settings_json()).unwrap();
        let settings = BackupSettings::new(file, "/mnt/drive").unwrap();

        assert_eq!(
            settings.directories_maps(),
            &[
                DirectoriesMap::new("Games", "GamesBackup"),
                DirectoriesMap::new("Photos", ""),
            ]
        );
        assert!(settings.should_backup_to_known_directory());
        assert!(settings.allow_multithreading());
        assert_eq!(settings.save_interval(), 25);
        assert_eq!(settings.source_type(), SourceType::DriveOrDirectory);
        assert_eq!(settings.search_method(), SearchMethod::Hash);
        assert_eq!(settings.root_directory(), Path::new("/mnt/drive"));
        assert_eq!(settings.description(), Some("laptop drive"));
        assert_eq!(settings.token(), Some("drive-7f3a"));
        assert_eq!(settings.media_device_name(), None);
    }

    #[test]
    fn test_fast_mapping_selects_path_search() {
        let file: SettingsFile = serde_json::from_str(
            r#"{ "directoriesMaps": [{ "sourceRelativeDirectory": "DCIM" }],
                 "fastMapping": true, "sourceType": "MediaDevice", "mediaDeviceName": "Pixel" }"#,
        )
        .unwrap();
        let settings = BackupSettings::new(file, "/").unwrap();
        assert_eq!(settings.search_method(), SearchMethod::FilePath);
        assert_eq!(settings.source_type(), SourceType::MediaDevice);
        assert_eq!(settings.media_device_name(), Some("Pixel"));
    }

    #[test]
    fn test_blank_source_directory_is_rejected() {
        let file: SettingsFile = serde_json::from_str(
            r#"{ "directoriesMaps": [{ "sourceRelativeDirectory": "A" }, { "sourceRelativeDirectory": "  " }] }"#,
        )
        .unwrap();
        let err = BackupSettings::new(file, "/").unwrap_err();
        assert!(matches!(err, BackupError::InvalidSettings { .. }));
        assert!(err.to_string().contains("directoriesMaps[1]"));
    }

    #[test]
    fn test_load_settings_file_recovers_from_bad_input() {
        let temp_dir = TempDir::new().unwrap();
        let missing = temp_dir.path().join("missing.json");
        assert!(load_settings_file(&missing, temp_dir.path()).is_none());

        let corrupt = temp_dir.path().join("corrupt.json");
        fs::write(&corrupt, "{ not json").unwrap();
        assert!(load_settings_file(&corrupt, temp_dir.path()).is_none());

        let good = temp_dir.path().join("good.json");
        fs::write(&good, settings_json()).unwrap();
        let settings = load_settings_file(&good, temp_dir.path()).unwrap();
        assert_eq!(settings.directories_maps().len(), 2);
    }
}
