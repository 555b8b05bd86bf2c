use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// One backed-up file: a content hash and the root-relative path it was seen at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupRecord {
    pub id: String,
    pub file_path: String,
    pub file_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_time: Option<DateTime<Utc>>,
}

impl BackupRecord {
    pub fn new(file_hash: impl Into<String>, file_path: impl Into<String>) -> Self {
        let file_hash = file_hash.into();
        let file_path = file_path.into();
        Self {
            id: Self::compound_key(&file_hash, &file_path),
            file_path,
            file_hash,
            backup_time: None,
        }
    }

    pub fn with_backup_time(mut self, backup_time: DateTime<Utc>) -> Self {
        self.backup_time = Some(backup_time);
        self
    }

    /// Stable document key for a (hash, path) pair.
    pub fn compound_key(file_hash: &str, file_path: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(file_hash.as_bytes());
        hasher.update([0u8]);
        hasher.update(file_path.as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// Sparse lookup filter. Only populated fields constrain a query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordSearchModel {
    pub id: Option<String>,
    pub file_path: Option<String>,
    pub file_hash: Option<String>,
    pub backup_time: Option<DateTime<Utc>>,
}

impl RecordSearchModel {
    pub fn by_hash(file_hash: impl Into<String>) -> Self {
        Self {
            file_hash: Some(file_hash.into()),
            ..Default::default()
        }
    }

    pub fn by_path(file_path: impl Into<String>) -> Self {
        Self {
            file_path: Some(file_path.into()),
            ..Default::default()
        }
    }

    pub fn by_id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Default::default()
        }
    }

    /// Whether a record satisfies every populated field.
    pub fn matches(&self, record: &BackupRecord) -> bool {
        self.id.as_ref().map_or(true, |id| *id == record.id)
            && self
                .file_path
                .as_ref()
                .map_or(true, |path| *path == record.file_path)
            && self
                .file_hash
                .as_ref()
                .map_or(true, |hash| *hash == record.file_hash)
            && self
                .backup_time
                .map_or(true, |time| record.backup_time == Some(time))
    }
}
