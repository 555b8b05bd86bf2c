use crate::database::BackupDatabase;
use crate::hash::HashCalculator;
use crate::record::{BackupRecord, RecordSearchModel};
use crate::{BackupError, Result};
use chrono::Utc;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Dedup decisions on top of a [`BackupDatabase`]. The orchestrator only ever
/// talks to the database through this type.
#[derive(Clone)]
pub struct HashHandler {
    database: Arc<dyn BackupDatabase>,
    calculator: HashCalculator,
}

impl HashHandler {
    pub fn new(database: Arc<dyn BackupDatabase>) -> Self {
        Self {
            database,
            calculator: HashCalculator::new(),
        }
    }

    pub async fn load(&self, database_name: &str) -> Result<()> {
        self.database.load(database_name).await
    }

    /// Hash a local file off the async executor.
    pub async fn calculate_hash(&self, file_path: &Path) -> Result<String> {
        let calculator = self.calculator;
        let file_path: PathBuf = file_path.to_path_buf();
        tokio::task::spawn_blocking(move || calculator.calculate_file_hash(&file_path))
            .await
            .map_err(|e| BackupError::Task {
                reason: format!("hashing task failed: {}", e),
            })?
    }

    /// Hash an arbitrary blocking reader, e.g. a file on a media device.
    pub async fn calculate_reader_hash<R>(&self, reader: R) -> Result<String>
    where
        R: Read + Send + 'static,
    {
        let calculator = self.calculator;
        tokio::task::spawn_blocking(move || calculator.calculate_reader_hash(reader))
            .await
            .map_err(|e| BackupError::Task {
                reason: format!("hashing task failed: {}", e),
            })?
    }

    pub async fn is_hash_exists(&self, hash: &str) -> Result<bool> {
        Ok(self
            .database
            .find(&RecordSearchModel::by_hash(hash))
            .await?
            .is_some())
    }

    pub async fn is_file_path_exist(&self, relative_path: &str) -> Result<bool> {
        Ok(self
            .database
            .find(&RecordSearchModel::by_path(relative_path))
            .await?
            .is_some())
    }

    pub async fn add_file_hash(&self, hash: &str, relative_path: &str) -> Result<()> {
        let record = BackupRecord::new(hash, relative_path).with_backup_time(Utc::now());
        self.database.insert(record).await
    }

    pub async fn save(&self) -> Result<()> {
        self.database.save().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::LocalDatabase;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_register_and_lookup() {
        let temp_dir = TempDir::new().unwrap();
        let handler = HashHandler::new(Arc::new(LocalDatabase::new(temp_dir.path())));
        handler.load("main").await.unwrap();

        let file = temp_dir.path().join("a.txt");
        std::fs::write(&file, "x").unwrap();
        let hash = handler.calculate_hash(&file).await.unwrap();
        assert_eq!(
            hash,
            handler.calculate_reader_hash(std::io::Cursor::new(b"x".to_vec())).await.unwrap()
        );

        assert!(!handler.is_hash_exists(&hash).await.unwrap());
        assert!(!handler.is_file_path_exist("Games/a.txt").await.unwrap());

        handler.add_file_hash(&hash, "Games/a.txt").await.unwrap();
        handler.save().await.unwrap();

        assert!(handler.is_hash_exists(&hash).await.unwrap());
        assert!(handler.is_file_path_exist("Games/a.txt").await.unwrap());
        assert!(!handler.is_file_path_exist("Games/b.txt").await.unwrap());
    }

    #[tokio::test]
    async fn test_unloaded_database_surfaces_error() {
        let temp_dir = TempDir::new().unwrap();
        let handler = HashHandler::new(Arc::new(LocalDatabase::new(temp_dir.path())));
        assert!(matches!(
            handler.is_hash_exists("h").await,
            Err(BackupError::NotLoaded)
        ));
    }
}
