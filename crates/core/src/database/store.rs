//! Document stores backing the remote database.

use crate::record::{BackupRecord, RecordSearchModel};
use crate::{BackupError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::fs as async_fs;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

/// A collection-of-documents store with atomic per-document upsert.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Insert or replace the document with this id.
    async fn upsert(&self, collection: &str, id: &str, record: &BackupRecord) -> Result<()>;

    async fn get(&self, collection: &str, id: &str) -> Result<Option<BackupRecord>>;

    async fn find(&self, collection: &str, filter: &RecordSearchModel) -> Result<Vec<BackupRecord>>;

    async fn all(&self, collection: &str) -> Result<Vec<BackupRecord>>;
}

/// In-process store, used for tests and as an offline stand-in.
#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    collections: RwLock<HashMap<String, HashMap<String, BackupRecord>>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn upsert(&self, collection: &str, id: &str, record: &BackupRecord) -> Result<()> {
        self.collections
            .write()
            .await
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), record.clone());
        Ok(())
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<BackupRecord>> {
        Ok(self
            .collections
            .read()
            .await
            .get(collection)
            .and_then(|docs| docs.get(id))
            .cloned())
    }

    async fn find(&self, collection: &str, filter: &RecordSearchModel) -> Result<Vec<BackupRecord>> {
        Ok(self
            .collections
            .read()
            .await
            .get(collection)
            .map(|docs| docs.values().filter(|r| filter.matches(r)).cloned().collect())
            .unwrap_or_default())
    }

    async fn all(&self, collection: &str) -> Result<Vec<BackupRecord>> {
        self.find(collection, &RecordSearchModel::default()).await
    }
}

/// One directory per collection, one JSON file per document. Suitable for a
/// store shared over a network mount.
#[derive(Debug, Clone)]
pub struct DirectoryDocumentStore {
    root: PathBuf,
}

impl DirectoryDocumentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn collection_dir(&self, collection: &str) -> Result<PathBuf> {
        if collection.is_empty() || collection.contains(['/', '\\', '.']) {
            return Err(BackupError::Store {
                reason: format!("invalid collection name: {:?}", collection),
            });
        }
        Ok(self.root.join(collection))
    }

    fn document_path(&self, collection: &str, id: &str) -> Result<PathBuf> {
        if id.is_empty() || !id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
            return Err(BackupError::Store {
                reason: format!("invalid document id: {:?}", id),
            });
        }
        Ok(self.collection_dir(collection)?.join(format!("{}.json", id)))
    }

    async fn read_document(path: &std::path::Path) -> Result<Option<BackupRecord>> {
        match async_fs::read_to_string(path).await {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(record) => Ok(Some(record)),
                Err(e) => {
                    warn!("Skipping unreadable document {}: {}", path.display(), e);
                    Ok(None)
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl DocumentStore for DirectoryDocumentStore {
    async fn upsert(&self, collection: &str, id: &str, record: &BackupRecord) -> Result<()> {
        let path = self.document_path(collection, id)?;
        let dir = self.collection_dir(collection)?;
        async_fs::create_dir_all(&dir).await?;

        let temp_path = dir.join(format!(".{}.{}.tmp", id, Uuid::new_v4().simple()));
        async_fs::write(&temp_path, serde_json::to_vec(record)?).await?;
        if let Err(e) = async_fs::rename(&temp_path, &path).await {
            let _ = async_fs::remove_file(&temp_path).await;
            return Err(e.into());
        }
        debug!("Upserted document {}/{}", collection, id);
        Ok(())
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<BackupRecord>> {
        let path = match self.document_path(collection, id) {
            Ok(path) => path,
            Err(_) => return Ok(None),
        };
        Self::read_document(&path).await
    }

    async fn find(&self, collection: &str, filter: &RecordSearchModel) -> Result<Vec<BackupRecord>> {
        if let Some(id) = &filter.id {
            return Ok(self
                .get(collection, id)
                .await?
                .filter(|record| filter.matches(record))
                .into_iter()
                .collect());
        }

        let dir = self.collection_dir(collection)?;
        let mut entries = match async_fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut records = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_document = path.extension().and_then(|s| s.to_str()) == Some("json")
                && !entry.file_name().to_string_lossy().starts_with('.');
            if !is_document {
                continue;
            }
            if let Some(record) = Self::read_document(&path).await? {
                if filter.matches(&record) {
                    records.push(record);
                }
            }
        }
        Ok(records)
    }

    async fn all(&self, collection: &str) -> Result<Vec<BackupRecord>> {
        self.find(collection, &RecordSearchModel::default()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    async fn exercise_store(store: &dyn DocumentStore) {
        let a = BackupRecord::new("h1", "a.txt");
        let b = BackupRecord::new("h1", "b.txt");
        let c = BackupRecord::new("h2", "c.txt");
        for record in [&a, &b, &c] {
            store.upsert("main", &record.id, record).await.unwrap();
        }
        store.upsert("other", &a.id, &a).await.unwrap();

        // Replacing a document keeps one copy
        store.upsert("main", &a.id, &a).await.unwrap();
        assert_eq!(store.all("main").await.unwrap().len(), 3);
        assert_eq!(store.all("other").await.unwrap().len(), 1);
        assert!(store.all("missing").await.unwrap().is_empty());

        let mut shared = store
            .find("main", &RecordSearchModel::by_hash("h1"))
            .await
            .unwrap();
        shared.sort_by(|x, y| x.file_path.cmp(&y.file_path));
        assert_eq!(shared, vec![a.clone(), b.clone()]);

        assert_eq!(store.get("main", &c.id).await.unwrap(), Some(c.clone()));
        assert_eq!(
            store.find("main", &RecordSearchModel::by_id(c.id.clone())).await.unwrap(),
            vec![c]
        );
        assert_eq!(store.get("main", "nope").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_memory_store() {
        exercise_store(&MemoryDocumentStore::new()).await;
    }

    #[tokio::test]
    async fn test_directory_store() {
        let temp_dir = TempDir::new().unwrap();
        let store = DirectoryDocumentStore::new(temp_dir.path());
        exercise_store(&store).await;

        // No temp files left behind
        let leftovers = std::fs::read_dir(temp_dir.path().join("main"))
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn test_directory_store_rejects_bad_names() {
        let temp_dir = TempDir::new().unwrap();
        let store = DirectoryDocumentStore::new(temp_dir.path());
        let record = BackupRecord::new("h", "p");

        assert!(store.upsert("../escape", &record.id, &record).await.is_err());
        assert!(store.upsert("main", "../id", &record).await.is_err());
    }
}
