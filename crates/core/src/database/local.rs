use super::{non_empty, BackupDatabase};
use crate::record::{BackupRecord, RecordSearchModel};
use crate::{BackupError, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::fs as async_fs;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Both lookup directions over one record set. Always mutated together.
#[derive(Debug, Default)]
struct RecordIndex {
    by_hash: HashMap<String, Vec<String>>,
    by_path: HashMap<String, String>,
}

impl RecordIndex {
    fn from_hash_map(map: HashMap<String, Vec<String>>) -> Self {
        let mut index = Self::default();
        for (hash, paths) in map {
            for path in paths {
                index.insert(&hash, &path);
            }
        }
        index
    }

    /// Returns true if the index changed.
    fn insert(&mut self, hash: &str, path: &str) -> bool {
        if let Some(previous) = self.by_path.get(path) {
            if previous == hash {
                return false;
            }
            // A path maps to one hash; drop it from the hash it used to point at.
            let previous = previous.clone();
            if let Some(paths) = self.by_hash.get_mut(&previous) {
                paths.retain(|p| p != path);
                if paths.is_empty() {
                    self.by_hash.remove(&previous);
                }
            }
        }

        let paths = self.by_hash.entry(hash.to_string()).or_default();
        if !paths.iter().any(|p| p == path) {
            paths.push(path.to_string());
        }
        self.by_path.insert(path.to_string(), hash.to_string());
        true
    }

    fn records_for_hash(&self, hash: &str) -> Vec<BackupRecord> {
        self.by_hash
            .get(hash)
            .map(|paths| {
                paths
                    .iter()
                    .map(|path| BackupRecord::new(hash, path.as_str()))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn record_for_path(&self, path: &str) -> Option<BackupRecord> {
        self.by_path
            .get(path)
            .map(|hash| BackupRecord::new(hash.as_str(), path))
    }

    fn to_file_map(&self) -> BTreeMap<&str, &[String]> {
        self.by_hash
            .iter()
            .map(|(hash, paths)| (hash.as_str(), paths.as_slice()))
            .collect()
    }
}

#[derive(Debug)]
struct LoadedDatabase {
    name: String,
    file_path: PathBuf,
    index: RecordIndex,
    revision: u64,
    saved_revision: u64,
}

impl LoadedDatabase {
    fn is_dirty(&self) -> bool {
        self.revision != self.saved_revision
    }
}

/// File-backed database: `<directory>/<name>.json` holds `{ hash: [paths] }`.
#[derive(Debug)]
pub struct LocalDatabase {
    directory: PathBuf,
    state: Mutex<Option<LoadedDatabase>>,
    write_lock: tokio::sync::Mutex<()>,
}

struct Snapshot {
    name: String,
    file_path: PathBuf,
    json: String,
    revision: u64,
}

impl LocalDatabase {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            state: Mutex::new(None),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn database_path(&self, name: &str) -> PathBuf {
        self.directory.join(format!("{}.json", name))
    }

    /// Name of the currently loaded database, if any.
    pub fn loaded_name(&self) -> Option<String> {
        self.lock_state().as_ref().map(|db| db.name.clone())
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, Option<LoadedDatabase>> {
        // Every mutation is a single `RecordIndex::insert`; a poisoned lock
        // still guards consistent indices.
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn with_loaded<T>(&self, f: impl FnOnce(&mut LoadedDatabase) -> T) -> Result<T> {
        let mut state = self.lock_state();
        let loaded = state.as_mut().ok_or(BackupError::NotLoaded)?;
        Ok(f(loaded))
    }

    fn snapshot(db: &LoadedDatabase) -> Result<Snapshot> {
        Ok(Snapshot {
            name: db.name.clone(),
            file_path: db.file_path.clone(),
            json: serde_json::to_string_pretty(&db.index.to_file_map())?,
            revision: db.revision,
        })
    }

    /// Temp file in the same directory, then rename. Callers hold `write_lock`
    /// from before the snapshot was taken until this returns.
    async fn write_snapshot(snapshot: &Snapshot) -> Result<()> {
        if let Some(parent) = snapshot.file_path.parent() {
            async_fs::create_dir_all(parent).await?;
        }
        let temp_path = snapshot
            .file_path
            .with_extension(format!("json.{}.tmp", Uuid::new_v4().simple()));
        async_fs::write(&temp_path, &snapshot.json).await?;
        if let Err(e) = async_fs::rename(&temp_path, &snapshot.file_path).await {
            let _ = async_fs::remove_file(&temp_path).await;
            return Err(e.into());
        }

        debug!("Saved database {} to {}", snapshot.name, snapshot.file_path.display());
        Ok(())
    }

    fn mark_saved(&self, snapshot: &Snapshot) {
        let mut state = self.lock_state();
        if let Some(db) = state.as_mut() {
            if db.name == snapshot.name && db.saved_revision < snapshot.revision {
                db.saved_revision = snapshot.revision;
            }
        }
    }

    async fn read_index(file_path: &Path) -> Result<RecordIndex> {
        let content = match async_fs::read_to_string(file_path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No database file at {}, starting empty", file_path.display());
                return Ok(RecordIndex::default());
            }
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_str::<HashMap<String, Vec<String>>>(&content) {
            Ok(map) => Ok(RecordIndex::from_hash_map(map)),
            Err(e) => {
                warn!(
                    "Database file {} is corrupt ({}), starting empty",
                    file_path.display(),
                    e
                );
                Ok(RecordIndex::default())
            }
        }
    }
}

#[async_trait]
impl BackupDatabase for LocalDatabase {
    async fn load(&self, name: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let pending = {
            let state = self.lock_state();
            match state.as_ref() {
                Some(db) if db.name == name => {
                    debug!("Database {} already loaded", name);
                    return Ok(());
                }
                Some(db) if db.name != name && db.is_dirty() => Some(Self::snapshot(db)?),
                _ => None,
            }
        };
        if let Some(snapshot) = pending {
            info!("Saving database {} before switching to {}", snapshot.name, name);
            Self::write_snapshot(&snapshot).await?;
            self.mark_saved(&snapshot);
        }

        let file_path = self.database_path(name);
        let index = Self::read_index(&file_path).await?;
        debug!(
            "Loaded database {}: {} hashes, {} paths",
            name,
            index.by_hash.len(),
            index.by_path.len()
        );

        *self.lock_state() = Some(LoadedDatabase {
            name: name.to_string(),
            file_path,
            index,
            revision: 0,
            saved_revision: 0,
        });
        Ok(())
    }

    async fn get_all(&self) -> Result<Vec<BackupRecord>> {
        self.with_loaded(|db| {
            db.index
                .by_path
                .iter()
                .map(|(path, hash)| BackupRecord::new(hash.as_str(), path.as_str()))
                .collect()
        })
    }

    async fn insert(&self, record: BackupRecord) -> Result<()> {
        self.with_loaded(|db| {
            if db.index.insert(&record.file_hash, &record.file_path) {
                db.revision += 1;
            }
        })
    }

    async fn save(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let snapshot = {
            let state = self.lock_state();
            let db = state.as_ref().ok_or(BackupError::NotLoaded)?;
            Self::snapshot(db)?
        };
        Self::write_snapshot(&snapshot).await?;
        self.mark_saved(&snapshot);
        Ok(())
    }

    async fn find(&self, search: &RecordSearchModel) -> Result<Option<Vec<BackupRecord>>> {
        self.with_loaded(|db| {
            if let Some(hash) = &search.file_hash {
                non_empty(db.index.records_for_hash(hash))
            } else if let Some(path) = &search.file_path {
                db.index.record_for_path(path).map(|record| vec![record])
            } else {
                None
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use tempfile::TempDir;

    async fn loaded(temp_dir: &TempDir) -> LocalDatabase {
        let db = LocalDatabase::new(temp_dir.path());
        db.load("main").await.unwrap();
        db
    }

    #[tokio::test]
    async fn test_operations_before_load_fail() {
        let temp_dir = TempDir::new().unwrap();
        let db = LocalDatabase::new(temp_dir.path());

        assert!(matches!(db.get_all().await, Err(BackupError::NotLoaded)));
        assert!(matches!(db.save().await, Err(BackupError::NotLoaded)));
        assert!(matches!(
            db.insert(BackupRecord::new("h", "p")).await,
            Err(BackupError::NotLoaded)
        ));
        assert!(matches!(
            db.find(&RecordSearchModel::by_hash("h")).await,
            Err(BackupError::NotLoaded)
        ));
    }

    #[tokio::test]
    async fn test_shared_hash_keeps_both_paths() {
        let temp_dir = TempDir::new().unwrap();
        let db = loaded(&temp_dir).await;

        db.insert(BackupRecord::new("h1", "a.txt")).await.unwrap();
        db.insert(BackupRecord::new("h1", "copy/a.txt")).await.unwrap();
        db.insert(BackupRecord::new("h1", "a.txt")).await.unwrap();

        let mut paths: Vec<String> = db
            .find(&RecordSearchModel::by_hash("h1"))
            .await
            .unwrap()
            .unwrap()
            .into_iter()
            .map(|r| r.file_path)
            .collect();
        paths.sort();
        assert_eq!(paths, vec!["a.txt".to_string(), "copy/a.txt".to_string()]);

        let by_path = db
            .find(&RecordSearchModel::by_path("copy/a.txt"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_path, vec![BackupRecord::new("h1", "copy/a.txt")]);
    }

    #[tokio::test]
    async fn test_not_found_is_none() {
        let temp_dir = TempDir::new().unwrap();
        let db = loaded(&temp_dir).await;

        assert!(db.find(&RecordSearchModel::by_hash("x")).await.unwrap().is_none());
        assert!(db.find(&RecordSearchModel::by_path("x")).await.unwrap().is_none());
        assert!(db.find(&RecordSearchModel::default()).await.unwrap().is_none());
        assert!(db.find(&RecordSearchModel::by_id("x")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_repointed_path_leaves_old_hash() {
        let temp_dir = TempDir::new().unwrap();
        let db = loaded(&temp_dir).await;

        db.insert(BackupRecord::new("old", "a.txt")).await.unwrap();
        db.insert(BackupRecord::new("new", "a.txt")).await.unwrap();

        assert!(db.find(&RecordSearchModel::by_hash("old")).await.unwrap().is_none());
        assert_eq!(db.get_all().await.unwrap(), vec![BackupRecord::new("new", "a.txt")]);
    }

    #[tokio::test]
    async fn test_save_and_reload_file_format() {
        let temp_dir = TempDir::new().unwrap();
        let db = loaded(&temp_dir).await;
        db.insert(BackupRecord::new("h1", "Games/a.txt")).await.unwrap();
        db.insert(BackupRecord::new("h2", "Games/sub/b.txt")).await.unwrap();
        db.save().await.unwrap();

        let raw = std::fs::read_to_string(db.database_path("main")).unwrap();
        let parsed: HashMap<String, Vec<String>> = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed.get("h1"), Some(&vec!["Games/a.txt".to_string()]));
        assert_eq!(parsed.get("h2"), Some(&vec!["Games/sub/b.txt".to_string()]));

        let reopened = loaded(&temp_dir).await;
        assert_eq!(reopened.get_all().await.unwrap().len(), 2);
        assert!(reopened
            .find(&RecordSearchModel::by_path("Games/sub/b.txt"))
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_reloading_same_name_keeps_unsaved_records() {
        let temp_dir = TempDir::new().unwrap();
        let db = loaded(&temp_dir).await;
        db.insert(BackupRecord::new("h", "p")).await.unwrap();

        db.load("main").await.unwrap();
        assert_eq!(db.get_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_corrupt_file_starts_empty() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("main.json"), "[1, 2").unwrap();

        let db = loaded(&temp_dir).await;
        assert!(db.get_all().await.unwrap().is_empty());

        db.insert(BackupRecord::new("h", "p")).await.unwrap();
        db.save().await.unwrap();
        let reopened = loaded(&temp_dir).await;
        assert_eq!(reopened.get_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_switching_names_saves_pending_changes() {
        let temp_dir = TempDir::new().unwrap();
        let db = loaded(&temp_dir).await;
        db.insert(BackupRecord::new("h", "p")).await.unwrap();

        db.load("other").await.unwrap();
        assert_eq!(db.loaded_name().as_deref(), Some("other"));
        assert!(db.get_all().await.unwrap().is_empty());
        assert!(db.database_path("main").exists());

        db.load("main").await.unwrap();
        assert_eq!(db.get_all().await.unwrap(), vec![BackupRecord::new("h", "p")]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_inserts_and_saves() {
        let temp_dir = TempDir::new().unwrap();
        let db = Arc::new(loaded(&temp_dir).await);

        let mut handles = Vec::new();
        for worker in 0..4 {
            let db = db.clone();
            handles.push(tokio::spawn(async move {
                for i in 0..50 {
                    let path = format!("w{}/f{}.txt", worker, i);
                    db.insert(BackupRecord::new(format!("h{}", i), path)).await.unwrap();
                    if i % 10 == 0 {
                        db.save().await.unwrap();
                    }
                }
                db.save().await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let reopened = loaded(&temp_dir).await;
        assert_eq!(reopened.get_all().await.unwrap().len(), 200);
        let shared = reopened
            .find(&RecordSearchModel::by_hash("h7"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(shared.len(), 4);
    }
}
